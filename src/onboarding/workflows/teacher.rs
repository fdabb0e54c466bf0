//! Teachers: created in an organization, then optionally placed in a school.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::directory::ContextScope;
use crate::onboarding::model::{EntityKind, FieldSpec, OnboardingEntity};

use super::{check_name, tidy_name};

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static regex")
});

/// Staff designation inside the organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaffRole {
    #[default]
    Teacher,
    Admin,
}

impl StaffRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Teacher => "teacher",
            Self::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Teacher {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: StaffRole,
}

const FIELDS: &[FieldSpec] = &[
    FieldSpec {
        key: "name",
        label: "Name",
        prompt: "What's the teacher's full name?",
    },
    FieldSpec {
        key: "email",
        label: "Email",
        prompt: "What's their email address?",
    },
];

fn check_email(raw: &str) -> Result<String, String> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() {
        return Err("The email address can't be empty.".to_string());
    }
    if !EMAIL_RE.is_match(&email) {
        return Err(format!("'{}' isn't a valid email address.", raw.trim()));
    }
    Ok(email)
}

impl OnboardingEntity for Teacher {
    const KIND: EntityKind = EntityKind::Teacher;
    const CONTEXT_SCOPE: ContextScope = ContextScope::Organization;
    const USES_QUOTA: bool = true;
    const PLACEMENT: bool = true;
    const HAS_ROLE: bool = true;
    const SCHEMA: &'static str =
        r#"{"name": "full name", "email": "email address", "role": "teacher" | "admin"}"#;
    const BATCH_EXAMPLE: &'static str =
        "Maria Rivera maria@school.org, Tom Chen tom.chen@school.org (admin)";
    const MODIFY_EXAMPLE: &'static str = "change Tom's email to tchen@school.org";

    fn fields() -> &'static [FieldSpec] {
        FIELDS
    }

    fn check_field(key: &str, value: &str) -> Result<String, String> {
        match key {
            "name" => check_name(value, 100),
            "email" => check_email(value),
            other => Err(format!("Unknown field: {other}")),
        }
    }

    fn from_fields(fields: &BTreeMap<String, String>) -> Result<Self, String> {
        let name = check_name(fields.get("name").map(String::as_str).unwrap_or(""), 100)?;
        let email = check_email(fields.get("email").map(String::as_str).unwrap_or(""))?;
        Ok(Self {
            name,
            email,
            role: StaffRole::Teacher,
        })
    }

    fn field_value(&self, key: &str) -> Option<String> {
        let value = match key {
            "name" => &self.name,
            "email" => &self.email,
            _ => return None,
        };
        Some(value.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn normalize(&mut self) {
        self.name = tidy_name(&self.name);
        self.email = self.email.trim().to_lowercase();
    }

    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Missing name".to_string());
        }
        if self.email.trim().is_empty() {
            return Err("Missing email".to_string());
        }
        if !EMAIL_RE.is_match(self.email.trim()) {
            return Err(format!("Invalid email address: {}", self.email));
        }
        Ok(())
    }

    fn identity_key(&self) -> String {
        format!(
            "{}|{}",
            tidy_name(&self.name).to_lowercase(),
            self.email.trim().to_lowercase()
        )
    }

    fn display_name(&self) -> String {
        if self.email.is_empty() {
            self.name.clone()
        } else {
            format!("{} <{}>", self.name, self.email)
        }
    }

    fn columns() -> &'static [&'static str] {
        &["Name", "Email", "Role"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.email.clone(),
            self.role.as_str().to_string(),
        ]
    }

    fn to_fields(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "email": self.email,
            "role": self.role.as_str(),
        })
    }

    fn role_hint(&self) -> Option<&'static str> {
        Some(self.role.as_str())
    }

    fn toggle_role(&mut self) -> bool {
        self.role = match self.role {
            StaffRole::Teacher => StaffRole::Admin,
            StaffRole::Admin => StaffRole::Teacher,
        };
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn teacher(name: &str, email: &str) -> Teacher {
        Teacher {
            name: name.to_string(),
            email: email.to_string(),
            role: StaffRole::Teacher,
        }
    }

    #[test]
    fn email_check_normalizes_case() {
        assert_eq!(
            Teacher::check_field("email", " Maria@School.ORG ").unwrap(),
            "maria@school.org"
        );
        assert!(Teacher::check_field("email", "maria-at-school").is_err());
    }

    #[test]
    fn validate_requires_both_fields() {
        assert!(teacher("Maria", "maria@school.org").validate().is_ok());
        assert_eq!(teacher("Maria", "").validate().unwrap_err(), "Missing email");
        assert_eq!(teacher("", "m@s.org").validate().unwrap_err(), "Missing name");
    }

    #[test]
    fn identity_ignores_case_and_spacing() {
        assert_eq!(
            teacher("Maria  Rivera", "MARIA@school.org").identity_key(),
            teacher("maria rivera", "maria@school.org").identity_key()
        );
    }

    #[test]
    fn from_fields_builds_teacher() {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), "Tom Chen".to_string());
        fields.insert("email".to_string(), "Tom@School.org".to_string());
        let t = Teacher::from_fields(&fields).unwrap();
        assert_eq!(t.email, "tom@school.org");
        assert_eq!(t.role, StaffRole::Teacher);
    }

    #[test]
    fn toggle_role_flips_and_hints() {
        let mut t = teacher("Tom", "tom@school.org");
        assert_eq!(t.role_hint(), Some("teacher"));
        assert!(t.toggle_role());
        assert_eq!(t.role, StaffRole::Admin);
        assert_eq!(t.row()[2], "admin");
        assert!(t.toggle_role());
        assert_eq!(t.role, StaffRole::Teacher);
    }

    #[test]
    fn completeness_tracks_single_mode_fields() {
        assert!(!teacher("Tom", "").is_complete());
        assert!(teacher("Tom", "tom@school.org").is_complete());
    }
}
