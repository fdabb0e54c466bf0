//! Classrooms: created inside a school, no capacity check.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::directory::ContextScope;
use crate::onboarding::model::{EntityKind, FieldSpec, OnboardingEntity};

use super::{check_name, tidy_name};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classroom {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade: Option<String>,
}

const FIELDS: &[FieldSpec] = &[FieldSpec {
    key: "name",
    label: "Name",
    prompt: "What should the classroom be called?",
}];

impl OnboardingEntity for Classroom {
    const KIND: EntityKind = EntityKind::Classroom;
    const CONTEXT_SCOPE: ContextScope = ContextScope::School;
    const USES_QUOTA: bool = false;
    const PLACEMENT: bool = false;
    const SCHEMA: &'static str = r#"{"name": "classroom name", "grade": "grade level or null"}"#;
    const BATCH_EXAMPLE: &'static str = "3A and 3B for grade 3, Art Studio";
    const MODIFY_EXAMPLE: &'static str = "rename 3B to 3C";

    fn fields() -> &'static [FieldSpec] {
        FIELDS
    }

    fn check_field(key: &str, value: &str) -> Result<String, String> {
        match key {
            "name" => check_name(value, 80),
            other => Err(format!("Unknown field: {other}")),
        }
    }

    fn from_fields(fields: &BTreeMap<String, String>) -> Result<Self, String> {
        let name = check_name(fields.get("name").map(String::as_str).unwrap_or(""), 80)?;
        Ok(Self { name, grade: None })
    }

    fn field_value(&self, key: &str) -> Option<String> {
        match key {
            "name" => Some(self.name.trim().to_string()).filter(|v| !v.is_empty()),
            _ => None,
        }
    }

    fn normalize(&mut self) {
        self.name = tidy_name(&self.name);
        self.grade = self
            .grade
            .take()
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty());
    }

    fn validate(&self) -> Result<(), String> {
        check_name(&self.name, 80).map(|_| ())
    }

    fn identity_key(&self) -> String {
        tidy_name(&self.name).to_lowercase()
    }

    fn display_name(&self) -> String {
        self.name.clone()
    }

    fn columns() -> &'static [&'static str] {
        &["Name", "Grade"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.name.clone(), self.grade.clone().unwrap_or_default()]
    }

    fn to_fields(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "grade": self.grade,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_case_insensitive_name() {
        let a = Classroom {
            name: "Room 3B".into(),
            grade: Some("3".into()),
        };
        let b = Classroom {
            name: "room  3b".into(),
            grade: None,
        };
        assert_eq!(a.identity_key(), b.identity_key());
    }

    #[test]
    fn normalize_drops_blank_grade() {
        let mut c = Classroom {
            name: " Art  Studio ".into(),
            grade: Some("  ".into()),
        };
        c.normalize();
        assert_eq!(c.name, "Art Studio");
        assert!(c.grade.is_none());
    }

    #[test]
    fn single_field_means_complete_after_name() {
        let c = Classroom {
            name: "3A".into(),
            grade: None,
        };
        assert!(c.is_complete());
        assert_eq!(c.row(), vec!["3A".to_string(), String::new()]);
    }
}
