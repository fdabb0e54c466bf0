//! Students: created inside a classroom, identified by name and birthdate.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::directory::ContextScope;
use crate::onboarding::model::{EntityKind, FieldSpec, OnboardingEntity};

use super::{check_name, tidy_name};

static ORDINAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d{1,2})(st|nd|rd|th)\b").expect("static regex"));

/// Accepted date layouts, day-first where ambiguous.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d/%m/%Y",
    "%d.%m.%Y",
    "%d-%m-%Y",
    "%d %B %Y",
    "%d %b %Y",
    "%B %d, %Y",
    "%B %d %Y",
    "%b %d, %Y",
    "%b %d %Y",
];

/// Local birthdate heuristic used when the parser is unavailable.
pub fn parse_birthdate(raw: &str) -> Option<NaiveDate> {
    let cleaned = ORDINAL_RE.replace_all(raw.trim(), "$1");
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&cleaned, fmt).ok())
}

fn check_birthdate(raw: &str) -> Result<String, String> {
    if raw.trim().is_empty() {
        return Err("The birthdate can't be empty.".to_string());
    }
    let date = parse_birthdate(raw).ok_or_else(|| {
        format!(
            "I couldn't read '{}' as a date. Try a format like 2012-04-23 or 23 April 2012.",
            raw.trim()
        )
    })?;
    if date > Utc::now().date_naive() {
        return Err(format!("{date} is in the future."));
    }
    if date < NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or(NaiveDate::MIN) {
        return Err(format!("{date} is too far in the past."));
    }
    Ok(date.format("%Y-%m-%d").to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    #[serde(default)]
    pub name: String,
    /// ISO `YYYY-MM-DD` once normalized.
    #[serde(default)]
    pub birthdate: String,
}

const FIELDS: &[FieldSpec] = &[
    FieldSpec {
        key: "name",
        label: "Name",
        prompt: "What's the student's full name?",
    },
    FieldSpec {
        key: "birthdate",
        label: "Birthdate",
        prompt: "When were they born?",
    },
];

impl OnboardingEntity for Student {
    const KIND: EntityKind = EntityKind::Student;
    const CONTEXT_SCOPE: ContextScope = ContextScope::Classroom;
    const USES_QUOTA: bool = true;
    const PLACEMENT: bool = false;
    const SCHEMA: &'static str = r#"{"name": "full name", "birthdate": "YYYY-MM-DD"}"#;
    const BATCH_EXAMPLE: &'static str =
        "Alice Moreau 2012-04-23, Ben Osei born 3 March 2013, Chloe Park 12/11/2012";
    const MODIFY_EXAMPLE: &'static str = "Ben's birthday is 4 March 2013";

    fn fields() -> &'static [FieldSpec] {
        FIELDS
    }

    fn check_field(key: &str, value: &str) -> Result<String, String> {
        match key {
            "name" => check_name(value, 100),
            "birthdate" => check_birthdate(value),
            other => Err(format!("Unknown field: {other}")),
        }
    }

    fn from_fields(fields: &BTreeMap<String, String>) -> Result<Self, String> {
        let name = check_name(fields.get("name").map(String::as_str).unwrap_or(""), 100)?;
        let birthdate = check_birthdate(fields.get("birthdate").map(String::as_str).unwrap_or(""))?;
        Ok(Self { name, birthdate })
    }

    fn field_value(&self, key: &str) -> Option<String> {
        let value = match key {
            "name" => &self.name,
            "birthdate" => &self.birthdate,
            _ => return None,
        };
        Some(value.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn normalize(&mut self) {
        self.name = tidy_name(&self.name);
        if let Some(date) = parse_birthdate(&self.birthdate) {
            self.birthdate = date.format("%Y-%m-%d").to_string();
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Missing name".to_string());
        }
        if self.birthdate.trim().is_empty() {
            return Err("Missing birthdate".to_string());
        }
        check_birthdate(&self.birthdate).map(|_| ())
    }

    fn identity_key(&self) -> String {
        let date = parse_birthdate(&self.birthdate)
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| self.birthdate.trim().to_string());
        format!("{}|{}", tidy_name(&self.name).to_lowercase(), date)
    }

    fn display_name(&self) -> String {
        if self.birthdate.is_empty() {
            self.name.clone()
        } else {
            format!("{} ({})", self.name, self.birthdate)
        }
    }

    fn columns() -> &'static [&'static str] {
        &["Name", "Birthdate"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.name.clone(), self.birthdate.clone()]
    }

    fn to_fields(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "birthdate": self.birthdate,
        })
    }
}
