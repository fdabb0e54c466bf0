//! Candidate entities, the per-role entity contract, and execution results.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::directory::{ContextScope, SubContext};

/// Which kind of entity a workflow onboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Teacher,
    Student,
    Classroom,
}

impl EntityKind {
    pub fn singular(&self) -> &'static str {
        match self {
            Self::Teacher => "teacher",
            Self::Student => "student",
            Self::Classroom => "classroom",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            Self::Teacher => "teachers",
            Self::Student => "students",
            Self::Classroom => "classrooms",
        }
    }

    /// "1 teacher", "3 teachers".
    pub fn count(&self, n: usize) -> String {
        if n == 1 {
            format!("1 {}", self.singular())
        } else {
            format!("{n} {}", self.plural())
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.singular())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "teacher" | "teachers" => Ok(Self::Teacher),
            "student" | "students" => Ok(Self::Student),
            "classroom" | "classrooms" => Ok(Self::Classroom),
            _ => Err(format!("Unknown entity kind: {}", s)),
        }
    }
}

/// One field collected in one-at-a-time mode.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub key: &'static str,
    pub label: &'static str,
    pub prompt: &'static str,
}

/// Role-specific behaviour plugged into the generic flow engine.
///
/// Implementors are plain data records; `Candidate<T>` wraps them with
/// validity state.
pub trait OnboardingEntity:
    Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KIND: EntityKind;
    /// Scope of the context entities are created in.
    const CONTEXT_SCOPE: ContextScope;
    /// Whether capacity is checked before input.
    const USES_QUOTA: bool;
    /// Whether each created entity is offered a sub-context placement.
    const PLACEMENT: bool;
    /// Whether rows carry a role designation that can be toggled.
    const HAS_ROLE: bool = false;
    /// JSON shape of one entity, shown to the parser.
    const SCHEMA: &'static str;
    /// Example free-text batch input.
    const BATCH_EXAMPLE: &'static str;
    /// Example correction request.
    const MODIFY_EXAMPLE: &'static str;

    /// Fields collected one by one in single mode, in order.
    fn fields() -> &'static [FieldSpec];

    /// Local input-shape check for one field. Returns the normalized value.
    fn check_field(key: &str, value: &str) -> Result<String, String>;

    /// Build an entity from locally collected fields (no parser involved).
    fn from_fields(fields: &BTreeMap<String, String>) -> Result<Self, String>;

    /// Value of a collected field, if present and non-empty.
    fn field_value(&self, key: &str) -> Option<String>;

    /// Canonicalize field formats in place (dates, whitespace).
    fn normalize(&mut self) {}

    /// Structural validation of a complete entity.
    fn validate(&self) -> Result<(), String>;

    /// Identity used for duplicate detection.
    fn identity_key(&self) -> String;

    fn display_name(&self) -> String;

    fn columns() -> &'static [&'static str];

    fn row(&self) -> Vec<String>;

    /// Payload sent to the directory's create call.
    fn to_fields(&self) -> serde_json::Value;

    /// Role hint passed along with a sub-context placement.
    fn role_hint(&self) -> Option<&'static str> {
        None
    }

    /// Flip the role designation. Returns false if the entity has none.
    fn toggle_role(&mut self) -> bool {
        false
    }

    /// Whether every single-mode field is filled in.
    fn is_complete(&self) -> bool {
        Self::fields()
            .iter()
            .all(|f| self.field_value(f.key).is_some())
    }
}

/// A not-yet-committed entity with its validity state.
///
/// `valid == true` implies `error == None`; `valid == false` implies a
/// non-empty `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate<T> {
    #[serde(flatten)]
    pub entity: T,
    #[serde(default = "default_valid")]
    pub valid: bool,
    #[serde(default)]
    pub error: Option<String>,
}

fn default_valid() -> bool {
    true
}

/// Used when the parser rejects a row without saying why.
pub const UNSPECIFIED_ERROR: &str = "Needs review";

impl<T: OnboardingEntity> Candidate<T> {
    pub fn valid(entity: T) -> Self {
        Self {
            entity,
            valid: true,
            error: None,
        }
    }

    pub fn invalid(entity: T, error: impl Into<String>) -> Self {
        Self {
            entity,
            valid: false,
            error: Some(error.into()),
        }
        .with_invariant()
    }

    /// Repair the valid/error pairing without judging the content.
    pub fn with_invariant(mut self) -> Self {
        if self.valid {
            self.error = None;
        } else {
            let missing = self
                .error
                .as_deref()
                .map(|e| e.trim().is_empty())
                .unwrap_or(true);
            if missing {
                self.error = Some(UNSPECIFIED_ERROR.to_string());
            }
        }
        self
    }

    /// Normalize the entity and re-run local validation.
    ///
    /// A rejection from the parser is kept; a local failure is added on top.
    pub fn revalidated(mut self) -> Self {
        self.entity.normalize();
        if let Err(local) = self.entity.validate() {
            let existing = if self.valid { None } else { self.error.take() };
            self.error = Some(match existing {
                Some(e) if e.trim().is_empty() => local,
                Some(e) if e == local => e,
                Some(e) => format!("{e}; {local}"),
                None => local,
            });
            self.valid = false;
        }
        self.with_invariant()
    }

    pub fn status_label(&self) -> String {
        match &self.error {
            None => "OK".to_string(),
            Some(e) => format!("⚠ {e}"),
        }
    }
}

/// Drop later rows whose identity key repeats an earlier one.
///
/// Returns the kept rows in original order plus one notice per dropped row.
pub fn dedupe<T: OnboardingEntity>(candidates: Vec<Candidate<T>>) -> (Vec<Candidate<T>>, Vec<String>) {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(candidates.len());
    let mut notices = Vec::new();

    for candidate in candidates {
        if seen.insert(candidate.entity.identity_key()) {
            kept.push(candidate);
        } else {
            notices.push(format!(
                "Removed duplicate: {}",
                candidate.entity.display_name()
            ));
        }
    }

    (kept, notices)
}

/// Outcome of one create call. Appended in processing order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult<T> {
    pub entity: T,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_context_assigned: Option<SubContext>,
}

impl<T> ExecutionResult<T> {
    pub fn created(entity: T, id: impl Into<String>) -> Self {
        Self {
            entity,
            success: true,
            error: None,
            created_id: Some(id.into()),
            sub_context_assigned: None,
        }
    }

    pub fn failed(entity: T, error: impl Into<String>) -> Self {
        Self {
            entity,
            success: false,
            error: Some(error.into()),
            created_id: None,
            sub_context_assigned: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onboarding::workflows::{Student, Teacher};

    fn student(name: &str, birthdate: &str) -> Student {
        Student {
            name: name.to_string(),
            birthdate: birthdate.to_string(),
        }
    }

    #[test]
    fn invariant_fills_missing_error() {
        let c = Candidate {
            entity: student("Alice", "2010-01-01"),
            valid: false,
            error: Some("   ".to_string()),
        }
        .with_invariant();
        assert_eq!(c.error.as_deref(), Some(UNSPECIFIED_ERROR));
    }

    #[test]
    fn invariant_clears_error_on_valid() {
        let c = Candidate {
            entity: student("Alice", "2010-01-01"),
            valid: true,
            error: Some("stale".to_string()),
        }
        .with_invariant();
        assert!(c.error.is_none());
    }

    #[test]
    fn revalidated_normalizes_and_flags() {
        let ok = Candidate::valid(student("Alice", "01/02/2010")).revalidated();
        assert!(ok.valid);
        assert_eq!(ok.entity.birthdate, "2010-02-01");

        let bad = Candidate::valid(student("", "2010-01-01")).revalidated();
        assert!(!bad.valid);
        assert!(bad.error.unwrap().contains("name"));
    }

    #[test]
    fn revalidated_keeps_parser_rejection() {
        let c = Candidate::invalid(student("Alice", "2010-01-01"), "Name rejected by policy")
            .revalidated();
        assert!(!c.valid);
        assert_eq!(c.error.as_deref(), Some("Name rejected by policy"));
    }

    #[test]
    fn dedupe_keeps_first_and_reports() {
        let rows = vec![
            Candidate::valid(student("Alice", "2010-01-01")),
            Candidate::valid(student("Bob", "2011-05-05")),
            Candidate::valid(student("alice", "2010-01-01")),
        ];
        let (kept, notices) = dedupe(rows);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].entity.name, "Alice");
        assert_eq!(notices.len(), 1);
        assert!(notices[0].contains("duplicate"));
    }

    #[test]
    fn dedupe_distinguishes_birthdates() {
        let rows = vec![
            Candidate::valid(student("Alice", "2010-01-01")),
            Candidate::valid(student("Alice", "2010-01-02")),
        ];
        let (kept, notices) = dedupe(rows);
        assert_eq!(kept.len(), 2);
        assert!(notices.is_empty());
    }

    #[test]
    fn candidate_serde_flattens_entity() {
        let json = serde_json::json!({
            "name": "Ms. Rivera",
            "email": "rivera@school.org",
            "valid": true,
            "error": null
        });
        let c: Candidate<Teacher> = serde_json::from_value(json).unwrap();
        assert_eq!(c.entity.email, "rivera@school.org");
        assert!(c.valid);
    }

    #[test]
    fn entity_kind_counts_and_parse() {
        assert_eq!(EntityKind::Student.count(1), "1 student");
        assert_eq!(EntityKind::Teacher.count(3), "3 teachers");
        assert_eq!("classrooms".parse::<EntityKind>().unwrap(), EntityKind::Classroom);
        assert!("parents".parse::<EntityKind>().is_err());
    }
}
