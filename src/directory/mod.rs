//! Directory client: the remote API that owns organizations, schools,
//! classrooms, and the people in them.
//!
//! Every call is an at-most-once remote operation. The flow engine never
//! retries `create_entity`; failures are recorded as they come back.

mod http;

pub use http::HttpDirectory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DirectoryError;
use crate::onboarding::model::EntityKind;

/// Level of the directory hierarchy a context lives at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextScope {
    Organization,
    School,
    Classroom,
}

impl ContextScope {
    pub fn singular(&self) -> &'static str {
        match self {
            Self::Organization => "organization",
            Self::School => "school",
            Self::Classroom => "classroom",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            Self::Organization => "organizations",
            Self::School => "schools",
            Self::Classroom => "classrooms",
        }
    }
}

impl std::fmt::Display for ContextScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.singular())
    }
}

/// A place entities are created in, as of the time it was listed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub id: String,
    pub name: String,
    pub scope: ContextScope,
    /// `None` means unlimited.
    #[serde(default)]
    pub capacity_limit: Option<u32>,
    #[serde(default)]
    pub current_usage: u32,
}

/// A secondary placement target inside a context (e.g. a school in an organization).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubContext {
    pub id: String,
    pub name: String,
}

/// Current usage of a context. A `None` limit is unlimited, never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub current: u32,
    #[serde(default)]
    pub limit: Option<u32>,
}

impl Usage {
    /// Headroom left, or `None` when unlimited.
    pub fn remaining(&self) -> Option<u32> {
        self.limit.map(|limit| limit.saturating_sub(self.current))
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.limit, Some(limit) if self.current >= limit)
    }

    /// Whether `count` more entities fit.
    pub fn allows(&self, count: usize) -> bool {
        match self.remaining() {
            None => true,
            Some(remaining) => count <= remaining as usize,
        }
    }
}

/// What the directory echoes back after a create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedEntity {
    pub id: String,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// Remote directory operations used by the flow engine.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Contexts the operator may add entities to.
    async fn list_contexts(&self, scope: ContextScope) -> Result<Vec<Context>, DirectoryError>;

    /// Placement targets inside a context.
    async fn list_sub_contexts(&self, context_id: &str) -> Result<Vec<SubContext>, DirectoryError>;

    /// Fresh usage snapshot for a context.
    async fn get_usage(&self, context_id: &str) -> Result<Usage, DirectoryError>;

    /// Create one entity. Fails with `Validation`, `Conflict`, or `Transport`.
    async fn create_entity(
        &self,
        context_id: &str,
        kind: EntityKind,
        fields: serde_json::Value,
    ) -> Result<CreatedEntity, DirectoryError>;

    /// Place a created entity in a sub-context. Fails with `NotFound` or `Transport`.
    async fn assign_to_sub_context(
        &self,
        sub_context_id: &str,
        entity_id: &str,
        role_hint: Option<&str>,
    ) -> Result<(), DirectoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_usage_never_exhausts() {
        let usage = Usage {
            current: 10_000,
            limit: None,
        };
        assert!(!usage.is_exhausted());
        assert_eq!(usage.remaining(), None);
        assert!(usage.allows(1_000_000));
    }

    #[test]
    fn limited_usage_headroom() {
        let usage = Usage {
            current: 9,
            limit: Some(10),
        };
        assert_eq!(usage.remaining(), Some(1));
        assert!(usage.allows(1));
        assert!(!usage.allows(3));
        assert!(!usage.is_exhausted());
    }

    #[test]
    fn over_limit_is_exhausted() {
        let usage = Usage {
            current: 12,
            limit: Some(10),
        };
        assert!(usage.is_exhausted());
        assert_eq!(usage.remaining(), Some(0));
        assert!(usage.allows(0));
    }

    #[test]
    fn context_deserializes_without_capacity() {
        let json = r#"{"id": "org-1", "name": "Northside", "scope": "organization"}"#;
        let ctx: Context = serde_json::from_str(json).unwrap();
        assert_eq!(ctx.capacity_limit, None);
        assert_eq!(ctx.current_usage, 0);
    }

    #[test]
    fn created_entity_keeps_echoed_fields() {
        let json = r#"{"id": "t-9", "name": "Tom", "email": "tom@school.org"}"#;
        let created: CreatedEntity = serde_json::from_str(json).unwrap();
        assert_eq!(created.id, "t-9");
        assert_eq!(created.fields["email"], "tom@school.org");
    }
}
