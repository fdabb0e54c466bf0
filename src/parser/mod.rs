//! Entity parser client: turns free text into candidate entities.
//!
//! Both operations are stateless from the caller's side: a modification
//! always carries the complete current working set.

mod llm;
pub mod prompts;

pub use llm::LlmEntityParser;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ParserError;
use crate::onboarding::model::{Candidate, OnboardingEntity};

/// Result of parsing free text from scratch.
///
/// An empty `candidates` list is a valid answer, not an error.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutcome<T> {
    pub candidates: Vec<Candidate<T>>,
    pub message: String,
}

/// Whether the parser understood a correction request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModificationAction {
    Applied,
    Unclear,
}

/// Result of applying a correction to the working set.
#[derive(Debug, Clone, PartialEq)]
pub struct ModificationOutcome<T> {
    /// Full replacement set.
    pub candidates: Vec<Candidate<T>>,
    pub message: String,
    pub action: ModificationAction,
}

/// Natural-language entity extraction for one entity kind.
#[async_trait]
pub trait EntityParser<T: OnboardingEntity>: Send + Sync {
    /// Extract candidates from free text.
    async fn parse_from_text(&self, text: &str) -> Result<ParseOutcome<T>, ParserError>;

    /// Apply a correction to the complete current set.
    async fn apply_modification(
        &self,
        text: &str,
        current: &[Candidate<T>],
    ) -> Result<ModificationOutcome<T>, ParserError>;
}
