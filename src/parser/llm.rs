//! LLM-backed entity parser.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::FlowConfig;
use crate::error::ParserError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::onboarding::model::{Candidate, OnboardingEntity};

use super::prompts::{
    extract_json_object, modification_system_prompt, modification_user_prompt,
    parse_system_prompt,
};
use super::{EntityParser, ModificationAction, ModificationOutcome, ParseOutcome};

/// Raw response shape shared by both operations.
#[derive(Debug, Deserialize)]
struct RawResponse {
    #[serde(default)]
    candidates: Vec<serde_json::Value>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    action: Option<ModificationAction>,
}

/// Parser that asks an LLM for structured JSON.
///
/// One instance serves every entity kind; prompts come from the kind's
/// `OnboardingEntity` implementation.
pub struct LlmEntityParser {
    llm: Arc<dyn LlmProvider>,
    temperature: f32,
    max_tokens: u32,
}

impl LlmEntityParser {
    pub fn new(llm: Arc<dyn LlmProvider>, config: &FlowConfig) -> Self {
        Self {
            llm,
            temperature: config.parser_temperature,
            max_tokens: config.parser_max_tokens,
        }
    }

    async fn ask(&self, system: String, user: String) -> Result<RawResponse, ParserError> {
        let request = CompletionRequest::new(vec![ChatMessage::system(system), ChatMessage::user(user)])
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);

        let response = self.llm.complete(request).await?;
        let json = extract_json_object(&response.content).ok_or_else(|| {
            ParserError::InvalidResponse {
                reason: "no JSON object in response".to_string(),
            }
        })?;

        serde_json::from_str(json).map_err(|e| {
            warn!(error = %e, response = %response.content, "Failed to parse entity JSON");
            ParserError::InvalidResponse {
                reason: e.to_string(),
            }
        })
    }
}

/// Decode candidate objects, skipping ones that don't fit the entity shape.
fn decode_candidates<T: OnboardingEntity>(raw: Vec<serde_json::Value>) -> Vec<Candidate<T>> {
    raw.into_iter()
        .filter_map(|value| match serde_json::from_value::<Candidate<T>>(value) {
            Ok(candidate) => Some(candidate.with_invariant()),
            Err(e) => {
                warn!(kind = %T::KIND, error = %e, "Dropping undecodable candidate");
                None
            }
        })
        .collect()
}

#[async_trait]
impl<T: OnboardingEntity> EntityParser<T> for LlmEntityParser {
    async fn parse_from_text(&self, text: &str) -> Result<ParseOutcome<T>, ParserError> {
        let raw = self
            .ask(parse_system_prompt::<T>(), text.to_string())
            .await?;
        let candidates = decode_candidates::<T>(raw.candidates);
        debug!(kind = %T::KIND, count = candidates.len(), "Parsed candidates");
        Ok(ParseOutcome {
            candidates,
            message: raw.message,
        })
    }

    async fn apply_modification(
        &self,
        text: &str,
        current: &[Candidate<T>],
    ) -> Result<ModificationOutcome<T>, ParserError> {
        let current_json = serde_json::to_string_pretty(current).map_err(|e| {
            ParserError::InvalidResponse {
                reason: format!("could not encode current list: {e}"),
            }
        })?;
        let raw = self
            .ask(
                modification_system_prompt::<T>(),
                modification_user_prompt(&current_json, text),
            )
            .await?;

        let action = raw.action.unwrap_or(ModificationAction::Unclear);
        let candidates = match action {
            ModificationAction::Applied => decode_candidates::<T>(raw.candidates),
            // The caller keeps its own set on unclear; echo it back unchanged.
            ModificationAction::Unclear => current.to_vec(),
        };
        debug!(kind = %T::KIND, ?action, count = candidates.len(), "Applied modification");
        Ok(ModificationOutcome {
            candidates,
            message: raw.message,
            action,
        })
    }
}
