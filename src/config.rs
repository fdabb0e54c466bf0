//! Configuration types.

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::LlmBackend;

/// Engine tunables shared by every workflow.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// Parses yielding more candidates than this are rejected with a re-prompt.
    pub max_batch_candidates: usize,
    /// LLM temperature for parse/modify calls.
    pub parser_temperature: f32,
    /// Max tokens for a parse/modify response.
    pub parser_max_tokens: u32,
    /// Broadcast buffer for flow events.
    pub event_capacity: usize,
    /// Messages kept in the log before the oldest inert ones are pruned.
    pub history_limit: usize,
    /// Sessions untouched for this long are dropped.
    pub session_idle_minutes: u32,
    /// Halted sessions stay readable for this long after their last event.
    pub halted_retention_minutes: u32,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            max_batch_candidates: 200,
            parser_temperature: 0.0,
            parser_max_tokens: 2048,
            event_capacity: 256,
            history_limit: 500,
            session_idle_minutes: 60,
            halted_retention_minutes: 5,
        }
    }
}

impl FlowConfig {
    pub fn with_max_batch_candidates(mut self, max: usize) -> Self {
        self.max_batch_candidates = max;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn with_session_idle_minutes(mut self, minutes: u32) -> Self {
        self.session_idle_minutes = minutes;
        self
    }
}

/// Process configuration for the HTTP driver binary.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub directory_url: String,
    pub directory_token: Option<SecretString>,
    pub llm_backend: LlmBackend,
    pub llm_api_key: SecretString,
    pub model: String,
}

impl ServerConfig {
    pub const DEFAULT_PORT: u16 = 8080;
    pub const DEFAULT_MODEL: &'static str = "claude-sonnet-4-20250514";

    /// Load from `ONBOARD_*` and provider API key environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match std::env::var("ONBOARD_PORT") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "ONBOARD_PORT".to_string(),
                message: format!("'{raw}' is not a port number"),
            })?,
            Err(_) => Self::DEFAULT_PORT,
        };

        let directory_url = std::env::var("ONBOARD_DIRECTORY_URL")
            .map_err(|_| ConfigError::MissingEnvVar("ONBOARD_DIRECTORY_URL".to_string()))?;

        let directory_token = std::env::var("ONBOARD_DIRECTORY_TOKEN")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(SecretString::from);

        let llm_backend = match std::env::var("ONBOARD_LLM_BACKEND") {
            Ok(raw) => parse_backend(&raw)?,
            Err(_) => LlmBackend::Anthropic,
        };

        let key_var = match llm_backend {
            LlmBackend::Anthropic => "ANTHROPIC_API_KEY",
            LlmBackend::OpenAi => "OPENAI_API_KEY",
        };
        let llm_api_key = std::env::var(key_var)
            .map(SecretString::from)
            .map_err(|_| ConfigError::MissingEnvVar(key_var.to_string()))?;

        let model =
            std::env::var("ONBOARD_MODEL").unwrap_or_else(|_| Self::DEFAULT_MODEL.to_string());

        Ok(Self {
            port,
            directory_url,
            directory_token,
            llm_backend,
            llm_api_key,
            model,
        })
    }
}

fn parse_backend(raw: &str) -> Result<LlmBackend, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "anthropic" => Ok(LlmBackend::Anthropic),
        "openai" => Ok(LlmBackend::OpenAi),
        other => Err(ConfigError::InvalidValue {
            key: "ONBOARD_LLM_BACKEND".to_string(),
            message: format!("unknown backend '{other}' (expected anthropic or openai)"),
        }),
    }
}
