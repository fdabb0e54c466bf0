//! Error types for the onboarding service.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Parser error: {0}")]
    Parser(#[from] ParserError),

    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Flow error: {0}")]
    Flow(#[from] FlowError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

/// Entity parser failures. "Nothing found" is not one of them.
#[derive(Debug, thiserror::Error)]
pub enum ParserError {
    #[error("Parser unreachable: {0}")]
    Transport(#[from] LlmError),

    #[error("Parser returned an unreadable response: {reason}")]
    InvalidResponse { reason: String },
}

/// Directory API failures, mirroring the remote contract.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Already exists: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Directory unreachable: {0}")]
    Transport(String),
}

impl DirectoryError {
    /// Whether the failure came from the network rather than the directory's verdict.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<reqwest::Error> for DirectoryError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Errors at the session/driver boundary. The engine itself never returns these.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("Flow session {id} not found")]
    SessionNotFound { id: Uuid },

    #[error("Unknown workflow kind: {0}")]
    UnknownKind(String),

    #[error("Input is disabled while the flow is busy or finished")]
    InputDisabled,

    #[error("Command is not currently offered: {0}")]
    StaleCommand(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_error_transport_flag() {
        assert!(DirectoryError::Transport("timeout".into()).is_transport());
        assert!(!DirectoryError::Conflict("dup".into()).is_transport());
        assert!(!DirectoryError::Validation("bad email".into()).is_transport());
    }

    #[test]
    fn parser_error_wraps_llm_error() {
        let err: ParserError = LlmError::AuthFailed {
            provider: "anthropic".into(),
        }
        .into();
        assert!(matches!(err, ParserError::Transport(_)));
        assert!(err.to_string().contains("anthropic"));
    }

    #[test]
    fn top_level_from_conversions() {
        let err: Error = DirectoryError::NotFound("school 7".into()).into();
        assert!(err.to_string().contains("school 7"));
        let err: Error = ConfigError::MissingEnvVar("ONBOARD_DIRECTORY_URL".into()).into();
        assert!(err.to_string().contains("ONBOARD_DIRECTORY_URL"));
    }
}
