//! Fatal error types.
//!
//! Everything that can degrade gracefully is a [`crate::validate::CompilerWarning`]
//! instead; the variants here abort the current call.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("invalid config: {reason}")]
    InvalidConfig { reason: String },

    #[error(
        "external data did not reach a fixed point after {iterations} fetch iterations (still pending: {})",
        pending.join(", ")
    )]
    ExternalResolutionDiverged {
        iterations: usize,
        pending: Vec<String>,
    },

    #[error("external data fetch failed: {message}")]
    ExternalDataFetch { message: String },

    #[error("backend request failed: {message}")]
    Backend { message: String },

    #[error("template discovery failed for {path}: {message}")]
    Discovery { path: String, message: String },
}

impl CompileError {
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

/// Raised by the token resolver when a reference names a token the theme
/// does not define.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown token '{token_id}' at '{path}'")]
pub struct UnknownTokenError {
    pub token_id: String,
    pub path: String,
}

pub type Result<T> = std::result::Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diverged_message_lists_pending() {
        let err = CompileError::ExternalResolutionDiverged {
            iterations: 3,
            pending: vec!["$.image".to_string(), "b.video".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "external data did not reach a fixed point after 3 fetch iterations (still pending: $.image, b.video)"
        );
    }

    #[test]
    fn test_unknown_token_message() {
        let err = UnknownTokenError {
            token_id: "brand".to_string(),
            path: "root.color".to_string(),
        };
        assert_eq!(err.to_string(), "unknown token 'brand' at 'root.color'");
    }
}
