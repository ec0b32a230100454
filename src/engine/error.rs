//! Completion error types for Ember CORE.
//!
//! Long prompts and unknown tokens are not errors; they surface as warnings
//! on the result. Everything here aborts the request it occurs in.

use thiserror::Error;

/// Errors that can occur while tokenizing, evaluating or completing.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid generation config: {0}")]
    InvalidConfig(String),

    #[error("Context overflow: max {max} tokens, got {got}")]
    ContextOverflow { max: usize, got: usize },

    #[error("Incompatible context state: {0}")]
    IncompatibleState(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Context busy: a generation is already in flight")]
    ContextBusy,
}

impl CompletionError {
    /// Returns true if the caller can retry or adjust the request.
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::ContextBusy | Self::ContextOverflow { .. })
    }

    /// Returns true if the context state cannot be trusted after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::IncompatibleState(_) | Self::Backend(_))
    }

    /// Short label used for metrics and span fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::InvalidConfig(_) => "invalid_config",
            Self::ContextOverflow { .. } => "context_overflow",
            Self::IncompatibleState(_) => "incompatible_state",
            Self::Backend(_) => "backend",
            Self::ContextBusy => "context_busy",
        }
    }
}
