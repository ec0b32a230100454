//! Advisory warnings attached to completion results.

use tracing::warn;

/// Warnings collected while preparing and running one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    warnings: Vec<String>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prompt tokenization produced unknown tokens.
    pub fn out_of_vocabulary(&mut self, unknown: usize) {
        if unknown == 0 {
            return;
        }
        self.push(format!(
            "prompt contains {} out of vocabulary token{}",
            unknown,
            if unknown == 1 { "" } else { "s" }
        ));
    }

    /// Prompt was cut to fit the context window.
    pub fn prompt_truncated(&mut self, original: usize, kept: usize, n_ctx: usize) {
        self.push(format!(
            "prompt of {} tokens exceeds context window of {}; truncated to the last {} tokens",
            original, n_ctx, kept
        ));
    }

    /// Token budget was cut below `max_tokens` by the context window.
    pub fn budget_limited(&mut self, requested: usize, budget: usize) {
        self.push(format!(
            "completion limited by context window to {} of {} requested tokens",
            budget, requested
        ));
    }

    fn push(&mut self, message: String) {
        warn!(warning = %message, "completion diagnostic");
        self.warnings.push(message);
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// All warnings joined into one message, if any.
    pub fn to_warning(&self) -> Option<String> {
        if self.warnings.is_empty() {
            None
        } else {
            Some(self.warnings.join("; "))
        }
    }
}
