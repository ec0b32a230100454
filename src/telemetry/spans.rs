//! Span utilities and extension traits for Ember CORE tracing.
//!
//! Provides standardized span creation and result recording.

use tracing::{info_span, Span};

/// Extension trait for adding context to spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Factory for per-completion spans.
pub struct CompletionSpan;

impl CompletionSpan {
    /// Create a completion span.
    ///
    /// Fields included:
    /// - `request_id`: completion id (`cmpl-...`)
    /// - `model`: model name
    /// - `stream`: whether fragments are delivered incrementally
    /// - `status`: filled in by `SpanExt::record_result`
    /// - `error.message`: filled in on error
    /// - `finish_reason`: filled in when generation ends
    /// - `completion_tokens`: filled in when generation ends
    pub fn new(request_id: &str, model: &str, stream: bool) -> Span {
        info_span!(
            "completion",
            request_id = %request_id,
            model = %model,
            stream,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
            finish_reason = tracing::field::Empty,
            completion_tokens = tracing::field::Empty,
        )
    }
}
