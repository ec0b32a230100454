//! Telemetry module for Ember CORE.
//!
//! Provides structured logging, per-completion spans, and metrics.

mod logging;
mod metrics;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use metrics::{
    init_metrics, record_completion, record_completion_error, record_prompt_cache_hit,
    COMPLETIONS_TOTAL, COMPLETION_ERRORS_TOTAL, COMPLETION_TOKENS, PROMPT_CACHE_HITS_TOTAL,
    PROMPT_TOKENS,
};
pub use spans::{CompletionSpan, SpanExt};
