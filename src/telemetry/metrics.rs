//! Completion metrics through the `metrics` facade.
//!
//! Nothing is exported unless the host installs a recorder.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

use crate::engine::FinishReason;

pub const COMPLETIONS_TOTAL: &str = "ember_completions_total";
pub const COMPLETION_TOKENS: &str = "ember_completion_tokens";
pub const PROMPT_TOKENS: &str = "ember_prompt_tokens";
pub const COMPLETION_ERRORS_TOTAL: &str = "ember_completion_errors_total";
pub const PROMPT_CACHE_HITS_TOTAL: &str = "ember_prompt_cache_hits_total";

/// Register metric descriptions with the installed recorder.
pub fn init_metrics() {
    describe_counter!(COMPLETIONS_TOTAL, "Finished completions by finish reason");
    describe_histogram!(COMPLETION_TOKENS, Unit::Count, "Generated tokens per completion");
    describe_histogram!(PROMPT_TOKENS, Unit::Count, "Prompt tokens per completion");
    describe_counter!(COMPLETION_ERRORS_TOTAL, "Failed completions by error kind");
    describe_counter!(PROMPT_CACHE_HITS_TOTAL, "Prompts restored from the prompt cache");
}

/// Record a finished completion.
pub fn record_completion(reason: FinishReason, prompt_tokens: usize, completion_tokens: usize) {
    counter!(COMPLETIONS_TOTAL, "finish_reason" => reason.as_str()).increment(1);
    histogram!(COMPLETION_TOKENS).record(completion_tokens as f64);
    histogram!(PROMPT_TOKENS).record(prompt_tokens as f64);
}

/// Record a failed completion.
pub fn record_completion_error(kind: &'static str) {
    counter!(COMPLETION_ERRORS_TOTAL, "kind" => kind).increment(1);
}

pub fn record_prompt_cache_hit() {
    counter!(PROMPT_CACHE_HITS_TOTAL).increment(1);
}
