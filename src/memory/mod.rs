//! Memory module for Ember CORE.
//!
//! Provides the prompt cache used for prefix reuse across requests.

mod prompt_cache;

pub use prompt_cache::{CachedPrompt, PromptCache};
