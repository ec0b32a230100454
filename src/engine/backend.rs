//! Inference backend contract.
//!
//! A [`Backend`] is the loaded model: vocabulary plus read-only weights,
//! shared by reference between every context created from it. An
//! [`Evaluator`] is the mutable decode state of one context (the KV cache in
//! llama.cpp terms). Both are injected into a `ModelHandle`, which is how
//! tests substitute deterministic evaluation.

use super::error::CompletionError;

/// Vocabulary token identifier.
pub type TokenId = u32;

/// Loaded model shared between contexts.
pub trait Backend: Send + Sync {
    /// Human-readable model name, reported on every completion.
    fn model_name(&self) -> &str;

    /// Tokenize raw bytes. Unknown byte runs map to the unknown token.
    fn tokenize(&self, text: &[u8], add_bos: bool) -> Result<Vec<TokenId>, CompletionError>;

    /// Convert token ids back to bytes.
    fn detokenize(&self, tokens: &[TokenId]) -> Result<Vec<u8>, CompletionError>;

    fn token_bos(&self) -> TokenId;

    fn token_eos(&self) -> TokenId;

    /// Unknown-token id, if the vocabulary has one.
    fn token_unknown(&self) -> Option<TokenId>;

    fn vocab_size(&self) -> usize;

    /// Hard ceiling on the sequence length a context may hold.
    fn max_sequence_length(&self) -> usize;

    /// Stable identity of the loaded weights. Snapshots taken against one
    /// fingerprint cannot be restored against another.
    fn fingerprint(&self) -> u64;

    /// Check if token ends generation.
    fn is_end_of_sequence(&self, token: TokenId) -> bool {
        token == self.token_eos()
    }

    /// Create fresh decode state for a context of `n_ctx` tokens.
    fn new_evaluator(&self, n_ctx: usize) -> Result<Box<dyn Evaluator>, CompletionError>;
}

/// Per-context decode state.
pub trait Evaluator: Send {
    /// Evaluate `tokens` at positions `n_past..n_past + tokens.len()`.
    fn eval(&mut self, tokens: &[TokenId], n_past: usize) -> Result<(), CompletionError>;

    /// Logits for the last evaluated position.
    fn logits(&self) -> &[f32];

    /// Drop cached state for every position at or after `n_keep`.
    fn truncate(&mut self, n_keep: usize) -> Result<(), CompletionError>;

    /// Export the cache, if this evaluator supports it. Contexts without an
    /// exportable cache are rebuilt on restore by replaying their history.
    fn save_cache(&self) -> Option<Vec<u8>> {
        None
    }

    /// Import a cache produced by [`Evaluator::save_cache`].
    fn load_cache(&mut self, _cache: &[u8]) -> Result<(), CompletionError> {
        Err(CompletionError::IncompatibleState(
            "evaluator does not support cache import".into(),
        ))
    }
}

/// Outcome of appending tokens to a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalResult {
    /// Position after the append.
    pub n_past: usize,
    /// Tokens evaluated by this call.
    pub n_evaluated: usize,
}
