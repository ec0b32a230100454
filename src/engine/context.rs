//! Mutable decode state for one model context.
//!
//! History is append-only during a generation. Between requests it may be
//! rewound to a shared prefix so the next prompt only evaluates what changed.

use std::sync::Arc;

use tracing::debug;

use super::backend::{Backend, EvalResult, Evaluator, TokenId};
use super::error::CompletionError;
use super::snapshot::ContextSnapshot;

/// Decode history, cached logits and evaluator cache for one context.
pub struct ContextState {
    backend: Arc<dyn Backend>,
    evaluator: Box<dyn Evaluator>,
    tokens: Vec<TokenId>,
    logits: Vec<f32>,
    n_ctx: usize,
    n_batch: usize,
}

impl ContextState {
    /// Create an empty context around an injected evaluator.
    pub fn with_evaluator(
        backend: Arc<dyn Backend>,
        evaluator: Box<dyn Evaluator>,
        n_ctx: usize,
        n_batch: usize,
    ) -> Self {
        Self {
            backend,
            evaluator,
            tokens: Vec::new(),
            logits: Vec::new(),
            n_ctx: n_ctx.max(1),
            n_batch: n_batch.max(1),
        }
    }

    /// Extend the history, evaluating in batches of `n_batch`.
    pub fn append(&mut self, tokens: &[TokenId]) -> Result<EvalResult, CompletionError> {
        let got = self.tokens.len() + tokens.len();
        if got > self.n_ctx {
            return Err(CompletionError::ContextOverflow { max: self.n_ctx, got });
        }
        for batch in tokens.chunks(self.n_batch) {
            self.evaluator.eval(batch, self.tokens.len())?;
            self.tokens.extend_from_slice(batch);
        }
        if !tokens.is_empty() {
            self.logits.clear();
            self.logits.extend_from_slice(self.evaluator.logits());
        }
        Ok(EvalResult { n_past: self.tokens.len(), n_evaluated: tokens.len() })
    }

    /// Rewind history to the first `n_keep` tokens.
    pub fn truncate(&mut self, n_keep: usize) -> Result<(), CompletionError> {
        if n_keep >= self.tokens.len() {
            return Ok(());
        }
        self.evaluator.truncate(n_keep)?;
        self.tokens.truncate(n_keep);
        // Logits belong to the dropped position; the caller re-evaluates before sampling.
        self.logits.clear();
        Ok(())
    }

    /// Clear all history.
    pub fn reset(&mut self) -> Result<(), CompletionError> {
        self.truncate(0)
    }

    /// Length of the shared prefix between the history and `tokens`.
    pub fn common_prefix_len(&self, tokens: &[TokenId]) -> usize {
        self.tokens
            .iter()
            .zip(tokens)
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// Make the history equal to `tokens`, reusing any shared prefix.
    ///
    /// The last prompt token is always evaluated so fresh logits exist.
    pub fn ingest(&mut self, tokens: &[TokenId]) -> Result<EvalResult, CompletionError> {
        let mut prefix = self.common_prefix_len(tokens);
        if prefix == tokens.len() && prefix > 0 {
            prefix -= 1;
        }
        if prefix > 0 {
            debug!(reused = prefix, total = tokens.len(), "reusing context prefix");
        }
        self.truncate(prefix)?;
        self.append(&tokens[prefix..])
    }

    /// Serialize history, logits and (when exportable) evaluator cache.
    pub fn snapshot(&self) -> Vec<u8> {
        self.to_snapshot().encode()
    }

    pub(crate) fn to_snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            fingerprint: self.backend.fingerprint(),
            n_ctx: self.n_ctx,
            tokens: self.tokens.clone(),
            logits: self.logits.clone(),
            cache: self.evaluator.save_cache(),
        }
    }

    /// Replace this context's state with a snapshot.
    pub fn restore_from(&mut self, bytes: &[u8]) -> Result<(), CompletionError> {
        let snapshot = ContextSnapshot::decode(bytes)?;
        self.apply(snapshot)
    }

    fn apply(&mut self, snapshot: ContextSnapshot) -> Result<(), CompletionError> {
        let expected = self.backend.fingerprint();
        if snapshot.fingerprint != expected {
            return Err(CompletionError::IncompatibleState(format!(
                "snapshot taken from model {:016x}, handle holds {:016x}",
                snapshot.fingerprint, expected
            )));
        }
        if snapshot.n_ctx != self.n_ctx {
            return Err(CompletionError::IncompatibleState(format!(
                "snapshot context size {} does not match {}",
                snapshot.n_ctx, self.n_ctx
            )));
        }

        self.evaluator.truncate(0)?;
        self.tokens.clear();
        match &snapshot.cache {
            Some(cache) => {
                self.evaluator.load_cache(cache)?;
                self.tokens = snapshot.tokens;
            }
            None => {
                debug!(tokens = snapshot.tokens.len(), "replaying history into evaluator");
                for batch in snapshot.tokens.chunks(self.n_batch) {
                    self.evaluator.eval(batch, self.tokens.len())?;
                    self.tokens.extend_from_slice(batch);
                }
            }
        }
        self.logits = snapshot.logits;
        Ok(())
    }

    /// Logits for the last evaluated position.
    pub fn logits(&self) -> &[f32] {
        &self.logits
    }

    /// The newest `n` history tokens.
    pub fn recent_tokens(&self, n: usize) -> &[TokenId] {
        let start = self.tokens.len().saturating_sub(n);
        &self.tokens[start..]
    }

    pub fn tokens(&self) -> &[TokenId] {
        &self.tokens
    }

    pub fn n_past(&self) -> usize {
        self.tokens.len()
    }

    pub fn n_ctx(&self) -> usize {
        self.n_ctx
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }
}

impl std::fmt::Debug for ContextState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextState")
            .field("model", &self.backend.model_name())
            .field("n_past", &self.tokens.len())
            .field("n_ctx", &self.n_ctx)
            .finish()
    }
}
