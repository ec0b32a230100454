//! Tokenizer adapter over the backend vocabulary.

use std::sync::Arc;

use super::backend::{Backend, TokenId};
use super::error::CompletionError;

/// Thin pass-through to backend tokenize/detokenize.
#[derive(Clone)]
pub struct TokenizerAdapter {
    backend: Arc<dyn Backend>,
}

impl TokenizerAdapter {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Encode bytes to token ids.
    pub fn tokenize(&self, text: &[u8], add_bos: bool) -> Result<Vec<TokenId>, CompletionError> {
        self.backend.tokenize(text, add_bos)
    }

    /// Decode token ids to bytes.
    pub fn detokenize(&self, tokens: &[TokenId]) -> Result<Vec<u8>, CompletionError> {
        for &token in tokens {
            if token as usize >= self.backend.vocab_size() {
                return Err(CompletionError::InvalidInput(format!(
                    "token {} outside vocabulary of {}",
                    token,
                    self.backend.vocab_size()
                )));
            }
        }
        self.backend.detokenize(tokens)
    }

    /// Number of unknown-token ids in `tokens`.
    pub fn count_unknown(&self, tokens: &[TokenId]) -> usize {
        match self.backend.token_unknown() {
            Some(unk) => tokens.iter().filter(|&&t| t == unk).count(),
            None => 0,
        }
    }

    pub fn eos_token(&self) -> TokenId {
        self.backend.token_eos()
    }

    pub fn bos_token(&self) -> TokenId {
        self.backend.token_bos()
    }

    pub fn vocab_size(&self) -> usize {
        self.backend.vocab_size()
    }

    /// Check if token is end-of-sequence.
    pub fn is_eos(&self, token: TokenId) -> bool {
        self.backend.is_end_of_sequence(token)
    }
}
