//! Vocabulary-only backend.
//!
//! Tokenizes by greedy longest match over the vocabulary pieces and
//! evaluates as a no-op with flat logits, like a llama.cpp model opened
//! with `vocab_only`. Byte runs no piece covers become one unknown token.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::loader::LoadError;
use crate::engine::{Backend, CompletionError, Evaluator, TokenId};

/// On-disk vocabulary description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabSpec {
    pub name: String,
    /// Token pieces, indexed by token id.
    pub tokens: Vec<String>,
    pub bos: TokenId,
    pub eos: TokenId,
    pub unk: TokenId,
    pub max_sequence_length: usize,
}

/// Backend with a vocabulary and no weights.
#[derive(Debug, Clone)]
pub struct VocabBackend {
    name: String,
    pieces: Vec<Vec<u8>>,
    lookup: HashMap<Vec<u8>, TokenId>,
    max_piece_len: usize,
    bos: TokenId,
    eos: TokenId,
    unk: TokenId,
    max_sequence_length: usize,
    fingerprint: u64,
}

impl VocabBackend {
    pub fn from_spec(spec: VocabSpec) -> Result<Self, LoadError> {
        let n_vocab = spec.tokens.len();
        if n_vocab == 0 {
            return Err(LoadError::InvalidFormat("vocabulary has no tokens".into()));
        }
        for (label, id) in [("bos", spec.bos), ("eos", spec.eos), ("unk", spec.unk)] {
            if id as usize >= n_vocab {
                return Err(LoadError::InvalidFormat(format!(
                    "{label} token {id} outside vocabulary of {n_vocab}"
                )));
            }
        }
        if spec.max_sequence_length == 0 {
            return Err(LoadError::InvalidFormat("max_sequence_length must be >= 1".into()));
        }

        let pieces: Vec<Vec<u8>> = spec.tokens.iter().map(|t| t.as_bytes().to_vec()).collect();
        let mut lookup = HashMap::with_capacity(n_vocab);
        let mut max_piece_len = 0;
        for (id, piece) in pieces.iter().enumerate() {
            let id = id as TokenId;
            if piece.is_empty() || [spec.bos, spec.eos, spec.unk].contains(&id) {
                continue;
            }
            // First id wins for duplicate pieces.
            lookup.entry(piece.clone()).or_insert(id);
            max_piece_len = max_piece_len.max(piece.len());
        }

        let fingerprint = fingerprint(&spec, &pieces);
        Ok(Self {
            name: spec.name,
            pieces,
            lookup,
            max_piece_len,
            bos: spec.bos,
            eos: spec.eos,
            unk: spec.unk,
            max_sequence_length: spec.max_sequence_length,
            fingerprint,
        })
    }

    pub fn from_json_str(json: &str) -> Result<Self, LoadError> {
        let spec: VocabSpec =
            serde_json::from_str(json).map_err(|e| LoadError::InvalidFormat(e.to_string()))?;
        Self::from_spec(spec)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    fn is_special(&self, token: TokenId) -> bool {
        token == self.bos || token == self.eos || token == self.unk
    }

    /// Longest piece matching at the start of `text`.
    fn longest_match(&self, text: &[u8]) -> Option<(TokenId, usize)> {
        let max = self.max_piece_len.min(text.len());
        (1..=max)
            .rev()
            .find_map(|len| self.lookup.get(&text[..len]).map(|&id| (id, len)))
    }
}

impl Backend for VocabBackend {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn tokenize(&self, text: &[u8], add_bos: bool) -> Result<Vec<TokenId>, CompletionError> {
        let mut tokens = Vec::with_capacity(text.len() / 2 + 1);
        if add_bos {
            tokens.push(self.bos);
        }
        let mut pos = 0;
        while pos < text.len() {
            match self.longest_match(&text[pos..]) {
                Some((id, len)) => {
                    tokens.push(id);
                    pos += len;
                }
                None => {
                    if tokens.last() != Some(&self.unk) {
                        tokens.push(self.unk);
                    }
                    pos += 1;
                }
            }
        }
        Ok(tokens)
    }

    fn detokenize(&self, tokens: &[TokenId]) -> Result<Vec<u8>, CompletionError> {
        let mut out = Vec::new();
        for &token in tokens {
            let piece = self.pieces.get(token as usize).ok_or_else(|| {
                CompletionError::InvalidInput(format!("token {token} outside vocabulary"))
            })?;
            if !self.is_special(token) {
                out.extend_from_slice(piece);
            }
        }
        Ok(out)
    }

    fn token_bos(&self) -> TokenId {
        self.bos
    }

    fn token_eos(&self) -> TokenId {
        self.eos
    }

    fn token_unknown(&self) -> Option<TokenId> {
        Some(self.unk)
    }

    fn vocab_size(&self) -> usize {
        self.pieces.len()
    }

    fn max_sequence_length(&self) -> usize {
        self.max_sequence_length
    }

    fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    fn new_evaluator(&self, _n_ctx: usize) -> Result<Box<dyn Evaluator>, CompletionError> {
        Ok(Box::new(VocabOnlyEvaluator::new(self.pieces.len())))
    }
}

/// Evaluator with no weights: every position yields flat logits.
#[derive(Debug, Clone)]
pub struct VocabOnlyEvaluator {
    logits: Vec<f32>,
}

impl VocabOnlyEvaluator {
    pub fn new(n_vocab: usize) -> Self {
        Self { logits: vec![0.0; n_vocab] }
    }
}

impl Evaluator for VocabOnlyEvaluator {
    fn eval(&mut self, _tokens: &[TokenId], _n_past: usize) -> Result<(), CompletionError> {
        Ok(())
    }

    fn logits(&self) -> &[f32] {
        &self.logits
    }

    fn truncate(&mut self, _n_keep: usize) -> Result<(), CompletionError> {
        Ok(())
    }
}

fn fingerprint(spec: &VocabSpec, pieces: &[Vec<u8>]) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(spec.name.as_bytes());
    for piece in pieces {
        hasher.update((piece.len() as u32).to_le_bytes());
        hasher.update(piece);
    }
    for id in [spec.bos, spec.eos, spec.unk] {
        hasher.update(id.to_le_bytes());
    }
    hasher.update((spec.max_sequence_length as u64).to_le_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}
