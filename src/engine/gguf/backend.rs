//! llama-cpp-2 backend for GGUF inference.
//!
//! Model loading and tokenization live on [`GgufBackend`]; each context
//! gets a [`LlamaEvaluator`] owning one llama.cpp context and its KV cache.

use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::token::LlamaToken;
use sha2::{Digest, Sha256};
use tracing::info;

use super::GgufConfig;
use crate::engine::{Backend, CompletionError, Evaluator, TokenId};

/// Loaded GGUF model shared by every context created from it.
pub struct GgufBackend {
    backend: LlamaBackend,
    model: Arc<LlamaModel>,
    name: String,
    fingerprint: u64,
    n_threads: i32,
    n_batch: u32,
}

// SAFETY: LlamaModel and LlamaBackend are Send+Sync in llama-cpp-2.
unsafe impl Send for GgufBackend {}
unsafe impl Sync for GgufBackend {}

impl GgufBackend {
    /// Load a GGUF model from disk.
    pub fn load(path: &Path, config: &GgufConfig) -> Result<Self, CompletionError> {
        let backend = LlamaBackend::init()
            .map_err(|e| CompletionError::Backend(format!("backend init: {e}")))?;
        let model_params = LlamaModelParams::default().with_n_gpu_layers(config.n_gpu_layers);
        let model = LlamaModel::load_from_file(&backend, path, &model_params)
            .map_err(|e| CompletionError::Backend(format!("load: {e}")))?;

        let name = model
            .meta_val_str("general.name")
            .ok()
            .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "gguf".to_string());
        let fingerprint = fingerprint(&name, model.size(), model.n_params(), model.n_vocab());
        info!(model = %name, size = model.size(), n_vocab = model.n_vocab(), "GGUF model loaded");

        Ok(Self {
            backend,
            model: Arc::new(model),
            name,
            fingerprint,
            n_threads: i32::try_from(config.n_threads.max(1)).unwrap_or(4),
            n_batch: config.n_batch.max(1),
        })
    }
}

impl Backend for GgufBackend {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn tokenize(&self, text: &[u8], add_bos: bool) -> Result<Vec<TokenId>, CompletionError> {
        let text = std::str::from_utf8(text)
            .map_err(|e| CompletionError::InvalidInput(format!("prompt is not UTF-8: {e}")))?;
        let add_bos = if add_bos { AddBos::Always } else { AddBos::Never };
        let tokens = self
            .model
            .str_to_token(text, add_bos)
            .map_err(|e| CompletionError::InvalidInput(format!("tokenize: {e}")))?;
        Ok(tokens.into_iter().map(|t| t.0 as TokenId).collect())
    }

    /// Raw piece bytes. A token may end inside a multi-byte character; the
    /// completion engine holds such tails back until the character is whole.
    fn detokenize(&self, tokens: &[TokenId]) -> Result<Vec<u8>, CompletionError> {
        let mut out = Vec::new();
        for &t in tokens {
            let piece = self
                .model
                .token_to_bytes(LlamaToken(t as i32), Special::Plaintext)
                .map_err(|e| CompletionError::Backend(format!("detok: {e}")))?;
            out.extend_from_slice(&piece);
        }
        Ok(out)
    }

    fn token_bos(&self) -> TokenId {
        self.model.token_bos().0 as TokenId
    }

    fn token_eos(&self) -> TokenId {
        self.model.token_eos().0 as TokenId
    }

    fn token_unknown(&self) -> Option<TokenId> {
        None
    }

    fn vocab_size(&self) -> usize {
        usize::try_from(self.model.n_vocab()).unwrap_or(0)
    }

    fn max_sequence_length(&self) -> usize {
        self.model.n_ctx_train() as usize
    }

    fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    fn is_end_of_sequence(&self, token: TokenId) -> bool {
        self.model.is_eog_token(LlamaToken(token as i32))
    }

    fn new_evaluator(&self, n_ctx: usize) -> Result<Box<dyn Evaluator>, CompletionError> {
        let n_ctx = u32::try_from(n_ctx)
            .map_err(|_| CompletionError::InvalidConfig(format!("n_ctx {n_ctx} too large")))?;
        let params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(n_ctx))
            .with_n_batch(self.n_batch)
            .with_n_threads(self.n_threads)
            .with_n_threads_batch(self.n_threads);
        let model = Arc::clone(&self.model);
        let ctx = model
            .new_context(&self.backend, params)
            .map_err(|e| CompletionError::Backend(format!("ctx: {e}")))?;
        // SAFETY: see the invariant on `LlamaEvaluator`.
        let ctx: LlamaContext<'static> = unsafe { std::mem::transmute(ctx) };
        Ok(Box::new(LlamaEvaluator { ctx, _model: model, logits: Vec::new() }))
    }
}

/// One llama.cpp context: KV cache plus last logits.
///
/// `LlamaContext` borrows the model it was created from. The evaluator owns
/// that model through `_model`, so the borrow is widened to `'static` when
/// the context is created. This holds only while two invariants do:
///
/// - `ctx` is declared before `_model`, so it drops first (struct fields
///   drop in declaration order);
/// - `ctx` is never moved out or handed out with its `'static` lifetime.
///
/// The model lives behind an `Arc` so its address stays fixed while the
/// `GgufBackend` that loaded it moves or drops.
pub struct LlamaEvaluator {
    ctx: LlamaContext<'static>,
    _model: Arc<LlamaModel>,
    logits: Vec<f32>,
}

// SAFETY: the context is only touched through `&mut self`.
unsafe impl Send for LlamaEvaluator {}

impl Evaluator for LlamaEvaluator {
    fn eval(&mut self, tokens: &[TokenId], n_past: usize) -> Result<(), CompletionError> {
        let n = tokens.len();
        if n == 0 {
            return Ok(());
        }
        let mut batch = LlamaBatch::new(n, 1);
        for (i, &tok) in tokens.iter().enumerate() {
            // Only the last position needs logits.
            batch
                .add(LlamaToken(tok as i32), (n_past + i) as i32, &[0], i == n - 1)
                .map_err(|e| CompletionError::Backend(format!("batch: {e}")))?;
        }
        self.ctx
            .decode(&mut batch)
            .map_err(|e| CompletionError::Backend(format!("decode: {e}")))?;
        self.logits.clear();
        self.logits.extend_from_slice(self.ctx.get_logits_ith((n - 1) as i32));
        Ok(())
    }

    fn logits(&self) -> &[f32] {
        &self.logits
    }

    fn truncate(&mut self, n_keep: usize) -> Result<(), CompletionError> {
        let p0 = u32::try_from(n_keep).unwrap_or(u32::MAX);
        self.ctx
            .clear_kv_cache_seq(Some(0), Some(p0), None)
            .map_err(|e| CompletionError::Backend(format!("kv cache: {e}")))?;
        self.logits.clear();
        Ok(())
    }
}

fn fingerprint(name: &str, size: u64, n_params: u64, n_vocab: i32) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(size.to_le_bytes());
    hasher.update(n_params.to_le_bytes());
    hasher.update(n_vocab.to_le_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}
