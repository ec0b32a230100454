//! Model handle: the request-facing API of the engine.
//!
//! A handle owns one context and generates for one request at a time.
//! The backend (vocabulary and weights) is shared by `Arc`; several handles
//! over the same backend generate independently.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::backend::{Backend, Evaluator, TokenId};
use super::completion::{
    collect_stream, CompletionRequest, CompletionResponse, CompletionStream, Generation,
};
use super::config::GenerationConfig;
use super::context::ContextState;
use super::error::CompletionError;
use super::output::CompletionResult;
use super::sampler::{Sampler, StandardSampler};
use super::tokenizer::TokenizerAdapter;
use crate::config::EngineSettings;
use crate::memory::PromptCache;
use crate::telemetry::{self, CompletionSpan};

/// Builder for [`ModelHandle`].
pub struct ModelHandleBuilder {
    backend: Arc<dyn Backend>,
    settings: EngineSettings,
    sampler: Option<Arc<dyn Sampler>>,
    evaluator: Option<Box<dyn Evaluator>>,
    snapshot: Option<Vec<u8>>,
}

impl ModelHandleBuilder {
    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replace the standard sampler.
    pub fn sampler(mut self, sampler: impl Sampler + 'static) -> Self {
        self.sampler = Some(Arc::new(sampler));
        self
    }

    /// Use `evaluator` instead of asking the backend for one.
    pub fn evaluator(mut self, evaluator: Box<dyn Evaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Start from a snapshot taken with [`ModelHandle::snapshot`].
    pub fn snapshot(mut self, bytes: Vec<u8>) -> Self {
        self.snapshot = Some(bytes);
        self
    }

    pub fn build(self) -> Result<ModelHandle, CompletionError> {
        self.settings
            .validate()
            .map_err(|e| CompletionError::InvalidConfig(e.to_string()))?;

        let max_len = self.backend.max_sequence_length().max(1);
        let n_ctx = match self.settings.n_ctx {
            0 => max_len,
            n => n.min(max_len),
        };
        let evaluator = match self.evaluator {
            Some(evaluator) => evaluator,
            None => self.backend.new_evaluator(n_ctx)?,
        };
        let mut context =
            ContextState::with_evaluator(self.backend.clone(), evaluator, n_ctx, self.settings.n_batch);
        if let Some(bytes) = &self.snapshot {
            context.restore_from(bytes)?;
        }

        let prompt_cache = match self.settings.prompt_cache_entries {
            0 => None,
            n => Some(Mutex::new(PromptCache::new(n))),
        };
        info!(
            model = self.backend.model_name(),
            n_ctx,
            n_batch = self.settings.n_batch,
            prompt_cache = self.settings.prompt_cache_entries,
            "model handle ready"
        );

        Ok(ModelHandle {
            tokenizer: TokenizerAdapter::new(self.backend.clone()),
            backend: self.backend,
            context: Mutex::new(context),
            sampler: self.sampler.unwrap_or_else(|| Arc::new(StandardSampler)),
            settings: self.settings,
            n_ctx,
            prompt_cache,
        })
    }
}

/// Tokenizer, context and sampler for one model instance.
pub struct ModelHandle {
    backend: Arc<dyn Backend>,
    tokenizer: TokenizerAdapter,
    context: Mutex<ContextState>,
    sampler: Arc<dyn Sampler>,
    settings: EngineSettings,
    n_ctx: usize,
    prompt_cache: Option<Mutex<PromptCache>>,
}

impl ModelHandle {
    pub fn builder(backend: Arc<dyn Backend>) -> ModelHandleBuilder {
        ModelHandleBuilder {
            backend,
            settings: EngineSettings::default(),
            sampler: None,
            evaluator: None,
            snapshot: None,
        }
    }

    /// Handle with the standard sampler and the backend's evaluator.
    pub fn new(backend: Arc<dyn Backend>, settings: EngineSettings) -> Result<Self, CompletionError> {
        Self::builder(backend).settings(settings).build()
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Effective context window.
    pub fn n_ctx(&self) -> usize {
        self.n_ctx
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn tokenizer(&self) -> &TokenizerAdapter {
        &self.tokenizer
    }

    /// Tokenize with a leading BOS token.
    pub fn tokenize(&self, text: impl AsRef<[u8]>) -> Result<Vec<TokenId>, CompletionError> {
        self.tokenizer.tokenize(text.as_ref(), true)
    }

    pub fn tokenize_with(
        &self,
        text: impl AsRef<[u8]>,
        add_bos: bool,
    ) -> Result<Vec<TokenId>, CompletionError> {
        self.tokenizer.tokenize(text.as_ref(), add_bos)
    }

    pub fn detokenize(&self, tokens: &[TokenId]) -> Result<Vec<u8>, CompletionError> {
        self.tokenizer.detokenize(tokens)
    }

    pub fn token_eos(&self) -> TokenId {
        self.tokenizer.eos_token()
    }

    pub fn token_bos(&self) -> TokenId {
        self.tokenizer.bos_token()
    }

    pub fn max_sequence_length(&self) -> usize {
        self.backend.max_sequence_length()
    }

    /// Generate a full completion.
    pub fn create_completion(
        &self,
        prompt: impl AsRef<[u8]>,
        config: &GenerationConfig,
    ) -> Result<CompletionResult, CompletionError> {
        let stream = self.start(prompt.as_ref(), config, false)?;
        collect_stream(stream)
    }

    /// Generate lazily, one fragment per iterator item.
    pub fn create_completion_stream(
        &self,
        prompt: impl AsRef<[u8]>,
        config: &GenerationConfig,
    ) -> Result<CompletionStream<'_>, CompletionError> {
        self.start(prompt.as_ref(), config, true)
    }

    /// Buffered or streamed completion, as the request asks.
    pub fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse<'_>, CompletionError> {
        if request.stream {
            self.create_completion_stream(&request.prompt, &request.config)
                .map(CompletionResponse::Streamed)
        } else {
            self.create_completion(&request.prompt, &request.config)
                .map(CompletionResponse::Buffered)
        }
    }

    fn start(
        &self,
        prompt: &[u8],
        config: &GenerationConfig,
        stream: bool,
    ) -> Result<CompletionStream<'_>, CompletionError> {
        let result = self.prepare(prompt, config, stream);
        if let Err(e) = &result {
            telemetry::record_completion_error(e.kind());
        }
        result
    }

    fn prepare(
        &self,
        prompt: &[u8],
        config: &GenerationConfig,
        stream: bool,
    ) -> Result<CompletionStream<'_>, CompletionError> {
        let mut context = self.context.try_lock().ok_or(CompletionError::ContextBusy)?;
        let resolved = config.resolve(&self.settings.defaults)?;
        let (generation, tokens) = Generation::prepare(
            &self.tokenizer,
            self.backend.model_name(),
            prompt,
            resolved,
            self.n_ctx,
            self.settings.long_prompt,
        )?;
        let span = CompletionSpan::new(generation.id(), self.backend.model_name(), stream);
        {
            let _entered = span.enter();
            self.load_prompt(&mut context, &tokens)?;
        }
        Ok(CompletionStream::new(context, &self.tokenizer, &*self.sampler, generation, span))
    }

    /// Bring the context to hold exactly the prompt tokens.
    fn load_prompt(&self, context: &mut ContextState, tokens: &[TokenId]) -> Result<(), CompletionError> {
        let Some(cache) = &self.prompt_cache else {
            context.ingest(tokens)?;
            return Ok(());
        };

        let mut cache = cache.lock();
        let reusable = context.common_prefix_len(tokens);
        if let Some((len, entry)) = cache.find_prefix(tokens) {
            if len > reusable {
                match context.restore_from(entry.snapshot()) {
                    Ok(()) => {
                        telemetry::record_prompt_cache_hit();
                        debug!(cached = len, "restored prompt cache entry");
                    }
                    Err(e) => {
                        warn!(error = %e, "discarding unusable prompt cache entry");
                        context.reset()?;
                    }
                }
            }
        }
        context.ingest(tokens)?;
        cache.insert(tokens, context.snapshot());
        Ok(())
    }

    /// Serialize the context.
    pub fn snapshot(&self) -> Result<Vec<u8>, CompletionError> {
        let context = self.context.try_lock().ok_or(CompletionError::ContextBusy)?;
        Ok(context.snapshot())
    }

    /// Replace the context with a snapshot from a handle over the same model.
    pub fn restore(&self, bytes: &[u8]) -> Result<(), CompletionError> {
        let mut context = self.context.try_lock().ok_or(CompletionError::ContextBusy)?;
        context.restore_from(bytes)
    }

    /// Clear the context history.
    pub fn reset(&self) -> Result<(), CompletionError> {
        let mut context = self.context.try_lock().ok_or(CompletionError::ContextBusy)?;
        context.reset()
    }

    /// Tokens currently held by the context.
    pub fn context_tokens(&self) -> Result<Vec<TokenId>, CompletionError> {
        let context = self.context.try_lock().ok_or(CompletionError::ContextBusy)?;
        Ok(context.tokens().to_vec())
    }

    /// Number of prompt cache entries, if the cache is enabled.
    pub fn prompt_cache_len(&self) -> Option<usize> {
        self.prompt_cache.as_ref().map(|c| c.lock().len())
    }

    /// Drop the handle and its context. The shared backend stays alive for
    /// other handles.
    pub fn release(self) {
        debug!(model = self.backend.model_name(), "model handle released");
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("model", &self.backend.model_name())
            .field("n_ctx", &self.n_ctx)
            .field("settings", &self.settings)
            .finish()
    }
}
