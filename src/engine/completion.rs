//! Completion engine: the generate loop behind buffered and streamed calls.
//!
//! A [`Generation`] is a pull-driven state machine. Each call to
//! [`Generation::advance`] runs evaluation steps until it has text to hand
//! out, and the last item it yields carries the finish reason, usage and
//! warnings. Buffered completion drains the same sequence, so the two
//! delivery modes cannot disagree.

use std::iter::FusedIterator;

use parking_lot::MutexGuard;
use tracing::{debug, Span};

use super::backend::TokenId;
use super::config::{GenerationConfig, ResolvedConfig};
use super::context::ContextState;
use super::diagnostics::Diagnostics;
use super::error::CompletionError;
use super::output::{CompletionChoice, CompletionResult, FinishReason, Usage};
use super::sampler::{Sampler, SamplingParams};
use super::stop::{utf8_emit_len, StopScan, StopState};
use super::tokenizer::TokenizerAdapter;
use crate::config::LongPromptPolicy;
use crate::telemetry::{self, SpanExt};

/// Prompt text or raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    Text(String),
    Bytes(Vec<u8>),
}

impl AsRef<[u8]> for Prompt {
    fn as_ref(&self) -> &[u8] {
        match self {
            Prompt::Text(s) => s.as_bytes(),
            Prompt::Bytes(b) => b,
        }
    }
}

impl From<&str> for Prompt {
    fn from(s: &str) -> Self {
        Prompt::Text(s.to_string())
    }
}

impl From<String> for Prompt {
    fn from(s: String) -> Self {
        Prompt::Text(s)
    }
}

impl From<Vec<u8>> for Prompt {
    fn from(b: Vec<u8>) -> Self {
        Prompt::Bytes(b)
    }
}

impl From<&[u8]> for Prompt {
    fn from(b: &[u8]) -> Self {
        Prompt::Bytes(b.to_vec())
    }
}

/// A completion request for [`crate::engine::ModelHandle::complete`].
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: Prompt,
    pub config: GenerationConfig,
    pub stream: bool,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<Prompt>) -> Self {
        Self { prompt: prompt.into(), config: GenerationConfig::default(), stream: false }
    }

    pub fn with_config(mut self, config: GenerationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

/// Buffered result or live stream, depending on the request.
pub enum CompletionResponse<'a> {
    Buffered(CompletionResult),
    Streamed(CompletionStream<'a>),
}

impl<'a> CompletionResponse<'a> {
    /// Buffer the response, draining the stream if necessary.
    pub fn into_result(self) -> Result<CompletionResult, CompletionError> {
        match self {
            CompletionResponse::Buffered(result) => Ok(result),
            CompletionResponse::Streamed(stream) => collect_stream(stream),
        }
    }
}

/// Generation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    Ready,
    Generating,
    StoppedBySequence,
    StoppedByLength,
    Done,
}

/// Per-request generation state.
#[derive(Debug)]
pub struct Generation {
    state: GenerationState,
    id: String,
    created: i64,
    model: String,
    prompt_tokens: usize,
    budget: usize,
    sampling: SamplingParams,
    stop: StopState,
    diagnostics: Diagnostics,
    /// Generated bytes, stop text excluded once matched.
    text: Vec<u8>,
    /// Bytes of `text` already handed out.
    emitted: usize,
    /// Echoed prompt, sent with the first fragment.
    prefix: Option<String>,
    /// Sampled token not yet evaluated.
    pending: Option<TokenId>,
    completion_tokens: usize,
}

impl Generation {
    /// Tokenize the prompt and work out the token budget.
    ///
    /// Returns the generation and the prompt tokens the context must hold
    /// before the first step.
    pub fn prepare(
        tokenizer: &TokenizerAdapter,
        model: &str,
        prompt: &[u8],
        config: ResolvedConfig,
        n_ctx: usize,
        policy: LongPromptPolicy,
    ) -> Result<(Self, Vec<TokenId>), CompletionError> {
        let mut diagnostics = Diagnostics::new();
        let mut tokens = tokenizer.tokenize(prompt, true)?;
        if tokens.is_empty() {
            return Err(CompletionError::InvalidInput("prompt produced no tokens".into()));
        }
        diagnostics.out_of_vocabulary(tokenizer.count_unknown(&tokens));

        if tokens.len() >= n_ctx {
            match policy {
                LongPromptPolicy::Reject => {
                    return Err(CompletionError::ContextOverflow { max: n_ctx, got: tokens.len() });
                }
                LongPromptPolicy::Truncate => {
                    let original = tokens.len();
                    tokens = truncate_prompt(tokens, tokenizer.bos_token(), n_ctx, config.max_tokens);
                    diagnostics.prompt_truncated(original, tokens.len(), n_ctx);
                }
            }
        }

        let budget = config.max_tokens.min(n_ctx.saturating_sub(tokens.len()));
        if budget < config.max_tokens {
            diagnostics.budget_limited(config.max_tokens, budget);
        }

        let prefix = config.echo.then(|| String::from_utf8_lossy(prompt).into_owned());
        let generation = Self {
            state: GenerationState::Ready,
            id: format!("cmpl-{}", uuid::Uuid::new_v4()),
            created: chrono::Utc::now().timestamp(),
            model: model.to_string(),
            prompt_tokens: tokens.len(),
            budget,
            sampling: config.sampling,
            stop: StopState::new(&config.stop)?,
            diagnostics,
            text: Vec::new(),
            emitted: 0,
            prefix,
            pending: None,
            completion_tokens: 0,
        };
        debug!(
            id = %generation.id,
            prompt_tokens = generation.prompt_tokens,
            budget,
            "completion prepared"
        );
        Ok((generation, tokens))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> GenerationState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == GenerationState::Done
    }

    pub fn prompt_tokens(&self) -> usize {
        self.prompt_tokens
    }

    pub fn completion_tokens(&self) -> usize {
        self.completion_tokens
    }

    /// Produce the next fragment. `None` once the final fragment (or an
    /// error) has been returned.
    pub fn advance(
        &mut self,
        ctx: &mut ContextState,
        tokenizer: &TokenizerAdapter,
        sampler: &dyn Sampler,
    ) -> Option<Result<CompletionResult, CompletionError>> {
        match self.state {
            GenerationState::Done => None,
            GenerationState::StoppedBySequence | GenerationState::StoppedByLength => {
                Some(Ok(self.finish()))
            }
            GenerationState::Ready | GenerationState::Generating => {
                self.state = GenerationState::Generating;
                match self.step(ctx, tokenizer, sampler) {
                    Ok(Some(fragment)) => Some(Ok(fragment)),
                    Ok(None) => Some(Ok(self.finish())),
                    Err(e) => {
                        self.state = GenerationState::Done;
                        telemetry::record_completion_error(e.kind());
                        Some(Err(e))
                    }
                }
            }
        }
    }

    /// Run steps until there is text to emit (`Some`) or generation stops.
    fn step(
        &mut self,
        ctx: &mut ContextState,
        tokenizer: &TokenizerAdapter,
        sampler: &dyn Sampler,
    ) -> Result<Option<CompletionResult>, CompletionError> {
        loop {
            if self.completion_tokens >= self.budget {
                self.state = GenerationState::StoppedByLength;
                return Ok(None);
            }
            if let Some(token) = self.pending.take() {
                ctx.append(&[token])?;
            }

            let params = self.sampling.for_step(self.completion_tokens);
            let recent = ctx.recent_tokens(self.sampling.repeat_last_n);
            let token = sampler.sample(ctx.logits(), &params, recent);
            if tokenizer.is_eos(token) {
                self.state = GenerationState::StoppedBySequence;
                return Ok(None);
            }
            self.completion_tokens += 1;
            self.pending = Some(token);

            let piece = tokenizer.detokenize(&[token])?;
            self.text.extend_from_slice(&piece);

            match self.stop.scan(&self.text, self.emitted) {
                StopScan::Matched(at) => {
                    debug!(id = %self.id, at, "stop sequence matched");
                    self.text.truncate(at);
                    self.state = GenerationState::StoppedBySequence;
                    return Ok(None);
                }
                StopScan::Pending(hold) => {
                    let safe = self.text.len() - hold;
                    let end = self.emitted + utf8_emit_len(&self.text[self.emitted..safe]);
                    if end > self.emitted || self.prefix.is_some() {
                        let text = self.take_text(end);
                        return Ok(Some(self.fragment(text, None)));
                    }
                }
            }
        }
    }

    /// Build the final fragment and move to `Done`.
    fn finish(&mut self) -> CompletionResult {
        let reason = match self.state {
            GenerationState::StoppedByLength => FinishReason::Length,
            _ => FinishReason::Stop,
        };
        self.state = GenerationState::Done;
        let text = self.take_text(self.text.len());
        telemetry::record_completion(reason, self.prompt_tokens, self.completion_tokens);
        debug!(
            id = %self.id,
            finish_reason = reason.as_str(),
            completion_tokens = self.completion_tokens,
            "completion finished"
        );
        self.fragment(text, Some(reason))
    }

    fn take_text(&mut self, end: usize) -> String {
        let mut text = self.prefix.take().unwrap_or_default();
        text.push_str(&String::from_utf8_lossy(&self.text[self.emitted..end]));
        self.emitted = end;
        text
    }

    fn fragment(&self, text: String, finish_reason: Option<FinishReason>) -> CompletionResult {
        let last = finish_reason.is_some();
        CompletionResult {
            id: self.id.clone(),
            object: "text_completion".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![CompletionChoice { text, index: 0, finish_reason }],
            usage: last.then(|| Usage {
                prompt_tokens: self.prompt_tokens,
                completion_tokens: self.completion_tokens,
                total_tokens: self.prompt_tokens + self.completion_tokens,
            }),
            warning: if last { self.diagnostics.to_warning() } else { None },
        }
    }
}

/// Keep BOS (when present) plus the newest tokens, leaving room to generate.
fn truncate_prompt(tokens: Vec<TokenId>, bos: TokenId, n_ctx: usize, max_tokens: usize) -> Vec<TokenId> {
    let reserve = max_tokens.min(n_ctx / 2).max(1);
    let head = usize::from(tokens.first() == Some(&bos));
    let mut tail = n_ctx.saturating_sub(reserve + head).min(tokens.len() - head);
    if head + tail == 0 {
        tail = 1;
    }
    let mut kept = Vec::with_capacity(head + tail);
    kept.extend_from_slice(&tokens[..head]);
    kept.extend_from_slice(&tokens[tokens.len() - tail..]);
    kept
}

/// Lazy iterator over completion fragments.
///
/// Holds the context lock until dropped; another request on the same handle
/// fails with [`CompletionError::ContextBusy`] meanwhile.
pub struct CompletionStream<'a> {
    context: MutexGuard<'a, ContextState>,
    tokenizer: &'a TokenizerAdapter,
    sampler: &'a dyn Sampler,
    generation: Generation,
    span: Span,
}

impl<'a> CompletionStream<'a> {
    pub(crate) fn new(
        context: MutexGuard<'a, ContextState>,
        tokenizer: &'a TokenizerAdapter,
        sampler: &'a dyn Sampler,
        generation: Generation,
        span: Span,
    ) -> Self {
        Self { context, tokenizer, sampler, generation, span }
    }

    /// Completion id shared by every fragment.
    pub fn id(&self) -> &str {
        self.generation.id()
    }

    pub fn state(&self) -> GenerationState {
        self.generation.state()
    }
}

impl Iterator for CompletionStream<'_> {
    type Item = Result<CompletionResult, CompletionError>;

    fn next(&mut self) -> Option<Self::Item> {
        let _entered = self.span.enter();
        let item = self.generation.advance(&mut self.context, self.tokenizer, self.sampler)?;
        match &item {
            Ok(result) if result.is_final() => {
                if let Some(reason) = result.finish_reason() {
                    self.span.record("finish_reason", reason.as_str());
                }
                self.span.record("completion_tokens", self.generation.completion_tokens());
                self.span.record_result(&item);
            }
            Err(_) => self.span.record_result(&item),
            Ok(_) => {}
        }
        Some(item)
    }
}

impl FusedIterator for CompletionStream<'_> {}

impl Drop for CompletionStream<'_> {
    fn drop(&mut self) {
        if !self.generation.is_done() {
            debug!(
                id = %self.generation.id(),
                completion_tokens = self.generation.completion_tokens(),
                "completion stream dropped before finishing"
            );
        }
    }
}

/// Drain fragments into one buffered result.
pub(crate) fn collect_stream<I>(stream: I) -> Result<CompletionResult, CompletionError>
where
    I: IntoIterator<Item = Result<CompletionResult, CompletionError>>,
{
    let mut text = String::new();
    let mut last = None;
    for item in stream {
        let fragment = item?;
        text.push_str(fragment.text());
        last = Some(fragment);
    }
    let mut result =
        last.ok_or_else(|| CompletionError::Backend("completion produced no output".into()))?;
    if let Some(choice) = result.choices.first_mut() {
        choice.text = text;
    }
    Ok(result)
}
