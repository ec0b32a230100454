//! Shared fixtures for integration tests.
//!
//! The test model tokenizes with a small vocabulary and predicts the next
//! token from the last one (a bigram chain), so greedy decoding continues
//! "The quick brown fox" with " jumps over the lazy dog." and then ends.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ember_core::config::EngineSettings;
use ember_core::engine::{
    Backend, CompletionError, Evaluator, GenerationConfig, ModelHandle, SamplingParams, TokenId,
};
use ember_core::models::{VocabBackend, VocabSpec};

pub const UNK: TokenId = 0;
pub const BOS: TokenId = 1;
pub const EOS: TokenId = 2;
pub const SPACE: TokenId = 3;
pub const J: TokenId = 4;
pub const UMPS: TokenId = 5;
pub const OVER: TokenId = 6;
pub const THE_LOWER: TokenId = 7;
pub const LAZY: TokenId = 8;
pub const DOG: TokenId = 9;
pub const PERIOD: TokenId = 10;
pub const HELLO: TokenId = 11;
pub const WORLD: TokenId = 12;
pub const THE: TokenId = 13;
pub const QUICK: TokenId = 14;
pub const BROWN: TokenId = 15;
pub const FOX: TokenId = 16;
pub const A: TokenId = 17;
pub const B: TokenId = 18;

pub const PIECES: &[&str] = &[
    "<unk>", "<s>", "</s>", " ", "j", "umps", " over", " the", " lazy", " dog", ".", "Hello",
    " World", "The", " quick", " brown", " fox", "a", "b",
];

pub const PROMPT: &str = "The quick brown fox";
pub const CONTINUATION: &str = " jumps over the lazy dog.";

/// Tokens the test model produces after `PROMPT`, ending with EOS.
pub const SCRIPT: &[TokenId] = &[SPACE, J, UMPS, OVER, THE_LOWER, LAZY, DOG, PERIOD, EOS];

pub fn vocab_spec(name: &str, max_sequence_length: usize) -> VocabSpec {
    VocabSpec {
        name: name.to_string(),
        tokens: PIECES.iter().map(|s| s.to_string()).collect(),
        bos: BOS,
        eos: EOS,
        unk: UNK,
        max_sequence_length,
    }
}

/// Next token after `token` in the bigram chain.
pub fn next_token(token: TokenId) -> TokenId {
    match token {
        BOS => THE,
        THE => QUICK,
        QUICK => BROWN,
        BROWN => FOX,
        FOX => SPACE,
        SPACE => J,
        J => UMPS,
        UMPS => OVER,
        OVER => THE_LOWER,
        THE_LOWER => LAZY,
        LAZY => DOG,
        DOG => PERIOD,
        HELLO => WORLD,
        WORLD => PERIOD,
        A | B => A,
        _ => EOS,
    }
}

/// Vocabulary backend whose evaluators follow the bigram chain.
pub struct TestBackend {
    vocab: VocabBackend,
    /// Tokens evaluated by every evaluator of this backend.
    pub evaluated: Arc<AtomicUsize>,
}

impl TestBackend {
    pub fn new() -> Self {
        Self::with_limits("test-model", 4096)
    }

    pub fn with_limits(name: &str, max_sequence_length: usize) -> Self {
        let vocab = VocabBackend::from_spec(vocab_spec(name, max_sequence_length))
            .expect("test vocabulary is valid");
        Self { vocab, evaluated: Arc::new(AtomicUsize::new(0)) }
    }

    pub fn evaluated(&self) -> usize {
        self.evaluated.load(Ordering::SeqCst)
    }
}

impl Backend for TestBackend {
    fn model_name(&self) -> &str {
        self.vocab.model_name()
    }

    fn tokenize(&self, text: &[u8], add_bos: bool) -> Result<Vec<TokenId>, CompletionError> {
        self.vocab.tokenize(text, add_bos)
    }

    fn detokenize(&self, tokens: &[TokenId]) -> Result<Vec<u8>, CompletionError> {
        self.vocab.detokenize(tokens)
    }

    fn token_bos(&self) -> TokenId {
        BOS
    }

    fn token_eos(&self) -> TokenId {
        EOS
    }

    fn token_unknown(&self) -> Option<TokenId> {
        Some(UNK)
    }

    fn vocab_size(&self) -> usize {
        PIECES.len()
    }

    fn max_sequence_length(&self) -> usize {
        self.vocab.max_sequence_length()
    }

    fn fingerprint(&self) -> u64 {
        self.vocab.fingerprint()
    }

    fn new_evaluator(&self, _n_ctx: usize) -> Result<Box<dyn Evaluator>, CompletionError> {
        Ok(Box::new(BigramEvaluator::new(self.evaluated.clone())))
    }
}

/// Evaluator whose logits depend on the evaluated history.
///
/// Checks that callers evaluate at the position the history ends at, and
/// exports its history as the cache.
pub struct BigramEvaluator {
    history: Vec<TokenId>,
    logits: Vec<f32>,
    evaluated: Arc<AtomicUsize>,
}

impl BigramEvaluator {
    pub fn new(evaluated: Arc<AtomicUsize>) -> Self {
        Self { history: Vec::new(), logits: vec![0.0; PIECES.len()], evaluated }
    }

    fn refresh_logits(&mut self) {
        self.logits = vec![0.0; PIECES.len()];
        if let Some(&last) = self.history.last() {
            self.logits[next_token(last) as usize] = 10.0;
        }
    }
}

impl Evaluator for BigramEvaluator {
    fn eval(&mut self, tokens: &[TokenId], n_past: usize) -> Result<(), CompletionError> {
        if n_past != self.history.len() {
            return Err(CompletionError::Backend(format!(
                "eval at {} but history holds {}",
                n_past,
                self.history.len()
            )));
        }
        self.history.extend_from_slice(tokens);
        self.evaluated.fetch_add(tokens.len(), Ordering::SeqCst);
        self.refresh_logits();
        Ok(())
    }

    fn logits(&self) -> &[f32] {
        &self.logits
    }

    fn truncate(&mut self, n_keep: usize) -> Result<(), CompletionError> {
        self.history.truncate(n_keep);
        self.refresh_logits();
        Ok(())
    }

    fn save_cache(&self) -> Option<Vec<u8>> {
        Some(self.history.iter().flat_map(|t| t.to_le_bytes()).collect())
    }

    fn load_cache(&mut self, cache: &[u8]) -> Result<(), CompletionError> {
        if cache.len() % 4 != 0 {
            return Err(CompletionError::IncompatibleState("cache length not a multiple of 4".into()));
        }
        self.history = cache
            .chunks_exact(4)
            .map(|c| TokenId::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        self.refresh_logits();
        Ok(())
    }
}

/// Bigram evaluator that fails every `eval` call after the first `ok_calls`.
pub struct FailingEvaluator {
    inner: BigramEvaluator,
    ok_calls: usize,
    calls: usize,
}

impl FailingEvaluator {
    pub fn new(ok_calls: usize) -> Self {
        Self { inner: BigramEvaluator::new(Arc::new(AtomicUsize::new(0))), ok_calls, calls: 0 }
    }
}

impl Evaluator for FailingEvaluator {
    fn eval(&mut self, tokens: &[TokenId], n_past: usize) -> Result<(), CompletionError> {
        self.calls += 1;
        if self.calls > self.ok_calls {
            return Err(CompletionError::Backend("device lost".into()));
        }
        self.inner.eval(tokens, n_past)
    }

    fn logits(&self) -> &[f32] {
        self.inner.logits()
    }

    fn truncate(&mut self, n_keep: usize) -> Result<(), CompletionError> {
        self.inner.truncate(n_keep)
    }
}

/// Handle whose evaluator fails after `ok_calls` evaluations.
pub fn failing_handle(ok_calls: usize) -> ModelHandle {
    ModelHandle::builder(Arc::new(TestBackend::new()))
        .settings(settings(64))
        .evaluator(Box::new(FailingEvaluator::new(ok_calls)))
        .build()
        .expect("handle builds")
}

/// Sampler that ignores logits and replays a fixed token sequence, then EOS.
#[derive(Clone)]
pub struct ScriptedSampler {
    script: Arc<Vec<TokenId>>,
    position: Arc<AtomicUsize>,
}

impl ScriptedSampler {
    pub fn new(script: &[TokenId]) -> Self {
        Self { script: Arc::new(script.to_vec()), position: Arc::new(AtomicUsize::new(0)) }
    }

    /// Number of tokens drawn so far.
    pub fn calls(&self) -> usize {
        self.position.load(Ordering::SeqCst)
    }
}

impl ember_core::engine::Sampler for ScriptedSampler {
    fn sample(&self, _logits: &[f32], _params: &SamplingParams, _recent: &[TokenId]) -> TokenId {
        let i = self.position.fetch_add(1, Ordering::SeqCst);
        self.script.get(i).copied().unwrap_or(EOS)
    }
}

pub fn settings(n_ctx: usize) -> EngineSettings {
    EngineSettings { n_ctx, ..EngineSettings::default() }
}

/// Handle over a fresh test backend, greedy sampling.
pub fn handle(n_ctx: usize) -> ModelHandle {
    handle_with(Arc::new(TestBackend::new()), settings(n_ctx))
}

pub fn handle_with(backend: Arc<TestBackend>, settings: EngineSettings) -> ModelHandle {
    ModelHandle::new(backend, settings).expect("handle builds")
}

/// Handle that replays `SCRIPT` regardless of the model.
pub fn scripted_handle(n_ctx: usize) -> ModelHandle {
    ModelHandle::builder(Arc::new(TestBackend::new()))
        .settings(settings(n_ctx))
        .sampler(ScriptedSampler::new(SCRIPT))
        .build()
        .expect("handle builds")
}

/// Greedy config with enough room for the whole continuation.
pub fn greedy(max_tokens: usize) -> GenerationConfig {
    GenerationConfig::new().max_tokens(max_tokens).temperature(0.0)
}
