//! Tests for buffered and streamed completion.

mod common;

use std::sync::Arc;

use common::*;
use ember_core::config::EngineSettings;
use ember_core::engine::{
    Backend, CompletionError, CompletionRequest, CompletionResponse, FinishReason, GenerationConfig,
    Evaluator, GenerationState, ModelHandle, TokenId,
};
use ember_core::models::VocabBackend;

fn stream_texts(handle: &ModelHandle, config: &GenerationConfig) -> (Vec<String>, FinishReason) {
    let mut texts = Vec::new();
    let mut reason = None;
    for item in handle.create_completion_stream(PROMPT, config).unwrap() {
        let fragment = item.unwrap();
        assert!(reason.is_none(), "fragment after the final one");
        texts.push(fragment.text().to_string());
        reason = fragment.finish_reason();
    }
    (texts, reason.expect("final fragment carries a finish reason"))
}

// =============================================================================
// Finish reasons
// =============================================================================

#[test]
fn test_stop_sequence_truncates_text() {
    let handle = scripted_handle(64);
    let config = GenerationConfig::new().max_tokens(20).stop(["lazy"]);
    let result = handle.create_completion(PROMPT, &config).unwrap();
    assert_eq!(result.text(), " jumps over the ");
    assert_eq!(result.finish_reason(), Some(FinishReason::Stop));
}

#[test]
fn test_max_tokens_finishes_with_length() {
    let handle = scripted_handle(64);
    let config = GenerationConfig::new().max_tokens(2);
    let result = handle.create_completion(PROMPT, &config).unwrap();
    assert_eq!(result.text(), " j");
    assert_eq!(result.finish_reason(), Some(FinishReason::Length));
    let usage = result.usage.unwrap();
    assert_eq!(usage.completion_tokens, 2);
}

#[test]
fn test_end_of_sequence_finishes_with_stop() {
    let handle = scripted_handle(64);
    let config = GenerationConfig::new().max_tokens(20);
    let result = handle.create_completion(PROMPT, &config).unwrap();
    assert_eq!(result.text(), CONTINUATION);
    assert_eq!(result.finish_reason(), Some(FinishReason::Stop));

    let usage = result.usage.unwrap();
    assert_eq!(usage.prompt_tokens, 5);
    assert_eq!(usage.completion_tokens, 8);
    assert_eq!(usage.total_tokens, 13);
    assert!(result.warning.is_none());
}

#[test]
fn test_greedy_model_matches_script() {
    let handle = handle(64);
    let result = handle.create_completion(PROMPT, &greedy(20)).unwrap();
    assert_eq!(result.text(), CONTINUATION);
    assert_eq!(result.finish_reason(), Some(FinishReason::Stop));
}

#[test]
fn test_result_shape() {
    let handle = handle(64);
    let result = handle.create_completion(PROMPT, &greedy(4)).unwrap();
    assert!(result.id.starts_with("cmpl-"));
    assert_eq!(result.object, "text_completion");
    assert_eq!(result.model, "test-model");
    assert_eq!(result.choices.len(), 1);
    assert_eq!(result.choices[0].index, 0);
    assert!(result.created > 0);

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["choices"][0]["finish_reason"], "length");
    assert_eq!(json["usage"]["completion_tokens"], 4);
    assert!(json.get("warning").is_none());
}

// =============================================================================
// Stream/buffer equivalence
// =============================================================================

#[test]
fn test_stream_concatenation_equals_buffered() {
    let configs = [
        GenerationConfig::new().max_tokens(20),
        GenerationConfig::new().max_tokens(3),
        GenerationConfig::new().max_tokens(20).stop(["lazy"]),
        GenerationConfig::new().max_tokens(20).stop(["jumps", "dog"]),
        GenerationConfig::new().max_tokens(20).stop(["zebra"]),
    ];
    for config in configs {
        let buffered = scripted_handle(64).create_completion(PROMPT, &config).unwrap();
        let (texts, reason) = stream_texts(&scripted_handle(64), &config);
        assert_eq!(texts.concat(), buffered.text(), "config {:?}", config);
        assert_eq!(Some(reason), buffered.finish_reason());
    }
}

#[test]
fn test_only_final_fragment_carries_usage() {
    let handle = handle(64);
    let fragments: Vec<_> = handle
        .create_completion_stream(PROMPT, &greedy(20))
        .unwrap()
        .map(Result::unwrap)
        .collect();
    let (last, rest) = fragments.split_last().unwrap();
    assert!(last.is_final());
    assert!(last.usage.is_some());
    for fragment in rest {
        assert!(!fragment.is_final());
        assert!(fragment.usage.is_none());
        assert_eq!(fragment.id, last.id);
    }
}

#[test]
fn test_stream_is_fused() {
    let handle = handle(64);
    let mut stream = handle.create_completion_stream(PROMPT, &greedy(2)).unwrap();
    assert_eq!(stream.state(), GenerationState::Ready);
    while stream.next().is_some() {}
    assert_eq!(stream.state(), GenerationState::Done);
    assert!(stream.next().is_none());
    assert!(stream.next().is_none());
}

#[test]
fn test_complete_request_modes() {
    let handle = scripted_handle(64);
    let request = CompletionRequest::new(PROMPT)
        .with_config(GenerationConfig::new().max_tokens(20))
        .streaming(true);
    let response = handle.complete(request).unwrap();
    assert!(matches!(response, CompletionResponse::Streamed(_)));
    let streamed = response.into_result().unwrap();

    let handle = scripted_handle(64);
    let request = CompletionRequest::new(PROMPT).with_config(GenerationConfig::new().max_tokens(20));
    let response = handle.complete(request).unwrap();
    assert!(matches!(response, CompletionResponse::Buffered(_)));
    let buffered = response.into_result().unwrap();

    assert_eq!(streamed.text(), buffered.text());
    assert_eq!(streamed.finish_reason(), buffered.finish_reason());
}

// =============================================================================
// Stop sequences in streams
// =============================================================================

#[test]
fn test_stop_spanning_tokens_never_streamed() {
    let handle = scripted_handle(64);
    let config = GenerationConfig::new().max_tokens(20).stop(["jumps"]);
    let (texts, reason) = stream_texts(&handle, &config);
    assert_eq!(reason, FinishReason::Stop);
    assert_eq!(texts.concat(), " ");
    for text in &texts {
        assert!(!text.contains('j'), "partial stop leaked: {:?}", text);
    }
}

#[test]
fn test_held_back_prefix_is_released() {
    let handle = scripted_handle(64);
    let config = GenerationConfig::new().max_tokens(20).stop([" jumps!"]);
    let (texts, reason) = stream_texts(&handle, &config);
    assert_eq!(reason, FinishReason::Stop);
    assert_eq!(texts.concat(), CONTINUATION);
    let first = texts.iter().find(|t| !t.is_empty()).unwrap();
    assert_eq!(first, " jumps over");
}

#[test]
fn test_earliest_stop_wins() {
    let handle = scripted_handle(64);
    let config = GenerationConfig::new().max_tokens(20).stop(["dog", "over"]);
    let result = handle.create_completion(PROMPT, &config).unwrap();
    assert_eq!(result.text(), " jumps ");
}

#[test]
fn test_stop_on_first_token() {
    let handle = scripted_handle(64);
    let config = GenerationConfig::new().max_tokens(20).stop([" "]);
    let result = handle.create_completion(PROMPT, &config).unwrap();
    assert_eq!(result.text(), "");
    assert_eq!(result.finish_reason(), Some(FinishReason::Stop));
}

// =============================================================================
// Multi-byte characters split across tokens
// =============================================================================

/// Test backend whose `a` and `b` pieces are the two halves of "☃"
/// (E2 98 | 83), like byte-fallback tokens in BPE vocabularies.
struct SplitPieceBackend(TestBackend);

impl Backend for SplitPieceBackend {
    fn model_name(&self) -> &str {
        self.0.model_name()
    }

    fn tokenize(&self, text: &[u8], add_bos: bool) -> Result<Vec<TokenId>, CompletionError> {
        self.0.tokenize(text, add_bos)
    }

    fn detokenize(&self, tokens: &[TokenId]) -> Result<Vec<u8>, CompletionError> {
        let mut out = Vec::new();
        for &t in tokens {
            match t {
                A => out.extend_from_slice(&[0xE2, 0x98]),
                B => out.push(0x83),
                _ => out.extend(self.0.detokenize(&[t])?),
            }
        }
        Ok(out)
    }

    fn token_bos(&self) -> TokenId {
        self.0.token_bos()
    }

    fn token_eos(&self) -> TokenId {
        self.0.token_eos()
    }

    fn token_unknown(&self) -> Option<TokenId> {
        self.0.token_unknown()
    }

    fn vocab_size(&self) -> usize {
        self.0.vocab_size()
    }

    fn max_sequence_length(&self) -> usize {
        self.0.max_sequence_length()
    }

    fn fingerprint(&self) -> u64 {
        self.0.fingerprint()
    }

    fn new_evaluator(&self, n_ctx: usize) -> Result<Box<dyn Evaluator>, CompletionError> {
        self.0.new_evaluator(n_ctx)
    }
}

fn split_piece_handle() -> ModelHandle {
    ModelHandle::builder(Arc::new(SplitPieceBackend(TestBackend::new())))
        .settings(settings(64))
        .sampler(ScriptedSampler::new(&[A, B, SPACE, A, B]))
        .build()
        .unwrap()
}

#[test]
fn test_split_character_is_held_until_complete() {
    let config = GenerationConfig::new().max_tokens(20);
    let fragments: Vec<String> = split_piece_handle()
        .create_completion_stream(PROMPT, &config)
        .unwrap()
        .map(|item| item.unwrap().text().to_string())
        .collect();

    assert!(fragments.iter().all(|f| !f.contains('\u{FFFD}')), "{:?}", fragments);
    assert_eq!(fragments.concat(), "\u{2603} \u{2603}");
    assert_eq!(fragments[0], "\u{2603}");
}

#[test]
fn test_split_character_buffered_matches_streamed() {
    let config = GenerationConfig::new().max_tokens(20);
    let result = split_piece_handle().create_completion(PROMPT, &config).unwrap();
    assert_eq!(result.text(), "\u{2603} \u{2603}");
    assert_eq!(result.finish_reason(), Some(FinishReason::Stop));
}

#[test]
fn test_length_limit_inside_character_flushes_tail() {
    // The budget ends after the first half; the final fragment carries it as-is.
    let config = GenerationConfig::new().max_tokens(1);
    let result = split_piece_handle().create_completion(PROMPT, &config).unwrap();
    assert_eq!(result.finish_reason(), Some(FinishReason::Length));
    assert_eq!(result.text(), "\u{FFFD}");
}

// =============================================================================
// Config and echo
// =============================================================================

#[test]
fn test_echo_prepends_prompt() {
    let handle = scripted_handle(64);
    let config = GenerationConfig::new().max_tokens(20).stop(["lazy"]).echo(true);
    let result = handle.create_completion(PROMPT, &config).unwrap();
    assert_eq!(result.text(), format!("{} jumps over the ", PROMPT));
}

#[test]
fn test_echo_text_is_not_stop_matched() {
    let handle = scripted_handle(64);
    let config = GenerationConfig::new().max_tokens(2).stop(["quick"]).echo(true);
    let result = handle.create_completion(PROMPT, &config).unwrap();
    assert_eq!(result.text(), format!("{} j", PROMPT));
    assert_eq!(result.finish_reason(), Some(FinishReason::Length));
}

#[test]
fn test_invalid_config_rejected() {
    let handle = handle(64);
    let cases = [
        GenerationConfig::new().max_tokens(0),
        GenerationConfig::new().top_p(1.5),
        GenerationConfig::new().temperature(-1.0),
        GenerationConfig::new().stop([""]),
    ];
    for config in cases {
        let err = handle.create_completion(PROMPT, &config).unwrap_err();
        assert!(matches!(err, CompletionError::InvalidConfig(_)), "{:?}", config);
    }
}

#[test]
fn test_empty_prompt_is_bos_only() {
    let handle = handle(64);
    let result = handle.create_completion("", &greedy(3)).unwrap();
    assert_eq!(result.text(), "The quick brown");
    assert_eq!(result.usage.unwrap().prompt_tokens, 1);
}

#[test]
fn test_bytes_prompt() {
    let handle = handle(64);
    let result = handle.create_completion(PROMPT.as_bytes().to_vec(), &greedy(1)).unwrap();
    assert_eq!(result.text(), " ");
}

#[test]
fn test_seed_reproduces_completion() {
    let backend = Arc::new(
        VocabBackend::from_spec(vocab_spec("flat", 256)).unwrap(),
    );
    let config = GenerationConfig::new()
        .max_tokens(12)
        .temperature(1.0)
        .top_k(0)
        .top_p(1.0)
        .seed(42);
    let a = ModelHandle::new(backend.clone(), EngineSettings::default()).unwrap();
    let b = ModelHandle::new(backend, EngineSettings::default()).unwrap();
    let first = a.create_completion(PROMPT, &config).unwrap();
    let second = b.create_completion(PROMPT, &config).unwrap();
    assert_eq!(first.text(), second.text());
    assert_eq!(first.usage, second.usage);
}

#[test]
fn test_generated_tokens_stay_in_context() {
    let handle = handle(64);
    handle.create_completion(PROMPT, &greedy(3)).unwrap();
    // The last sampled token is never evaluated.
    assert_eq!(handle.context_tokens().unwrap(), vec![BOS, THE, QUICK, BROWN, FOX, SPACE, J]);
}
