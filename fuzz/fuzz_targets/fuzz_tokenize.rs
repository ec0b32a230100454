//! Fuzz target for tokenization and stop handling on arbitrary prompts.

#![no_main]

use std::sync::Arc;

use arbitrary::Arbitrary;
use ember_core::config::EngineSettings;
use ember_core::engine::{GenerationConfig, ModelHandle, SamplingParams, TokenId};
use ember_core::models::{VocabBackend, VocabSpec};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    prompt: Vec<u8>,
    stop: Vec<String>,
    max_tokens: u8,
}

const PIECES: &[&str] = &["<unk>", "<s>", "</s>", "a", "b", "ab", " ", "\u{e9}", "\n"];

fn next_token(_logits: &[f32], _params: &SamplingParams, recent: &[TokenId]) -> TokenId {
    let last = recent.last().copied().unwrap_or(0);
    3 + (last * 7 + 1) % 6
}

fuzz_target!(|input: Input| {
    let spec = VocabSpec {
        name: "fuzz".to_string(),
        tokens: PIECES.iter().map(|s| s.to_string()).collect(),
        bos: 1,
        eos: 2,
        unk: 0,
        max_sequence_length: 64,
    };
    let backend = Arc::new(VocabBackend::from_spec(spec).unwrap());
    let handle = ModelHandle::builder(backend)
        .settings(EngineSettings { n_ctx: 32, ..EngineSettings::default() })
        .sampler(next_token)
        .build()
        .unwrap();

    let tokens = handle.tokenize(&input.prompt).unwrap();
    if !tokens.contains(&0) {
        assert_eq!(handle.detokenize(&tokens).unwrap(), input.prompt);
    }

    let config = GenerationConfig::new()
        .max_tokens(usize::from(input.max_tokens).max(1))
        .stop(input.stop.iter().take(4).cloned());
    let Ok(stream) = handle.create_completion_stream(&input.prompt, &config) else {
        return;
    };
    for item in stream {
        let fragment = item.unwrap();
        for stop in &config.stop {
            assert!(!fragment.text().contains(stop.as_str()));
        }
    }
});
