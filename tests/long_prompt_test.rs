//! Tests for prompts that do not fit the context window.

mod common;

use std::sync::Arc;

use common::*;
use ember_core::config::{EngineSettings, LongPromptPolicy};
use ember_core::engine::{CompletionError, FinishReason};

fn prompt_of(n_a: usize) -> String {
    "a".repeat(n_a)
}

#[test]
fn test_prompt_at_context_size_is_truncated() {
    let handle = handle(8);
    // BOS + 7 tokens == n_ctx
    let result = handle.create_completion(prompt_of(7), &greedy(4)).unwrap();
    assert_eq!(result.text(), "aaaa");
    assert_eq!(result.finish_reason(), Some(FinishReason::Length));

    let usage = result.usage.unwrap();
    assert_eq!(usage.prompt_tokens, 4);
    assert!(usage.total_tokens <= 8);

    let warning = result.warning.unwrap();
    assert!(warning.contains("exceeds context window"), "{}", warning);
}

#[test]
fn test_prompt_past_context_size_is_truncated() {
    let handle = handle(8);
    let result = handle.create_completion(prompt_of(8), &greedy(4)).unwrap();
    assert_eq!(result.text(), "aaaa");
    assert!(result.warning.unwrap().contains("exceeds context window"));
}

#[test]
fn test_truncation_keeps_bos_and_newest_tokens() {
    let handle = handle(8);
    let result = handle.create_completion("Hello Worldaaaaaaa", &greedy(4)).unwrap();
    assert_eq!(result.usage.unwrap().prompt_tokens, 4);
    let tokens = handle.context_tokens().unwrap();
    assert_eq!(&tokens[..4], &[BOS, A, A, A]);
    assert!(!tokens.contains(&HELLO));
}

#[test]
fn test_reject_policy_returns_overflow() {
    let settings = EngineSettings {
        n_ctx: 8,
        long_prompt: LongPromptPolicy::Reject,
        ..EngineSettings::default()
    };
    let handle = handle_with(Arc::new(TestBackend::new()), settings);

    let err = handle.create_completion(prompt_of(7), &greedy(4)).unwrap_err();
    assert!(matches!(err, CompletionError::ContextOverflow { max: 8, got: 8 }));

    let err = handle.create_completion(prompt_of(8), &greedy(4)).unwrap_err();
    assert!(matches!(err, CompletionError::ContextOverflow { max: 8, got: 9 }));

    // Prompts that fit still complete.
    let result = handle.create_completion(prompt_of(2), &greedy(2)).unwrap();
    assert_eq!(result.text(), "aa");
}

#[test]
fn test_budget_limited_by_context() {
    let handle = handle(8);
    let result = handle.create_completion(prompt_of(5), &greedy(4)).unwrap();
    assert_eq!(result.text(), "aa");
    assert_eq!(result.finish_reason(), Some(FinishReason::Length));
    let warning = result.warning.unwrap();
    assert!(warning.contains("limited by context window"), "{}", warning);
    assert!(!warning.contains("exceeds"));
}

#[test]
fn test_prompt_that_fits_has_no_warning() {
    let handle = handle(8);
    let result = handle.create_completion(prompt_of(3), &greedy(4)).unwrap();
    assert_eq!(result.text(), "aaaa");
    assert!(result.warning.is_none());
}

#[test]
fn test_tiny_context_still_generates() {
    let handle = handle(2);
    let result = handle.create_completion(prompt_of(5), &greedy(4)).unwrap();
    // Only BOS survives, so the model starts over.
    assert_eq!(result.text(), "The");
    assert_eq!(result.usage.unwrap().total_tokens, 2);
    let warning = result.warning.unwrap();
    assert!(warning.contains("exceeds context window"));
    assert!(warning.contains("limited by context window"));
}

#[test]
fn test_zero_n_ctx_uses_model_maximum() {
    let backend = Arc::new(TestBackend::with_limits("small-model", 32));
    let handle = handle_with(backend, settings(0));
    assert_eq!(handle.n_ctx(), 32);

    let capped = handle_with(Arc::new(TestBackend::with_limits("small-model", 32)), settings(4096));
    assert_eq!(capped.n_ctx(), 32);
}
