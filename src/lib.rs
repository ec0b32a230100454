//! Ember CORE
//!
//! A stateful text-completion engine over pluggable inference backends.
//! A [`ModelHandle`] owns one model context: it tokenizes prompts, reuses
//! the evaluated prefix between calls, samples tokens, and honors stop
//! sequences and token limits. Results come back buffered or as a stream
//! of fragments whose concatenation equals the buffered text.
//!
//! # Layout
//!
//! - `engine`: tokenizer adapter, context snapshots, sampling, stop
//!   matching, the generation loop and streaming
//! - `models`: vocabulary and GGUF loading
//! - `memory`: prompt prefix cache
//! - `config`: `EMBER_*` environment and TOML settings
//! - `telemetry`: logging, spans, metrics
//! - `cli`: subcommands of the `ember-cli` binary
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ember_core::config::EngineSettings;
//! use ember_core::engine::{GenerationConfig, ModelHandle};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = ember_core::models::load_vocab("vocab.json")?;
//! let handle = ModelHandle::new(Arc::new(backend), EngineSettings::default())?;
//! let config = GenerationConfig::new().max_tokens(8).stop(["."]);
//! let result = handle.create_completion("The quick", &config)?;
//! println!("{}", result.text());
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod engine;
pub mod memory;
pub mod models;
pub mod telemetry;

pub use engine::{
    CompletionError, CompletionResult, FinishReason, GenerationConfig, ModelHandle, Usage,
};
