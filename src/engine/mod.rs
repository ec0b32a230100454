//! Completion engine for Ember CORE.
//!
//! Tokenization, context state, sampling and the generate loop behind
//! buffered and streamed completions. The numerical model sits behind the
//! [`Backend`] and [`Evaluator`] traits.

pub mod backend;
pub mod completion;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod error;
#[cfg(feature = "gguf")]
pub mod gguf;
pub mod handle;
pub mod output;
pub mod sampler;
pub mod snapshot;
pub mod stop;
pub mod streaming;
mod tokenizer;

pub use backend::{Backend, EvalResult, Evaluator, TokenId};
pub use completion::{
    CompletionRequest, CompletionResponse, CompletionStream, Generation, GenerationState, Prompt,
};
pub use config::{GenerationConfig, ResolvedConfig};
pub use context::ContextState;
pub use diagnostics::Diagnostics;
pub use error::CompletionError;
pub use handle::{ModelHandle, ModelHandleBuilder};
pub use output::{CompletionChoice, CompletionResult, FinishReason, Usage};
pub use sampler::{Sampler, SamplingParams, StandardSampler};
pub use snapshot::{ContextSnapshot, SNAPSHOT_MAGIC, SNAPSHOT_VERSION};
pub use stop::{StopScan, StopState};
pub use streaming::{spawn_completion, CompletionReceiver, CompletionSender, StreamSendError};
pub use tokenizer::TokenizerAdapter;

#[cfg(feature = "gguf")]
pub use gguf::{GgufBackend, GgufConfig};
