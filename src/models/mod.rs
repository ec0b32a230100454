//! Model loading for Ember CORE.
//!
//! Vocabulary files back the vocabulary-only backend; GGUF files (with the
//! `gguf` feature) back the llama.cpp backend.

mod loader;
mod vocab;

#[cfg(feature = "gguf")]
pub use loader::load_gguf;
pub use loader::{load_vocab, LoadError, MappedFile, ModelMetadata};
pub use vocab::{VocabBackend, VocabOnlyEvaluator, VocabSpec};
