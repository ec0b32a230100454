//! GGUF model support via llama.cpp.
//!
//! Only compiled with the `gguf` feature.

mod backend;

pub use backend::{GgufBackend, LlamaEvaluator};

/// Load options for a GGUF model.
#[derive(Debug, Clone)]
pub struct GgufConfig {
    /// Layers to offload to the GPU (0 = CPU only).
    pub n_gpu_layers: u32,
    /// Inference threads.
    pub n_threads: u32,
    /// Tokens per decode batch.
    pub n_batch: u32,
}

impl Default for GgufConfig {
    fn default() -> Self {
        Self::from_settings(&crate::config::EngineSettings::default())
    }
}

impl GgufConfig {
    /// Thread and batch settings from engine settings.
    pub fn from_settings(settings: &crate::config::EngineSettings) -> Self {
        Self {
            n_gpu_layers: 0,
            n_threads: u32::try_from(settings.resolved_threads()).unwrap_or(4),
            n_batch: u32::try_from(settings.n_batch).unwrap_or(512).max(1),
        }
    }
}
