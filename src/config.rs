//! Engine configuration from environment variables and TOML files.
//!
//! Environment values are read from `EMBER_*` variables with sensible
//! defaults. Invalid values fall back to defaults without crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `EMBER_N_CTX` | 512 | Context window (tokens, 0 = model maximum) |
//! | `EMBER_N_BATCH` | 512 | Prompt evaluation batch size |
//! | `EMBER_N_THREADS` | 0 | Inference threads (0 = auto) |
//! | `EMBER_LONG_PROMPT` | truncate | `truncate` or `reject` prompts that fill the context |
//! | `EMBER_PROMPT_CACHE_ENTRIES` | 0 | Prompt cache capacity (0 = disabled) |
//! | `EMBER_MAX_TOKENS` | 16 | Default completion length |
//! | `EMBER_TEMPERATURE` | 0.8 | Default sampling temperature |
//! | `EMBER_TOP_K` | 40 | Default top-k (0 = disabled) |
//! | `EMBER_TOP_P` | 0.95 | Default nucleus threshold |
//! | `EMBER_REPEAT_PENALTY` | 1.1 | Default repetition penalty |
//! | `EMBER_REPEAT_LAST_N` | 64 | Default repetition window |
//! | `EMBER_LOG` | info | Log filter directive |
//! | `EMBER_LOG_FORMAT` | pretty | `pretty` or `json` |

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::telemetry::{LogConfig, LogFormat};

/// What to do with a prompt that fills the whole context window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LongPromptPolicy {
    /// Keep BOS and the newest tokens, and warn.
    #[default]
    Truncate,
    /// Fail with `ContextOverflow`.
    Reject,
}

impl FromStr for LongPromptPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "truncate" => Ok(Self::Truncate),
            "reject" => Ok(Self::Reject),
            other => Err(ConfigError::Invalid(format!("unknown long prompt policy: {other}"))),
        }
    }
}

/// Engine-wide generation defaults, applied to unset request fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationDefaults {
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_k: usize,
    pub top_p: f32,
    pub repetition_penalty: f32,
    pub repeat_last_n: usize,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            max_tokens: 16,
            temperature: 0.8,
            top_k: 40,
            top_p: 0.95,
            repetition_penalty: 1.1,
            repeat_last_n: 64,
        }
    }
}

/// Settings for one model handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Context window in tokens; 0 uses the model maximum.
    pub n_ctx: usize,
    pub n_batch: usize,
    /// Inference threads; 0 picks the physical core count.
    pub n_threads: usize,
    pub long_prompt: LongPromptPolicy,
    /// Prompt cache capacity in entries; 0 disables it.
    pub prompt_cache_entries: usize,
    pub defaults: GenerationDefaults,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            n_ctx: 512,
            n_batch: 512,
            n_threads: 0,
            long_prompt: LongPromptPolicy::Truncate,
            prompt_cache_entries: 0,
            defaults: GenerationDefaults::default(),
        }
    }
}

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

impl EngineSettings {
    /// Parse settings from TOML. Missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read and parse a TOML settings file.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Reject values no request could run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_batch == 0 {
            return Err(ConfigError::Invalid("n_batch must be >= 1".into()));
        }
        let d = &self.defaults;
        if d.max_tokens == 0 {
            return Err(ConfigError::Invalid("defaults.max_tokens must be >= 1".into()));
        }
        if !(d.temperature >= 0.0) {
            return Err(ConfigError::Invalid("defaults.temperature must be >= 0.0".into()));
        }
        if !(0.0..=1.0).contains(&d.top_p) {
            return Err(ConfigError::Invalid("defaults.top_p must be in [0.0, 1.0]".into()));
        }
        if !(d.repetition_penalty >= 0.0) {
            return Err(ConfigError::Invalid("defaults.repetition_penalty must be >= 0.0".into()));
        }
        Ok(())
    }

    /// Thread count to hand the backend. Auto-detection is capped at 16.
    pub fn resolved_threads(&self) -> usize {
        if self.n_threads > 0 {
            self.n_threads
        } else {
            num_cpus::get_physical().clamp(1, 16)
        }
    }
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse an `f32` env var, returning `default` on missing, invalid or NaN.
fn parse_f32(key: &str, default: f32) -> f32 {
    match std::env::var(key) {
        Ok(val) => match val.trim().parse::<f32>() {
            Ok(v) if v.is_finite() => v,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Load generation defaults from environment.
fn load_generation_defaults() -> GenerationDefaults {
    let base = GenerationDefaults::default();
    let max_tokens = parse_usize("EMBER_MAX_TOKENS", base.max_tokens).max(1);
    let temperature = parse_f32("EMBER_TEMPERATURE", base.temperature).max(0.0);
    let top_k = parse_usize("EMBER_TOP_K", base.top_k);
    let top_p = parse_f32("EMBER_TOP_P", base.top_p).clamp(0.0, 1.0);
    let repetition_penalty = parse_f32("EMBER_REPEAT_PENALTY", base.repetition_penalty).max(0.0);
    let repeat_last_n = parse_usize("EMBER_REPEAT_LAST_N", base.repeat_last_n);
    GenerationDefaults { max_tokens, temperature, top_k, top_p, repetition_penalty, repeat_last_n }
}

/// Load all engine settings from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> EngineSettings {
    let base = EngineSettings::default();
    let long_prompt = std::env::var("EMBER_LONG_PROMPT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(base.long_prompt);

    EngineSettings {
        n_ctx: parse_usize("EMBER_N_CTX", base.n_ctx),
        n_batch: parse_usize("EMBER_N_BATCH", base.n_batch).max(1),
        n_threads: parse_usize("EMBER_N_THREADS", base.n_threads),
        long_prompt,
        prompt_cache_entries: parse_usize("EMBER_PROMPT_CACHE_ENTRIES", base.prompt_cache_entries),
        defaults: load_generation_defaults(),
    }
}

/// Load logging configuration from `EMBER_LOG` and `EMBER_LOG_FORMAT`.
pub fn load_log_config() -> LogConfig {
    let level = std::env::var("EMBER_LOG")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "info".to_string());
    let format = std::env::var("EMBER_LOG_FORMAT")
        .ok()
        .and_then(|v| v.parse::<LogFormat>().ok())
        .unwrap_or_default();
    LogConfig { format, level, output_path: None }
}
