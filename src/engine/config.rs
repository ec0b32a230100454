//! Per-request generation configuration.
//!
//! Every field is optional; unset fields take the engine defaults from
//! [`crate::config::GenerationDefaults`]. Values are validated before use.

use serde::{Deserialize, Serialize};

use super::error::CompletionError;
use super::sampler::SamplingParams;
use crate::config::GenerationDefaults;

/// Caller-facing generation options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Maximum tokens to generate (>= 1).
    #[serde(default)]
    pub max_tokens: Option<usize>,
    /// Temperature for sampling (0.0 = deterministic argmax).
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Top-k sampling limit (0 = disabled).
    #[serde(default)]
    pub top_k: Option<usize>,
    /// Top-p (nucleus) threshold in [0.0, 1.0].
    #[serde(default)]
    pub top_p: Option<f32>,
    /// Repetition penalty (1.0 = none).
    #[serde(default)]
    pub repetition_penalty: Option<f32>,
    /// Window of recent tokens the penalty looks at.
    #[serde(default)]
    pub repeat_last_n: Option<usize>,
    /// Sequences that end generation; the matched text is not returned.
    #[serde(default)]
    pub stop: Vec<String>,
    /// Seed for reproducible sampling. None = random per request.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Prepend the prompt text to the completion.
    #[serde(default)]
    pub echo: bool,
}

impl GenerationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn repetition_penalty(mut self, penalty: f32) -> Self {
        self.repetition_penalty = Some(penalty);
        self
    }

    pub fn repeat_last_n(mut self, n: usize) -> Self {
        self.repeat_last_n = Some(n);
        self
    }

    pub fn stop<I, S>(mut self, stop: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stop = stop.into_iter().map(Into::into).collect();
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Validate explicitly set values. Returns error on invalid values.
    pub fn validate(&self) -> Result<(), CompletionError> {
        if self.max_tokens == Some(0) {
            return Err(CompletionError::InvalidConfig("max_tokens must be >= 1".into()));
        }
        if let Some(t) = self.temperature {
            if !(t >= 0.0) {
                return Err(CompletionError::InvalidConfig("temperature must be >= 0.0".into()));
            }
        }
        if let Some(p) = self.top_p {
            if !(0.0..=1.0).contains(&p) {
                return Err(CompletionError::InvalidConfig(
                    "top_p must be in range [0.0, 1.0]".into(),
                ));
            }
        }
        if let Some(r) = self.repetition_penalty {
            if !(r >= 0.0) {
                return Err(CompletionError::InvalidConfig(
                    "repetition_penalty must be >= 0.0".into(),
                ));
            }
        }
        if self.stop.iter().any(|s| s.is_empty()) {
            return Err(CompletionError::InvalidConfig("stop sequences cannot be empty".into()));
        }
        Ok(())
    }

    /// Validate and fill unset fields from `defaults`.
    pub fn resolve(&self, defaults: &GenerationDefaults) -> Result<ResolvedConfig, CompletionError> {
        self.validate()?;
        let mut stop = self.stop.clone();
        stop.sort();
        stop.dedup();
        Ok(ResolvedConfig {
            max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens).max(1),
            sampling: SamplingParams {
                temperature: self.temperature.unwrap_or(defaults.temperature),
                top_k: self.top_k.unwrap_or(defaults.top_k),
                top_p: self.top_p.unwrap_or(defaults.top_p),
                repetition_penalty: self.repetition_penalty.unwrap_or(defaults.repetition_penalty),
                repeat_last_n: self.repeat_last_n.unwrap_or(defaults.repeat_last_n),
                seed: self.seed.unwrap_or_else(rand::random),
            },
            stop,
            echo: self.echo,
        })
    }
}

/// Generation options with every default applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub max_tokens: usize,
    pub sampling: SamplingParams,
    pub stop: Vec<String>,
    pub echo: bool,
}
