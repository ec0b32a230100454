//! Token sampling for autoregressive generation.
//!
//! A sampler is a pure function of `(logits, params, recent_tokens)`. All
//! randomness comes from `params.seed`, which the completion engine varies
//! per step, so a fixed request seed reproduces a whole completion.

use std::cmp::Ordering;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::backend::TokenId;

/// Resolved sampling knobs for one step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Temperature for logit scaling. 0.0 = greedy (argmax).
    pub temperature: f32,
    /// Keep only the `top_k` most likely tokens. 0 = disabled.
    pub top_k: usize,
    /// Nucleus cutoff on cumulative probability. 1.0 = disabled.
    pub top_p: f32,
    /// Penalty applied to tokens in the recent window. 1.0 = none.
    pub repetition_penalty: f32,
    /// Size of the recent-token window passed to the sampler.
    pub repeat_last_n: usize,
    pub seed: u64,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            top_k: 40,
            top_p: 0.95,
            repetition_penalty: 1.1,
            repeat_last_n: 64,
            seed: 0,
        }
    }
}

impl SamplingParams {
    /// Parameters for generation step `step`, with a seed derived from the
    /// request seed.
    pub fn for_step(&self, step: usize) -> Self {
        Self { seed: splitmix64(self.seed ^ (step as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)), ..*self }
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

/// Selects the next token.
pub trait Sampler: Send + Sync {
    fn sample(&self, logits: &[f32], params: &SamplingParams, recent: &[TokenId]) -> TokenId;
}

impl<F> Sampler for F
where
    F: Fn(&[f32], &SamplingParams, &[TokenId]) -> TokenId + Send + Sync,
{
    fn sample(&self, logits: &[f32], params: &SamplingParams, recent: &[TokenId]) -> TokenId {
        self(logits, params, recent)
    }
}

/// Repetition penalty, then top-k, temperature, top-p and a seeded draw.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardSampler;

impl Sampler for StandardSampler {
    fn sample(&self, logits: &[f32], params: &SamplingParams, recent: &[TokenId]) -> TokenId {
        if logits.is_empty() {
            return 0;
        }

        let mut logits = logits.to_vec();
        apply_repetition_penalty(&mut logits, recent, params.repetition_penalty);

        if params.temperature <= 0.0 {
            return argmax(&logits);
        }

        let mut candidates: Vec<(TokenId, f32)> = logits
            .iter()
            .enumerate()
            .map(|(i, &l)| (i as TokenId, l))
            .collect();
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        if params.top_k > 0 && params.top_k < candidates.len() {
            candidates.truncate(params.top_k);
        }

        // Softmax over candidates (already sorted descending). Shift before
        // scaling so a tiny temperature cannot overflow.
        let (best, max_logit) = candidates[0];
        if !max_logit.is_finite() {
            return best;
        }
        let mut probs: Vec<(TokenId, f32)> = candidates
            .iter()
            .map(|&(idx, l)| (idx, ((l - max_logit) / params.temperature).exp()))
            .collect();
        if !normalize(&mut probs) {
            return best;
        }

        if params.top_p < 1.0 {
            let mut cumulative = 0.0f32;
            let mut keep = probs.len();
            for (i, &(_, p)) in probs.iter().enumerate() {
                cumulative += p;
                if cumulative >= params.top_p {
                    keep = i + 1;
                    break;
                }
            }
            probs.truncate(keep.max(1));
            if !normalize(&mut probs) {
                return best;
            }
        }

        let r: f32 = StdRng::seed_from_u64(params.seed).gen();
        let mut cumulative = 0.0f32;
        for &(idx, p) in &probs {
            cumulative += p;
            if r < cumulative {
                return idx;
            }
        }
        probs.last().map(|c| c.0).unwrap_or(0)
    }
}

/// Scale to a distribution. Returns false when the mass is not a positive
/// finite number.
fn normalize(probs: &mut [(TokenId, f32)]) -> bool {
    let sum: f32 = probs.iter().map(|c| c.1).sum();
    if !(sum > 0.0 && sum.is_finite()) {
        return false;
    }
    for c in probs.iter_mut() {
        c.1 /= sum;
    }
    true
}

/// Penalize every distinct token in `recent`: positive logits are divided by
/// `penalty`, the rest multiplied. A penalty of 1.0 or below zero is a no-op.
pub fn apply_repetition_penalty(logits: &mut [f32], recent: &[TokenId], penalty: f32) {
    if penalty <= 0.0 || penalty == 1.0 {
        return;
    }
    let mut seen: Vec<TokenId> = recent.to_vec();
    seen.sort_unstable();
    seen.dedup();
    for token in seen {
        if let Some(l) = logits.get_mut(token as usize) {
            *l = if *l > 0.0 { *l / penalty } else { *l * penalty };
        }
    }
}

/// Return the index of the maximum value in the logits.
pub fn argmax(logits: &[f32]) -> TokenId {
    let mut best_idx = 0;
    let mut best_val = f32::NEG_INFINITY;
    for (i, &v) in logits.iter().enumerate() {
        if v > best_val {
            best_val = v;
            best_idx = i as TokenId;
        }
    }
    best_idx
}
