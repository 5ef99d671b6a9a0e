//! Composable logit transforms
//!
//! Each transform is a small struct applied to a mutable score vector.
//! Deterministic transforms implement the [`Sampler`] trait and can be
//! chained; the stochastic ones (XTC, mirostat) take the RNG explicitly and
//! are driven directly by the pipeline in `sampling::TokenSampler`.
//!
//! Filtering masks tokens by writing `f32::NEG_INFINITY` into the score
//! vector. Probability-space filters recompute softmax from the masked
//! scores, so entries masked by an earlier stage stay excluded
//! (`exp(-inf) == 0`).

use super::softmax;
use crate::types::TokenId;
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::{HashMap, VecDeque};

/// Trait for deterministic logit transforms
pub trait Sampler: Send + Sync {
    /// Apply the transform to logits in place
    fn apply(&self, logits: &mut [f32], context: &SamplingContext);

    /// Get the name of this transform
    fn name(&self) -> &str;
}

/// Recent-token window consulted by the penalty transforms
#[derive(Debug, Clone, Default)]
pub struct SamplingContext {
    /// Recently emitted tokens, oldest first, bounded by the window size
    pub recent_tokens: VecDeque<TokenId>,

    /// Occurrence counts within the window
    pub token_counts: HashMap<TokenId, usize>,

    window: usize,
}

impl SamplingContext {
    /// Create a context with the given window size
    pub fn new(window: usize) -> Self {
        Self {
            recent_tokens: VecDeque::new(),
            token_counts: HashMap::new(),
            window,
        }
    }

    /// Record a token, evicting the oldest once the window is full
    pub fn push(&mut self, token: TokenId) {
        if self.window == 0 {
            return;
        }
        self.recent_tokens.push_back(token);
        *self.token_counts.entry(token).or_insert(0) += 1;
        if self.recent_tokens.len() > self.window {
            if let Some(evicted) = self.recent_tokens.pop_front() {
                if let Some(count) = self.token_counts.get_mut(&evicted) {
                    *count -= 1;
                    if *count == 0 {
                        self.token_counts.remove(&evicted);
                    }
                }
            }
        }
    }

    /// Forget all recorded tokens
    pub fn clear(&mut self) {
        self.recent_tokens.clear();
        self.token_counts.clear();
    }
}

/// Temperature scaling
#[derive(Debug, Clone)]
pub struct TemperatureSampler {
    /// Temperature value; validated > 0 at the config boundary
    pub temperature: f32,
}

impl TemperatureSampler {
    /// Create a new temperature transform
    pub fn new(temperature: f32) -> Self {
        Self { temperature }
    }
}

impl Sampler for TemperatureSampler {
    fn apply(&self, logits: &mut [f32], _context: &SamplingContext) {
        if self.temperature != 1.0 && self.temperature > 0.0 {
            for logit in logits.iter_mut() {
                *logit /= self.temperature;
            }
        }
    }

    fn name(&self) -> &str {
        "temperature"
    }
}

/// Repetition penalty over the recent-token window
#[derive(Debug, Clone)]
pub struct RepetitionPenalty {
    /// Penalty value; <= 1.0 is a no-op
    pub penalty: f32,
}

impl RepetitionPenalty {
    /// Create a new repetition penalty
    pub fn new(penalty: f32) -> Self {
        Self { penalty }
    }
}

impl Sampler for RepetitionPenalty {
    fn apply(&self, logits: &mut [f32], context: &SamplingContext) {
        if self.penalty <= 1.0 {
            return;
        }
        for &token_id in context.token_counts.keys() {
            if let Some(logit) = logits.get_mut(token_id as usize) {
                if *logit > 0.0 {
                    *logit /= self.penalty;
                } else {
                    *logit *= self.penalty;
                }
            }
        }
    }

    fn name(&self) -> &str {
        "repetition_penalty"
    }
}

/// OpenAI-style frequency and presence penalties
#[derive(Debug, Clone)]
pub struct FrequencyPresencePenalty {
    /// Subtracted once per occurrence
    pub frequency: f32,

    /// Subtracted once for any occurrence
    pub presence: f32,
}

impl FrequencyPresencePenalty {
    /// Create a new frequency/presence penalty
    pub fn new(frequency: f32, presence: f32) -> Self {
        Self {
            frequency,
            presence,
        }
    }
}

impl Sampler for FrequencyPresencePenalty {
    fn apply(&self, logits: &mut [f32], context: &SamplingContext) {
        if self.frequency == 0.0 && self.presence == 0.0 {
            return;
        }
        for (&token_id, &count) in &context.token_counts {
            if let Some(logit) = logits.get_mut(token_id as usize) {
                *logit -= self.frequency * count as f32;
                if count > 0 {
                    *logit -= self.presence;
                }
            }
        }
    }

    fn name(&self) -> &str {
        "frequency_presence"
    }
}

/// DRY (Don't Repeat Yourself) penalty.
///
/// Looks for earlier occurrences of the suffix the output currently ends
/// with. A token that would stretch such a repeat past `allowed_length`
/// is penalized by `multiplier * base^(repeat_len - allowed_length)`.
#[derive(Debug, Clone)]
pub struct DryPenalty {
    /// Penalty multiplier; <= 0 disables
    pub multiplier: f32,

    /// Exponential base for penalty growth
    pub base: f32,

    /// Repeat length tolerated before the penalty applies
    pub allowed_length: usize,
}

impl DryPenalty {
    /// Create a new DRY penalty
    pub fn new(multiplier: f32, base: f32, allowed_length: usize) -> Self {
        Self {
            multiplier,
            base,
            allowed_length,
        }
    }
}

impl Sampler for DryPenalty {
    fn apply(&self, logits: &mut [f32], context: &SamplingContext) {
        if self.multiplier <= 0.0 {
            return;
        }
        let history: Vec<TokenId> = context.recent_tokens.iter().copied().collect();
        let n = history.len();
        if n < 2 {
            return;
        }

        // For each earlier position j, measure how long the window ending at
        // j - 1 matches the suffix ending at n - 1. history[j] is then the
        // token that would extend the repeat.
        let mut repeat_len: HashMap<TokenId, usize> = HashMap::new();
        for j in 1..n {
            let mut m = 0;
            while m < j && history[j - 1 - m] == history[n - 1 - m] {
                m += 1;
            }
            if m >= self.allowed_length {
                let entry = repeat_len.entry(history[j]).or_insert(0);
                *entry = (*entry).max(m);
            }
        }

        for (token, len) in repeat_len {
            if let Some(logit) = logits.get_mut(token as usize) {
                let exponent = (len - self.allowed_length) as i32;
                *logit -= self.multiplier * self.base.powi(exponent);
            }
        }
    }

    fn name(&self) -> &str {
        "dry"
    }
}

/// Top-K filtering
#[derive(Debug, Clone)]
pub struct TopKSampler {
    /// K value; <= 0 disables the filter
    pub k: i32,
}

impl TopKSampler {
    /// Create a new top-k filter
    pub fn new(k: i32) -> Self {
        Self { k }
    }
}

impl Sampler for TopKSampler {
    fn apply(&self, logits: &mut [f32], _context: &SamplingContext) {
        if self.k <= 0 || self.k as usize >= logits.len() {
            return;
        }
        let k = self.k as usize;

        // Ties broken by ascending token id so the cut is deterministic.
        let mut indices: Vec<usize> = (0..logits.len()).collect();
        indices.sort_by(|&a, &b| {
            logits[b]
                .partial_cmp(&logits[a])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });

        for &idx in &indices[k..] {
            logits[idx] = f32::NEG_INFINITY;
        }
    }

    fn name(&self) -> &str {
        "top_k"
    }
}

/// Top-P (nucleus) filtering
#[derive(Debug, Clone)]
pub struct TopPSampler {
    /// Cumulative probability threshold; >= 1.0 disables
    pub p: f32,
}

impl TopPSampler {
    /// Create a new top-p filter
    pub fn new(p: f32) -> Self {
        Self { p }
    }
}

impl Sampler for TopPSampler {
    fn apply(&self, logits: &mut [f32], _context: &SamplingContext) {
        if self.p >= 1.0 {
            return;
        }
        let probs = softmax(logits);

        let mut indices: Vec<usize> = (0..logits.len()).collect();
        indices.sort_by(|&a, &b| {
            probs[b]
                .partial_cmp(&probs[a])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });

        // Keep tokens up to and including the one that pushes the cumulative
        // mass over p.
        let mut cumsum = 0.0;
        let mut cutoff = indices.len();
        for (i, &idx) in indices.iter().enumerate() {
            cumsum += probs[idx];
            if cumsum > self.p {
                cutoff = i + 1;
                break;
            }
        }

        for &idx in &indices[cutoff..] {
            logits[idx] = f32::NEG_INFINITY;
        }
    }

    fn name(&self) -> &str {
        "top_p"
    }
}

/// Min-P filtering relative to the most likely token
#[derive(Debug, Clone)]
pub struct MinPSampler {
    /// Minimum probability as a fraction of the max; <= 0 disables
    pub p: f32,
}

impl MinPSampler {
    /// Create a new min-p filter
    pub fn new(p: f32) -> Self {
        Self { p }
    }
}

impl Sampler for MinPSampler {
    fn apply(&self, logits: &mut [f32], _context: &SamplingContext) {
        if self.p <= 0.0 {
            return;
        }
        let probs = softmax(logits);
        let max_prob = probs.iter().copied().fold(0.0f32, f32::max);
        let threshold = max_prob * self.p;

        for (logit, &prob) in logits.iter_mut().zip(probs.iter()) {
            if prob < threshold {
                *logit = f32::NEG_INFINITY;
            }
        }
    }

    fn name(&self) -> &str {
        "min_p"
    }
}

/// Locally typical filtering.
///
/// Ranks tokens by how far their surprisal deviates from the distribution's
/// entropy and keeps the most typical prefix whose cumulative probability
/// reaches `p`.
#[derive(Debug, Clone)]
pub struct TypicalPSampler {
    /// Cumulative probability mass to keep; >= 1.0 disables
    pub p: f32,
}

impl TypicalPSampler {
    /// Create a new typical-p filter
    pub fn new(p: f32) -> Self {
        Self { p }
    }
}

impl Sampler for TypicalPSampler {
    fn apply(&self, logits: &mut [f32], _context: &SamplingContext) {
        if self.p >= 1.0 {
            return;
        }
        let probs = softmax(logits);

        let entropy: f32 = -probs
            .iter()
            .filter(|&&p| p > 1e-10)
            .map(|&p| p * p.ln())
            .sum::<f32>();

        let mut ranked: Vec<(usize, f32, f32)> = probs
            .iter()
            .enumerate()
            .filter(|(_, &prob)| prob > 1e-10)
            .map(|(i, &prob)| {
                let deviation = (-prob.ln() - entropy).abs();
                (i, prob, deviation)
            })
            .collect();
        ranked.sort_by(|a, b| {
            a.2.partial_cmp(&b.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        let mut cumsum = 0.0;
        let mut kept = Vec::with_capacity(ranked.len());
        for (idx, prob, _) in ranked {
            kept.push(idx);
            cumsum += prob;
            if cumsum >= self.p {
                break;
            }
        }

        if kept.is_empty() {
            return;
        }
        let keep: std::collections::HashSet<usize> = kept.into_iter().collect();
        for (idx, logit) in logits.iter_mut().enumerate() {
            if !keep.contains(&idx) {
                *logit = f32::NEG_INFINITY;
            }
        }
    }

    fn name(&self) -> &str {
        "typical_p"
    }
}

/// XTC (Exclude Top Choices) filtering.
///
/// With probability `probability`, masks every token whose probability
/// exceeds `threshold` except the least likely of them, which becomes the
/// highest-probability token of what remains.
#[derive(Debug, Clone)]
pub struct XtcSampler {
    /// Chance that the filter fires on a given step
    pub probability: f32,

    /// Probability threshold above which top choices are masked
    pub threshold: f32,
}

impl XtcSampler {
    /// Create a new XTC filter
    pub fn new(probability: f32, threshold: f32) -> Self {
        Self {
            probability,
            threshold,
        }
    }

    /// Apply the filter, drawing the trigger from `rng`
    pub fn apply(&self, logits: &mut [f32], rng: &mut StdRng) {
        if self.probability <= 0.0 {
            return;
        }
        if rng.gen::<f32>() >= self.probability {
            return;
        }
        let probs = softmax(logits);

        let mut above: Vec<usize> = (0..logits.len())
            .filter(|&i| probs[i] > self.threshold)
            .collect();
        if above.len() < 2 {
            return;
        }
        above.sort_by(|&a, &b| {
            probs[b]
                .partial_cmp(&probs[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        // All but the least likely of the top choices get masked.
        for &idx in &above[..above.len() - 1] {
            logits[idx] = f32::NEG_INFINITY;
        }
    }
}

/// Mirostat adaptive sampling.
///
/// Samples from tokens whose surprisal sits below a running threshold `mu`
/// and nudges `mu` toward the target entropy `tau` at learning rate `eta`.
/// When enabled it replaces the whole filter pipeline.
#[derive(Debug, Clone)]
pub struct MirostatSampler {
    /// Target surprisal (tau)
    pub tau: f32,

    /// Learning rate (eta)
    pub eta: f32,
}

impl MirostatSampler {
    /// Create a new mirostat sampler
    pub fn new(tau: f32, eta: f32) -> Self {
        Self { tau, eta }
    }

    /// Initial running threshold
    pub fn initial_mu(&self) -> f32 {
        2.0 * self.tau
    }

    /// Mirostat v2: direct surprisal cutoff at `mu`
    pub fn sample_v2(&self, logits: &[f32], mu: &mut f32, rng: &mut StdRng) -> TokenId {
        let probs = softmax(logits);
        let mut ranked: Vec<(usize, f32)> = probs
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, p)| *p > 0.0)
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        if ranked.is_empty() {
            return 0;
        }

        let mut candidates: Vec<(usize, f32)> = ranked
            .iter()
            .copied()
            .take_while(|(_, p)| -p.log2() <= *mu)
            .collect();
        if candidates.is_empty() {
            candidates.push(ranked[0]);
        }

        let (token, prob) = draw(&candidates, rng);
        let observed = -prob.log2();
        *mu -= self.eta * (observed - self.tau);
        token as TokenId
    }

    /// Mirostat v1: top-k estimated from the Zipf exponent of the head of
    /// the distribution, then a surprisal-driven `mu` update as in v2.
    pub fn sample_v1(&self, logits: &[f32], mu: &mut f32, rng: &mut StdRng) -> TokenId {
        let probs = softmax(logits);
        let mut ranked: Vec<(usize, f32)> = probs
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, p)| *p > 0.0)
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        if ranked.len() < 2 {
            return ranked.first().map(|(i, _)| *i as TokenId).unwrap_or(0);
        }

        let m = ranked.len().min(100);
        let mut num = 0.0f32;
        let mut den = 0.0f32;
        for i in 0..m - 1 {
            let t = ((i + 2) as f32 / (i + 1) as f32).ln();
            let b = (ranked[i].1 / ranked[i + 1].1).ln();
            num += t * b;
            den += t * t;
        }
        let s_hat = if den > 0.0 { num / den } else { 1.0 };

        let n = logits.len() as f32;
        let epsilon = s_hat - 1.0;
        let k = if epsilon.abs() < 1e-6 {
            ranked.len()
        } else {
            let k = ((epsilon * 2.0f32.powf(*mu)) / (1.0 - n.powf(-epsilon))).powf(1.0 / s_hat);
            (k.round() as usize).clamp(1, ranked.len())
        };

        let candidates = &ranked[..k];
        let (token, prob) = draw(candidates, rng);
        let observed = -prob.log2();
        *mu -= self.eta * (observed - self.tau);
        token as TokenId
    }
}

/// Inverse-CDF draw over (index, weight) candidates
fn draw(candidates: &[(usize, f32)], rng: &mut StdRng) -> (usize, f32) {
    let sum: f32 = candidates.iter().map(|(_, p)| p).sum();
    let r: f32 = rng.gen::<f32>() * sum;
    let mut cumsum = 0.0;
    for &(idx, prob) in candidates {
        cumsum += prob;
        if cumsum >= r {
            return (idx, prob);
        }
    }
    *candidates.last().expect("candidates must be non-empty")
}

/// Chain of deterministic transforms applied in order
pub struct SamplerChain {
    samplers: Vec<Box<dyn Sampler>>,
}

impl SamplerChain {
    /// Create an empty chain
    pub fn new() -> Self {
        Self {
            samplers: Vec::new(),
        }
    }

    /// Add a transform to the chain
    pub fn add<S: Sampler + 'static>(mut self, sampler: S) -> Self {
        self.samplers.push(Box::new(sampler));
        self
    }

    /// Apply all transforms in order
    pub fn apply(&self, logits: &mut [f32], context: &SamplingContext) {
        for sampler in &self.samplers {
            sampler.apply(logits, context);
        }
    }

    /// Get the names of all transforms
    pub fn names(&self) -> Vec<&str> {
        self.samplers.iter().map(|s| s.name()).collect()
    }
}

impl Default for SamplerChain {
    fn default() -> Self {
        Self::new()
    }
}
