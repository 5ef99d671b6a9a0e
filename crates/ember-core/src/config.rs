//! Generation parameter configuration
//!
//! `SamplingConfig` is the immutable parameter bundle handed to a generation
//! request. Defaults are the usual completion settings: temperature 0.8,
//! top-k 40, top-p 0.95, everything else disabled.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Mirostat adaptive sampling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MirostatMode {
    /// Mirostat disabled; the regular filter pipeline runs
    #[default]
    Disabled,
    /// Mirostat v1 (top-k estimated from the Zipf exponent)
    V1,
    /// Mirostat v2 (direct surprisal threshold)
    V2,
}

impl MirostatMode {
    /// Whether mirostat replaces the filter pipeline
    pub fn is_enabled(&self) -> bool {
        !matches!(self, MirostatMode::Disabled)
    }
}

/// Sampling configuration (generation parameters)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Temperature for logit scaling; must be > 0
    pub temperature: f32,

    /// Top-k filtering; <= 0 disables
    pub top_k: i32,

    /// Top-p (nucleus) filtering; >= 1.0 disables
    pub top_p: f32,

    /// Min-p filtering as a fraction of the max probability; <= 0 disables
    pub min_p: f32,

    /// Typical-p filtering by surprisal deviation; >= 1.0 disables
    pub typical_p: f32,

    /// Repetition penalty; <= 1.0 disables
    pub repeat_penalty: f32,

    /// Number of recent tokens the repetition/DRY penalties consider
    pub repeat_last_n: usize,

    /// Frequency penalty subtracted per occurrence
    pub frequency_penalty: f32,

    /// Presence penalty subtracted once for any occurrence
    pub presence_penalty: f32,

    /// Probability that the XTC filter fires on a step; <= 0 disables
    pub xtc_probability: f32,

    /// Probability threshold above which XTC masks top choices
    pub xtc_threshold: f32,

    /// Mirostat mode
    pub mirostat: MirostatMode,

    /// Mirostat target surprisal (tau)
    pub mirostat_tau: f32,

    /// Mirostat learning rate (eta)
    pub mirostat_eta: f32,

    /// DRY repeat penalty multiplier; <= 0 disables
    pub dry_multiplier: f32,

    /// DRY exponential base
    pub dry_base: f32,

    /// Repeat length tolerated before DRY penalizes
    pub dry_allowed_length: usize,

    /// Maximum number of tokens to generate
    pub max_tokens: usize,

    /// Stop sequences that terminate generation when matched
    pub stop: Vec<String>,

    /// Seed for reproducibility; `None` draws a fresh seed per request
    pub seed: Option<u64>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            top_k: 40,
            top_p: 0.95,
            min_p: 0.0,
            typical_p: 1.0,
            repeat_penalty: 1.0,
            repeat_last_n: 64,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            xtc_probability: 0.0,
            xtc_threshold: 0.1,
            mirostat: MirostatMode::Disabled,
            mirostat_tau: 5.0,
            mirostat_eta: 0.1,
            dry_multiplier: 0.0,
            dry_base: 1.75,
            dry_allowed_length: 2,
            max_tokens: 512,
            stop: Vec::new(),
            seed: None,
        }
    }
}

impl SamplingConfig {
    /// Greedy selection: top-k 1 leaves a single candidate
    pub fn greedy() -> Self {
        Self {
            top_k: 1,
            ..Default::default()
        }
    }

    /// Conservative settings for near-deterministic output
    pub fn conservative() -> Self {
        Self {
            temperature: 0.2,
            top_k: 10,
            top_p: 0.5,
            repeat_penalty: 1.2,
            ..Default::default()
        }
    }

    /// Creative settings for diverse output
    pub fn creative() -> Self {
        Self {
            temperature: 1.0,
            top_k: 100,
            top_p: 0.98,
            min_p: 0.05,
            typical_p: 0.95,
            xtc_probability: 0.5,
            ..Default::default()
        }
    }

    /// Mirostat v2 settings targeting a constant output entropy
    pub fn mirostat_v2() -> Self {
        Self {
            temperature: 1.0,
            mirostat: MirostatMode::V2,
            mirostat_tau: 5.0,
            mirostat_eta: 0.1,
            ..Default::default()
        }
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set top-p
    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = top_p;
        self
    }

    /// Set top-k
    pub fn with_top_k(mut self, top_k: i32) -> Self {
        self.top_k = top_k;
        self
    }

    /// Set stop sequences
    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.stop = stop;
        self
    }

    /// Set the seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Reject parameter values outside their domain.
    ///
    /// Called at the start of every generation request; a failure aborts the
    /// request before any decode happens.
    pub fn validate(&self) -> Result<()> {
        if self.temperature <= 0.0 || !self.temperature.is_finite() {
            return Err(Error::invalid_config(format!(
                "temperature must be > 0, got {}",
                self.temperature
            )));
        }
        for (name, value) in [
            ("top_p", self.top_p),
            ("min_p", self.min_p),
            ("typical_p", self.typical_p),
            ("xtc_probability", self.xtc_probability),
            ("xtc_threshold", self.xtc_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::invalid_config(format!(
                    "{name} must be in [0, 1], got {value}"
                )));
            }
        }
        if self.mirostat.is_enabled() {
            if self.mirostat_tau <= 0.0 {
                return Err(Error::invalid_config(format!(
                    "mirostat_tau must be > 0, got {}",
                    self.mirostat_tau
                )));
            }
            if self.mirostat_eta <= 0.0 {
                return Err(Error::invalid_config(format!(
                    "mirostat_eta must be > 0, got {}",
                    self.mirostat_eta
                )));
            }
        }
        if self.dry_multiplier > 0.0 && self.dry_base < 1.0 {
            return Err(Error::invalid_config(format!(
                "dry_base must be >= 1 when DRY is enabled, got {}",
                self.dry_base
            )));
        }
        if self.stop.iter().any(|s| s.is_empty()) {
            return Err(Error::invalid_config("stop sequences must be non-empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SamplingConfig::default();
        assert_eq!(config.temperature, 0.8);
        assert_eq!(config.top_k, 40);
        assert_eq!(config.top_p, 0.95);
        assert_eq!(config.repeat_last_n, 64);
        assert_eq!(config.max_tokens, 512);
        assert_eq!(config.mirostat, MirostatMode::Disabled);
        assert!(config.seed.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets_validate() {
        for config in [
            SamplingConfig::greedy(),
            SamplingConfig::conservative(),
            SamplingConfig::creative(),
            SamplingConfig::mirostat_v2(),
        ] {
            config.validate().unwrap();
        }
        assert_eq!(SamplingConfig::greedy().top_k, 1);
        assert!(SamplingConfig::mirostat_v2().mirostat.is_enabled());
    }

    #[test]
    fn test_validate_rejects_bad_temperature() {
        let config = SamplingConfig::default().with_temperature(0.0);
        assert!(config.validate().unwrap_err().is_config());

        let config = SamplingConfig::default().with_temperature(-1.0);
        assert!(config.validate().unwrap_err().is_config());
    }

    #[test]
    fn test_validate_rejects_bad_probabilities() {
        let config = SamplingConfig::default().with_top_p(1.5);
        assert!(config.validate().is_err());

        let config = SamplingConfig {
            min_p: -0.1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_stop_sequence() {
        let config = SamplingConfig::default().with_stop(vec![String::new()]);
        assert!(config.validate().unwrap_err().is_config());
    }

    #[test]
    fn test_serde_round_trip() {
        let config = SamplingConfig::creative().with_seed(7).with_max_tokens(64);
        let json = serde_json::to_string(&config).unwrap();
        let back: SamplingConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.temperature, config.temperature);
        assert_eq!(back.xtc_probability, config.xtc_probability);
        assert_eq!(back.seed, Some(7));
        assert_eq!(back.max_tokens, 64);
    }
}
