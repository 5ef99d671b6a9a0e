//! Ember Core - token sampling and cache control for autoregressive inference
//!
//! This crate sits between a raw inference context (which runs the forward
//! pass and owns the KV cache memory) and an application driving text
//! generation. It provides:
//! - A composable logit-transform pipeline: penalties, temperature, top-k,
//!   typical-p, top-p, min-p, XTC, DRY and mirostat adaptive sampling
//! - A cache controller over the (sequence, position) grid: clear, partial
//!   removal, prefix copying, position shift/rescale, occupancy stats
//! - A pull-based, cancellable generation loop with stop conditions
//!
//! The forward pass itself, model loading, and session byte layout belong
//! to the [`context::InferenceContext`] implementation.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod memory;
pub mod sampling;
pub mod types;

pub use config::{MirostatMode, SamplingConfig};
pub use context::InferenceContext;
pub use engine::{CancellationToken, Engine, Generation, GenerationState};
pub use error::{Error, Result};
pub use memory::{CacheController, CacheStats};
pub use sampling::TokenSampler;
pub use types::{
    FinishReason, GenerationMetrics, PositionRange, RequestId, SequenceId, SequenceTarget, TokenId,
};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{MirostatMode, SamplingConfig};
    pub use crate::context::InferenceContext;
    pub use crate::engine::{CancellationToken, Engine, Generation};
    pub use crate::error::{Error, Result};
    pub use crate::memory::{CacheController, CacheStats};
    pub use crate::sampling::{SamplerChain, SamplingContext, TokenSampler};
    pub use crate::types::*;
}
