//! Core types shared across the sampling engine and cache controller

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Token ID type. Valid tokens lie in `[0, vocab_size)`.
pub type TokenId = u32;

/// Unique identifier for a generation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Create a new random request ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one token history within the shared cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SequenceId(u32);

impl SequenceId {
    /// Create a sequence ID
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for SequenceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

/// Which sequences a cache operation addresses.
///
/// Replaces the `-1` "any sequence" wire sentinel with an explicit variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceTarget {
    /// Every sequence in the cache
    All,
    /// A single sequence
    Seq(SequenceId),
}

impl SequenceTarget {
    /// Check whether the target addresses the given sequence
    pub fn matches(&self, seq: SequenceId) -> bool {
        match self {
            SequenceTarget::All => true,
            SequenceTarget::Seq(id) => *id == seq,
        }
    }
}

impl From<SequenceId> for SequenceTarget {
    fn from(seq: SequenceId) -> Self {
        SequenceTarget::Seq(seq)
    }
}

impl std::fmt::Display for SequenceTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SequenceTarget::All => write!(f, "seq:*"),
            SequenceTarget::Seq(id) => write!(f, "{id}"),
        }
    }
}

/// Half-open positional range `[start, end)` within a sequence's history.
///
/// `None` bounds replace the `-1` "from start" / "to end" wire sentinels:
/// a missing start means position zero, a missing end means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PositionRange {
    start: Option<u32>,
    end: Option<u32>,
}

impl PositionRange {
    /// The full history of the addressed sequence(s)
    pub fn all() -> Self {
        Self {
            start: None,
            end: None,
        }
    }

    /// `[start, end)`
    pub fn bounded(start: u32, end: u32) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// `[start, ∞)`
    pub fn starting_at(start: u32) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    /// `[0, end)`
    pub fn up_to(end: u32) -> Self {
        Self {
            start: None,
            end: Some(end),
        }
    }

    /// Inclusive lower bound, defaulting to zero
    pub fn start(&self) -> u32 {
        self.start.unwrap_or(0)
    }

    /// Exclusive upper bound, `None` when unbounded
    pub fn end(&self) -> Option<u32> {
        self.end
    }

    /// Check whether a position falls inside the range
    pub fn contains(&self, pos: u32) -> bool {
        pos >= self.start() && self.end.map_or(true, |end| pos < end)
    }

    /// Whether the range covers the entire history
    pub fn is_full(&self) -> bool {
        self.start.unwrap_or(0) == 0 && self.end.is_none()
    }

    /// Reject ranges whose bounds are inverted
    pub fn validate(&self) -> Result<()> {
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if end < start {
                return Err(Error::invalid_config(format!(
                    "position range end {end} precedes start {start}"
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for PositionRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.start, self.end) {
            (None, None) => write!(f, "[..)"),
            (Some(s), None) => write!(f, "[{s}..)"),
            (None, Some(e)) => write!(f, "[..{e})"),
            (Some(s), Some(e)) => write!(f, "[{s}..{e})"),
        }
    }
}

/// Why a generation stream terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// An end-of-generation token was sampled
    Stop,
    /// Output reached the configured maximum length
    Length,
    /// A configured stop sequence matched the decoded text
    StopSequence,
    /// The request was cancelled
    Cancelled,
    /// The stream was closed by a mid-stream error
    Error,
}

/// Timing and throughput figures for one finished generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationMetrics {
    /// Number of prompt tokens decoded
    pub prompt_tokens: usize,

    /// Number of tokens generated
    pub generated_tokens: usize,

    /// Seconds until the first token was produced
    pub time_to_first_token: Option<f64>,

    /// Total wall time in seconds
    pub total_time: f64,

    /// Generated tokens per second
    pub tokens_per_second: f64,
}
