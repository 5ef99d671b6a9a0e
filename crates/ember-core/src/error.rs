//! Error types for ember-core

use thiserror::Error;

/// Result type alias for ember-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for ember-core
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid generation or cache parameter
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Score vector length does not match the vocabulary size
    #[error("score vector has {actual} entries, vocabulary has {expected}")]
    DimensionMismatch {
        /// Vocabulary size reported by the inference context
        expected: usize,
        /// Length of the supplied score vector
        actual: usize,
    },

    /// Operation requested in a state that cannot serve it
    #[error("invalid state: {0}")]
    State(String),

    /// Decode step failed inside the inference context
    #[error("decode failed: {0}")]
    Decode(String),

    /// Tokenizer failure at the context boundary
    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    /// Session snapshot could not be produced or restored
    #[error("session error: {0}")]
    Session(String),
}

impl Error {
    /// Create a configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Error::InvalidConfig(msg.into())
    }

    /// Create a state error
    pub fn state(msg: impl Into<String>) -> Self {
        Error::State(msg.into())
    }

    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Error::Decode(msg.into())
    }

    /// Check if this is a configuration error
    pub fn is_config(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }

    /// Check if this is a dimension mismatch
    pub fn is_dimension_mismatch(&self) -> bool {
        matches!(self, Error::DimensionMismatch { .. })
    }

    /// Check if this is a state error
    pub fn is_state(&self) -> bool {
        matches!(self, Error::State(_))
    }
}
