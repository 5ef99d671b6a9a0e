//! The boundary to the underlying inference engine
//!
//! `InferenceContext` is the seam between this crate and whatever executes
//! the forward pass. One implementation represents one logical compute
//! session; all decode and cache-mutation calls against it must be
//! serialized by the caller, which this crate expresses through `&mut`
//! receivers rather than internal locks.

use crate::error::Result;
use crate::memory::CacheStats;
use crate::types::{PositionRange, SequenceId, SequenceTarget, TokenId};

/// A loaded model context that can decode tokens and expose its cache memory.
///
/// The context owns the score vectors it produces; callers only borrow them
/// for the duration of one sampling step. The context also owns the byte
/// layout of session snapshots — this crate decides *when* to snapshot,
/// never what the blob contains.
pub trait InferenceContext {
    /// Size of the vocabulary; every score vector has exactly this length
    fn vocab_size(&self) -> usize;

    /// Run one decode step over the given tokens, appending them to the cache
    fn decode(&mut self, tokens: &[TokenId]) -> Result<()>;

    /// Score vector for the last decoded token.
    ///
    /// Returns a state error if nothing has been decoded yet.
    fn current_logits(&self) -> Result<&[f32]>;

    /// Score vector for the token at a specific decode-step index
    fn logits_at(&self, index: usize) -> Result<&[f32]>;

    /// Convert text into token IDs
    fn tokenize(&self, text: &str) -> Result<Vec<TokenId>>;

    /// Convert token IDs back into text
    fn detokenize(&self, tokens: &[TokenId]) -> Result<String>;

    /// Whether a token terminates generation (EOS and friends)
    fn is_end_of_generation(&self, token: TokenId) -> bool;

    /// Release all cache entries for all sequences
    fn clear_memory(&mut self, include_data: bool);

    /// Delete cached entries in the range.
    ///
    /// Returns `false` when the backing structure cannot perform a partial
    /// removal; the cache is left unchanged and the caller falls back to a
    /// coarser operation.
    fn remove_memory_range(&mut self, target: SequenceTarget, range: PositionRange) -> bool;

    /// Duplicate cached entries so `dst` shares a prefix with `src`
    fn copy_memory_range(&mut self, src: SequenceId, dst: SequenceId, range: PositionRange);

    /// Remove every sequence's entries except the given one
    fn keep_memory_sequence(&mut self, seq: SequenceId);

    /// Relabel positions in the range by adding `delta`
    fn shift_memory_positions(
        &mut self,
        target: SequenceTarget,
        range: PositionRange,
        delta: i32,
    );

    /// Rescale positions in the range by integer division.
    ///
    /// Callers guarantee `divisor > 1`.
    fn divide_memory_positions(
        &mut self,
        target: SequenceTarget,
        range: PositionRange,
        divisor: u32,
    );

    /// Snapshot of cache occupancy
    fn memory_stats(&self) -> CacheStats;

    /// Number of tokens cached for a sequence
    fn sequence_token_count(&self, seq: SequenceId) -> usize;

    /// Serialize the full session state into an opaque blob
    fn save_session(&self) -> Result<Vec<u8>>;

    /// Restore the full session state from an opaque blob
    fn load_session(&mut self, blob: &[u8]) -> Result<()>;

    /// Serialize a single sequence's state into an opaque blob
    fn save_sequence(&self, seq: SequenceId) -> Result<Vec<u8>>;

    /// Restore a single sequence's state from an opaque blob
    fn load_sequence(&mut self, seq: SequenceId, blob: &[u8]) -> Result<()>;
}
