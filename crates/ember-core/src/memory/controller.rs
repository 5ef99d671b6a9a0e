//! Operations over the cached (sequence, position) grid

use super::CacheStats;
use crate::context::InferenceContext;
use crate::error::{Error, Result};
use crate::types::{PositionRange, SequenceId, SequenceTarget};

/// Controller for the cache memory owned by an inference context.
///
/// The controller mutably borrows the context, so cache mutations cannot be
/// issued while a generation stream holds the same borrow. None of these
/// operations participate in the per-token hot path.
pub struct CacheController<'a> {
    ctx: &'a mut dyn InferenceContext,
}

impl<'a> CacheController<'a> {
    /// Create a controller over a context's cache memory
    pub fn new(ctx: &'a mut dyn InferenceContext) -> Self {
        Self { ctx }
    }

    /// Release all entries for all sequences
    pub fn clear(&mut self, include_data: bool) {
        tracing::debug!(include_data, "cache cleared");
        self.ctx.clear_memory(include_data);
    }

    /// Delete entries in the range.
    ///
    /// Returns `Ok(false)` when the backing structure cannot perform a
    /// partial removal; the cache is unchanged and the caller should fall
    /// back to a coarser operation such as [`CacheController::clear`].
    pub fn remove_range(&mut self, target: SequenceTarget, range: PositionRange) -> Result<bool> {
        range.validate()?;
        let removed = self.ctx.remove_memory_range(target, range);
        tracing::debug!(seq = %target, %range, removed, "cache range removal");
        Ok(removed)
    }

    /// Duplicate entries so `dst` shares a prefix with `src`, enabling
    /// branch-without-recompute
    pub fn copy_range(
        &mut self,
        src: SequenceId,
        dst: SequenceId,
        range: PositionRange,
    ) -> Result<()> {
        range.validate()?;
        tracing::debug!(%src, %dst, %range, "cache range copied");
        self.ctx.copy_memory_range(src, dst, range);
        Ok(())
    }

    /// Remove every sequence's entries except `seq`
    pub fn keep_only(&mut self, seq: SequenceId) {
        tracing::debug!(%seq, "cache pruned to single sequence");
        self.ctx.keep_memory_sequence(seq);
    }

    /// Relabel positions in the range by adding `delta`
    pub fn shift_positions(
        &mut self,
        target: SequenceTarget,
        range: PositionRange,
        delta: i32,
    ) -> Result<()> {
        range.validate()?;
        tracing::debug!(seq = %target, %range, delta, "cache positions shifted");
        self.ctx.shift_memory_positions(target, range, delta);
        Ok(())
    }

    /// Rescale positions in the range by integer division, as used by
    /// position-interpolation context extension.
    ///
    /// Fails with a configuration error unless `divisor > 1`.
    pub fn divide_positions(
        &mut self,
        target: SequenceTarget,
        range: PositionRange,
        divisor: u32,
    ) -> Result<()> {
        if divisor <= 1 {
            return Err(Error::invalid_config(format!(
                "position divisor must be > 1, got {divisor}"
            )));
        }
        range.validate()?;
        tracing::debug!(seq = %target, %range, divisor, "cache positions divided");
        self.ctx.divide_memory_positions(target, range, divisor);
        Ok(())
    }

    /// Snapshot of cache occupancy
    pub fn stats(&self) -> CacheStats {
        self.ctx.memory_stats()
    }

    /// Number of tokens cached for a sequence
    pub fn token_count(&self, seq: SequenceId) -> usize {
        self.ctx.sequence_token_count(seq)
    }

    /// Keep only the most recent `window` tokens of a sequence, shifting the
    /// survivors back so positions start at zero again.
    ///
    /// Returns `Ok(false)` when the backend cannot remove the old range, in
    /// which case nothing was changed.
    pub fn apply_sliding_window(&mut self, window: usize, seq: SequenceId) -> Result<bool> {
        let count = self.token_count(seq);
        if count <= window {
            return Ok(true);
        }
        let cut = (count - window) as u32;
        if !self.remove_range(seq.into(), PositionRange::up_to(cut))? {
            return Ok(false);
        }
        self.shift_positions(seq.into(), PositionRange::starting_at(cut), -(cut as i32))?;
        tracing::debug!(%seq, window, dropped = cut, "sliding window applied");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::ScriptedContext;

    fn seeded_context() -> ScriptedContext {
        let mut ctx = ScriptedContext::new(8, Vec::new()).with_capacity(64);
        ctx.seed_cells(0, 0..10);
        ctx.seed_cells(1, 0..4);
        ctx
    }

    #[test]
    fn test_clear_empties_cache() {
        let mut ctx = seeded_context();
        let mut cache = CacheController::new(&mut ctx);
        cache.clear(true);
        assert_eq!(cache.stats().used_tokens, 0);
    }

    #[test]
    fn test_remove_all_zeroes_stats() {
        let mut ctx = seeded_context();
        let mut cache = CacheController::new(&mut ctx);
        let removed = cache
            .remove_range(SequenceTarget::All, PositionRange::all())
            .unwrap();
        assert!(removed);
        assert_eq!(cache.stats().used_tokens, 0);
    }

    #[test]
    fn test_remove_partial_range() {
        let mut ctx = seeded_context();
        let mut cache = CacheController::new(&mut ctx);
        let removed = cache
            .remove_range(SequenceId::new(0).into(), PositionRange::bounded(2, 5))
            .unwrap();
        assert!(removed);
        drop(cache);
        assert_eq!(ctx.positions(0), vec![0, 1, 5, 6, 7, 8, 9]);
        assert_eq!(ctx.positions(1), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_remove_unsupported_is_a_value_not_an_error() {
        let mut ctx = seeded_context();
        ctx.partial_removal_supported = false;
        let before = ctx.cells.len();
        let mut cache = CacheController::new(&mut ctx);
        let removed = cache
            .remove_range(SequenceId::new(0).into(), PositionRange::bounded(0, 5))
            .unwrap();
        assert!(!removed);
        assert_eq!(cache.stats().used_tokens, before);
    }

    #[test]
    fn test_remove_rejects_inverted_range() {
        let mut ctx = seeded_context();
        let mut cache = CacheController::new(&mut ctx);
        let err = cache
            .remove_range(SequenceTarget::All, PositionRange::bounded(5, 2))
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_copy_range_shares_prefix() {
        let mut ctx = seeded_context();
        let mut cache = CacheController::new(&mut ctx);
        cache
            .copy_range(SequenceId::new(0), SequenceId::new(2), PositionRange::up_to(3))
            .unwrap();
        drop(cache);
        assert_eq!(ctx.positions(2), vec![0, 1, 2]);
        assert_eq!(ctx.positions(0).len(), 10);
    }

    #[test]
    fn test_keep_only() {
        let mut ctx = seeded_context();
        let mut cache = CacheController::new(&mut ctx);
        cache.keep_only(SequenceId::new(1));
        drop(cache);
        assert!(ctx.positions(0).is_empty());
        assert_eq!(ctx.positions(1), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_shift_round_trip_restores_positions() {
        let mut ctx = seeded_context();
        let original = ctx.positions(0);
        let mut cache = CacheController::new(&mut ctx);
        let target: SequenceTarget = SequenceId::new(0).into();
        cache
            .shift_positions(target, PositionRange::bounded(2, 8), 20)
            .unwrap();
        cache
            .shift_positions(target, PositionRange::bounded(22, 28), -20)
            .unwrap();
        drop(cache);
        assert_eq!(ctx.positions(0), original);
    }

    #[test]
    fn test_divide_requires_divisor_above_one() {
        let mut ctx = seeded_context();
        let mut cache = CacheController::new(&mut ctx);
        let err = cache
            .divide_positions(SequenceTarget::All, PositionRange::bounded(0, 10), 1)
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_divide_halves_positions() {
        let mut ctx = seeded_context();
        let mut cache = CacheController::new(&mut ctx);
        cache
            .divide_positions(SequenceId::new(0).into(), PositionRange::bounded(0, 10), 2)
            .unwrap();
        drop(cache);
        let mut expected: Vec<u32> = (0..10u32).map(|p| p / 2).collect();
        expected.sort_unstable();
        assert_eq!(ctx.positions(0), expected);
    }

    #[test]
    fn test_token_count() {
        let mut ctx = seeded_context();
        let cache = CacheController::new(&mut ctx);
        assert_eq!(cache.token_count(SequenceId::new(0)), 10);
        assert_eq!(cache.token_count(SequenceId::new(1)), 4);
        assert_eq!(cache.token_count(SequenceId::new(5)), 0);
    }

    #[test]
    fn test_sliding_window_rezeros_positions() {
        let mut ctx = seeded_context();
        let mut cache = CacheController::new(&mut ctx);
        let applied = cache.apply_sliding_window(4, SequenceId::new(0)).unwrap();
        assert!(applied);
        drop(cache);
        assert_eq!(ctx.positions(0), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_sliding_window_noop_when_history_fits() {
        let mut ctx = seeded_context();
        let mut cache = CacheController::new(&mut ctx);
        let applied = cache.apply_sliding_window(16, SequenceId::new(0)).unwrap();
        assert!(applied);
        assert_eq!(cache.token_count(SequenceId::new(0)), 10);
    }

    #[test]
    fn test_sliding_window_reports_unsupported_backend() {
        let mut ctx = seeded_context();
        ctx.partial_removal_supported = false;
        let mut cache = CacheController::new(&mut ctx);
        let applied = cache.apply_sliding_window(4, SequenceId::new(0)).unwrap();
        assert!(!applied);
        assert_eq!(cache.token_count(SequenceId::new(0)), 10);
    }
}
