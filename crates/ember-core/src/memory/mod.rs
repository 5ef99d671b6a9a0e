//! Cache memory management
//!
//! This module provides the controller surface over the (sequence, position)
//! grid of cached attention state owned by the inference context: clearing,
//! partial removal, prefix copying for branch-without-recompute, and the
//! position relabeling that keeps sliding-window and context-extension
//! schemes consistent.

mod controller;

pub use controller::CacheController;

/// Snapshot of cache occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Tokens currently held in the cache
    pub used_tokens: usize,

    /// Token capacity of the cache
    pub max_tokens: usize,

    /// Occupied cells
    pub used_cells: usize,

    /// Total cells
    pub max_cells: usize,
}

impl CacheStats {
    /// Memory usage as a percentage of capacity
    pub fn usage_percent(&self) -> f32 {
        if self.max_tokens > 0 {
            (self.used_tokens as f32 / self.max_tokens as f32) * 100.0
        } else {
            0.0
        }
    }

    /// Whether usage has crossed the given fraction of capacity
    pub fn is_nearly_full(&self, threshold: f32) -> bool {
        self.usage_percent() >= threshold * 100.0
    }
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "tokens: {}/{}, cells: {}/{}, usage: {:.0}%",
            self.used_tokens,
            self.max_tokens,
            self.used_cells,
            self.max_cells,
            self.usage_percent()
        )
    }
}
