//! Cache usage counters.

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered by a settled entry (fulfilled or failed).
    pub hits: u64,
    /// Lookups that found no usable entry and started a computation.
    pub misses: u64,
    /// Lookups that attached to an in-flight computation.
    pub coalesced: u64,
    /// Computations started.
    pub computations: u64,
    /// Computations that ended in an error or timeout.
    pub failures: u64,
    /// Entries marked stale or dropped by invalidation.
    pub invalidations: u64,
    /// Live entries currently held.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0). Coalesced waits count as hits.
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.coalesced;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }
}
