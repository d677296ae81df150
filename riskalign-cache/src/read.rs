//! Cache read results and entry states.

use riskalign_core::PipelineError;

/// State of a cache entry as observed by `peek`.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryState<V> {
    /// A computation is in flight.
    Pending,
    /// The computation succeeded.
    Fulfilled(V),
    /// The computation failed; the error is replayed until invalidation.
    Failed(PipelineError),
    /// Invalidated. Never served to new lookups.
    Stale,
}

impl<V> EntryState<V> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Self::Fulfilled(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale)
    }
}

/// How a lookup was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadSource {
    /// Served from a fulfilled entry.
    Hit,
    /// Awaited a computation another caller started.
    Coalesced,
    /// This lookup started the computation.
    Computed,
}

/// Result of a cache lookup, carrying where the value came from.
#[derive(Debug, Clone)]
pub struct CacheRead<V> {
    value: V,
    source: ReadSource,
    /// Generation of the slot that produced the value
    generation: u64,
}

impl<V> CacheRead<V> {
    pub(crate) fn new(value: V, source: ReadSource, generation: u64) -> Self {
        Self {
            value,
            source,
            generation,
        }
    }

    pub fn into_value(self) -> V {
        self.value
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn source(&self) -> ReadSource {
        self.source
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True unless this lookup ran the computation itself.
    pub fn was_cache_hit(&self) -> bool {
        self.source != ReadSource::Computed
    }

    pub fn was_cache_miss(&self) -> bool {
        self.source == ReadSource::Computed
    }

    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> CacheRead<U> {
        CacheRead {
            value: f(self.value),
            source: self.source,
            generation: self.generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_source_flags() {
        let hit = CacheRead::new(1, ReadSource::Hit, 3);
        assert!(hit.was_cache_hit());
        assert_eq!(hit.generation(), 3);

        let coalesced = CacheRead::new(1, ReadSource::Coalesced, 3);
        assert!(coalesced.was_cache_hit());

        let computed = CacheRead::new(1, ReadSource::Computed, 4);
        assert!(computed.was_cache_miss());
        assert_eq!(computed.map(|v| v + 1).into_value(), 2);
    }

    #[test]
    fn test_entry_state_predicates() {
        assert!(EntryState::<u8>::Pending.is_pending());
        assert!(EntryState::Fulfilled(1).is_fulfilled());
        assert!(EntryState::<u8>::Failed(PipelineError::internal("x")).is_failed());
        assert!(EntryState::<u8>::Stale.is_stale());
    }
}
