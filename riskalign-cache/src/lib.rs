//! RiskAlign stage cache.
//!
//! Caches stage values by [`StageKey`], with explicit entry states instead
//! of silent staleness: callers can see whether a read was a hit, a join on
//! an in-flight computation, or a fresh computation, and invalidation marks
//! entries stale rather than dropping work that is already running.
//!
//! # Example
//!
//! ```ignore
//! let cache: StageCache<Arc<StageArtifact>> = StageCache::with_defaults();
//! let read = cache.get_or_compute(key, None, async move { compute().await }).await?;
//! if read.was_cache_hit() {
//!     tracing::debug!("reused {}", key);
//! }
//! cache.invalidate(|k| k.stage() == StageName::Waves)?;
//! ```

pub mod key;
pub mod read;
pub mod stage_cache;
pub mod stats;

pub use key::StageKey;
pub use read::{CacheRead, EntryState, ReadSource};
pub use stage_cache::{CacheConfig, StageCache};
pub use stats::CacheStats;
