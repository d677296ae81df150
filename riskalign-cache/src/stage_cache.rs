//! Single-flight stage cache.
//!
//! Each key maps to a slot holding a `watch` receiver. The first lookup for
//! a key inserts a Pending slot and spawns the computation; later lookups
//! attach to the same receiver until the computation reports. Slots carry a
//! generation id, and invalidation only flags them stale, so an in-flight
//! computation always reports to its own slot and is never served to a
//! lookup that arrives after the invalidation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use riskalign_core::{PipelineError, PipelineResult};
use tokio::sync::watch;

use crate::key::StageKey;
use crate::read::{CacheRead, EntryState, ReadSource};
use crate::stats::CacheStats;

/// Configuration for the stage cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Timeout applied when a lookup does not supply one. `None` waits forever.
    pub default_timeout: Option<Duration>,
    /// Stale entries retained for diagnostics before the oldest are dropped.
    pub max_stale_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_timeout: Some(Duration::from_secs(60)),
            max_stale_entries: 256,
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default computation timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Let computations run without a deadline unless a lookup sets one.
    pub fn without_timeout(mut self) -> Self {
        self.default_timeout = None;
        self
    }

    /// Set the number of stale entries kept around.
    pub fn with_max_stale_entries(mut self, max: usize) -> Self {
        self.max_stale_entries = max;
        self
    }
}

#[derive(Debug, Clone)]
enum Outcome<V> {
    Pending,
    Fulfilled(V),
    Failed(PipelineError),
}

struct Slot<V> {
    generation: u64,
    state: watch::Receiver<Outcome<V>>,
    stale: bool,
}

impl<V: Clone> Slot<V> {
    fn snapshot(&self) -> Outcome<V> {
        self.state.borrow().clone()
    }

    /// Still Pending but the computation is gone (panicked or aborted).
    fn is_abandoned(&self) -> bool {
        matches!(*self.state.borrow(), Outcome::Pending) && self.state.has_changed().is_err()
    }

    fn is_live(&self) -> bool {
        !self.stale && !self.is_abandoned()
    }
}

struct Inner<V> {
    slots: HashMap<StageKey, Slot<V>>,
    next_generation: u64,
    stats: CacheStats,
}

/// Cache of stage values keyed by [`StageKey`].
///
/// At most one computation per key is in flight. Failures are cached like
/// values and replayed until the entry is invalidated or evicted; there is
/// no automatic retry.
pub struct StageCache<V> {
    inner: Arc<Mutex<Inner<V>>>,
    config: CacheConfig,
}

impl<V> Clone for StageCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            config: self.config.clone(),
        }
    }
}

impl<V> StageCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                slots: HashMap::new(),
                next_generation: 0,
                stats: CacheStats::default(),
            })),
            config,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock(&self) -> PipelineResult<MutexGuard<'_, Inner<V>>> {
        self.inner
            .lock()
            .map_err(|_| PipelineError::internal("stage cache lock poisoned"))
    }

    /// Return the value for `key`, computing it with `compute` if no live
    /// entry exists.
    ///
    /// `timeout` overrides the configured default. The computation runs on
    /// its own task, so dropping every caller does not leave the entry
    /// Pending forever.
    pub async fn get_or_compute<F>(
        &self,
        key: StageKey,
        timeout: Option<Duration>,
        compute: F,
    ) -> PipelineResult<CacheRead<V>>
    where
        F: Future<Output = PipelineResult<V>> + Send + 'static,
    {
        let (mut state, generation, source) = {
            let mut inner = self.lock()?;
            let existing = inner
                .slots
                .get(&key)
                .filter(|slot| slot.is_live())
                .map(|slot| (slot.generation, slot.snapshot(), slot.state.clone()));

            match existing {
                Some((generation, Outcome::Fulfilled(value), _)) => {
                    inner.stats.hits += 1;
                    tracing::debug!(key = %key, generation, "stage cache hit");
                    return Ok(CacheRead::new(value, ReadSource::Hit, generation));
                }
                Some((generation, Outcome::Failed(error), _)) => {
                    inner.stats.hits += 1;
                    tracing::debug!(key = %key, generation, error = %error, "stage cache replaying failure");
                    return Err(error);
                }
                Some((generation, Outcome::Pending, receiver)) => {
                    inner.stats.coalesced += 1;
                    tracing::debug!(key = %key, generation, "stage cache joining in-flight computation");
                    (receiver, generation, ReadSource::Coalesced)
                }
                None => {
                    inner.stats.misses += 1;
                    inner.stats.computations += 1;
                    inner.next_generation += 1;
                    let generation = inner.next_generation;
                    let (sender, receiver) = watch::channel(Outcome::Pending);
                    inner.slots.insert(
                        key,
                        Slot {
                            generation,
                            state: receiver.clone(),
                            stale: false,
                        },
                    );
                    tracing::debug!(key = %key, generation, "stage cache miss");
                    self.spawn_computation(
                        key,
                        generation,
                        timeout.or(self.config.default_timeout),
                        compute,
                        sender,
                    );
                    (receiver, generation, ReadSource::Computed)
                }
            }
        };

        let waiting = state.wait_for(|outcome| !matches!(outcome, Outcome::Pending));
        let waited = match (source, timeout) {
            // A joining caller bounds its own wait; the shared computation keeps running.
            (ReadSource::Coalesced, Some(limit)) => match tokio::time::timeout(limit, waiting).await {
                Ok(waited) => waited.map(|outcome| outcome.clone()),
                Err(_) => {
                    tracing::debug!(key = %key, generation, "gave up waiting on in-flight computation");
                    return Err(PipelineError::Timeout {
                        stage: key.stage(),
                        timeout_ms: limit.as_millis() as u64,
                    });
                }
            },
            _ => waiting.await.map(|outcome| outcome.clone()),
        };
        let outcome = waited
            .map_err(|_| PipelineError::internal(format!("computation for {} was abandoned", key)))?;

        match outcome {
            Outcome::Fulfilled(value) => Ok(CacheRead::new(value, source, generation)),
            Outcome::Failed(error) => Err(error),
            Outcome::Pending => Err(PipelineError::internal(format!(
                "computation for {} reported no outcome",
                key
            ))),
        }
    }

    fn spawn_computation<F>(
        &self,
        key: StageKey,
        generation: u64,
        timeout: Option<Duration>,
        compute: F,
        sender: watch::Sender<Outcome<V>>,
    ) where
        F: Future<Output = PipelineResult<V>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let result = match timeout {
                Some(limit) => match tokio::time::timeout(limit, compute).await {
                    Ok(result) => result,
                    Err(_) => Err(PipelineError::Timeout {
                        stage: key.stage(),
                        timeout_ms: limit.as_millis() as u64,
                    }),
                },
                None => compute.await,
            };

            let outcome = match result {
                Ok(value) => Outcome::Fulfilled(value),
                Err(error) => Outcome::Failed(error),
            };

            if let Ok(mut guard) = inner.lock() {
                if let Outcome::Failed(error) = &outcome {
                    guard.stats.failures += 1;
                    tracing::debug!(key = %key, generation, error = %error, "stage computation failed");
                }
                let current = guard
                    .slots
                    .get(&key)
                    .map_or(false, |slot| slot.generation == generation && !slot.stale);
                if !current {
                    tracing::debug!(key = %key, generation, "stage computation finished for superseded entry");
                }
            }

            sender.send_replace(outcome);
        });
    }

    /// Current state of `key` without starting a computation.
    pub fn peek(&self, key: &StageKey) -> PipelineResult<Option<EntryState<V>>> {
        let inner = self.lock()?;
        Ok(inner.slots.get(key).map(|slot| {
            if !slot.is_live() {
                return EntryState::Stale;
            }
            match slot.snapshot() {
                Outcome::Pending => EntryState::Pending,
                Outcome::Fulfilled(value) => EntryState::Fulfilled(value),
                Outcome::Failed(error) => EntryState::Failed(error),
            }
        }))
    }

    /// Mark every live entry whose key matches `predicate` stale.
    ///
    /// In-flight computations keep running and still answer the callers
    /// already waiting on them. Returns the number of entries marked.
    pub fn invalidate<P>(&self, predicate: P) -> PipelineResult<usize>
    where
        P: Fn(&StageKey) -> bool,
    {
        let mut inner = self.lock()?;
        let mut marked = 0usize;
        for (key, slot) in inner.slots.iter_mut() {
            if !slot.stale && predicate(key) {
                slot.stale = true;
                marked += 1;
            }
        }
        inner.stats.invalidations += marked as u64;
        self.trim_stale(&mut inner);
        Ok(marked)
    }

    /// Mark every entry stale.
    pub fn invalidate_all(&self) -> PipelineResult<usize> {
        self.invalidate(|_| true)
    }

    /// Drop Failed entries matching `predicate` so the next lookup recomputes.
    pub fn evict_failed<P>(&self, predicate: P) -> PipelineResult<usize>
    where
        P: Fn(&StageKey) -> bool,
    {
        let mut inner = self.lock()?;
        let before = inner.slots.len();
        inner.slots.retain(|key, slot| {
            let failed = slot.is_live() && matches!(*slot.state.borrow(), Outcome::Failed(_));
            !(failed && predicate(key))
        });
        let evicted = before - inner.slots.len();
        inner.stats.invalidations += evicted as u64;
        Ok(evicted)
    }

    fn trim_stale(&self, inner: &mut Inner<V>) {
        let mut stale: Vec<(u64, StageKey)> = inner
            .slots
            .iter()
            .filter(|(_, slot)| !slot.is_live())
            .map(|(key, slot)| (slot.generation, *key))
            .collect();
        if stale.len() <= self.config.max_stale_entries {
            return;
        }
        stale.sort_unstable();
        let excess = stale.len() - self.config.max_stale_entries;
        for (_, key) in stale.into_iter().take(excess) {
            inner.slots.remove(&key);
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.lock()
            .map(|inner| inner.slots.values().filter(|slot| slot.is_live()).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry, stale or live.
    pub fn clear(&self) -> PipelineResult<()> {
        let mut inner = self.lock()?;
        let live = inner.slots.values().filter(|slot| slot.is_live()).count();
        inner.stats.invalidations += live as u64;
        inner.slots.clear();
        Ok(())
    }

    pub fn stats(&self) -> PipelineResult<CacheStats> {
        let inner = self.lock()?;
        let mut stats = inner.stats.clone();
        stats.entry_count = inner.slots.values().filter(|slot| slot.is_live()).count() as u64;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use riskalign_core::{Fingerprint, StageName};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(stage: StageName, input: &[u8]) -> StageKey {
        StageKey::new(stage, Fingerprint::of_bytes(input), Fingerprint::empty())
    }

    fn ok(value: u32) -> impl Future<Output = PipelineResult<u32>> + Send + 'static {
        async move { Ok(value) }
    }

    fn fail(error: PipelineError) -> impl Future<Output = PipelineResult<u32>> + Send + 'static {
        async move { Err(error) }
    }

    fn counted(
        counter: &Arc<AtomicUsize>,
        value: u32,
        delay: Duration,
    ) -> impl Future<Output = PipelineResult<u32>> + Send + 'static {
        let counter = Arc::clone(counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            Ok(value)
        }
    }

    #[tokio::test]
    async fn test_concurrent_lookups_share_one_computation() {
        let cache: StageCache<u32> = StageCache::with_defaults();
        let counter = Arc::new(AtomicUsize::new(0));
        let k = key(StageName::Scores, b"batch-1");

        let lookups = (0..8).map(|_| {
            let cache = cache.clone();
            let fut = counted(&counter, 42, Duration::from_millis(30));
            tokio::spawn(async move { cache.get_or_compute(k, None, fut).await })
        });
        let mut computed = 0;
        for handle in lookups.collect::<Vec<_>>() {
            let read = handle.await.unwrap().unwrap();
            assert_eq!(*read.value(), 42);
            if read.was_cache_miss() {
                computed += 1;
            }
        }

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(computed, 1);
        let stats = cache.stats().unwrap();
        assert_eq!(stats.computations, 1);
        assert_eq!(stats.misses + stats.coalesced + stats.hits, 8);
    }

    #[tokio::test]
    async fn test_fulfilled_entry_is_a_hit() {
        let cache: StageCache<u32> = StageCache::with_defaults();
        let counter = Arc::new(AtomicUsize::new(0));
        let k = key(StageName::Findings, b"a");

        let first = cache
            .get_or_compute(k, None, counted(&counter, 1, Duration::ZERO))
            .await
            .unwrap();
        let second = cache
            .get_or_compute(k, None, counted(&counter, 2, Duration::ZERO))
            .await
            .unwrap();

        assert_eq!(first.generation(), second.generation());
        assert_eq!(second.source(), ReadSource::Hit);
        assert_eq!(second.into_value(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_replayed_until_evicted() {
        let cache: StageCache<u32> = StageCache::with_defaults();
        let k = key(StageName::Waves, b"plan");

        let err = cache
            .get_or_compute(
                k,
                None,
                fail(PipelineError::provider("local", "waves", Some(503), "model offline")),
            )
            .await
            .unwrap_err();
        assert!(err.is_provider_failure());

        let replay = cache
            .get_or_compute(k, None, ok(7))
            .await
            .unwrap_err();
        assert_eq!(replay, err);
        assert!(cache.peek(&k).unwrap().unwrap().is_failed());

        assert_eq!(cache.evict_failed(|candidate| candidate.stage() == StageName::Waves).unwrap(), 1);
        let value = cache.get_or_compute(k, None, ok(7)).await.unwrap();
        assert_eq!(value.into_value(), 7);
        assert_eq!(cache.stats().unwrap().failures, 1);
    }

    #[tokio::test]
    async fn test_evict_failed_leaves_fulfilled_entries() {
        let cache: StageCache<u32> = StageCache::with_defaults();
        let k = key(StageName::Scores, b"ok");
        cache.get_or_compute(k, None, ok(1)).await.unwrap();

        assert_eq!(cache.evict_failed(|_| true).unwrap(), 0);
        assert!(cache.peek(&k).unwrap().unwrap().is_fulfilled());
    }

    #[tokio::test]
    async fn test_invalidate_forces_recompute() {
        let cache: StageCache<u32> = StageCache::with_defaults();
        let counter = Arc::new(AtomicUsize::new(0));
        let scores = key(StageName::Scores, b"x");
        let controls = key(StageName::ControlMappings, b"x");

        cache
            .get_or_compute(scores, None, counted(&counter, 1, Duration::ZERO))
            .await
            .unwrap();
        cache
            .get_or_compute(controls, None, counted(&counter, 1, Duration::ZERO))
            .await
            .unwrap();

        let marked = cache
            .invalidate(|k| k.stage() == StageName::Scores)
            .unwrap();
        assert_eq!(marked, 1);
        assert!(cache.peek(&scores).unwrap().unwrap().is_stale());
        assert!(cache.peek(&controls).unwrap().unwrap().is_fulfilled());
        assert_eq!(cache.len(), 1);

        let again = cache
            .get_or_compute(scores, None, counted(&counter, 2, Duration::ZERO))
            .await
            .unwrap();
        assert!(again.was_cache_miss());
        assert_eq!(again.into_value(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_in_flight_result_not_reused_after_invalidation() {
        let cache: StageCache<u32> = StageCache::with_defaults();
        let k = key(StageName::Impact, b"i");

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let early = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute(k, None, async move {
                        let _ = release_rx.await;
                        Ok::<u32, PipelineError>(1)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(cache.peek(&k).unwrap().unwrap().is_pending());

        cache.invalidate_all().unwrap();
        let late = cache.get_or_compute(k, None, ok(2)).await.unwrap();
        let _ = release_tx.send(());

        assert_eq!(early.await.unwrap().unwrap().into_value(), 1);
        assert_eq!(late.into_value(), 2);
        let current = cache.get_or_compute(k, None, ok(3)).await.unwrap();
        assert_eq!(current.into_value(), 2);
    }

    #[tokio::test]
    async fn test_timeout_becomes_failed_entry() {
        let cache: StageCache<u32> = StageCache::new(CacheConfig::new().without_timeout());
        let k = key(StageName::Summary, b"slow");

        let err = cache
            .get_or_compute(k, Some(Duration::from_millis(20)), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<u32, PipelineError>(1)
            })
            .await
            .unwrap_err();

        assert_eq!(
            err,
            PipelineError::Timeout {
                stage: StageName::Summary,
                timeout_ms: 20
            }
        );
        assert!(cache.peek(&k).unwrap().unwrap().is_failed());
    }

    #[tokio::test]
    async fn test_dropped_caller_does_not_strand_entry() {
        let cache: StageCache<u32> = StageCache::with_defaults();
        let k = key(StageName::Scores, b"dropped");

        let caller = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute(k, None, async {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<u32, PipelineError>(9)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        caller.abort();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(cache.peek(&k).unwrap(), Some(EntryState::Fulfilled(9)));
    }

    #[tokio::test]
    async fn test_joining_caller_honors_its_own_timeout() {
        let cache: StageCache<u32> = StageCache::new(CacheConfig::new().without_timeout());
        let counter = Arc::new(AtomicUsize::new(0));
        let k = key(StageName::Impact, b"slow");

        let first = {
            let cache = cache.clone();
            let fut = counted(&counter, 7, Duration::from_millis(300));
            tokio::spawn(async move { cache.get_or_compute(k, None, fut).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = std::time::Instant::now();
        let err = cache
            .get_or_compute(k, Some(Duration::from_millis(30)), counted(&counter, 8, Duration::ZERO))
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_millis(250));
        assert_eq!(
            err,
            PipelineError::Timeout {
                stage: StageName::Impact,
                timeout_ms: 30
            }
        );
        assert_eq!(cache.peek(&k).unwrap(), Some(EntryState::Pending));

        let read = first.await.unwrap().unwrap();
        assert_eq!(read.into_value(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(cache.peek(&k).unwrap(), Some(EntryState::Fulfilled(7)));
    }

    #[tokio::test]
    async fn test_panicking_computation_is_recomputed() {
        let cache: StageCache<u32> = StageCache::with_defaults();
        let k = key(StageName::Waves, b"panic");

        let err = cache
            .get_or_compute(k, None, async move {
                if k.stage() == StageName::Waves {
                    panic!("stage blew up");
                }
                Ok::<u32, PipelineError>(0)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Internal { .. }));

        let read = cache.get_or_compute(k, None, ok(5)).await.unwrap();
        assert_eq!(read.into_value(), 5);
    }

    #[tokio::test]
    async fn test_stale_entries_are_trimmed() {
        let cache: StageCache<u32> = StageCache::new(CacheConfig::new().with_max_stale_entries(2));
        for i in 0..5u8 {
            let k = key(StageName::Findings, &[i]);
            cache.get_or_compute(k, None, ok(0)).await.unwrap();
        }
        assert_eq!(cache.invalidate_all().unwrap(), 5);
        assert_eq!(cache.len(), 0);

        let stale_kept = (0..5u8)
            .filter(|i| cache.peek(&key(StageName::Findings, &[*i])).unwrap().is_some())
            .count();
        assert_eq!(stale_kept, 2);
    }

    #[tokio::test]
    async fn test_clear() {
        let cache: StageCache<u32> = StageCache::with_defaults();
        let k = key(StageName::Scores, b"c");
        cache.get_or_compute(k, None, ok(1)).await.unwrap();
        assert!(!cache.is_empty());

        cache.clear().unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.peek(&k).unwrap(), None);
    }

    #[test]
    fn test_cache_config_builder() {
        let config = CacheConfig::new()
            .with_default_timeout(Duration::from_secs(5))
            .with_max_stale_entries(10);
        assert_eq!(config.default_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.max_stale_entries, 10);
        assert_eq!(config.without_timeout().default_timeout, None);
    }
}
