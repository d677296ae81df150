//! Provider failure broadcaster.
//!
//! An explicit subscriber list. Delivery is synchronous and best-effort:
//! a listener that errors or panics is logged and skipped, and nothing a
//! listener does can change the result of the call that published.

use chrono::{DateTime, Utc};
use riskalign_core::{PipelineError, PipelineResult, ProviderId, StageName};
use serde::Serialize;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

// ============================================================================
// NOTICES
// ============================================================================

/// Where a provider failure surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeSource {
    Stage(StageName),
    Chat,
}

impl fmt::Display for NoticeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stage(stage) => stage.fmt(f),
            Self::Chat => f.write_str("chat"),
        }
    }
}

/// A failure attributable to the active AI provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderNotice {
    pub provider: ProviderId,
    pub source: NoticeSource,
    pub status: Option<u16>,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl ProviderNotice {
    pub fn new(
        provider: ProviderId,
        source: NoticeSource,
        status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            source,
            status,
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }

    /// Build a notice from a provider-attributed error, or `None` for any
    /// other kind of failure.
    pub fn from_error(provider: ProviderId, source: NoticeSource, error: &PipelineError) -> Option<Self> {
        match error {
            PipelineError::Provider {
                status, message, ..
            } => Some(Self::new(provider, source, *status, message.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AI provider issue: {}. Try switching AI mode.",
            self.message.trim_end_matches('.')
        )
    }
}

// ============================================================================
// LISTENERS
// ============================================================================

/// Receives provider failure notices.
pub trait FailureListener: Send + Sync {
    fn on_failure(&self, notice: &ProviderNotice) -> PipelineResult<()>;
}

/// Adapter turning a closure into a [`FailureListener`].
pub struct FnListener<F>(pub F);

impl<F> FailureListener for FnListener<F>
where
    F: Fn(&ProviderNotice) + Send + Sync,
{
    fn on_failure(&self, notice: &ProviderNotice) -> PipelineResult<()> {
        (self.0)(notice);
        Ok(())
    }
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionToken(u64);

impl fmt::Display for SubscriptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// ============================================================================
// BROADCASTER
// ============================================================================

#[derive(Default)]
pub struct ProviderFailureBroadcaster {
    listeners: Mutex<Vec<(SubscriptionToken, Arc<dyn FailureListener>)>>,
    next_token: AtomicU64,
}

impl ProviderFailureBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<(SubscriptionToken, Arc<dyn FailureListener>)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self, listener: Arc<dyn FailureListener>) -> SubscriptionToken {
        let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.listeners().push((token, listener));
        tracing::debug!(token = %token, "provider failure listener subscribed");
        token
    }

    /// Subscribe a closure.
    pub fn subscribe_fn<F>(&self, listener: F) -> SubscriptionToken
    where
        F: Fn(&ProviderNotice) + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(FnListener(listener)))
    }

    /// Remove a listener. Returns `false` if the token was not live.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut listeners = self.listeners();
        let before = listeners.len();
        listeners.retain(|(candidate, _)| *candidate != token);
        before != listeners.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners().len()
    }

    /// Deliver `notice` to every current listener. Returns how many
    /// listeners accepted it.
    pub fn publish(&self, notice: &ProviderNotice) -> usize {
        // Snapshot so listeners may (un)subscribe while being notified.
        let listeners: Vec<_> = self.listeners().iter().cloned().collect();
        tracing::warn!(
            provider = %notice.provider,
            source = %notice.source,
            status = ?notice.status,
            message = %notice.message,
            "AI provider failure"
        );

        let mut delivered = 0;
        for (token, listener) in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener.on_failure(notice))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    tracing::warn!(listener = %token, error = %e, "Provider failure listener failed");
                }
                Err(_) => {
                    tracing::warn!(listener = %token, "Provider failure listener panicked");
                }
            }
        }
        delivered
    }

    /// Publish if `error` is provider-attributed. Returns whether it was.
    pub fn publish_error(&self, provider: ProviderId, source: NoticeSource, error: &PipelineError) -> bool {
        match ProviderNotice::from_error(provider, source, error) {
            Some(notice) => {
                self.publish(&notice);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for ProviderFailureBroadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderFailureBroadcaster")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
