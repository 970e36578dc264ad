//! Stream Manager Implementation
//!
//! Tracks every live streaming session, enforces the concurrency limit and
//! keeps lifetime statistics.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use super::session::{
    spawn_with_hook, SessionConfig, SessionHandle, SessionId, SessionReport, SessionState,
};
use crate::backend::ChatBackend;
use crate::messages::Conversation;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the stream manager
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamManagerConfig {
    /// Settings applied to every session
    pub session: SessionConfig,
    /// Maximum number of concurrent sessions
    pub max_concurrent_sessions: usize,
}

impl Default for StreamManagerConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            max_concurrent_sessions: 64,
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Snapshot of stream manager statistics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Sessions currently open
    pub active: usize,
    /// Sessions opened (lifetime)
    pub created: u64,
    /// Sessions that completed
    pub completed: u64,
    /// Sessions that errored (upstream failure or disconnect)
    pub errored: u64,
    /// Sessions that timed out
    pub timed_out: u64,
    /// Fragments delivered across all sessions
    pub fragments_delivered: u64,
}

#[derive(Default)]
struct Counters {
    created: AtomicU64,
    completed: AtomicU64,
    errored: AtomicU64,
    timed_out: AtomicU64,
    fragments_delivered: AtomicU64,
}

struct Inner {
    config: StreamManagerConfig,
    sessions: DashMap<SessionId, Instant>,
    active: AtomicUsize,
    counters: Counters,
}

impl Inner {
    fn record(&self, report: &SessionReport) {
        self.sessions.remove(&report.id);
        self.active.fetch_sub(1, Ordering::AcqRel);

        let counter = match report.state {
            SessionState::Completed => &self.counters.completed,
            SessionState::Errored => &self.counters.errored,
            SessionState::TimedOut => &self.counters.timed_out,
            SessionState::Open => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.counters
            .fragments_delivered
            .fetch_add(report.fragments_delivered as u64, Ordering::Relaxed);
    }
}

// ============================================================================
// Stream Manager
// ============================================================================

/// Manages concurrent streaming sessions
///
/// Cheap to clone; clones share the same session table.
#[derive(Clone)]
pub struct StreamManager {
    inner: Arc<Inner>,
}

impl Default for StreamManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamManager {
    /// Create a new stream manager with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(StreamManagerConfig::default())
    }

    /// Create a new stream manager with custom configuration
    #[must_use]
    pub fn with_config(config: StreamManagerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                sessions: DashMap::new(),
                active: AtomicUsize::new(0),
                counters: Counters::default(),
            }),
        }
    }

    /// Get the current configuration
    #[must_use]
    pub fn config(&self) -> &StreamManagerConfig {
        &self.inner.config
    }

    /// Open a session for `conversation`
    ///
    /// Returns `Err` if the concurrent session limit is reached.
    pub fn open(
        &self,
        backend: Arc<dyn ChatBackend>,
        conversation: Conversation,
    ) -> Result<SessionHandle, StreamRegisterError> {
        let max = self.inner.config.max_concurrent_sessions;
        self.inner
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .map_err(|_| {
                tracing::warn!(max, "Rejected stream session, limit reached");
                StreamRegisterError::MaxStreamsReached
            })?;

        let id = SessionId::new();
        self.inner.sessions.insert(id, Instant::now());
        self.inner.counters.created.fetch_add(1, Ordering::Relaxed);

        let inner = Arc::clone(&self.inner);
        Ok(spawn_with_hook(
            id,
            backend,
            conversation,
            self.inner.config.session,
            Some(Box::new(move |report: &SessionReport| inner.record(report))),
        ))
    }

    /// Get the number of active sessions
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Check if a session is still open
    #[must_use]
    pub fn is_active(&self, id: SessionId) -> bool {
        self.inner.sessions.contains_key(&id)
    }

    /// How long an open session has been running
    ///
    /// `None` once the session is terminal.
    #[must_use]
    pub fn session_age(&self, id: SessionId) -> Option<Duration> {
        self.inner.sessions.get(&id).map(|opened| opened.elapsed())
    }

    /// Get IDs of all active sessions
    #[must_use]
    pub fn active_session_ids(&self) -> Vec<SessionId> {
        self.inner.sessions.iter().map(|e| *e.key()).collect()
    }

    /// Check if any sessions are active
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active_count() == 0
    }

    /// Snapshot of lifetime statistics
    #[must_use]
    pub fn stats(&self) -> StreamStats {
        let c = &self.inner.counters;
        StreamStats {
            active: self.active_count(),
            created: c.created.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            errored: c.errored.load(Ordering::Relaxed),
            timed_out: c.timed_out.load(Ordering::Relaxed),
            fragments_delivered: c.fragments_delivered.load(Ordering::Relaxed),
        }
    }
}

/// Error when opening a session
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StreamRegisterError {
    /// Maximum concurrent sessions reached
    #[error("maximum concurrent streams reached")]
    MaxStreamsReached,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::UpstreamError;
    use crate::messages::{normalize, RawTurn};
    use crate::test_utils::ScriptedBackend;

    fn hi() -> Conversation {
        normalize(Some(&[RawTurn::new("user", "hi")]))
    }

    fn backend(reply: &str) -> Arc<dyn ChatBackend> {
        Arc::new(ScriptedBackend::reply(reply))
    }

    #[test]
    fn test_config_default() {
        let config = StreamManagerConfig::default();
        assert_eq!(config.max_concurrent_sessions, 64);
        assert_eq!(config.session.timeout, Duration::from_secs(180));
        assert_eq!(config.session.channel_capacity, 64);
    }

    #[test]
    fn test_stream_manager_creation() {
        let manager = StreamManager::new();
        assert_eq!(manager.active_count(), 0);
        assert!(manager.is_empty());
        assert_eq!(manager.stats(), StreamStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_tracked_until_terminal() {
        let manager = StreamManager::new();
        let handle = manager.open(backend("abc"), hi()).unwrap();
        let id = handle.id();

        assert!(manager.is_active(id));
        assert_eq!(manager.active_session_ids(), vec![id]);

        let (text, report) = handle.collect().await;
        assert_eq!(text, "abc");
        assert_eq!(report.state, SessionState::Completed);

        assert!(!manager.is_active(id));
        assert_eq!(manager.session_age(id), None);
        assert!(manager.is_empty());

        let stats = manager.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.fragments_delivered, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_streams_limit() {
        let manager = StreamManager::with_config(StreamManagerConfig {
            max_concurrent_sessions: 2,
            ..Default::default()
        });
        let slow: Arc<dyn ChatBackend> =
            Arc::new(ScriptedBackend::reply("slow").with_delay(Duration::from_secs(1)));

        let first = manager.open(Arc::clone(&slow), hi()).unwrap();
        let second = manager.open(Arc::clone(&slow), hi()).unwrap();
        assert_eq!(manager.active_count(), 2);

        let third = manager.open(Arc::clone(&slow), hi());
        assert_eq!(third.err(), Some(StreamRegisterError::MaxStreamsReached));

        first.collect().await;
        second.collect().await;
        assert_eq!(manager.active_count(), 0);

        assert!(manager.open(slow, hi()).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_outcomes_counted() {
        let manager = StreamManager::with_config(StreamManagerConfig {
            session: SessionConfig {
                timeout: Duration::from_secs(1),
                ..Default::default()
            },
            ..Default::default()
        });

        let failing: Arc<dyn ChatBackend> =
            Arc::new(ScriptedBackend::fail(UpstreamError::EmptyChoices));
        let hanging: Arc<dyn ChatBackend> =
            Arc::new(ScriptedBackend::reply("never").with_delay(Duration::from_secs(60)));

        manager.open(backend("ok"), hi()).unwrap().collect().await;
        manager.open(failing, hi()).unwrap().collect().await;
        manager.open(hanging, hi()).unwrap().collect().await;

        let stats = manager.stats();
        assert_eq!(stats.created, 3);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.errored, 1);
        assert_eq!(stats.timed_out, 1);
        assert_eq!(stats.active, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_age_tracks_open_time() {
        let manager = StreamManager::new();
        let slow: Arc<dyn ChatBackend> =
            Arc::new(ScriptedBackend::reply("late").with_delay(Duration::from_secs(10)));
        let handle = manager.open(slow, hi()).unwrap();
        let id = handle.id();

        tokio::time::sleep(Duration::from_secs(3)).await;
        let age = manager.session_age(id).unwrap();
        assert!(age >= Duration::from_secs(3));
        assert!(age < Duration::from_secs(4));

        handle.collect().await;
        assert_eq!(manager.session_age(id), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_cross_contamination() {
        let manager = StreamManager::new();

        let a = manager.open(backend("AAAA"), hi()).unwrap();
        let b = manager.open(backend("BBBBBB"), hi()).unwrap();

        let ((text_a, report_a), (text_b, report_b)) = tokio::join!(a.collect(), b.collect());

        assert_eq!(text_a, "AAAA");
        assert_eq!(text_b, "BBBBBB");
        assert_ne!(report_a.id, report_b.id);
    }

    #[test]
    fn test_stream_register_error_display() {
        assert_eq!(
            StreamRegisterError::MaxStreamsReached.to_string(),
            "maximum concurrent streams reached"
        );
    }
}
