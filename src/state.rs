//! # Application State Management
//!
//! Shared state handed to every HTTP handler and every chat session actor.
//!
//! ## What lives here:
//! - **config**: the validated configuration, behind a read-write lock
//! - **metrics**: lock-free counters updated from session actors
//! - **session_lock**: the process-wide single-session lock
//! - **health**: observable pipeline status
//! - **audio**: the gateway-side ends of the PCM queues
//!
//! ## Key Rust Concepts:
//! - **Arc**: many handlers share ownership of the same data
//! - **RwLock**: many readers or one writer
//! - **AtomicU64**: counters that can be bumped from any thread without a lock

use crate::config::AppConfig;
use crate::gateway::lock::SessionLock;
use crate::pipeline::{GatewayHandles, PipelineHealth};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,

    pub metrics: Arc<AppMetrics>,

    pub start_time: Instant,

    pub session_lock: SessionLock,

    pub health: PipelineHealth,

    pub audio: GatewayHandles,
}

/// Process-wide counters.
#[derive(Debug, Default)]
pub struct AppMetrics {
    pub sessions_started: AtomicU64,
    pub sessions_closed: AtomicU64,
    pub audio_messages_received: AtomicU64,
    pub frames_assembled: AtomicU64,
    pub frames_sent: AtomicU64,
    pub messages_dropped: AtomicU64,
}

/// Point-in-time copy of [`AppMetrics`] for JSON responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub sessions_started: u64,
    pub sessions_closed: u64,
    pub audio_messages_received: u64,
    pub frames_assembled: u64,
    pub frames_sent: u64,
    pub messages_dropped: u64,
}

impl AppMetrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            audio_messages_received: self.audio_messages_received.load(Ordering::Relaxed),
            frames_assembled: self.frames_assembled.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
        }
    }
}

impl AppState {
    pub fn new(
        config: AppConfig,
        session_lock: SessionLock,
        health: PipelineHealth,
        audio: GatewayHandles,
    ) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(AppMetrics::default()),
            start_time: Instant::now(),
            session_lock,
            health,
            audio,
        }
    }

    /// Copy of the current configuration.
    ///
    /// Cloning releases the read lock immediately. A poisoned lock still holds
    /// a valid config since writers only ever replace it whole.
    pub fn get_config(&self) -> AppConfig {
        match self.config.read() {
            Ok(config) => config.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    pub(crate) fn test_state() -> AppState {
        let (pcm_in, _) = unbounded();
        let (_, pcm_out) = unbounded();
        AppState::new(
            AppConfig::default(),
            SessionLock::new(),
            PipelineHealth::new(),
            GatewayHandles::new(pcm_in, pcm_out),
        )
    }

    #[test]
    fn test_metrics_snapshot() {
        let state = test_state();
        AppMetrics::incr(&state.metrics.sessions_started);
        for _ in 0..3 {
            AppMetrics::incr(&state.metrics.frames_sent);
        }

        let snapshot = state.metrics.snapshot();
        assert_eq!(snapshot.sessions_started, 1);
        assert_eq!(snapshot.frames_sent, 3);
        assert_eq!(snapshot.sessions_closed, 0);
    }

    /// Clones share counters and the session lock.
    #[tokio::test]
    async fn test_clones_share_state() {
        let state = test_state();
        let other = state.clone();
        AppMetrics::incr(&other.metrics.messages_dropped);
        assert_eq!(state.metrics.snapshot().messages_dropped, 1);

        let _guard = other.session_lock.acquire().await;
        assert!(state.session_lock.is_held());
    }

    #[test]
    fn test_get_config() {
        let state = test_state();
        assert_eq!(state.get_config().server.port, 8998);
        assert_eq!(state.get_uptime_seconds(), 0);
    }
}
