//! # Chat Session State
//!
//! Each websocket connection walks through a fixed lifecycle:
//!
//! 1. **Idle**: connected, waiting for the session lock
//! 2. **HandshakeSent**: lock held, `0x00` sent to the client
//! 3. **Streaming**: audio flows in both directions
//! 4. **Closed**: terminal; every session task stops when it sees this
//!
//! `Closed` can be entered from any state. Nothing leaves `Closed`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    HandshakeSent,
    Streaming,
    Closed,
}

/// Per-connection counters.
#[derive(Debug, Default, Clone, Serialize)]
pub struct SessionStats {
    pub audio_messages_in: u64,
    pub audio_bytes_in: u64,
    pub frames_assembled: u64,
    pub audio_messages_out: u64,
    pub messages_dropped: u64,
    /// Earlier sessions' output discarded before our fence came back
    pub stale_frames_discarded: u64,
}

/// Identity, lifecycle and counters of one chat session.
#[derive(Debug)]
pub struct ChatSession {
    pub session_id: String,
    state: SessionState,
    streaming_since: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    pub stats: SessionStats,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatSession {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            state: SessionState::Idle,
            streaming_since: None,
            closed_at: None,
            stats: SessionStats::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Idle → HandshakeSent
    pub fn handshake_sent(&mut self) -> Result<(), String> {
        match self.state {
            SessionState::Idle => {
                self.state = SessionState::HandshakeSent;
                Ok(())
            }
            other => Err(format!("Cannot send handshake from state: {:?}", other)),
        }
    }

    /// HandshakeSent → Streaming
    pub fn start_streaming(&mut self) -> Result<(), String> {
        match self.state {
            SessionState::HandshakeSent => {
                self.state = SessionState::Streaming;
                self.streaming_since = Some(Utc::now());
                Ok(())
            }
            other => Err(format!("Cannot start streaming from state: {:?}", other)),
        }
    }

    /// Any state → Closed. Returns false if it was already closed.
    pub fn close(&mut self) -> bool {
        if self.is_closed() {
            return false;
        }
        self.state = SessionState::Closed;
        self.closed_at = Some(Utc::now());
        true
    }

    /// Seconds spent streaming, up to now or up to close.
    pub fn streaming_seconds(&self) -> f64 {
        match self.streaming_since {
            Some(start) => {
                let end = self.closed_at.unwrap_or_else(Utc::now);
                (end - start).num_milliseconds() as f64 / 1000.0
            }
            None => 0.0,
        }
    }
}
