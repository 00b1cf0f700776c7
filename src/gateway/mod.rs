//! # Audio Gateway
//!
//! The websocket side of the server: one chat session at a time, guarded by a
//! process-wide lock.

pub mod lock;       // Single-session lock
pub mod session;    // Session lifecycle and counters
pub mod websocket;  // `/api/chat` actor and route

pub use lock::SessionLock;
pub use websocket::configure;
