//! Paced Streaming Infrastructure
//!
//! Turns a complete upstream reply into a character-by-character stream with
//! human-like pacing, one isolated session per request.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         StreamManager                             │
//! │   live sessions (by SessionId) · concurrency limit · StreamStats  │
//! │  ┌─────────────────────────┐   ┌─────────────────────────┐        │
//! │  │   SessionController A   │   │   SessionController B   │  ...   │
//! │  │  upstream task (spawned)│   │  upstream task (spawned)│        │
//! │  │  FragmentEmitter        │   │  FragmentEmitter        │        │
//! │  └───────────┬─────────────┘   └───────────┬─────────────┘        │
//! └──────────────┼─────────────────────────────┼──────────────────────┘
//!                │ mpsc (bounded)              │
//!                ▼                             ▼
//!          SessionHandle A               SessionHandle B
//! ```
//!
//! # Features
//!
//! - **Pacing**: 15ms per character, 100ms after punctuation, 40ms after CJK
//! - **Wall-clock budget**: every session ends within its timeout
//! - **Disconnect detection**: dropping the handle stops delivery promptly
//! - **No cross-contamination**: each session owns its channel
//!
//! # Example
//!
//! ```ignore
//! use gateway_core::streaming::StreamManager;
//!
//! let manager = StreamManager::new();
//! let mut handle = manager.open(backend, conversation)?;
//! while let Some(fragment) = handle.recv().await {
//!     print!("{}", fragment.text);
//! }
//! let report = handle.wait().await;
//! ```

mod fragment;
mod manager;
mod session;

pub use fragment::{emit, Fragment, FragmentEmitter, Pacing};
pub use manager::{StreamManager, StreamManagerConfig, StreamRegisterError, StreamStats};
pub use session::{
    spawn_session, SessionConfig, SessionHandle, SessionId, SessionMonitor, SessionReport,
    SessionState,
};
