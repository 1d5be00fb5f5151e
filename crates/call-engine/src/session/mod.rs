//! # Call Sessions
//!
//! One [`CallSession`] per dial attempt. A session is a small state machine
//! advanced by ticks rather than a task of its own:
//!
//! ```text
//!   idle ──start──► dialing ──connect──► connected ──end──► ended
//!                      │                  │     ▲
//!                      │                  hold  │ hold
//!                      │                  ▼     │
//!                      │                 (holding)
//!                      └──────────────end───────────────────►
//! ```
//!
//! Mute and hold are flags that only exist while connected. While holding,
//! ticks still arrive but neither elapsed time nor scripted transcript lines
//! advance.

mod call_session;
mod types;

pub use call_session::CallSession;
pub use types::{
    CallPhase, ScriptLine, SessionId, SessionResult, SessionSnapshot, Speaker, TickEffect,
    TranscriptEntry,
};
