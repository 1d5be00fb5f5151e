//! Session data types shared with the reporting layer

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::outcome::CallOutcome;
use crate::queue::CallId;

/// Unique identifier of one dial attempt
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(format!("session-{}", uuid::Uuid::new_v4()))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reported phase of a call
///
/// `Holding` is never stored: it is how a connected session with its hold flag
/// set is reported.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallPhase {
    Idle,
    Dialing,
    Connected,
    Holding,
    Ended,
}

impl fmt::Display for CallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallPhase::Idle => "idle",
            CallPhase::Dialing => "dialing",
            CallPhase::Connected => "connected",
            CallPhase::Holding => "holding",
            CallPhase::Ended => "ended",
        };
        f.write_str(name)
    }
}

/// Who said a transcript line
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum Speaker {
    Agent,
    Lead,
    Supervisor,
}

/// One appended transcript line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// Position in the transcript, starting at 1
    pub seq: u64,
    pub speaker: Speaker,
    pub text: String,
    pub emitted_at: DateTime<Utc>,
}

/// Scripted line emitted once the call has been connected for `at_second`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptLine {
    pub at_second: u64,
    pub speaker: Speaker,
    pub text: String,
}

impl ScriptLine {
    pub fn new(at_second: u64, speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            at_second,
            speaker,
            text: text.into(),
        }
    }
}

/// What a tick did to a session
#[derive(Debug, Clone, PartialEq)]
pub enum TickEffect {
    /// Duplicate, out-of-order, or the session is not in a ticking phase
    Ignored,
    /// Still dialing; `ring_ticks` counts ticks spent dialing so far
    Ringing { ring_ticks: u32 },
    /// Connected but on hold, nothing accrued
    Paused,
    /// Connected time advanced
    Accrued {
        delta_seconds: u64,
        elapsed_seconds: u64,
        emitted: Vec<TranscriptEntry>,
    },
}

/// Live view of a session for rendering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub call_id: CallId,
    pub lead_name: String,
    pub phone: String,
    pub phase: CallPhase,
    pub elapsed_seconds: u64,
    pub transcript: Vec<TranscriptEntry>,
    pub is_muted: bool,
    pub is_holding: bool,
    pub started_at: Option<DateTime<Utc>>,
}

/// Terminal record of one dial attempt, emitted exactly once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResult {
    pub session_id: SessionId,
    pub call_id: CallId,
    pub lead_name: String,
    pub phone: String,
    /// When dialing began
    pub dialed_at: DateTime<Utc>,
    /// When the call connected, if it did
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: DateTime<Utc>,
    /// Connected, non-held seconds
    pub duration_seconds: u64,
    pub outcome: CallOutcome,
    pub notes: Option<String>,
}

impl SessionResult {
    /// Start instant used for hourly bucketing: connect time, else dial time
    pub fn bucket_instant(&self) -> DateTime<Utc> {
        self.started_at.unwrap_or(self.dialed_at)
    }
}
