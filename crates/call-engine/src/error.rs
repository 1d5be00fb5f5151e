//! Error types for the call engine
//!
//! Every error in this crate is recoverable: the control loop logs it, reports
//! a status to whoever asked, and keeps running. Admission rejections are not
//! faults at all; they travel as [`RejectReason`](crate::pacer::RejectReason)
//! and only become errors here when a caller wants them in `?` position.

use thiserror::Error;

use crate::pacer::RejectReason;
use crate::queue::CallId;
use crate::session::{CallPhase, SessionId};

/// Result type for call engine operations
pub type Result<T> = std::result::Result<T, CallEngineError>;

/// Errors that can occur in the call engine
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CallEngineError {
    /// Illegal state-machine move, e.g. `start()` on a dialing session
    #[error("Invalid transition for session {session_id}: cannot {action} while {from}")]
    InvalidTransition {
        session_id: SessionId,
        from: CallPhase,
        action: &'static str,
    },

    /// Mutation attempted on an ended session
    #[error("Session {session_id} is closed")]
    SessionClosed { session_id: SessionId },

    /// Trailing-hour start budget is spent
    #[error("Admission rejected: calls-per-hour limit reached")]
    RateLimited,

    /// All concurrent call slots are busy
    #[error("Admission rejected: concurrent call limit reached")]
    ConcurrencyLimitReached,

    /// Current local time is outside configured operating hours
    #[error("Admission rejected: outside operating hours")]
    OutsideOperatingHours,

    /// Number is on the do-not-call list
    #[error("Admission rejected: number is on the do-not-call list")]
    DncBlocked,

    /// Daily dialing cap reached
    #[error("Admission rejected: daily call limit reached")]
    DailyLimitReached,

    /// Lead failed on every allowed attempt
    #[error("Call {call_id} failed after {attempts} attempts; no retries left")]
    RetryExhausted { call_id: CallId, attempts: u32 },

    /// No live session with this id
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// No queue entry with this id
    #[error("Call not found: {0}")]
    CallNotFound(CallId),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The control loop is no longer running
    #[error("Call engine is not running")]
    EngineStopped,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CallEngineError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create an invalid transition error
    pub fn invalid_transition(session_id: &SessionId, from: CallPhase, action: &'static str) -> Self {
        Self::InvalidTransition {
            session_id: session_id.clone(),
            from,
            action,
        }
    }

    /// Create a session closed error
    pub fn session_closed(session_id: &SessionId) -> Self {
        Self::SessionClosed {
            session_id: session_id.clone(),
        }
    }

    /// True for pacing rejections (the lead stays pending)
    pub fn is_admission_rejection(&self) -> bool {
        matches!(
            self,
            Self::RateLimited
                | Self::ConcurrencyLimitReached
                | Self::OutsideOperatingHours
                | Self::DncBlocked
                | Self::DailyLimitReached
        )
    }

    /// True when the control loop can carry on after this error.
    ///
    /// Only a stopped engine is not recoverable from the caller's side.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::EngineStopped)
    }

    /// Status text safe to show an end user
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidTransition { .. } => "That action isn't available for this call right now".to_string(),
            Self::SessionClosed { .. } => "This call has already ended".to_string(),
            Self::RateLimited => "Hourly call limit reached, calls will resume shortly".to_string(),
            Self::ConcurrencyLimitReached => "All lines busy, call queued".to_string(),
            Self::OutsideOperatingHours => "Outside calling hours, calls will resume when hours open".to_string(),
            Self::DncBlocked => "Number is on the do-not-call list".to_string(),
            Self::DailyLimitReached => "Daily limit reached".to_string(),
            Self::RetryExhausted { .. } => "Call failed, no retries left".to_string(),
            Self::SessionNotFound(_) | Self::CallNotFound(_) => "Call not found".to_string(),
            Self::Configuration(_) => "Settings are invalid, please review them".to_string(),
            Self::EngineStopped => "Dialer is not running".to_string(),
            Self::Internal(_) => "Something went wrong, please try again".to_string(),
        }
    }
}

impl From<RejectReason> for CallEngineError {
    fn from(reason: RejectReason) -> Self {
        match reason {
            RejectReason::RateLimited => Self::RateLimited,
            RejectReason::ConcurrencyLimitReached => Self::ConcurrencyLimitReached,
            RejectReason::OutsideOperatingHours => Self::OutsideOperatingHours,
            RejectReason::DncBlocked => Self::DncBlocked,
            RejectReason::DailyLimitReached => Self::DailyLimitReached,
        }
    }
}

impl From<config::ConfigError> for CallEngineError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<outdial_infra_common::InfraError> for CallEngineError {
    fn from(err: outdial_infra_common::InfraError) -> Self {
        Self::Internal(err.to_string())
    }
}
