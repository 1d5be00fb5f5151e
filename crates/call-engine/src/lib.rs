//! # outdial call engine
//!
//! Control plane for an outbound dialer: which lead to call next, whether a
//! call may start right now, how a live call advances over time, what happens
//! when it ends, and how much of the plan it consumed.
//!
//! ## Components
//!
//! | module | role |
//! |---|---|
//! | [`queue`] | priority queue of leads with retry scheduling |
//! | [`pacer`] | admission control (hours, daily cap, DNC, concurrency, hourly rate, adaptive throttle); owns live sessions |
//! | [`session`] | per-call state machine driven by ticks |
//! | [`ledger`] | usage metering against the plan with edge-triggered alerts |
//! | [`summary`] | daily statistics folded from finished calls |
//! | [`export`] | flat call-record CSV |
//! | [`orchestrator`] | single-writer [`ControlPlane`](orchestrator::ControlPlane) tying it together |
//! | [`server`] | tokio runner and [`EngineHandle`](server::EngineHandle) |
//!
//! Call outcomes come from a [`CallOutcomeProvider`](outcome::CallOutcomeProvider)
//! so a telephony integration, a test fake or the simulator can decide how
//! each attempt unfolds.

pub mod config;
pub mod dnc;
pub mod error;
pub mod export;
pub mod ledger;
pub mod orchestrator;
pub mod outcome;
pub mod pacer;
pub mod queue;
pub mod server;
pub mod session;
pub mod summary;

pub use error::{CallEngineError, Result};

/// Common imports for users of the engine
pub mod prelude {
    pub use crate::config::{
        AdaptiveConfig, AlertThreshold, BillingConfig, DaySchedule, EngineConfig, LocalZone,
        OperatingHours, RateConfig, TimingConfig, UsageConfig,
    };
    pub use crate::dnc::{DncRegistry, InMemoryDncList};
    pub use crate::error::{CallEngineError, Result};
    pub use crate::export::{to_csv, CallRecord, CSV_HEADER};
    pub use crate::ledger::{AlertSeverity, UsageAlert, UsageLedger, UsageSnapshot};
    pub use crate::orchestrator::{ControlPlane, EngineCommand, EngineEvent, EngineNotice};
    pub use crate::outcome::{
        CallOutcome, CallOutcomeProvider, CallPlan, Disposition, FailureReason,
        RandomOutcomeProvider, ScriptedOutcomeProvider,
    };
    pub use crate::pacer::{Admission, AdaptiveThrottle, Pacer, PacerStatus, RejectReason};
    pub use crate::queue::{
        CallId, CallStatus, Lead, Priority, QueueScheduler, QueueSnapshot, QueueTransition,
        QueuedCall,
    };
    pub use crate::server::{CallEngine, CallEngineBuilder, EngineHandle};
    pub use crate::session::{
        CallPhase, CallSession, ScriptLine, SessionId, SessionResult, SessionSnapshot, Speaker,
        TickEffect, TranscriptEntry,
    };
    pub use crate::summary::{DailySummary, DailySummaryAggregator, FailureCount, HourBucket};
}
