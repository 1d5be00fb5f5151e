//! Messages flowing into and out of the control plane

use chrono::{DateTime, NaiveDate, Utc};
use outdial_infra_common::Tick;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::config::{EngineConfig, RateConfig};
use crate::error::Result;
use crate::export::CallRecord;
use crate::ledger::{UsageAlert, UsageSnapshot};
use crate::outcome::{CallOutcome, Disposition};
use crate::pacer::{PacerStatus, RejectReason};
use crate::queue::{CallId, Lead, QueueSnapshot, QueuedCall};
use crate::session::{SessionId, SessionResult, SessionSnapshot, TranscriptEntry};
use crate::summary::DailySummary;

/// Reply channel for fallible requests
pub type Reply<T> = oneshot::Sender<Result<T>>;

/// Timer-driven input, produced by ticker callbacks
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Tick { session_id: SessionId, tick: Tick },
}

/// Request from an operator, dashboard or importer
#[derive(Debug)]
pub enum EngineCommand {
    EnqueueLead {
        lead: Lead,
        reply: oneshot::Sender<CallId>,
    },
    RemoveLead {
        call_id: CallId,
        reply: Reply<QueuedCall>,
    },
    Mute {
        session_id: SessionId,
        reply: Reply<bool>,
    },
    Hold {
        session_id: SessionId,
        reply: Reply<bool>,
    },
    EndCall {
        session_id: SessionId,
        disposition: Option<Disposition>,
        notes: Option<String>,
        /// `None` when the session had already ended
        reply: Reply<Option<SessionResult>>,
    },
    InjectSpeech {
        session_id: SessionId,
        text: String,
        reply: Reply<TranscriptEntry>,
    },
    SessionSnapshot {
        session_id: SessionId,
        reply: Reply<SessionSnapshot>,
    },
    SessionSnapshots {
        reply: oneshot::Sender<Vec<SessionSnapshot>>,
    },
    QueueSnapshot {
        reply: oneshot::Sender<QueueSnapshot>,
    },
    UsageSnapshot {
        reply: oneshot::Sender<UsageSnapshot>,
    },
    PacerStatus {
        reply: oneshot::Sender<PacerStatus>,
    },
    DailySummary {
        /// Local date; today when `None`
        date: Option<NaiveDate>,
        reply: oneshot::Sender<DailySummary>,
    },
    CallRecords {
        reply: oneshot::Sender<Vec<CallRecord>>,
    },
    ExportCsv {
        reply: oneshot::Sender<String>,
    },
    UpdateRateConfig {
        rate: RateConfig,
        reply: Reply<()>,
    },
    /// Everything but the usage section
    UpdateConfig {
        config: Box<EngineConfig>,
        reply: Reply<()>,
    },
    AcknowledgeAlert {
        alert_id: String,
        reply: oneshot::Sender<bool>,
    },
    ResetBillingPeriod {
        entitlement_minutes: Option<u64>,
        reply: oneshot::Sender<Vec<UsageAlert>>,
    },
    Dispatch {
        reply: oneshot::Sender<Vec<SessionId>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Pushed to UI subscribers as things happen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineNotice {
    SessionAdmitted {
        session_id: SessionId,
        call_id: CallId,
        lead_name: String,
        phone: String,
    },
    SessionConnected {
        session_id: SessionId,
    },
    TranscriptAppended {
        session_id: SessionId,
        entry: TranscriptEntry,
    },
    SessionEnded {
        session_id: SessionId,
        call_id: CallId,
        outcome: CallOutcome,
        duration_seconds: u64,
    },
    RetryScheduled {
        call_id: CallId,
        attempts: u32,
        at: DateTime<Utc>,
        message: String,
    },
    CallFailed {
        call_id: CallId,
        attempts: u32,
        message: String,
    },
    UsageAlert {
        alert: UsageAlert,
    },
    AdmissionPaused {
        reason: RejectReason,
        message: String,
    },
    ThrottleChanged {
        throttled: bool,
        success_ratio: f64,
    },
}
