use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use outdial_infra_common::{Clock, Tick, Ticker};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use super::types::{EngineCommand, EngineEvent, EngineNotice};
use crate::config::{EngineConfig, RateConfig};
use crate::dnc::DncRegistry;
use crate::error::{CallEngineError, Result};
use crate::export::{self, CallRecord};
use crate::ledger::{UsageAlert, UsageLedger, UsageSnapshot};
use crate::outcome::{CallOutcome, CallOutcomeProvider, CallPlan, Disposition, FailureReason};
use crate::pacer::{Admission, Pacer, PacerStatus, RejectReason, ThrottleChange};
use crate::queue::{CallId, Lead, QueueScheduler, QueueSnapshot, QueueTransition, QueuedCall};
use crate::session::{SessionId, SessionResult, SessionSnapshot, Speaker, TickEffect, TranscriptEntry};
use crate::summary::{DailySummary, DailySummaryAggregator};

/// Capacity of the notice broadcast channel
pub const NOTICE_CHANNEL_CAPACITY: usize = 1024;

/// Ended session ids remembered for duplicate hang-ups; oldest forgotten first
pub const ENDED_SESSION_MEMORY: usize = 4096;

/// Recently ended session ids, bounded
#[derive(Debug)]
struct EndedSessions {
    order: VecDeque<SessionId>,
    ids: HashSet<SessionId>,
    capacity: usize,
}

impl EndedSessions {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            ids: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    fn insert(&mut self, session_id: SessionId) {
        if !self.ids.insert(session_id.clone()) {
            return;
        }
        self.order.push_back(session_id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    fn contains(&self, session_id: &SessionId) -> bool {
        self.ids.contains(session_id)
    }
}

/// Single-writer core of the dialer
///
/// Owns the queue, the pacer (and through it every live session), the usage
/// ledger, the daily aggregator and the exported call records. Nothing else
/// holds a reference to any of them; every change arrives as a method call
/// or an [`EngineEvent`] and is applied before the next one starts.
///
/// Ticker callbacks only push [`EngineEvent::Tick`] into the plane's event
/// channel. Call [`pump`](Self::pump) (or let the async runner do it) to apply
/// them.
pub struct ControlPlane {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    ticker: Arc<dyn Ticker>,
    provider: Box<dyn CallOutcomeProvider>,

    queue: QueueScheduler,
    pacer: Pacer,
    ledger: UsageLedger,
    summary: DailySummaryAggregator,
    records: Vec<CallRecord>,

    plans: HashMap<SessionId, CallPlan>,
    ended_sessions: EndedSessions,
    paused: Option<RejectReason>,
    stopping: bool,

    events_tx: mpsc::UnboundedSender<EngineEvent>,
    events_rx: mpsc::UnboundedReceiver<EngineEvent>,
    notices: broadcast::Sender<EngineNotice>,
}

impl fmt::Debug for ControlPlane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlPlane")
            .field("queue", &self.queue)
            .field("pacer", &self.pacer)
            .field("ledger", &self.ledger)
            .field("records", &self.records.len())
            .field("stopping", &self.stopping)
            .finish()
    }
}

impl ControlPlane {
    pub fn new(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        ticker: Arc<dyn Ticker>,
        provider: Box<dyn CallOutcomeProvider>,
        dnc: Arc<dyn DncRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        let now = clock.now();

        let queue = QueueScheduler::new(&config.rate);
        let pacer = Pacer::new(
            config.rate.clone(),
            config.operating_hours.clone(),
            config.adaptive.clone(),
            dnc,
        );
        let ledger = UsageLedger::new(&config.usage, now);
        let summary = DailySummaryAggregator::new(config.operating_hours.zone());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (notices, _) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);

        info!(
            calls_per_hour = config.rate.calls_per_hour,
            concurrent_calls = config.rate.concurrent_calls,
            entitlement_minutes = config.usage.total_minutes_entitlement,
            "control plane initialized"
        );
        for alert in ledger.alerts() {
            warn!(severity = ?alert.severity, message = %alert.message, "usage already above alert tier at startup");
        }

        Ok(Self {
            config,
            clock,
            ticker,
            provider,
            queue,
            pacer,
            ledger,
            summary,
            records: Vec::new(),
            plans: HashMap::new(),
            ended_sessions: EndedSessions::new(ENDED_SESSION_MEMORY),
            paused: None,
            stopping: false,
            events_tx,
            events_rx,
            notices,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineNotice> {
        self.notices.subscribe()
    }

    /// Sender side of the notice channel, for handles that subscribe later
    pub fn notice_sender(&self) -> broadcast::Sender<EngineNotice> {
        self.notices.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    // ------------------------------------------------------------------
    // Event intake
    // ------------------------------------------------------------------

    /// Apply every event already queued; returns how many were applied
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            applied += 1;
        }
        applied
    }

    /// Wait for the next timer event
    pub async fn next_event(&mut self) -> Option<EngineEvent> {
        self.events_rx.recv().await
    }

    pub fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Tick { session_id, tick } => self.on_session_tick(&session_id, tick),
        }
    }

    /// Apply one command and answer it. Returns `false` once shut down.
    pub fn handle_command(&mut self, command: EngineCommand) -> bool {
        match command {
            EngineCommand::EnqueueLead { lead, reply } => {
                let _ = reply.send(self.enqueue_lead(lead));
            }
            EngineCommand::RemoveLead { call_id, reply } => {
                let _ = reply.send(self.remove_lead(&call_id));
            }
            EngineCommand::Mute { session_id, reply } => {
                let _ = reply.send(self.mute(&session_id));
            }
            EngineCommand::Hold { session_id, reply } => {
                let _ = reply.send(self.hold(&session_id));
            }
            EngineCommand::EndCall {
                session_id,
                disposition,
                notes,
                reply,
            } => {
                let _ = reply.send(self.end_call(&session_id, disposition, notes));
            }
            EngineCommand::InjectSpeech {
                session_id,
                text,
                reply,
            } => {
                let _ = reply.send(self.inject_speech(&session_id, text));
            }
            EngineCommand::SessionSnapshot { session_id, reply } => {
                let _ = reply.send(self.session_snapshot(&session_id));
            }
            EngineCommand::SessionSnapshots { reply } => {
                let _ = reply.send(self.session_snapshots());
            }
            EngineCommand::QueueSnapshot { reply } => {
                let _ = reply.send(self.queue_snapshot());
            }
            EngineCommand::UsageSnapshot { reply } => {
                let _ = reply.send(self.usage_snapshot());
            }
            EngineCommand::PacerStatus { reply } => {
                let _ = reply.send(self.pacer_status());
            }
            EngineCommand::DailySummary { date, reply } => {
                let _ = reply.send(self.daily_summary(date));
            }
            EngineCommand::CallRecords { reply } => {
                let _ = reply.send(self.records.clone());
            }
            EngineCommand::ExportCsv { reply } => {
                let _ = reply.send(self.export_csv());
            }
            EngineCommand::UpdateRateConfig { rate, reply } => {
                let _ = reply.send(self.update_rate_config(rate));
            }
            EngineCommand::UpdateConfig { config, reply } => {
                let _ = reply.send(self.update_config(*config));
            }
            EngineCommand::AcknowledgeAlert { alert_id, reply } => {
                let _ = reply.send(self.acknowledge_alert(&alert_id));
            }
            EngineCommand::ResetBillingPeriod {
                entitlement_minutes,
                reply,
            } => {
                let _ = reply.send(self.reset_billing_period(entitlement_minutes));
            }
            EngineCommand::Dispatch { reply } => {
                let _ = reply.send(self.dispatch());
            }
            EngineCommand::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    // ------------------------------------------------------------------
    // Queue intake
    // ------------------------------------------------------------------

    pub fn enqueue_lead(&mut self, lead: Lead) -> CallId {
        let now = self.clock.now();
        self.queue.enqueue(lead, now)
    }

    pub fn enqueue_leads(&mut self, leads: impl IntoIterator<Item = Lead>) -> Vec<CallId> {
        leads.into_iter().map(|lead| self.enqueue_lead(lead)).collect()
    }

    pub fn remove_lead(&mut self, call_id: &CallId) -> Result<QueuedCall> {
        self.queue.remove(call_id)
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Admit ready leads in queue order until the queue is exhausted or a
    /// rejection that applies to every lead stops the cycle.
    ///
    /// Rejected leads stay pending. A DNC rejection only skips that lead.
    pub fn dispatch(&mut self) -> Vec<SessionId> {
        if self.stopping {
            return Vec::new();
        }

        let now = self.clock.now();
        let mut skipped: HashSet<CallId> = HashSet::new();
        let mut admitted = Vec::new();
        let mut blocked_by = None;

        while let Some(call) = self.queue.dequeue_next_excluding(now, &skipped) {
            match self.pacer.try_admit(&call, now) {
                Admission::Admitted(session_id) => {
                    self.launch(&session_id, &call);
                    admitted.push(session_id);
                }
                Admission::Rejected(reason) => {
                    if let Err(e) = self.queue.defer(&call.id) {
                        error!(call_id = %call.id, error = %e, "failed to return rejected call to pending");
                    }
                    if reason.is_lead_specific() {
                        debug!(call_id = %call.id, %reason, "lead skipped this cycle");
                        skipped.insert(call.id);
                        continue;
                    }
                    blocked_by = Some(reason);
                    break;
                }
            }
        }

        self.note_pause(blocked_by);
        admitted
    }

    fn note_pause(&mut self, reason: Option<RejectReason>) {
        if reason == self.paused {
            return;
        }
        self.paused = reason;
        if let Some(reason) = reason {
            // a full line set is routine, the rest are worth surfacing
            if reason != RejectReason::ConcurrencyLimitReached {
                info!(%reason, "admissions paused");
            }
            self.notify(EngineNotice::AdmissionPaused {
                reason,
                message: CallEngineError::from(reason).user_message(),
            });
        }
    }

    fn launch(&mut self, session_id: &SessionId, call: &QueuedCall) {
        let plan = self.provider.plan(call);
        let interval = Duration::from_millis(self.config.timing.tick_interval_ms);
        let events = self.events_tx.clone();
        let tick_session = session_id.clone();

        let subscription = self.ticker.start(
            interval,
            Arc::new(move |tick: Tick| {
                let _ = events.send(EngineEvent::Tick {
                    session_id: tick_session.clone(),
                    tick,
                });
            }),
        );

        let Some(session) = self.pacer.session_mut(session_id) else {
            error!(%session_id, "admitted session missing from pacer");
            return;
        };
        match subscription {
            Ok(handle) => session.attach_ticker(handle),
            Err(e) => {
                error!(%session_id, error = %e, "failed to start session ticker");
                let outcome = CallOutcome::Failure(FailureReason::Other("Timer unavailable".to_string()));
                if let Err(e) = self.finish(session_id, outcome, None) {
                    error!(%session_id, error = %e, "failed to close session without ticker");
                }
                return;
            }
        }

        debug!(%session_id, ring_seconds = plan.ring_seconds, answered = plan.answered, "call plan loaded");
        self.plans.insert(session_id.clone(), plan);
        self.notify(EngineNotice::SessionAdmitted {
            session_id: session_id.clone(),
            call_id: call.id.clone(),
            lead_name: call.lead_name.clone(),
            phone: call.phone_number.clone(),
        });
    }

    // ------------------------------------------------------------------
    // Ticks
    // ------------------------------------------------------------------

    fn on_session_tick(&mut self, session_id: &SessionId, tick: Tick) {
        let now = self.clock.now();
        let Some(session) = self.pacer.session_mut(session_id) else {
            debug!(%session_id, seq = tick.seq, "tick for finished session dropped");
            return;
        };
        let effect = match session.on_tick(tick) {
            Ok(effect) => effect,
            Err(e) => {
                debug!(%session_id, error = %e, "tick rejected by session");
                return;
            }
        };
        let Some(plan) = self.plans.get(session_id) else {
            warn!(%session_id, "session has no call plan");
            return;
        };

        match effect {
            TickEffect::Ringing { ring_ticks } if ring_ticks >= plan.ring_seconds => {
                if !plan.answered {
                    let outcome = plan.outcome.clone();
                    self.finish_and_dispatch(session_id, outcome, None);
                    return;
                }
                let script = plan.script.clone();
                match session.connect(now) {
                    Ok(()) => {
                        session.set_script(script);
                        info!(%session_id, ring_ticks, "call connected");
                        self.notify(EngineNotice::SessionConnected {
                            session_id: session_id.clone(),
                        });
                    }
                    Err(e) => warn!(%session_id, error = %e, "connect failed"),
                }
            }
            TickEffect::Accrued {
                delta_seconds,
                elapsed_seconds,
                emitted,
            } => {
                let talk_done = elapsed_seconds >= plan.talk_seconds;
                let outcome = plan.outcome.clone();

                for entry in emitted {
                    self.notify(EngineNotice::TranscriptAppended {
                        session_id: session_id.clone(),
                        entry,
                    });
                }
                let alerts = self.ledger.record_tick(session_id, tick.seq, delta_seconds, now);
                self.publish_alerts(alerts);

                if talk_done {
                    self.finish_and_dispatch(session_id, outcome, None);
                }
            }
            TickEffect::Ringing { .. } | TickEffect::Paused | TickEffect::Ignored => {}
        }
    }

    // ------------------------------------------------------------------
    // Terminal pipeline
    // ------------------------------------------------------------------

    fn finish_and_dispatch(&mut self, session_id: &SessionId, outcome: CallOutcome, notes: Option<String>) {
        match self.finish(session_id, outcome, notes) {
            Ok(_) => {
                self.dispatch();
            }
            Err(e) => error!(%session_id, error = %e, "failed to end session"),
        }
    }

    /// End a session and fan its result out, all in one step: slot and
    /// ticker released, usage moved to historical, queue updated, summary
    /// and export fed, notices sent.
    fn finish(
        &mut self,
        session_id: &SessionId,
        outcome: CallOutcome,
        notes: Option<String>,
    ) -> Result<SessionResult> {
        let now = self.clock.now();
        let (result, throttle) = self.pacer.end_session(session_id, outcome, notes, now)?;
        self.plans.remove(session_id);
        self.ended_sessions.insert(session_id.clone());

        let alerts = self.ledger.record_session_end(session_id, result.duration_seconds, now);

        match self.queue.report_outcome(&result.call_id, &result.outcome, now) {
            Ok(QueueTransition::Completed) => {}
            Ok(QueueTransition::RetryScheduled { attempts, at }) => {
                self.notify(EngineNotice::RetryScheduled {
                    call_id: result.call_id.clone(),
                    attempts,
                    at,
                    message: "Call failed, retry scheduled".to_string(),
                });
            }
            Ok(QueueTransition::Exhausted { attempts }) => {
                let err = CallEngineError::RetryExhausted {
                    call_id: result.call_id.clone(),
                    attempts,
                };
                warn!(call_id = %result.call_id, attempts, "{}", err);
                self.notify(EngineNotice::CallFailed {
                    call_id: result.call_id.clone(),
                    attempts,
                    message: err.user_message(),
                });
            }
            Err(e) => error!(call_id = %result.call_id, error = %e, "queue rejected call outcome"),
        }

        self.summary.ingest(&result);
        self.records.push(CallRecord::from_result(&result, &self.config.billing));

        info!(
            %session_id,
            call_id = %result.call_id,
            outcome = %result.outcome,
            duration_seconds = result.duration_seconds,
            "call ended"
        );
        self.notify(EngineNotice::SessionEnded {
            session_id: session_id.clone(),
            call_id: result.call_id.clone(),
            outcome: result.outcome.clone(),
            duration_seconds: result.duration_seconds,
        });
        self.publish_alerts(alerts);
        if let Some(change) = throttle {
            let (throttled, success_ratio) = match change {
                ThrottleChange::Engaged { success_ratio } => (true, success_ratio),
                ThrottleChange::Released { success_ratio } => (false, success_ratio),
            };
            self.notify(EngineNotice::ThrottleChanged {
                throttled,
                success_ratio,
            });
        }

        Ok(result)
    }

    // ------------------------------------------------------------------
    // Operator actions
    // ------------------------------------------------------------------

    pub fn mute(&mut self, session_id: &SessionId) -> Result<bool> {
        self.live_session(session_id)?.toggle_mute()
    }

    pub fn hold(&mut self, session_id: &SessionId) -> Result<bool> {
        self.live_session(session_id)?.toggle_hold()
    }

    /// Supervisor speech forwarded into the call's transcript
    pub fn inject_speech(&mut self, session_id: &SessionId, text: impl Into<String>) -> Result<TranscriptEntry> {
        let now = self.clock.now();
        let entry = self
            .live_session(session_id)?
            .append_transcript(Speaker::Supervisor, text, now)?;
        self.notify(EngineNotice::TranscriptAppended {
            session_id: session_id.clone(),
            entry: entry.clone(),
        });
        Ok(entry)
    }

    /// Operator hang-up. Without a disposition the attempt counts as a
    /// failure (`OperatorAbort`).
    ///
    /// Hanging up a session that already ended is a no-op and returns
    /// `Ok(None)`; only the first end produces a result.
    pub fn end_call(
        &mut self,
        session_id: &SessionId,
        disposition: Option<Disposition>,
        notes: Option<String>,
    ) -> Result<Option<SessionResult>> {
        if self.ended_sessions.contains(session_id) {
            debug!(%session_id, "hang-up for a session that already ended");
            return Ok(None);
        }
        self.live_session(session_id)?;
        let outcome = match disposition {
            Some(disposition) => CallOutcome::Success(disposition),
            None => CallOutcome::Failure(FailureReason::OperatorAbort),
        };
        let result = self.finish(session_id, outcome, notes)?;
        self.dispatch();
        Ok(Some(result))
    }

    fn live_session(&mut self, session_id: &SessionId) -> Result<&mut crate::session::CallSession> {
        if self.ended_sessions.contains(session_id) {
            return Err(CallEngineError::session_closed(session_id));
        }
        self.pacer
            .session_mut(session_id)
            .ok_or_else(|| CallEngineError::SessionNotFound(session_id.clone()))
    }

    // ------------------------------------------------------------------
    // Read models
    // ------------------------------------------------------------------

    pub fn session_snapshot(&self, session_id: &SessionId) -> Result<SessionSnapshot> {
        self.pacer
            .session(session_id)
            .map(|s| s.snapshot())
            .ok_or_else(|| CallEngineError::SessionNotFound(session_id.clone()))
    }

    /// Live sessions, oldest admission first
    pub fn session_snapshots(&self) -> Vec<SessionSnapshot> {
        let mut snapshots: Vec<_> = self.pacer.sessions().map(|s| s.snapshot()).collect();
        snapshots.sort_by(|a, b| {
            let seq = |s: &SessionSnapshot| self.queue.get(&s.call_id).map(|c| c.seq);
            seq(a).cmp(&seq(b))
        });
        snapshots
    }

    pub fn queue_snapshot(&self) -> QueueSnapshot {
        self.queue.snapshot()
    }

    pub fn usage_snapshot(&self) -> UsageSnapshot {
        self.ledger.snapshot()
    }

    pub fn pacer_status(&mut self) -> PacerStatus {
        let now = self.clock.now();
        self.pacer.status(now)
    }

    pub fn daily_summary(&self, date: Option<NaiveDate>) -> DailySummary {
        let date = date.unwrap_or_else(|| self.config.operating_hours.local_date(self.clock.now()));
        self.summary.summary(date)
    }

    pub fn records(&self) -> &[CallRecord] {
        &self.records
    }

    pub fn export_csv(&self) -> String {
        export::to_csv(&self.records)
    }

    // ------------------------------------------------------------------
    // Configuration and lifecycle
    // ------------------------------------------------------------------

    /// Hot-swap pacing and retry policy; applies from the next dispatch
    pub fn update_rate_config(&mut self, rate: RateConfig) -> Result<()> {
        rate.validate()?;
        self.queue.update_policy(&rate);
        self.pacer.update_config(rate.clone());
        self.config.rate = rate;
        Ok(())
    }

    /// Hot-swap everything but the usage section, which only changes with
    /// the billing period
    pub fn update_config(&mut self, config: EngineConfig) -> Result<()> {
        config.validate()?;
        self.queue.update_policy(&config.rate);
        self.pacer.update_config(config.rate.clone());
        self.pacer.update_hours(config.operating_hours.clone());
        self.pacer.update_adaptive(config.adaptive.clone());
        self.summary.set_zone(config.operating_hours.zone());

        let usage = self.config.usage.clone();
        self.config = EngineConfig { usage, ..config };
        info!("engine config updated");
        Ok(())
    }

    pub fn acknowledge_alert(&mut self, alert_id: &str) -> bool {
        self.ledger.acknowledge(alert_id)
    }

    pub fn reset_billing_period(&mut self, entitlement_minutes: Option<u64>) -> Vec<UsageAlert> {
        let now = self.clock.now();
        if let Some(minutes) = entitlement_minutes {
            self.config.usage.total_minutes_entitlement = minutes;
        }
        self.config.usage.minutes_consumed_historical = 0;
        let alerts = self.ledger.reset_period(entitlement_minutes, now);
        self.publish_alerts(alerts.clone());
        alerts
    }

    /// Stop admitting and end every live session as dropped. Tickers are
    /// cancelled before this returns.
    pub fn shutdown(&mut self) {
        if self.stopping {
            return;
        }
        self.stopping = true;
        let live = self.pacer.session_ids();
        info!(live_sessions = live.len(), "control plane shutting down");

        for session_id in live {
            if let Err(e) = self.finish(&session_id, CallOutcome::Failure(FailureReason::Dropped), None) {
                error!(%session_id, error = %e, "failed to end session during shutdown");
            }
        }
        // ticks already queued belong to sessions that no longer exist
        while self.events_rx.try_recv().is_ok() {}
    }

    fn publish_alerts(&self, alerts: Vec<UsageAlert>) {
        for alert in alerts {
            self.notify(EngineNotice::UsageAlert { alert });
        }
    }

    fn notify(&self, notice: EngineNotice) {
        // no subscribers is fine
        let _ = self.notices.send(notice);
    }
}
