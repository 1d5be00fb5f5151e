//! # Call Engine Runner
//!
//! Hosts a [`ControlPlane`] on a tokio task and hands out cheap, cloneable
//! [`EngineHandle`]s for everything outside it: operator consoles, dashboards,
//! lead importers.
//!
//! The task's loop waits on three inputs and applies whichever arrives
//! first, one at a time:
//!
//! - commands from handles (each answered over a oneshot channel)
//! - tick events forwarded by session tickers
//! - the dispatch interval, which offers free capacity to pending leads
//!
//! ```text
//! ┌──────────────┐  EngineCommand   ┌─────────────────────────────┐
//! │ EngineHandle │ ───────────────► │   run loop (tokio task)     │
//! │   (clone)    │ ◄─ oneshot ───── │  select! {                  │
//! └──────┬───────┘                  │    command  → handle        │
//!        │ subscribe()              │    tick     → handle_event  │
//!        ▼                          │    interval → dispatch      │
//!  broadcast::Receiver<EngineNotice>│  }                          │
//!                                   └─────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use outdial_call_engine::prelude::*;
//!
//! # async fn example() -> Result<()> {
//! let engine = CallEngineBuilder::new()
//!     .with_config(EngineConfig::default())
//!     .with_outcome_provider(RandomOutcomeProvider::new(7))
//!     .build()?;
//!
//! let handle = engine.handle();
//! let mut notices = handle.subscribe();
//! handle.enqueue_lead(Lead::new("Ada Lovelace", "+1 555 0100", Priority::High)).await?;
//!
//! while let Ok(notice) = notices.recv().await {
//!     if let EngineNotice::SessionEnded { outcome, .. } = notice {
//!         println!("call ended: {}", outcome);
//!         break;
//!     }
//! }
//!
//! engine.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use outdial_infra_common::{Clock, SystemClock, Ticker, TokioTicker};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::{EngineConfig, RateConfig};
use crate::dnc::{DncRegistry, InMemoryDncList};
use crate::error::{CallEngineError, Result};
use crate::export::CallRecord;
use crate::ledger::{UsageAlert, UsageSnapshot};
use crate::orchestrator::{ControlPlane, EngineCommand, EngineNotice};
use crate::outcome::{CallOutcomeProvider, Disposition, RandomOutcomeProvider};
use crate::pacer::PacerStatus;
use crate::queue::{CallId, Lead, QueueSnapshot, QueuedCall};
use crate::session::{SessionId, SessionResult, SessionSnapshot, TranscriptEntry};
use crate::summary::DailySummary;

/// Bound on queued commands from handles
pub const COMMAND_CHANNEL_CAPACITY: usize = 256;

/// A running engine
pub struct CallEngine {
    handle: EngineHandle,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl CallEngine {
    /// Spawn the run loop for `plane`. Must be called inside a tokio runtime.
    pub fn spawn(plane: ControlPlane) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let notices = plane.notice_sender();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(Self::run_loop(plane, commands_rx, cancel.clone()));
        info!("call engine started");

        Self {
            handle: EngineHandle {
                commands: commands_tx,
                notices,
            },
            cancel,
            task: Some(task),
        }
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Shut down gracefully: live sessions are ended and their tickers
    /// cancelled before the loop exits.
    pub async fn stop(mut self) -> Result<()> {
        info!("stopping call engine");
        if let Err(e) = self.handle.shutdown().await {
            debug!(error = %e, "engine loop already gone");
        }
        self.cancel.cancel();

        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| CallEngineError::internal(format!("engine task failed: {}", e)))?;
        }
        info!("call engine stopped");
        Ok(())
    }

    async fn run_loop(
        mut plane: ControlPlane,
        mut commands: mpsc::Receiver<EngineCommand>,
        cancel: CancellationToken,
    ) {
        let period = Duration::from_millis(plane.config().timing.dispatch_interval_ms);
        let mut dispatch = interval(period);
        dispatch.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    plane.shutdown();
                    break;
                }

                command = commands.recv() => match command {
                    Some(command) => {
                        if !plane.handle_command(command) {
                            break;
                        }
                    }
                    None => {
                        debug!("all engine handles dropped");
                        plane.shutdown();
                        break;
                    }
                },

                Some(event) = plane.next_event() => {
                    plane.handle_event(event);
                }

                _ = dispatch.tick() => {
                    let admitted = plane.dispatch();
                    if !admitted.is_empty() {
                        debug!(admitted = admitted.len(), "dispatch cycle admitted calls");
                    }
                }
            }
        }

        info!("call engine loop exited");
    }
}

impl Drop for CallEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Client side of a running engine
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
    notices: broadcast::Sender<EngineNotice>,
}

impl EngineHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> EngineCommand) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| CallEngineError::EngineStopped)?;
        response.await.map_err(|_| CallEngineError::EngineStopped)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineNotice> {
        self.notices.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    pub async fn enqueue_lead(&self, lead: Lead) -> Result<CallId> {
        self.request(|reply| EngineCommand::EnqueueLead { lead, reply }).await
    }

    pub async fn remove_lead(&self, call_id: CallId) -> Result<QueuedCall> {
        self.request(|reply| EngineCommand::RemoveLead { call_id, reply }).await?
    }

    pub async fn mute(&self, session_id: SessionId) -> Result<bool> {
        self.request(|reply| EngineCommand::Mute { session_id, reply }).await?
    }

    pub async fn hold(&self, session_id: SessionId) -> Result<bool> {
        self.request(|reply| EngineCommand::Hold { session_id, reply }).await?
    }

    /// `Ok(None)` when the session had already ended
    pub async fn end_call(
        &self,
        session_id: SessionId,
        disposition: Option<Disposition>,
        notes: Option<String>,
    ) -> Result<Option<SessionResult>> {
        self.request(|reply| EngineCommand::EndCall {
            session_id,
            disposition,
            notes,
            reply,
        })
        .await?
    }

    pub async fn inject_speech(&self, session_id: SessionId, text: impl Into<String>) -> Result<TranscriptEntry> {
        let text = text.into();
        self.request(|reply| EngineCommand::InjectSpeech {
            session_id,
            text,
            reply,
        })
        .await?
    }

    pub async fn session_snapshot(&self, session_id: SessionId) -> Result<SessionSnapshot> {
        self.request(|reply| EngineCommand::SessionSnapshot { session_id, reply })
            .await?
    }

    pub async fn session_snapshots(&self) -> Result<Vec<SessionSnapshot>> {
        self.request(|reply| EngineCommand::SessionSnapshots { reply }).await
    }

    pub async fn queue_snapshot(&self) -> Result<QueueSnapshot> {
        self.request(|reply| EngineCommand::QueueSnapshot { reply }).await
    }

    pub async fn usage_snapshot(&self) -> Result<UsageSnapshot> {
        self.request(|reply| EngineCommand::UsageSnapshot { reply }).await
    }

    pub async fn pacer_status(&self) -> Result<PacerStatus> {
        self.request(|reply| EngineCommand::PacerStatus { reply }).await
    }

    pub async fn daily_summary(&self, date: Option<NaiveDate>) -> Result<DailySummary> {
        self.request(|reply| EngineCommand::DailySummary { date, reply }).await
    }

    pub async fn call_records(&self) -> Result<Vec<CallRecord>> {
        self.request(|reply| EngineCommand::CallRecords { reply }).await
    }

    pub async fn export_csv(&self) -> Result<String> {
        self.request(|reply| EngineCommand::ExportCsv { reply }).await
    }

    pub async fn update_rate_config(&self, rate: RateConfig) -> Result<()> {
        self.request(|reply| EngineCommand::UpdateRateConfig { rate, reply })
            .await?
    }

    /// Replace the running configuration. The usage section is kept and the
    /// dispatch interval stays as the engine started with.
    pub async fn update_config(&self, config: EngineConfig) -> Result<()> {
        self.request(|reply| EngineCommand::UpdateConfig {
            config: Box::new(config),
            reply,
        })
        .await?
    }

    pub async fn acknowledge_alert(&self, alert_id: impl Into<String>) -> Result<bool> {
        let alert_id = alert_id.into();
        self.request(|reply| EngineCommand::AcknowledgeAlert { alert_id, reply })
            .await
    }

    pub async fn reset_billing_period(&self, entitlement_minutes: Option<u64>) -> Result<Vec<UsageAlert>> {
        self.request(|reply| EngineCommand::ResetBillingPeriod {
            entitlement_minutes,
            reply,
        })
        .await
    }

    /// Run a dispatch cycle now instead of waiting for the interval
    pub async fn dispatch_now(&self) -> Result<Vec<SessionId>> {
        self.request(|reply| EngineCommand::Dispatch { reply }).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| EngineCommand::Shutdown { reply }).await
    }
}

/// Builder for [`CallEngine`]
pub struct CallEngineBuilder {
    config: Option<EngineConfig>,
    clock: Option<Arc<dyn Clock>>,
    ticker: Option<Arc<dyn Ticker>>,
    provider: Option<Box<dyn CallOutcomeProvider>>,
    dnc: Option<Arc<dyn DncRegistry>>,
}

impl CallEngineBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            clock: None,
            ticker: None,
            provider: None,
            dnc: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_ticker(mut self, ticker: Arc<dyn Ticker>) -> Self {
        self.ticker = Some(ticker);
        self
    }

    pub fn with_outcome_provider(mut self, provider: impl CallOutcomeProvider + 'static) -> Self {
        self.provider = Some(Box::new(provider));
        self
    }

    pub fn with_dnc(mut self, dnc: Arc<dyn DncRegistry>) -> Self {
        self.dnc = Some(dnc);
        self
    }

    /// Assemble the control plane without spawning it
    pub fn build_control_plane(self) -> Result<ControlPlane> {
        let config = self.config.unwrap_or_default();
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ticker = self
            .ticker
            .unwrap_or_else(|| Arc::new(TokioTicker::new(clock.clone())));
        let provider = self.provider.unwrap_or_else(|| {
            error!("no outcome provider configured, falling back to random outcomes");
            Box::new(RandomOutcomeProvider::new(0))
        });
        let dnc = self
            .dnc
            .unwrap_or_else(|| Arc::new(InMemoryDncList::new()));

        ControlPlane::new(config, clock, ticker, provider, dnc)
    }

    /// Build and spawn. Must be called inside a tokio runtime.
    pub fn build(self) -> Result<CallEngine> {
        Ok(CallEngine::spawn(self.build_control_plane()?))
    }
}

impl Default for CallEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
