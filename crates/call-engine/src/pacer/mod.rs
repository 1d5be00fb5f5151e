//! # Pacer
//!
//! Decides whether a queued lead may become a live call right now, and owns
//! every live [`CallSession`] from admission until it ends.
//!
//! Checks run in a fixed order and the first failure wins:
//!
//! 1. operating hours for the configured offset
//! 2. daily start cap for the local calendar day
//! 3. do-not-call list, when `respect_dnc` is set
//! 4. concurrency: sessions dialing or connected
//! 5. hourly budget over a sliding 60-minute window of starts, reduced by the
//!    adaptive throttle while it is engaged
//!
//! Only the DNC check depends on the lead itself. Every other rejection would
//! apply equally to the next lead in line.
//!
//! Ending a session through [`Pacer::end_session`] frees its slot in the same
//! call, so the next dispatch can admit straight away.

mod adaptive;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{AdaptiveConfig, OperatingHours, RateConfig};
use crate::dnc::DncRegistry;
use crate::error::{CallEngineError, Result};
use crate::outcome::CallOutcome;
use crate::queue::QueuedCall;
use crate::session::{CallSession, SessionId, SessionResult};

pub use adaptive::{AdaptiveThrottle, ThrottleChange};

/// Why a lead was not admitted
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    RateLimited,
    ConcurrencyLimitReached,
    OutsideOperatingHours,
    DncBlocked,
    DailyLimitReached,
}

impl RejectReason {
    /// True when the next lead in line could still be admitted
    pub fn is_lead_specific(&self) -> bool {
        matches!(self, RejectReason::DncBlocked)
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RejectReason::RateLimited => "rate limited",
            RejectReason::ConcurrencyLimitReached => "concurrency limit reached",
            RejectReason::OutsideOperatingHours => "outside operating hours",
            RejectReason::DncBlocked => "do-not-call",
            RejectReason::DailyLimitReached => "daily limit reached",
        };
        f.write_str(text)
    }
}

/// Result of an admission attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// A session was created and started dialing
    Admitted(SessionId),
    Rejected(RejectReason),
}

/// Pacing figures for dashboards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacerStatus {
    pub active_sessions: usize,
    pub concurrent_limit: u32,
    pub starts_last_hour: usize,
    pub effective_calls_per_hour: u32,
    pub throttled: bool,
    pub success_ratio: Option<f64>,
    pub starts_today: u32,
    pub daily_limit: u32,
}

/// Admission control and live-session owner
pub struct Pacer {
    rate: RateConfig,
    hours: OperatingHours,
    throttle: AdaptiveThrottle,
    dnc: Arc<dyn DncRegistry>,
    starts: VecDeque<DateTime<Utc>>,
    daily: Option<(NaiveDate, u32)>,
    sessions: HashMap<SessionId, CallSession>,
}

impl fmt::Debug for Pacer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pacer")
            .field("rate", &self.rate)
            .field("sessions", &self.sessions.len())
            .field("starts", &self.starts.len())
            .field("throttled", &self.throttle.is_throttled())
            .finish()
    }
}

impl Pacer {
    pub fn new(
        rate: RateConfig,
        hours: OperatingHours,
        adaptive: AdaptiveConfig,
        dnc: Arc<dyn DncRegistry>,
    ) -> Self {
        Self {
            rate,
            hours,
            throttle: AdaptiveThrottle::new(adaptive),
            dnc,
            starts: VecDeque::new(),
            daily: None,
            sessions: HashMap::new(),
        }
    }

    /// Run the admission checks without admitting
    pub fn check(&mut self, call: &QueuedCall, now: DateTime<Utc>) -> std::result::Result<(), RejectReason> {
        if !self.hours.is_open(now) {
            return Err(RejectReason::OutsideOperatingHours);
        }
        if self.starts_today(now) >= self.rate.max_daily_limit {
            return Err(RejectReason::DailyLimitReached);
        }
        if self.rate.respect_dnc && self.dnc.is_blocked(&call.phone_number) {
            return Err(RejectReason::DncBlocked);
        }
        if self.active_count() >= self.rate.concurrent_calls as usize {
            return Err(RejectReason::ConcurrencyLimitReached);
        }
        if self.starts_in_window(now) >= self.effective_calls_per_hour() as usize {
            return Err(RejectReason::RateLimited);
        }
        Ok(())
    }

    /// Admit `call` and start its session dialing
    pub fn try_admit(&mut self, call: &QueuedCall, now: DateTime<Utc>) -> Admission {
        if let Err(reason) = self.check(call, now) {
            debug!(call_id = %call.id, %reason, "admission rejected");
            return Admission::Rejected(reason);
        }

        let mut session = CallSession::new(call);
        if let Err(e) = session.start(now) {
            // a fresh session is always idle
            debug!(call_id = %call.id, error = %e, "fresh session refused to start");
            return Admission::Rejected(RejectReason::ConcurrencyLimitReached);
        }

        self.starts.push_back(now);
        let today = self.hours.local_date(now);
        self.daily = match self.daily {
            Some((date, count)) if date == today => Some((date, count + 1)),
            _ => Some((today, 1)),
        };

        let session_id = session.id().clone();
        info!(
            %session_id,
            call_id = %call.id,
            active = self.active_count() + 1,
            limit = self.rate.concurrent_calls,
            "call admitted"
        );
        self.sessions.insert(session_id.clone(), session);
        Admission::Admitted(session_id)
    }

    /// End a live session and free its slot.
    ///
    /// The session's ticker is cancelled before this returns and the outcome
    /// feeds the adaptive throttle.
    pub fn end_session(
        &mut self,
        session_id: &SessionId,
        outcome: CallOutcome,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(SessionResult, Option<ThrottleChange>)> {
        let mut session = self
            .sessions
            .remove(session_id)
            .ok_or_else(|| CallEngineError::SessionNotFound(session_id.clone()))?;

        let result = session
            .end(outcome, notes, now)?
            .ok_or_else(|| CallEngineError::session_closed(session_id))?;

        let change = if self.rate.adaptive_rating {
            self.throttle.record(result.outcome.is_success())
        } else {
            None
        };
        debug!(%session_id, active = self.active_count(), "slot released");
        Ok((result, change))
    }

    pub fn session(&self, session_id: &SessionId) -> Option<&CallSession> {
        self.sessions.get(session_id)
    }

    pub fn session_mut(&mut self, session_id: &SessionId) -> Option<&mut CallSession> {
        self.sessions.get_mut(session_id)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &CallSession> {
        self.sessions.values()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.keys().cloned().collect()
    }

    /// Sessions dialing or connected
    pub fn active_count(&self) -> usize {
        self.sessions.values().filter(|s| s.is_active()).count()
    }

    /// Starts in the trailing 60 minutes, `(now - 60m, now]`
    pub fn starts_in_window(&mut self, now: DateTime<Utc>) -> usize {
        let horizon = now - Duration::minutes(60);
        while self.starts.front().is_some_and(|start| *start <= horizon) {
            self.starts.pop_front();
        }
        self.starts.len()
    }

    pub fn starts_today(&self, now: DateTime<Utc>) -> u32 {
        match self.daily {
            Some((date, count)) if date == self.hours.local_date(now) => count,
            _ => 0,
        }
    }

    pub fn effective_calls_per_hour(&self) -> u32 {
        if self.rate.adaptive_rating {
            self.throttle.effective_limit(self.rate.calls_per_hour)
        } else {
            self.rate.calls_per_hour
        }
    }

    pub fn rate(&self) -> &RateConfig {
        &self.rate
    }

    /// Swap pacing policy; live sessions are unaffected
    pub fn update_config(&mut self, rate: RateConfig) {
        if !rate.adaptive_rating {
            self.throttle.reset();
        }
        info!(
            calls_per_hour = rate.calls_per_hour,
            concurrent_calls = rate.concurrent_calls,
            adaptive = rate.adaptive_rating,
            "rate config updated"
        );
        self.rate = rate;
    }

    pub fn update_hours(&mut self, hours: OperatingHours) {
        self.hours = hours;
    }

    pub fn update_adaptive(&mut self, adaptive: AdaptiveConfig) {
        self.throttle.update_config(adaptive);
    }

    pub fn status(&mut self, now: DateTime<Utc>) -> PacerStatus {
        PacerStatus {
            active_sessions: self.active_count(),
            concurrent_limit: self.rate.concurrent_calls,
            starts_last_hour: self.starts_in_window(now),
            effective_calls_per_hour: self.effective_calls_per_hour(),
            throttled: self.rate.adaptive_rating && self.throttle.is_throttled(),
            success_ratio: self.throttle.success_ratio(),
            starts_today: self.starts_today(now),
            daily_limit: self.rate.max_daily_limit,
        }
    }
}
