//! Usage ledger
//!
//! Meters connected call time against the plan entitlement for the current
//! billing period. Accounting is in whole seconds; minutes and percentages
//! are derived on read. Live sessions accrue through [`UsageLedger::record_tick`]
//! deltas (never by re-reading absolute elapsed time), and move into the
//! historical total in one step at [`UsageLedger::record_session_end`].
//!
//! Alert tiers are edge-triggered: each tier raises once per billing period,
//! on the update that first takes usage to or past it. Acknowledging an alert
//! does not re-arm its tier; only [`UsageLedger::reset_period`] does.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{AlertThreshold, UsageConfig};
use crate::session::SessionId;

/// Severity of a usage alert
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// Alert raised when usage crosses a tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageAlert {
    pub id: String,
    pub severity: AlertSeverity,
    pub threshold_percent: u32,
    pub message: String,
    pub raised_at: DateTime<Utc>,
    pub acknowledged: bool,
}

/// Read model of the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub percentage_used: f64,
    pub remaining_minutes: f64,
    pub consumed_minutes: f64,
    pub active_session_minutes: f64,
    pub entitlement_minutes: u64,
    pub active_sessions: usize,
    pub alerts: Vec<UsageAlert>,
}

#[derive(Debug, Default, Clone)]
struct LiveUsage {
    last_seq: u64,
    /// Seconds accrued in the current billing period
    in_period: u64,
    /// Seconds accrued over the whole session
    total: u64,
}

/// Metered usage for one billing period
#[derive(Debug)]
pub struct UsageLedger {
    entitlement_seconds: u64,
    historical_seconds: u64,
    active_seconds: u64,
    live: HashMap<SessionId, LiveUsage>,
    thresholds: Vec<AlertThreshold>,
    crossed: BTreeSet<u32>,
    alerts: Vec<UsageAlert>,
}

impl UsageLedger {
    /// Open a ledger. Tiers already reached by the historical total are
    /// raised straight away.
    pub fn new(config: &UsageConfig, now: DateTime<Utc>) -> Self {
        let mut thresholds = config.alert_thresholds.clone();
        thresholds.sort_by_key(|t| t.percent);

        let mut ledger = Self {
            entitlement_seconds: config.total_minutes_entitlement.saturating_mul(60),
            historical_seconds: config.minutes_consumed_historical.saturating_mul(60),
            active_seconds: 0,
            live: HashMap::new(),
            thresholds,
            crossed: BTreeSet::new(),
            alerts: Vec::new(),
        };
        ledger.evaluate(now);
        ledger
    }

    /// Apply one accrual delta for a live session.
    ///
    /// `seq` is the session's tick sequence number; a value at or below the
    /// last one applied for that session is a duplicate and changes nothing.
    /// Returns alerts raised by this update.
    pub fn record_tick(
        &mut self,
        session_id: &SessionId,
        seq: u64,
        delta_seconds: u64,
        now: DateTime<Utc>,
    ) -> Vec<UsageAlert> {
        let live = self.live.entry(session_id.clone()).or_default();
        if seq <= live.last_seq {
            debug!(%session_id, seq, last = live.last_seq, "duplicate usage tick ignored");
            return Vec::new();
        }
        live.last_seq = seq;
        live.in_period += delta_seconds;
        live.total += delta_seconds;
        self.active_seconds += delta_seconds;

        self.evaluate(now)
    }

    /// Move a finished session's usage into the historical total.
    ///
    /// The session contributes `max(final_seconds, accrued)` overall, so
    /// seconds the ticks missed are still billed once and never twice.
    pub fn record_session_end(
        &mut self,
        session_id: &SessionId,
        final_seconds: u64,
        now: DateTime<Utc>,
    ) -> Vec<UsageAlert> {
        let live = self.live.remove(session_id).unwrap_or_default();
        let unaccounted = final_seconds.saturating_sub(live.total);

        self.active_seconds = self.active_seconds.saturating_sub(live.in_period);
        self.historical_seconds += live.in_period + unaccounted;
        debug!(
            %session_id,
            final_seconds,
            accrued = live.total,
            "session usage moved to historical"
        );

        self.evaluate(now)
    }

    /// Mark an alert as seen. Its tier stays crossed.
    pub fn acknowledge(&mut self, alert_id: &str) -> bool {
        match self.alerts.iter_mut().find(|a| a.id == alert_id) {
            Some(alert) => {
                alert.acknowledged = true;
                true
            }
            None => false,
        }
    }

    /// Start a new billing period.
    ///
    /// Historical usage, alerts and crossed tiers are cleared. Sessions still
    /// running keep going and bill their remaining time to the new period.
    pub fn reset_period(&mut self, entitlement_minutes: Option<u64>, now: DateTime<Utc>) -> Vec<UsageAlert> {
        if let Some(minutes) = entitlement_minutes {
            self.entitlement_seconds = minutes.saturating_mul(60);
        }
        self.historical_seconds = 0;
        self.active_seconds = 0;
        for live in self.live.values_mut() {
            live.in_period = 0;
        }
        self.crossed.clear();
        self.alerts.clear();
        debug!(entitlement_seconds = self.entitlement_seconds, "billing period reset");

        self.evaluate(now)
    }

    /// Seconds used this period, live sessions included
    pub fn used_seconds(&self) -> u64 {
        self.historical_seconds + self.active_seconds
    }

    pub fn active_seconds(&self) -> u64 {
        self.active_seconds
    }

    pub fn percentage_used(&self) -> f64 {
        if self.entitlement_seconds == 0 {
            return 100.0;
        }
        self.used_seconds() as f64 * 100.0 / self.entitlement_seconds as f64
    }

    pub fn alerts(&self) -> &[UsageAlert] {
        &self.alerts
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        let remaining = self.entitlement_seconds.saturating_sub(self.used_seconds());
        UsageSnapshot {
            percentage_used: self.percentage_used(),
            remaining_minutes: remaining as f64 / 60.0,
            consumed_minutes: self.used_seconds() as f64 / 60.0,
            active_session_minutes: self.active_seconds as f64 / 60.0,
            entitlement_minutes: self.entitlement_seconds / 60,
            active_sessions: self.live.len(),
            alerts: self.alerts.clone(),
        }
    }

    fn evaluate(&mut self, now: DateTime<Utc>) -> Vec<UsageAlert> {
        let used_scaled = u128::from(self.used_seconds()) * 100;
        let mut raised = Vec::new();

        for threshold in &self.thresholds {
            if self.crossed.contains(&threshold.percent) {
                continue;
            }
            if used_scaled < u128::from(threshold.percent) * u128::from(self.entitlement_seconds) {
                continue;
            }

            self.crossed.insert(threshold.percent);
            let alert = UsageAlert {
                id: format!("alert-{}", uuid::Uuid::new_v4()),
                severity: threshold.severity,
                threshold_percent: threshold.percent,
                message: format!(
                    "Usage reached {}% of plan ({:.1} of {} minutes)",
                    threshold.percent,
                    self.used_seconds() as f64 / 60.0,
                    self.entitlement_seconds / 60
                ),
                raised_at: now,
                acknowledged: false,
            };
            warn!(
                severity = ?alert.severity,
                threshold = threshold.percent,
                percentage_used = self.used_seconds() as f64 * 100.0 / self.entitlement_seconds.max(1) as f64,
                "usage alert raised"
            );
            raised.push(alert);
        }

        self.alerts.extend(raised.iter().cloned());
        raised
    }
}
