//! Engine configuration
//!
//! Everything the dialer reads from its settings editor: pacing and retry
//! policy, operating hours, plan entitlement and alert tiers, the adaptive
//! throttle's tuning, tick timing and billing. All sections default sensibly,
//! so a TOML file only needs the values it changes.
//!
//! ```toml
//! [rate]
//! calls_per_hour = 120
//! concurrent_calls = 3
//!
//! [operating_hours]
//! timezone = "America/New_York"
//!
//! [operating_hours.saturday]
//! enabled = true
//! start = "10:00"
//! end = "14:00"
//! ```
//!
//! Environment variables override the file: `OUTDIAL__RATE__CALLS_PER_HOUR=60`.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CallEngineError, Result};
use crate::ledger::AlertSeverity;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "OUTDIAL";

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub rate: RateConfig,
    pub operating_hours: OperatingHours,
    pub usage: UsageConfig,
    pub adaptive: AdaptiveConfig,
    pub timing: TimingConfig,
    pub billing: BillingConfig,
}

/// Pacing and retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    /// Session starts allowed in any trailing 60 minutes
    pub calls_per_hour: u32,
    /// Sessions allowed in dialing or connected at once
    pub concurrent_calls: u32,
    /// Failed attempts after which a lead is terminal
    pub retry_attempts: u32,
    pub retry_delay_minutes: u32,
    pub respect_dnc: bool,
    /// Session starts allowed per local calendar day
    pub max_daily_limit: u32,
    pub adaptive_rating: bool,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            calls_per_hour: 60,
            concurrent_calls: 3,
            retry_attempts: 3,
            retry_delay_minutes: 30,
            respect_dnc: true,
            max_daily_limit: 500,
            adaptive_rating: false,
        }
    }
}

/// Dialing window for one weekday, local time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySchedule {
    pub enabled: bool,
    #[serde(with = "clock_time")]
    pub start: NaiveTime,
    #[serde(with = "clock_time")]
    pub end: NaiveTime,
}

impl DaySchedule {
    pub fn open(start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            enabled: true,
            start,
            end,
        }
    }

    pub fn closed() -> Self {
        Self {
            enabled: false,
            ..Self::business()
        }
    }

    fn business() -> Self {
        Self {
            enabled: true,
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            end: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }

    /// End before start: the window runs past midnight
    pub fn is_overnight(&self) -> bool {
        self.start > self.end
    }
}

impl Default for DaySchedule {
    fn default() -> Self {
        Self::business()
    }
}

/// Where the dialing windows are read as local wall-clock time
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LocalZone {
    /// IANA zone, daylight saving included
    Named(Tz),
    Fixed(FixedOffset),
}

impl LocalZone {
    /// Wall-clock reading of `instant` in this zone
    pub fn local(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        match self {
            LocalZone::Named(tz) => instant.with_timezone(tz).naive_local(),
            LocalZone::Fixed(offset) => instant.with_timezone(offset).naive_local(),
        }
    }
}

impl Default for LocalZone {
    fn default() -> Self {
        LocalZone::Fixed(Utc.fix())
    }
}

impl fmt::Display for LocalZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalZone::Named(tz) => write!(f, "{}", tz.name()),
            LocalZone::Fixed(offset) => write!(f, "UTC{}", offset),
        }
    }
}

/// Per-weekday dialing windows in the operator's local time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatingHours {
    /// IANA zone name such as `"America/New_York"`; takes precedence over
    /// `utc_offset_minutes`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<Tz>,
    /// Fixed offset from UTC in minutes, used when no zone is named
    pub utc_offset_minutes: i32,
    pub monday: DaySchedule,
    pub tuesday: DaySchedule,
    pub wednesday: DaySchedule,
    pub thursday: DaySchedule,
    pub friday: DaySchedule,
    pub saturday: DaySchedule,
    pub sunday: DaySchedule,
}

impl Default for OperatingHours {
    fn default() -> Self {
        Self {
            timezone: None,
            utc_offset_minutes: 0,
            monday: DaySchedule::business(),
            tuesday: DaySchedule::business(),
            wednesday: DaySchedule::business(),
            thursday: DaySchedule::business(),
            friday: DaySchedule::business(),
            saturday: DaySchedule::closed(),
            sunday: DaySchedule::closed(),
        }
    }
}

impl OperatingHours {
    /// Open every day, all day
    pub fn always_open() -> Self {
        let all_day = DaySchedule::open(NaiveTime::MIN, NaiveTime::MIN);
        Self {
            timezone: None,
            utc_offset_minutes: 0,
            monday: all_day,
            tuesday: all_day,
            wednesday: all_day,
            thursday: all_day,
            friday: all_day,
            saturday: all_day,
            sunday: all_day,
        }
    }

    pub fn day(&self, weekday: Weekday) -> &DaySchedule {
        match weekday {
            Weekday::Mon => &self.monday,
            Weekday::Tue => &self.tuesday,
            Weekday::Wed => &self.wednesday,
            Weekday::Thu => &self.thursday,
            Weekday::Fri => &self.friday,
            Weekday::Sat => &self.saturday,
            Weekday::Sun => &self.sunday,
        }
    }

    /// Out-of-range offsets (rejected by `validate`) fall back to UTC
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    pub fn zone(&self) -> LocalZone {
        match self.timezone {
            Some(tz) => LocalZone::Named(tz),
            None => LocalZone::Fixed(self.offset()),
        }
    }

    pub fn local(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        self.zone().local(instant)
    }

    /// Local calendar date of `instant`
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        self.local(instant).date()
    }

    /// Whether dialing is allowed at `instant`.
    ///
    /// A window equal at both ends (`start == end`) means all day. Overnight
    /// windows belong to the day they start on.
    pub fn is_open(&self, instant: DateTime<Utc>) -> bool {
        let local = self.local(instant);
        let time = local.time();

        let today = self.day(local.weekday());
        let open_today = today.enabled
            && if today.start == today.end {
                true
            } else if today.is_overnight() {
                time >= today.start
            } else {
                time >= today.start && time < today.end
            };

        // tail of an overnight window opened yesterday
        let yesterday = self.day(local.weekday().pred());
        let open_from_yesterday = yesterday.enabled && yesterday.is_overnight() && time < yesterday.end;

        open_today || open_from_yesterday
    }
}

/// One alert tier of the usage ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertThreshold {
    pub percent: u32,
    pub severity: AlertSeverity,
}

/// Plan entitlement and alert tiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageConfig {
    pub total_minutes_entitlement: u64,
    /// Minutes already used this period before the engine started
    pub minutes_consumed_historical: u64,
    pub alert_thresholds: Vec<AlertThreshold>,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            total_minutes_entitlement: 1000,
            minutes_consumed_historical: 0,
            alert_thresholds: vec![
                AlertThreshold {
                    percent: 75,
                    severity: AlertSeverity::Warning,
                },
                AlertThreshold {
                    percent: 90,
                    severity: AlertSeverity::Critical,
                },
            ],
        }
    }
}

/// Tuning for the success-ratio throttle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Terminal outcomes kept in the rolling window
    pub window: usize,
    /// Outcomes needed before the throttle may engage
    pub min_samples: usize,
    /// Throttle when the success ratio falls below this
    pub low_water: f64,
    /// Restore once the ratio is at or above this
    pub high_water: f64,
    /// Multiplier applied to `calls_per_hour` while throttled
    pub throttle_factor: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            window: 20,
            min_samples: 5,
            low_water: 0.30,
            high_water: 0.60,
            throttle_factor: 0.5,
        }
    }
}

/// Loop timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Real interval of one session tick (one second of call time)
    pub tick_interval_ms: u64,
    /// How often the engine tries to admit pending leads
    pub dispatch_interval_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            dispatch_interval_ms: 500,
        }
    }
}

/// Pricing used by the call record export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    pub cost_per_minute: f64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            cost_per_minute: 0.10,
        }
    }
}

impl EngineConfig {
    /// Load from an optional TOML file, then `OUTDIAL__*` environment overrides.
    ///
    /// The result is validated before it is returned.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            debug!(path = %path.display(), "loading engine config file");
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: EngineConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without environment overrides
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: EngineConfig = config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        self.rate.validate()?;
        self.operating_hours.validate()?;
        self.usage.validate()?;
        self.adaptive.validate()?;

        if self.timing.tick_interval_ms == 0 {
            return Err(CallEngineError::config("tick_interval_ms must be greater than 0"));
        }
        if self.timing.dispatch_interval_ms == 0 {
            return Err(CallEngineError::config("dispatch_interval_ms must be greater than 0"));
        }
        if !self.billing.cost_per_minute.is_finite() || self.billing.cost_per_minute < 0.0 {
            return Err(CallEngineError::config("cost_per_minute must be a non-negative number"));
        }
        Ok(())
    }
}

impl RateConfig {
    pub fn validate(&self) -> Result<()> {
        if self.calls_per_hour == 0 {
            return Err(CallEngineError::config("calls_per_hour must be greater than 0"));
        }
        if self.concurrent_calls == 0 {
            return Err(CallEngineError::config("concurrent_calls must be greater than 0"));
        }
        if self.retry_attempts == 0 {
            return Err(CallEngineError::config("retry_attempts must be at least 1"));
        }
        if self.max_daily_limit == 0 {
            return Err(CallEngineError::config("max_daily_limit must be greater than 0"));
        }
        Ok(())
    }
}

impl OperatingHours {
    pub fn validate(&self) -> Result<()> {
        if self.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(CallEngineError::config(format!(
                "utc_offset_minutes {} is out of range",
                self.utc_offset_minutes
            )));
        }
        Ok(())
    }
}

impl UsageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.total_minutes_entitlement == 0 {
            return Err(CallEngineError::config("total_minutes_entitlement must be greater than 0"));
        }
        if self.alert_thresholds.is_empty() {
            return Err(CallEngineError::config("at least one alert threshold is required"));
        }
        let mut seen = Vec::with_capacity(self.alert_thresholds.len());
        for threshold in &self.alert_thresholds {
            if threshold.percent == 0 || threshold.percent > 100 {
                return Err(CallEngineError::config(format!(
                    "alert threshold {}% must be between 1 and 100",
                    threshold.percent
                )));
            }
            if seen.contains(&threshold.percent) {
                return Err(CallEngineError::config(format!(
                    "duplicate alert threshold {}%",
                    threshold.percent
                )));
            }
            seen.push(threshold.percent);
        }
        Ok(())
    }
}

impl AdaptiveConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window == 0 {
            return Err(CallEngineError::config("adaptive window must be greater than 0"));
        }
        if self.min_samples == 0 || self.min_samples > self.window {
            return Err(CallEngineError::config("adaptive min_samples must be between 1 and window"));
        }
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !in_unit(self.low_water) || !in_unit(self.high_water) {
            return Err(CallEngineError::config("adaptive water marks must be between 0 and 1"));
        }
        if self.low_water > self.high_water {
            return Err(CallEngineError::config("adaptive low_water must not exceed high_water"));
        }
        if !(self.throttle_factor > 0.0 && self.throttle_factor <= 1.0) {
            return Err(CallEngineError::config("adaptive throttle_factor must be in (0, 1]"));
        }
        Ok(())
    }
}

/// `"HH:MM"` (or `"HH:MM:SS"`) wall-clock times
mod clock_time {
    use chrono::NaiveTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
            .map_err(|e| de::Error::custom(format!("invalid time '{}': {}", raw, e)))
    }
}
