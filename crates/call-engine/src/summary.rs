//! Daily summary aggregation
//!
//! A fold over terminal session results. Results are bucketed by the local
//! date and hour (operating-hours zone) of the instant the call connected,
//! or of the dial instant for calls that never connected.

use std::collections::BTreeMap;

use chrono::{NaiveDate, Timelike};
use serde::{Deserialize, Serialize};

use crate::config::LocalZone;
use crate::session::SessionResult;

/// Calls started in one local hour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourBucket {
    pub hour: u32,
    pub calls: u32,
    pub duration_seconds: u64,
}

/// How often a failure reason occurred
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCount {
    pub reason: String,
    pub count: u32,
}

/// Aggregate statistics for one local day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub total_calls: u32,
    pub successful_calls: u32,
    pub failed_calls: u32,
    pub booked_calls: u32,
    pub total_talk_seconds: u64,
    /// Always 24 buckets, hour 0 first
    pub calls_by_hour: Vec<HourBucket>,
    /// Most frequent first; ties keep first-seen order
    pub top_failure_reasons: Vec<FailureCount>,
    pub connection_rate: f64,
    pub conversion_rate: f64,
    pub average_duration_seconds: f64,
}

#[derive(Debug, Clone)]
struct DayTotals {
    total_calls: u32,
    successful_calls: u32,
    failed_calls: u32,
    booked_calls: u32,
    total_talk_seconds: u64,
    by_hour: [HourBucket; 24],
    /// In first-seen order
    failures: Vec<FailureCount>,
}

impl DayTotals {
    fn new() -> Self {
        let mut by_hour = [HourBucket::default(); 24];
        for (hour, bucket) in by_hour.iter_mut().enumerate() {
            bucket.hour = hour as u32;
        }
        Self {
            total_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            booked_calls: 0,
            total_talk_seconds: 0,
            by_hour,
            failures: Vec::new(),
        }
    }
}

/// Folds session results into per-day totals
#[derive(Debug, Clone)]
pub struct DailySummaryAggregator {
    zone: LocalZone,
    days: BTreeMap<NaiveDate, DayTotals>,
}

impl DailySummaryAggregator {
    pub fn new(zone: LocalZone) -> Self {
        Self {
            zone,
            days: BTreeMap::new(),
        }
    }

    /// Later results bucket in the new zone; earlier ones keep theirs
    pub fn set_zone(&mut self, zone: LocalZone) {
        self.zone = zone;
    }

    pub fn ingest(&mut self, result: &SessionResult) {
        let local = self.zone.local(result.bucket_instant());
        let day = self.days.entry(local.date()).or_insert_with(DayTotals::new);

        day.total_calls += 1;
        day.total_talk_seconds += result.duration_seconds;
        if result.outcome.is_success() {
            day.successful_calls += 1;
        } else {
            day.failed_calls += 1;
        }
        if result.outcome.is_booked() {
            day.booked_calls += 1;
        }

        let bucket = &mut day.by_hour[local.hour() as usize];
        bucket.calls += 1;
        bucket.duration_seconds += result.duration_seconds;

        if let Some(reason) = result.outcome.failure_reason() {
            let label = reason.label();
            match day.failures.iter_mut().find(|f| f.reason == label) {
                Some(entry) => entry.count += 1,
                None => day.failures.push(FailureCount {
                    reason: label,
                    count: 1,
                }),
            }
        }
    }

    /// Summary for `date`; an empty day yields zeros
    pub fn summary(&self, date: NaiveDate) -> DailySummary {
        let totals = self.days.get(&date).cloned().unwrap_or_else(DayTotals::new);

        let ratio = |part: u32| {
            if totals.total_calls == 0 {
                0.0
            } else {
                f64::from(part) / f64::from(totals.total_calls)
            }
        };
        let average_duration_seconds = if totals.total_calls == 0 {
            0.0
        } else {
            totals.total_talk_seconds as f64 / f64::from(totals.total_calls)
        };

        // stable sort keeps first-seen order among equal counts
        let mut top_failure_reasons = totals.failures.clone();
        top_failure_reasons.sort_by(|a, b| b.count.cmp(&a.count));

        DailySummary {
            date,
            total_calls: totals.total_calls,
            successful_calls: totals.successful_calls,
            failed_calls: totals.failed_calls,
            booked_calls: totals.booked_calls,
            total_talk_seconds: totals.total_talk_seconds,
            calls_by_hour: totals.by_hour.to_vec(),
            top_failure_reasons,
            connection_rate: ratio(totals.successful_calls),
            conversion_rate: ratio(totals.booked_calls),
            average_duration_seconds,
        }
    }

    /// Dates with at least one result, oldest first
    pub fn dates(&self) -> Vec<NaiveDate> {
        self.days.keys().copied().collect()
    }
}
