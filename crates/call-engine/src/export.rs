//! Flat call-record export
//!
//! One line per finished attempt, in the column order
//! `Timestamp,Contact,Phone,Duration,Outcome,Cost,Notes`. Contact and notes
//! are free text and are always wrapped in double quotes with embedded quotes
//! doubled. The other columns are written bare unless they contain a comma,
//! quote or line break.

use std::fmt::Write as _;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::config::BillingConfig;
use crate::session::SessionResult;

pub const CSV_HEADER: &str = "Timestamp,Contact,Phone,Duration,Outcome,Cost,Notes";

/// One exported call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub timestamp: DateTime<Utc>,
    pub contact: String,
    pub phone: String,
    pub duration_seconds: u64,
    pub outcome: String,
    pub cost: f64,
    pub notes: String,
}

impl CallRecord {
    /// Cost is billed per started minute of connected time
    pub fn from_result(result: &SessionResult, billing: &BillingConfig) -> Self {
        let billed_minutes = result.duration_seconds.div_ceil(60);
        Self {
            timestamp: result.bucket_instant(),
            contact: result.lead_name.clone(),
            phone: result.phone.clone(),
            duration_seconds: result.duration_seconds,
            outcome: result.outcome.label(),
            cost: billed_minutes as f64 * billing.cost_per_minute,
            notes: result.notes.clone().unwrap_or_default(),
        }
    }

    /// `m:ss`
    pub fn formatted_duration(&self) -> String {
        format!("{}:{:02}", self.duration_seconds / 60, self.duration_seconds % 60)
    }

    pub fn to_csv_line(&self) -> String {
        [
            bare_field(&self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)),
            quoted_field(&self.contact),
            bare_field(&self.phone),
            self.formatted_duration(),
            bare_field(&self.outcome),
            format!("{:.2}", self.cost),
            quoted_field(&self.notes),
        ]
        .join(",")
    }
}

/// Header plus one line per record, each terminated by `\n`
pub fn to_csv(records: &[CallRecord]) -> String {
    let mut out = String::with_capacity(64 * (records.len() + 1));
    let _ = writeln!(out, "{}", CSV_HEADER);
    for record in records {
        let _ = writeln!(out, "{}", record.to_csv_line());
    }
    out
}

fn quoted_field(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

fn bare_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        quoted_field(value)
    } else {
        value.to_string()
    }
}
