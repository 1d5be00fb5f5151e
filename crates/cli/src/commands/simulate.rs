//! Simulate command - dial a lead list on virtual time

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Days, Utc};
use clap::Args;
use outdial_call_engine::prelude::*;
use outdial_infra_common::{Clock, ManualClock, ManualTicker};
use tracing::info;

use crate::{leads, report};

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Engine settings file (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Lead list CSV with a `name,phone,priority` header
    #[arg(short, long)]
    pub leads: Option<PathBuf>,

    /// Generate this many leads when no list is given
    #[arg(long, default_value_t = 25)]
    pub synthetic: usize,

    /// Simulated minutes to run
    #[arg(long, default_value_t = 120)]
    pub minutes: u64,

    /// Simulation start (RFC 3339); defaults to now
    #[arg(long)]
    pub start: Option<DateTime<Utc>>,

    /// Seed for the outcome generator
    #[arg(long, default_value_t = 7)]
    pub seed: u64,

    /// Share of dials that get answered
    #[arg(long, default_value_t = 0.6, value_parser = parse_rate)]
    pub answer_rate: f64,

    /// Share of answered calls that book
    #[arg(long, default_value_t = 0.25, value_parser = parse_rate)]
    pub booking_rate: f64,

    /// Write the call records to this CSV file
    #[arg(long)]
    pub export: Option<PathBuf>,

    /// Print notices as they happen
    #[arg(short, long)]
    pub verbose: bool,

    /// Print the final report as JSON
    #[arg(long)]
    pub json: bool,
}

/// A probability between 0 and 1
fn parse_rate(raw: &str) -> std::result::Result<f64, String> {
    let rate: f64 = raw.parse().map_err(|e| format!("{}", e))?;
    if rate.is_finite() && (0.0..=1.0).contains(&rate) {
        Ok(rate)
    } else {
        Err(format!("{} is not between 0 and 1", raw))
    }
}

pub fn execute(args: SimulateArgs) -> Result<()> {
    let config = EngineConfig::load(args.config.as_deref())?;
    let leads = leads::load_or_generate(args.leads.as_deref(), args.synthetic)?;
    let start = args.start.unwrap_or_else(Utc::now);

    let clock = ManualClock::new(start);
    let ticker = ManualTicker::new(clock.clone());
    let provider = RandomOutcomeProvider::new(args.seed).with_rates(args.answer_rate, args.booking_rate);
    let mut plane = CallEngineBuilder::new()
        .with_config(config)
        .with_clock(Arc::new(clock.clone()))
        .with_ticker(Arc::new(ticker.clone()))
        .with_outcome_provider(provider)
        .build_control_plane()?;
    let mut notices = plane.subscribe();

    info!(leads = leads.len(), minutes = args.minutes, %start, "starting simulation");
    plane.enqueue_leads(leads);

    let tick = Duration::from_millis(plane.config().timing.tick_interval_ms);
    let end = start + chrono::Duration::minutes(args.minutes as i64);
    while clock.now() < end {
        plane.dispatch();
        ticker.advance(tick);
        plane.pump();

        while let Ok(notice) = notices.try_recv() {
            if args.json {
                continue;
            }
            if let Some(line) = report::notice_line(&notice, args.verbose) {
                println!("{}  {}", clock.now().format("%H:%M:%S"), line);
            }
        }

        let queue = plane.queue_snapshot();
        if queue.pending.is_empty() && queue.calling.is_empty() {
            info!(at = %clock.now(), "queue drained");
            break;
        }
    }

    // calls still running at the end count as dropped
    plane.shutdown();

    let hours = &plane.config().operating_hours;
    let mut days = Vec::new();
    let mut date = hours.local_date(start);
    let last = hours.local_date(clock.now());
    while date <= last {
        days.push(plane.daily_summary(Some(date)));
        date = match date.checked_add_days(Days::new(1)) {
            Some(next) => next,
            None => break,
        };
    }

    if let Some(path) = &args.export {
        std::fs::write(path, plane.export_csv())
            .with_context(|| format!("cannot write call records to {}", path.display()))?;
        info!(path = %path.display(), records = plane.records().len(), "call records exported");
    }

    let queue = plane.queue_snapshot();
    let usage = plane.usage_snapshot();
    let pacer = plane.pacer_status();

    if args.json {
        let report = serde_json::json!({
            "started_at": start,
            "ended_at": clock.now(),
            "queue": queue,
            "usage": usage,
            "pacing": pacer,
            "days": days,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        report::print_queue(&queue);
        report::print_pacer(&pacer);
        report::print_usage(&usage);
        for day in days.iter().filter(|d| d.total_calls > 0) {
            report::print_summary(day);
        }
    }
    Ok(())
}
