//! Check-config command - validate settings and show what the engine would use

use std::path::PathBuf;

use anyhow::Result;
use chrono::Weekday;
use clap::Args;
use outdial_call_engine::prelude::EngineConfig;

#[derive(Args, Debug)]
pub struct CheckConfigArgs {
    /// Engine settings file (TOML); defaults and environment only when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Print the effective configuration as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: CheckConfigArgs) -> Result<()> {
    let config = EngineConfig::load(args.config.as_deref())?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let rate = &config.rate;
    println!("configuration OK");
    println!(
        "pacing: {} calls/hour, {} concurrent, {} per day{}",
        rate.calls_per_hour,
        rate.concurrent_calls,
        rate.max_daily_limit,
        if rate.adaptive_rating { ", adaptive" } else { "" }
    );
    println!(
        "retries: {} attempts, {} minutes apart; DNC {}",
        rate.retry_attempts,
        rate.retry_delay_minutes,
        if rate.respect_dnc { "enforced" } else { "ignored" }
    );

    let hours = &config.operating_hours;
    println!("hours ({}):", hours.zone());
    for weekday in [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
        Weekday::Sun,
    ] {
        let day = hours.day(weekday);
        if day.enabled {
            println!("  {}  {} - {}", weekday, day.start.format("%H:%M"), day.end.format("%H:%M"));
        } else {
            println!("  {}  closed", weekday);
        }
    }

    let usage = &config.usage;
    println!(
        "plan: {} minutes, {} already used, alerts at {}",
        usage.total_minutes_entitlement,
        usage.minutes_consumed_historical,
        usage
            .alert_thresholds
            .iter()
            .map(|t| format!("{}%", t.percent))
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(())
}
