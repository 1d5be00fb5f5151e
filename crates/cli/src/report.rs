//! Plain-text rendering of engine read models

use outdial_call_engine::prelude::{DailySummary, EngineNotice, PacerStatus, QueueSnapshot, UsageSnapshot};

pub fn print_queue(queue: &QueueSnapshot) {
    let (pending, calling, completed, failed) = queue.counts();
    println!("\n═══ Queue ═══");
    println!("pending {}  calling {}  completed {}  failed {}", pending, calling, completed, failed);
}

pub fn print_usage(usage: &UsageSnapshot) {
    println!("\n═══ Usage ═══");
    println!(
        "{:.1}% of {} minutes used ({:.1} consumed, {:.1} remaining)",
        usage.percentage_used, usage.entitlement_minutes, usage.consumed_minutes, usage.remaining_minutes
    );
    for alert in &usage.alerts {
        println!("  [{:?}] {}", alert.severity, alert.message);
    }
}

pub fn print_pacer(status: &PacerStatus) {
    println!("\n═══ Pacing ═══");
    println!(
        "{} of {} lines busy, {} starts in the last hour (limit {}), {} of {} today",
        status.active_sessions,
        status.concurrent_limit,
        status.starts_last_hour,
        status.effective_calls_per_hour,
        status.starts_today,
        status.daily_limit
    );
    if status.throttled {
        println!("  adaptive throttle engaged");
    }
}

pub fn print_summary(summary: &DailySummary) {
    println!("\n═══ {} ═══", summary.date);
    println!(
        "{} calls, {} successful, {} failed, {} booked",
        summary.total_calls, summary.successful_calls, summary.failed_calls, summary.booked_calls
    );
    println!(
        "connection {:.1}%  conversion {:.1}%  average {:.0}s",
        summary.connection_rate * 100.0,
        summary.conversion_rate * 100.0,
        summary.average_duration_seconds
    );
    for bucket in summary.calls_by_hour.iter().filter(|b| b.calls > 0) {
        println!("  {:02}:00  {:>3} calls  {:>5}s", bucket.hour, bucket.calls, bucket.duration_seconds);
    }
    for failure in &summary.top_failure_reasons {
        println!("  {:<18} {}", failure.reason, failure.count);
    }
}

/// One line per notice; transcript and connect chatter only when verbose
pub fn notice_line(notice: &EngineNotice, verbose: bool) -> Option<String> {
    let line = match notice {
        EngineNotice::SessionAdmitted { lead_name, phone, .. } => format!("dialing {} ({})", lead_name, phone),
        EngineNotice::SessionConnected { session_id } if verbose => format!("{} connected", session_id),
        EngineNotice::TranscriptAppended { session_id, entry } if verbose => {
            format!("{} [{:?}] {}", session_id, entry.speaker, entry.text)
        }
        EngineNotice::SessionEnded {
            outcome,
            duration_seconds,
            ..
        } => format!("call ended: {} after {}s", outcome, duration_seconds),
        EngineNotice::RetryScheduled { call_id, attempts, at, .. } => {
            format!("{} failed attempt {}, retry at {}", call_id, attempts, at.format("%H:%M"))
        }
        EngineNotice::CallFailed { call_id, message, .. } => format!("{}: {}", call_id, message),
        EngineNotice::UsageAlert { alert } => format!("usage alert: {}", alert.message),
        EngineNotice::AdmissionPaused { message, .. } => format!("paused: {}", message),
        EngineNotice::ThrottleChanged {
            throttled,
            success_ratio,
        } => format!(
            "adaptive throttle {} (success ratio {:.2})",
            if *throttled { "engaged" } else { "released" },
            success_ratio
        ),
        _ => return None,
    };
    Some(line)
}
