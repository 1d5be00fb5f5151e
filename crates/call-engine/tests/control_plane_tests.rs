//! End-to-end scenarios for the control plane on virtual time

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use outdial_call_engine::prelude::*;
use outdial_infra_common::{Clock, ManualClock, ManualTicker};
use tokio::sync::broadcast;

/// Monday, inside default business hours
fn monday_morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap()
}

struct Harness {
    clock: ManualClock,
    ticker: ManualTicker,
    plane: ControlPlane,
    notices: broadcast::Receiver<EngineNotice>,
}

impl Harness {
    fn new(config: EngineConfig, provider: ScriptedOutcomeProvider) -> Self {
        Self::with_dnc(config, provider, InMemoryDncList::new())
    }

    fn with_dnc(config: EngineConfig, provider: ScriptedOutcomeProvider, dnc: InMemoryDncList) -> Self {
        Self::at(monday_morning(), config, provider, dnc)
    }

    fn at(
        start: DateTime<Utc>,
        config: EngineConfig,
        provider: ScriptedOutcomeProvider,
        dnc: InMemoryDncList,
    ) -> Self {
        let clock = ManualClock::new(start);
        let ticker = ManualTicker::new(clock.clone());
        let plane = ControlPlane::new(
            config,
            Arc::new(clock.clone()),
            Arc::new(ticker.clone()),
            Box::new(provider),
            Arc::new(dnc),
        )
        .unwrap();
        let notices = plane.subscribe();
        Self {
            clock,
            ticker,
            plane,
            notices,
        }
    }

    /// Advance one second at a time, applying ticks after each
    fn step(&mut self, seconds: u64) {
        for _ in 0..seconds {
            self.ticker.advance(Duration::from_secs(1));
            self.plane.pump();
        }
    }

    fn drain(&mut self) -> Vec<EngineNotice> {
        let mut out = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            out.push(notice);
        }
        out
    }

    fn admitted_names(notices: &[EngineNotice]) -> Vec<String> {
        notices
            .iter()
            .filter_map(|n| match n {
                EngineNotice::SessionAdmitted { lead_name, .. } => Some(lead_name.clone()),
                _ => None,
            })
            .collect()
    }
}

fn config_with_rate(rate: RateConfig) -> EngineConfig {
    EngineConfig {
        rate,
        ..EngineConfig::default()
    }
}

fn long_calls() -> ScriptedOutcomeProvider {
    ScriptedOutcomeProvider::new(CallPlan::answered(1, 600, Disposition::Interested))
}

#[test]
fn test_concurrency_cap_then_high_priority_admitted_on_release() {
    let mut h = Harness::new(
        config_with_rate(RateConfig {
            concurrent_calls: 2,
            ..RateConfig::default()
        }),
        long_calls(),
    );

    h.plane.enqueue_lead(Lead::new("Low", "555-0003", Priority::Low));
    h.plane.enqueue_lead(Lead::new("Medium", "555-0002", Priority::Medium));
    let first_two = h.plane.dispatch();
    assert_eq!(first_two.len(), 2);

    // arrives last, but outranks everything still waiting
    h.plane.enqueue_lead(Lead::new("Late Low", "555-0004", Priority::Low));
    h.plane.enqueue_lead(Lead::new("High", "555-0001", Priority::High));
    h.drain();

    assert!(h.plane.dispatch().is_empty());
    let notices = h.drain();
    assert!(notices.iter().any(|n| matches!(
        n,
        EngineNotice::AdmissionPaused {
            reason: RejectReason::ConcurrencyLimitReached,
            ..
        }
    )));
    assert_eq!(h.plane.queue_snapshot().pending.len(), 2);

    h.step(3);
    assert_eq!(h.plane.pacer_status().active_sessions, 2);

    h.plane.end_call(&first_two[0], None, None).unwrap();
    let notices = h.drain();
    assert_eq!(Harness::admitted_names(&notices), vec!["High".to_string()]);
    assert_eq!(h.plane.pacer_status().active_sessions, 2);
}

#[test]
fn test_hold_for_thirty_ticks_pauses_time_and_transcript() {
    let plan = CallPlan::answered(1, 600, Disposition::Booked).with_script(vec![
        ScriptLine::new(1, Speaker::Agent, "Hello, is this Ada?"),
        ScriptLine::new(5, Speaker::Lead, "Speaking."),
    ]);
    let mut h = Harness::new(EngineConfig::default(), ScriptedOutcomeProvider::new(plan));
    h.plane.enqueue_lead(Lead::new("Ada", "555-0100", Priority::High));
    let session = h.plane.dispatch().remove(0);

    // one ringing tick, then four connected seconds
    h.step(5);
    let before = h.plane.session_snapshot(&session).unwrap();
    assert_eq!(before.elapsed_seconds, 4);
    assert_eq!(before.transcript.len(), 1);

    assert!(h.plane.hold(&session).unwrap());
    h.step(30);
    let held = h.plane.session_snapshot(&session).unwrap();
    assert_eq!(held.phase, CallPhase::Holding);
    assert_eq!(held.elapsed_seconds, 4);
    assert_eq!(held.transcript.len(), 1);
    assert!((h.plane.usage_snapshot().active_session_minutes - 4.0 / 60.0).abs() < 1e-9);

    assert!(!h.plane.hold(&session).unwrap());
    h.step(1);
    let resumed = h.plane.session_snapshot(&session).unwrap();
    assert_eq!(resumed.elapsed_seconds, 5);
    assert_eq!(resumed.transcript.len(), 2);
    assert_eq!(resumed.transcript[1].text, "Speaking.");
}

#[test]
fn test_end_twice_emits_one_result() {
    let mut h = Harness::new(EngineConfig::default(), long_calls());
    h.plane.enqueue_lead(Lead::new("Bob", "555-0200", Priority::Medium));
    let session = h.plane.dispatch().remove(0);
    h.step(10);
    h.drain();

    let result = h
        .plane
        .end_call(&session, Some(Disposition::Callback), Some("Call back Friday".into()))
        .unwrap()
        .unwrap();
    assert_eq!(result.duration_seconds, 9);
    let second = h.plane.end_call(&session, Some(Disposition::Callback), None).unwrap();
    assert!(second.is_none());

    let ended = h
        .drain()
        .into_iter()
        .filter(|n| matches!(n, EngineNotice::SessionEnded { .. }))
        .count();
    assert_eq!(ended, 1);
    assert_eq!(h.plane.records().len(), 1);
    assert_eq!(h.plane.daily_summary(None).total_calls, 1);
    assert!(matches!(h.plane.mute(&session), Err(CallEngineError::SessionClosed { .. })));
}

#[test]
fn test_usage_warning_raised_once_at_crossing() {
    let config = EngineConfig {
        usage: UsageConfig {
            total_minutes_entitlement: 1000,
            minutes_consumed_historical: 740,
            ..UsageConfig::default()
        },
        ..EngineConfig::default()
    };
    let mut h = Harness::new(
        config,
        ScriptedOutcomeProvider::new(CallPlan::answered(1, 660, Disposition::Booked)),
    );
    h.plane.enqueue_lead(Lead::new("Meter", "555-0300", Priority::High));
    h.plane.dispatch();

    let alerts = |notices: &[EngineNotice]| {
        notices
            .iter()
            .filter(|n| matches!(n, EngineNotice::UsageAlert { .. }))
            .count()
    };

    // ringing tick, then 599 accrued seconds
    h.step(600);
    assert_eq!(alerts(&h.drain()), 0);
    assert!((h.plane.usage_snapshot().percentage_used - 74.9983).abs() < 1e-3);

    h.step(1);
    let notices = h.drain();
    assert_eq!(alerts(&notices), 1);
    assert!(notices.iter().any(|n| matches!(
        n,
        EngineNotice::UsageAlert { alert } if alert.severity == AlertSeverity::Warning
    )));

    h.step(60);
    assert_eq!(alerts(&h.drain()), 0);
    let usage = h.plane.usage_snapshot();
    assert!((usage.percentage_used - 75.1).abs() < 1e-9);
    assert_eq!(usage.alerts.len(), 1);
    // the call ended at 660 seconds and its time moved to historical
    assert_eq!(usage.active_sessions, 0);
}

#[test]
fn test_failed_call_retried_then_exhausted() {
    let mut h = Harness::new(
        config_with_rate(RateConfig {
            retry_attempts: 2,
            retry_delay_minutes: 30,
            ..RateConfig::default()
        }),
        ScriptedOutcomeProvider::new(CallPlan::unanswered(2, FailureReason::NoAnswer)),
    );
    let call_id = h.plane.enqueue_lead(Lead::new("Nobody", "555-0400", Priority::Medium));
    h.plane.dispatch();
    h.step(2);

    let notices = h.drain();
    assert!(notices
        .iter()
        .any(|n| matches!(n, EngineNotice::RetryScheduled { attempts: 1, .. })));
    assert_eq!(h.ticker.active_subscriptions(), 0);
    assert!(h.plane.dispatch().is_empty());

    h.ticker.advance(Duration::from_secs(30 * 60));
    assert_eq!(h.plane.dispatch().len(), 1);
    h.step(2);

    let notices = h.drain();
    assert!(notices
        .iter()
        .any(|n| matches!(n, EngineNotice::CallFailed { attempts: 2, .. })));
    let queue = h.plane.queue_snapshot();
    assert_eq!(queue.failed.len(), 1);
    assert_eq!(queue.failed[0].id, call_id);
    assert_eq!(queue.failed[0].attempts, 2);

    h.ticker.advance(Duration::from_secs(24 * 3600));
    assert!(h.plane.dispatch().is_empty());

    let summary = h.plane.daily_summary(Some(monday_morning().date_naive()));
    assert_eq!(summary.failed_calls, 2);
    assert_eq!(summary.top_failure_reasons[0].count, 2);
}

#[test]
fn test_dnc_lead_skipped_without_blocking_cycle() {
    let dnc: InMemoryDncList = ["555-0666"].into_iter().collect();
    let mut h = Harness::with_dnc(EngineConfig::default(), long_calls(), dnc);
    let blocked = h.plane.enqueue_lead(Lead::new("Blocked", "555-0666", Priority::High));
    h.plane.enqueue_lead(Lead::new("Allowed", "555-0667", Priority::Low));

    assert_eq!(h.plane.dispatch().len(), 1);
    assert_eq!(Harness::admitted_names(&h.drain()), vec!["Allowed".to_string()]);

    let pending = h.plane.queue_snapshot().pending;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, blocked);
    assert_eq!(pending[0].status, CallStatus::Pending);
}

#[test]
fn test_outside_hours_pauses_admission() {
    let saturday = Utc.with_ymd_and_hms(2024, 6, 8, 11, 0, 0).unwrap();
    let mut h = Harness::at(saturday, EngineConfig::default(), long_calls(), InMemoryDncList::new());
    h.plane.enqueue_lead(Lead::new("Weekend", "555-0500", Priority::High));

    assert!(h.plane.dispatch().is_empty());
    let notices = h.drain();
    let paused: Vec<_> = notices
        .iter()
        .filter_map(|n| match n {
            EngineNotice::AdmissionPaused { reason, message } => Some((*reason, message.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(paused.len(), 1);
    assert_eq!(paused[0].0, RejectReason::OutsideOperatingHours);
    assert!(!paused[0].1.is_empty());

    // the same pause is not announced again
    h.plane.dispatch();
    assert!(h.drain().is_empty());
}

#[test]
fn test_inject_speech_only_while_connected() {
    let mut h = Harness::new(
        EngineConfig::default(),
        ScriptedOutcomeProvider::new(CallPlan::answered(3, 600, Disposition::Interested)),
    );
    h.plane.enqueue_lead(Lead::new("Sam", "555-0700", Priority::Medium));
    let session = h.plane.dispatch().remove(0);

    assert!(matches!(
        h.plane.inject_speech(&session, "too early"),
        Err(CallEngineError::InvalidTransition { from: CallPhase::Dialing, .. })
    ));

    h.step(3);
    let entry = h.plane.inject_speech(&session, "Mention the discount").unwrap();
    assert_eq!(entry.speaker, Speaker::Supervisor);
    let snapshot = h.plane.session_snapshot(&session).unwrap();
    assert_eq!(snapshot.transcript.last().map(|e| e.text.as_str()), Some("Mention the discount"));
}

#[test]
fn test_rate_config_hot_swap_between_cycles() {
    let mut h = Harness::new(
        config_with_rate(RateConfig {
            concurrent_calls: 1,
            ..RateConfig::default()
        }),
        long_calls(),
    );
    h.plane.enqueue_leads([
        Lead::new("One", "555-0801", Priority::Medium),
        Lead::new("Two", "555-0802", Priority::Medium),
    ]);
    assert_eq!(h.plane.dispatch().len(), 1);
    assert!(h.plane.dispatch().is_empty());

    h.plane
        .update_rate_config(RateConfig {
            concurrent_calls: 2,
            ..RateConfig::default()
        })
        .unwrap();
    assert_eq!(h.plane.dispatch().len(), 1);

    let bad = h.plane.update_rate_config(RateConfig {
        concurrent_calls: 0,
        ..RateConfig::default()
    });
    assert!(matches!(bad, Err(CallEngineError::Configuration(_))));
    assert_eq!(h.plane.config().rate.concurrent_calls, 2);
}

#[test]
fn test_full_config_swap_moves_hours_and_keeps_usage() {
    let mut h = Harness::new(EngineConfig::default(), long_calls());
    h.plane.enqueue_lead(Lead::new("Early", "555-0851", Priority::Medium));
    assert_eq!(h.plane.dispatch().len(), 1);
    h.drain();

    // 10:00 UTC on a June Monday is 06:00 in New York
    let mut next = EngineConfig::default();
    next.operating_hours.timezone = Some(chrono_tz::America::New_York);
    next.adaptive.throttle_factor = 0.25;
    next.usage.total_minutes_entitlement = 5;
    h.plane.update_config(next).unwrap();

    h.plane.enqueue_lead(Lead::new("Late", "555-0852", Priority::High));
    assert!(h.plane.dispatch().is_empty());
    let paused: Vec<_> = h
        .drain()
        .into_iter()
        .filter_map(|n| match n {
            EngineNotice::AdmissionPaused { reason, .. } => Some(reason),
            _ => None,
        })
        .collect();
    assert_eq!(paused, vec![RejectReason::OutsideOperatingHours]);
    assert_eq!(h.plane.config().adaptive.throttle_factor, 0.25);
    assert_eq!(h.plane.config().usage, UsageConfig::default());

    let mut bad = EngineConfig::default();
    bad.rate.concurrent_calls = 0;
    assert!(matches!(h.plane.update_config(bad), Err(CallEngineError::Configuration(_))));
    assert_eq!(h.plane.config().operating_hours.timezone, Some(chrono_tz::America::New_York));

    // 13:00 UTC is 09:00 EDT
    h.clock.set(Utc.with_ymd_and_hms(2024, 6, 3, 13, 0, 0).unwrap());
    assert_eq!(h.plane.dispatch().len(), 1);
}

#[test]
fn test_shutdown_ends_sessions_and_cancels_tickers() {
    let mut h = Harness::new(EngineConfig::default(), long_calls());
    h.plane.enqueue_leads([
        Lead::new("A", "555-0901", Priority::Medium),
        Lead::new("B", "555-0902", Priority::Medium),
    ]);
    h.plane.dispatch();
    h.step(5);
    assert_eq!(h.ticker.active_subscriptions(), 2);

    h.plane.shutdown();
    assert_eq!(h.ticker.active_subscriptions(), 0);
    assert_eq!(h.plane.records().len(), 2);
    assert!(h.plane.records().iter().all(|r| r.outcome == "Dropped"));
    assert!(h.plane.session_snapshots().is_empty());

    // ticks no longer reach anything and nothing new is admitted
    h.plane.enqueue_lead(Lead::new("C", "555-0903", Priority::High));
    h.step(5);
    assert!(h.plane.dispatch().is_empty());
    assert_eq!(h.plane.usage_snapshot().active_sessions, 0);
}

#[test]
fn test_export_after_calls() {
    let mut h = Harness::new(
        EngineConfig::default(),
        ScriptedOutcomeProvider::new(CallPlan::answered(1, 90, Disposition::Booked)),
    );
    h.plane.enqueue_lead(Lead::new("Ada \"The Countess\"", "555-1000", Priority::High));
    h.plane.dispatch();
    h.step(91);

    let csv = h.plane.export_csv();
    let lines: Vec<_> = csv.lines().collect();
    assert_eq!(lines[0], CSV_HEADER);
    assert_eq!(
        lines[1],
        "2024-06-03T10:00:01Z,\"Ada \"\"The Countess\"\"\",555-1000,1:30,Booked,0.20,\"\""
    );
    assert_eq!(h.clock.now(), monday_morning() + ChronoDuration::seconds(91));
}
