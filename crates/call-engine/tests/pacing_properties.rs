//! Property tests for the dialer's hard limits

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use outdial_call_engine::prelude::*;
use outdial_infra_common::{Clock, ManualClock, ManualTicker};
use proptest::prelude::*;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, 0).unwrap()
}

#[derive(Debug, Clone)]
enum UsageOp {
    Tick { slot: usize, repeat_seq: bool },
    End { slot: usize, extra_seconds: u64 },
}

fn usage_op() -> impl Strategy<Value = UsageOp> {
    prop_oneof![
        4 => (0usize..3, any::<bool>()).prop_map(|(slot, repeat_seq)| UsageOp::Tick { slot, repeat_seq }),
        1 => (0usize..3, 0u64..30).prop_map(|(slot, extra_seconds)| UsageOp::End { slot, extra_seconds }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_admissions_stay_within_concurrency_and_hourly_rate(
        calls_per_hour in 1u32..12,
        concurrent_calls in 1u32..4,
        leads in 1usize..20,
        adaptive in any::<bool>(),
        seed in any::<u64>(),
    ) {
        let config = EngineConfig {
            rate: RateConfig {
                calls_per_hour,
                concurrent_calls,
                retry_attempts: 2,
                retry_delay_minutes: 5,
                adaptive_rating: adaptive,
                ..RateConfig::default()
            },
            operating_hours: OperatingHours::always_open(),
            ..EngineConfig::default()
        };
        let clock = ManualClock::new(start());
        let ticker = ManualTicker::new(clock.clone());
        let mut plane = ControlPlane::new(
            config,
            Arc::new(clock.clone()),
            Arc::new(ticker.clone()),
            Box::new(RandomOutcomeProvider::new(seed)),
            Arc::new(InMemoryDncList::new()),
        )
        .unwrap();
        let mut notices = plane.subscribe();

        for i in 0..leads {
            plane.enqueue_lead(Lead::new(format!("Lead {}", i), format!("555-{:04}", i), Priority::Medium));
        }

        let mut admissions: Vec<DateTime<Utc>> = Vec::new();
        for _ in 0..(90 * 60) {
            ticker.advance(Duration::from_secs(1));
            plane.pump();
            plane.dispatch();

            prop_assert!(plane.pacer_status().active_sessions <= concurrent_calls as usize);
            while let Ok(notice) = notices.try_recv() {
                if matches!(notice, EngineNotice::SessionAdmitted { .. }) {
                    admissions.push(clock.now());
                }
            }
        }

        let window = ChronoDuration::minutes(60);
        for at in &admissions {
            let in_window = admissions
                .iter()
                .filter(|other| **other > *at - window && **other <= *at)
                .count();
            prop_assert!(in_window <= calls_per_hour as usize);
        }
    }

    #[test]
    fn prop_usage_never_decreases_within_period(ops in prop::collection::vec(usage_op(), 1..200)) {
        let config = UsageConfig {
            total_minutes_entitlement: 5,
            ..UsageConfig::default()
        };
        let now = start();
        let mut ledger = UsageLedger::new(&config, now);
        // each slot holds the current session and its last tick seq
        let mut slots: Vec<(SessionId, u64)> = (0..3).map(|_| (SessionId::new(), 0)).collect();
        let mut totals = vec![0u64; 3];
        let mut last_used = ledger.used_seconds();
        let mut raised = HashSet::new();

        for op in ops {
            let alerts = match op {
                UsageOp::Tick { slot, repeat_seq } => {
                    let (id, seq) = &mut slots[slot];
                    if !repeat_seq || *seq == 0 {
                        *seq += 1;
                        totals[slot] += 1;
                    }
                    ledger.record_tick(id, *seq, 1, now)
                }
                UsageOp::End { slot, extra_seconds } => {
                    let (id, _) = slots[slot].clone();
                    let alerts = ledger.record_session_end(&id, totals[slot] + extra_seconds, now);
                    slots[slot] = (SessionId::new(), 0);
                    totals[slot] = 0;
                    alerts
                }
            };

            let used = ledger.used_seconds();
            prop_assert!(used >= last_used);
            last_used = used;
            for alert in alerts {
                prop_assert!(raised.insert(alert.threshold_percent), "tier raised twice");
            }
        }
    }

    #[test]
    fn prop_failed_attempts_capped_by_retry_policy(
        retry_attempts in 1u32..6,
        outcomes in prop::collection::vec(any::<bool>(), 1..12),
    ) {
        let rate = RateConfig {
            retry_attempts,
            retry_delay_minutes: 1,
            ..RateConfig::default()
        };
        let mut queue = QueueScheduler::new(&rate);
        let mut now = start();
        let id = queue.enqueue(Lead::new("Retry", "555-0000", Priority::Low), now);
        let mut failures = 0u32;

        for success in outcomes {
            now += ChronoDuration::minutes(2);
            let Some(call) = queue.dequeue_next(now) else {
                let entry = queue.get(&id).unwrap();
                prop_assert!(matches!(entry.status, CallStatus::Completed | CallStatus::Failed));
                break;
            };
            let outcome = if success {
                CallOutcome::Success(Disposition::Interested)
            } else {
                failures += 1;
                CallOutcome::Failure(FailureReason::Busy)
            };

            match queue.report_outcome(&call.id, &outcome, now).unwrap() {
                QueueTransition::Completed => prop_assert!(success),
                QueueTransition::RetryScheduled { attempts, .. } => {
                    prop_assert_eq!(attempts, failures);
                    prop_assert!(attempts < retry_attempts);
                }
                QueueTransition::Exhausted { attempts } => {
                    prop_assert_eq!(attempts, retry_attempts);
                    prop_assert_eq!(failures, retry_attempts);
                }
            }
            prop_assert!(queue.get(&id).unwrap().attempts <= retry_attempts);
        }
    }
}
