//! Call outcomes and the provider seam that decides them
//!
//! The engine never invents results on its own. Each admitted call asks a
//! [`CallOutcomeProvider`] for a [`CallPlan`]: how long it rings, whether it is
//! answered, how long the conversation lasts and how it ends. A telephony
//! integration implements the trait from real signalling; tests use
//! [`ScriptedOutcomeProvider`] and the simulator uses [`RandomOutcomeProvider`].

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::queue::QueuedCall;
use crate::session::{ScriptLine, Speaker};

/// How a connected call concluded
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Booked,
    Interested,
    Callback,
    NotInterested,
}

/// Why an attempt failed
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    NoAnswer,
    Busy,
    Voicemail,
    InvalidNumber,
    Dropped,
    OperatorAbort,
    Other(String),
}

impl FailureReason {
    pub fn label(&self) -> String {
        match self {
            FailureReason::NoAnswer => "No answer".to_string(),
            FailureReason::Busy => "Busy".to_string(),
            FailureReason::Voicemail => "Voicemail".to_string(),
            FailureReason::InvalidNumber => "Invalid number".to_string(),
            FailureReason::Dropped => "Dropped".to_string(),
            FailureReason::OperatorAbort => "Ended by operator".to_string(),
            FailureReason::Other(reason) => reason.clone(),
        }
    }
}

/// Terminal result of one attempt
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Success(Disposition),
    Failure(FailureReason),
}

impl CallOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success(_))
    }

    pub fn is_booked(&self) -> bool {
        matches!(self, CallOutcome::Success(Disposition::Booked))
    }

    pub fn failure_reason(&self) -> Option<&FailureReason> {
        match self {
            CallOutcome::Failure(reason) => Some(reason),
            CallOutcome::Success(_) => None,
        }
    }

    /// Human-readable outcome used by reports and the export
    pub fn label(&self) -> String {
        match self {
            CallOutcome::Success(Disposition::Booked) => "Booked".to_string(),
            CallOutcome::Success(Disposition::Interested) => "Interested".to_string(),
            CallOutcome::Success(Disposition::Callback) => "Callback".to_string(),
            CallOutcome::Success(Disposition::NotInterested) => "Not interested".to_string(),
            CallOutcome::Failure(reason) => reason.label(),
        }
    }
}

impl fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// How one dial attempt unfolds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallPlan {
    /// Ticks spent dialing before the far end answers or gives up
    pub ring_seconds: u32,
    /// Whether the far end answers
    pub answered: bool,
    /// Accrued seconds of conversation before the call ends
    pub talk_seconds: u64,
    /// Terminal outcome. Unanswered plans must carry a failure.
    pub outcome: CallOutcome,
    #[serde(default)]
    pub script: Vec<ScriptLine>,
}

impl CallPlan {
    /// Answered after `ring_seconds`, talks for `talk_seconds`
    pub fn answered(ring_seconds: u32, talk_seconds: u64, disposition: Disposition) -> Self {
        Self {
            ring_seconds,
            answered: true,
            talk_seconds,
            outcome: CallOutcome::Success(disposition),
            script: Vec::new(),
        }
    }

    /// Rings for `ring_seconds` then fails with `reason`
    pub fn unanswered(ring_seconds: u32, reason: FailureReason) -> Self {
        Self {
            ring_seconds,
            answered: false,
            talk_seconds: 0,
            outcome: CallOutcome::Failure(reason),
            script: Vec::new(),
        }
    }

    /// Connects, talks, then fails (e.g. the line drops)
    pub fn answered_then_failed(ring_seconds: u32, talk_seconds: u64, reason: FailureReason) -> Self {
        Self {
            ring_seconds,
            answered: true,
            talk_seconds,
            outcome: CallOutcome::Failure(reason),
            script: Vec::new(),
        }
    }

    pub fn with_script(mut self, script: Vec<ScriptLine>) -> Self {
        self.script = script;
        self
    }
}

/// Decides how each admitted call unfolds
pub trait CallOutcomeProvider: Send + fmt::Debug {
    fn plan(&self, call: &QueuedCall) -> CallPlan;
}

/// Deterministic provider: per-phone queues of plans, then a default
#[derive(Debug)]
pub struct ScriptedOutcomeProvider {
    default_plan: CallPlan,
    by_phone: Mutex<HashMap<String, Vec<CallPlan>>>,
}

impl ScriptedOutcomeProvider {
    pub fn new(default_plan: CallPlan) -> Self {
        Self {
            default_plan,
            by_phone: Mutex::new(HashMap::new()),
        }
    }

    /// Plans consumed in order by successive attempts on `phone`
    pub fn with_plans(self, phone: impl Into<String>, plans: Vec<CallPlan>) -> Self {
        self.by_phone.lock().insert(phone.into(), plans);
        self
    }
}

impl CallOutcomeProvider for ScriptedOutcomeProvider {
    fn plan(&self, call: &QueuedCall) -> CallPlan {
        let mut by_phone = self.by_phone.lock();
        match by_phone.get_mut(&call.phone_number) {
            Some(plans) if !plans.is_empty() => plans.remove(0),
            _ => self.default_plan.clone(),
        }
    }
}

/// Seeded random provider for the simulator
#[derive(Debug)]
pub struct RandomOutcomeProvider {
    rng: Mutex<SmallRng>,
    answer_rate: f64,
    booking_rate: f64,
}

impl RandomOutcomeProvider {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
            answer_rate: 0.6,
            booking_rate: 0.25,
        }
    }

    /// Rates are clamped to `0.0..=1.0`; a NaN or infinite rate keeps the
    /// current value.
    pub fn with_rates(mut self, answer_rate: f64, booking_rate: f64) -> Self {
        self.answer_rate = Self::probability(answer_rate, self.answer_rate, "answer_rate");
        self.booking_rate = Self::probability(booking_rate, self.booking_rate, "booking_rate");
        self
    }

    fn probability(value: f64, current: f64, name: &str) -> f64 {
        if value.is_finite() {
            value.clamp(0.0, 1.0)
        } else {
            warn!(rate = name, %value, "ignoring non-finite rate");
            current
        }
    }
}

impl CallOutcomeProvider for RandomOutcomeProvider {
    fn plan(&self, call: &QueuedCall) -> CallPlan {
        let mut rng = self.rng.lock();
        let ring_seconds = rng.gen_range(2..=8);

        if !rng.gen_bool(self.answer_rate) {
            let reason = match rng.gen_range(0..10) {
                0..=4 => FailureReason::NoAnswer,
                5..=6 => FailureReason::Busy,
                7..=8 => FailureReason::Voicemail,
                _ => FailureReason::InvalidNumber,
            };
            return CallPlan::unanswered(ring_seconds, reason);
        }

        let talk_seconds = rng.gen_range(20..=180);
        if rng.gen_bool(0.05) {
            return CallPlan::answered_then_failed(ring_seconds, talk_seconds / 4, FailureReason::Dropped);
        }

        let disposition = if rng.gen_bool(self.booking_rate) {
            Disposition::Booked
        } else {
            match rng.gen_range(0..3) {
                0 => Disposition::Interested,
                1 => Disposition::Callback,
                _ => Disposition::NotInterested,
            }
        };

        let first_name = call.lead_name.split_whitespace().next().unwrap_or("there");
        let script = vec![
            ScriptLine::new(1, Speaker::Agent, format!("Hi {}, thanks for picking up.", first_name)),
            ScriptLine::new(4, Speaker::Lead, "Sure, what is this about?"),
            ScriptLine::new(8, Speaker::Agent, "I'm calling about scheduling a quick demo."),
        ];
        CallPlan::answered(ring_seconds, talk_seconds, disposition).with_script(script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{Lead, Priority};
    use chrono::Utc;

    fn call(phone: &str) -> QueuedCall {
        QueuedCall::new(Lead::new("Grace Hopper", phone, Priority::Medium), Utc::now(), 1)
    }

    #[test]
    fn test_scripted_plans_consumed_in_order() {
        let provider = ScriptedOutcomeProvider::new(CallPlan::answered(1, 10, Disposition::Booked))
            .with_plans(
                "555-0001",
                vec![CallPlan::unanswered(3, FailureReason::Busy)],
            );

        let first = provider.plan(&call("555-0001"));
        let second = provider.plan(&call("555-0001"));
        assert_eq!(first.outcome, CallOutcome::Failure(FailureReason::Busy));
        assert!(second.outcome.is_booked());
    }

    #[test]
    fn test_random_provider_is_reproducible() {
        let a = RandomOutcomeProvider::new(42);
        let b = RandomOutcomeProvider::new(42);
        for _ in 0..20 {
            assert_eq!(a.plan(&call("555-0002")), b.plan(&call("555-0002")));
        }
    }

    #[test]
    fn test_unanswered_random_plans_are_failures() {
        let provider = RandomOutcomeProvider::new(7).with_rates(0.0, 0.5);
        for _ in 0..20 {
            let plan = provider.plan(&call("555-0003"));
            assert!(!plan.answered);
            assert!(!plan.outcome.is_success());
        }
    }

    #[test]
    fn test_non_finite_rates_keep_defaults() {
        let provider = RandomOutcomeProvider::new(3).with_rates(f64::NAN, f64::INFINITY);
        assert_eq!(provider.answer_rate, 0.6);
        assert_eq!(provider.booking_rate, 0.25);
        for _ in 0..20 {
            provider.plan(&call("555-0004"));
        }

        let clamped = RandomOutcomeProvider::new(3).with_rates(1.5, -0.2);
        assert_eq!(clamped.answer_rate, 1.0);
        assert_eq!(clamped.booking_rate, 0.0);
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(CallOutcome::Success(Disposition::NotInterested).label(), "Not interested");
        assert_eq!(
            CallOutcome::Failure(FailureReason::Other("Carrier error".into())).to_string(),
            "Carrier error"
        );
    }
}
