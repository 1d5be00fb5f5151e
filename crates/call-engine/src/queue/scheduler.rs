use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use super::types::{CallId, CallStatus, Lead, Priority, QueueSnapshot, QueueTransition, QueuedCall};
use crate::config::RateConfig;
use crate::error::{CallEngineError, Result};
use crate::outcome::CallOutcome;

/// Position of a pending entry in dequeue order
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct PendingKey {
    priority: Priority,
    scheduled_time: DateTime<Utc>,
    seq: u64,
    id: CallId,
}

impl PendingKey {
    fn of(call: &QueuedCall) -> Self {
        Self {
            priority: call.priority,
            scheduled_time: call.scheduled_time,
            seq: call.seq,
            id: call.id.clone(),
        }
    }
}

/// Priority queue with retry scheduling
///
/// Entries are stored once and the `status` field is the partition. Only the
/// scheduler's methods change it, each in a single step.
#[derive(Debug)]
pub struct QueueScheduler {
    entries: HashMap<CallId, QueuedCall>,
    pending: BTreeSet<PendingKey>,
    next_seq: u64,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl QueueScheduler {
    pub fn new(rate: &RateConfig) -> Self {
        Self {
            entries: HashMap::new(),
            pending: BTreeSet::new(),
            next_seq: 1,
            retry_attempts: rate.retry_attempts,
            retry_delay: Duration::minutes(i64::from(rate.retry_delay_minutes)),
        }
    }

    /// Pick up a new retry policy; applies to future failures only
    pub fn update_policy(&mut self, rate: &RateConfig) {
        self.retry_attempts = rate.retry_attempts;
        self.retry_delay = Duration::minutes(i64::from(rate.retry_delay_minutes));
    }

    /// Add a lead as pending, dialable from `now`
    pub fn enqueue(&mut self, lead: Lead, now: DateTime<Utc>) -> CallId {
        let call = QueuedCall::new(lead, now, self.next_seq);
        self.next_seq += 1;

        let id = call.id.clone();
        debug!(call_id = %id, priority = ?call.priority, "lead enqueued");
        self.pending.insert(PendingKey::of(&call));
        self.entries.insert(id.clone(), call);
        id
    }

    /// Move the best ready pending entry to calling
    pub fn dequeue_next(&mut self, now: DateTime<Utc>) -> Option<QueuedCall> {
        self.dequeue_next_excluding(now, &HashSet::new())
    }

    /// As [`dequeue_next`](Self::dequeue_next), skipping entries in `skip`
    pub fn dequeue_next_excluding(
        &mut self,
        now: DateTime<Utc>,
        skip: &HashSet<CallId>,
    ) -> Option<QueuedCall> {
        let key = self
            .pending
            .iter()
            .find(|key| key.scheduled_time <= now && !skip.contains(&key.id))
            .cloned()?;
        self.pending.remove(&key);

        let call = self.entries.get_mut(&key.id)?;
        call.status = CallStatus::Calling;
        Some(call.clone())
    }

    /// Return a calling entry to pending at its original position
    pub fn defer(&mut self, id: &CallId) -> Result<()> {
        let call = self.calling_entry(id)?;
        call.status = CallStatus::Pending;
        let key = PendingKey::of(call);
        self.pending.insert(key);
        Ok(())
    }

    /// Apply the outcome of a calling entry's attempt
    pub fn report_outcome(
        &mut self,
        id: &CallId,
        outcome: &CallOutcome,
        now: DateTime<Utc>,
    ) -> Result<QueueTransition> {
        let retry_attempts = self.retry_attempts;
        let retry_delay = self.retry_delay;
        let call = self.calling_entry(id)?;
        call.last_outcome = Some(outcome.clone());

        if outcome.is_success() {
            call.status = CallStatus::Completed;
            info!(call_id = %id, outcome = %outcome, "call completed");
            return Ok(QueueTransition::Completed);
        }

        // capped so a lowered policy can never leave attempts above it
        call.attempts = (call.attempts + 1).min(retry_attempts.max(1));
        if call.attempts < retry_attempts {
            let at = now + retry_delay;
            call.status = CallStatus::Pending;
            call.scheduled_time = at;
            let attempts = call.attempts;
            let key = PendingKey::of(call);
            self.pending.insert(key);
            info!(call_id = %id, attempts, retry_at = %at, outcome = %outcome, "retry scheduled");
            Ok(QueueTransition::RetryScheduled { attempts, at })
        } else {
            call.status = CallStatus::Failed;
            warn!(call_id = %id, attempts = call.attempts, outcome = %outcome, "retries exhausted");
            Ok(QueueTransition::Exhausted {
                attempts: call.attempts,
            })
        }
    }

    /// Drop a pending entry
    pub fn remove(&mut self, id: &CallId) -> Result<QueuedCall> {
        let status = self
            .entries
            .get(id)
            .map(|call| call.status)
            .ok_or_else(|| CallEngineError::CallNotFound(id.clone()))?;
        if status != CallStatus::Pending {
            return Err(CallEngineError::internal(format!(
                "cannot remove call {} while {:?}",
                id, status
            )));
        }

        let call = self
            .entries
            .remove(id)
            .ok_or_else(|| CallEngineError::CallNotFound(id.clone()))?;
        self.pending.remove(&PendingKey::of(&call));
        Ok(call)
    }

    pub fn get(&self, id: &CallId) -> Option<&QueuedCall> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn count(&self, status: CallStatus) -> usize {
        self.entries.values().filter(|call| call.status == status).count()
    }

    /// Earliest scheduled time among pending entries
    pub fn next_ready_at(&self) -> Option<DateTime<Utc>> {
        self.pending.iter().map(|key| key.scheduled_time).min()
    }

    /// Pending entries in dequeue order, ready or not
    pub fn pending_ids(&self) -> Vec<CallId> {
        self.pending.iter().map(|key| key.id.clone()).collect()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let pending = self
            .pending
            .iter()
            .filter_map(|key| self.entries.get(&key.id).cloned())
            .collect();

        let mut snapshot = QueueSnapshot {
            pending,
            ..QueueSnapshot::default()
        };
        let mut rest: Vec<&QueuedCall> = self
            .entries
            .values()
            .filter(|call| call.status != CallStatus::Pending)
            .collect();
        rest.sort_by_key(|call| call.seq);
        for call in rest {
            match call.status {
                CallStatus::Calling => snapshot.calling.push(call.clone()),
                CallStatus::Completed => snapshot.completed.push(call.clone()),
                CallStatus::Failed => snapshot.failed.push(call.clone()),
                CallStatus::Pending => {}
            }
        }
        snapshot
    }

    fn calling_entry(&mut self, id: &CallId) -> Result<&mut QueuedCall> {
        let call = self
            .entries
            .get_mut(id)
            .ok_or_else(|| CallEngineError::CallNotFound(id.clone()))?;
        if call.status != CallStatus::Calling {
            return Err(CallEngineError::internal(format!(
                "call {} is {:?}, not calling",
                id, call.status
            )));
        }
        Ok(call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{Disposition, FailureReason};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap()
    }

    fn rate(retry_attempts: u32) -> RateConfig {
        RateConfig {
            retry_attempts,
            retry_delay_minutes: 30,
            ..RateConfig::default()
        }
    }

    fn lead(name: &str, priority: Priority) -> Lead {
        Lead::new(name, format!("555-{}", name.len()), priority)
    }

    fn no_answer() -> CallOutcome {
        CallOutcome::Failure(FailureReason::NoAnswer)
    }

    #[test]
    fn test_priority_then_time_then_insertion() {
        let mut queue = QueueScheduler::new(&rate(3));
        let low = queue.enqueue(lead("low", Priority::Low), now());
        let med_a = queue.enqueue(lead("med-a", Priority::Medium), now());
        let high = queue.enqueue(lead("high", Priority::High), now());
        let med_b = queue.enqueue(lead("med-b", Priority::Medium), now());

        let order: Vec<_> = std::iter::from_fn(|| queue.dequeue_next(now()).map(|c| c.id)).collect();
        assert_eq!(order, vec![high, med_a, med_b, low]);
    }

    #[test]
    fn test_future_entries_not_ready() {
        let mut queue = QueueScheduler::new(&rate(3));
        let id = queue.enqueue(lead("later", Priority::High), now() + Duration::minutes(5));
        assert!(queue.dequeue_next(now()).is_none());
        assert_eq!(queue.dequeue_next(now() + Duration::minutes(5)).map(|c| c.id), Some(id));
    }

    #[test]
    fn test_defer_restores_position() {
        let mut queue = QueueScheduler::new(&rate(3));
        let first = queue.enqueue(lead("first", Priority::Medium), now());
        let _second = queue.enqueue(lead("second", Priority::Medium), now());

        let call = queue.dequeue_next(now()).unwrap();
        queue.defer(&call.id).unwrap();
        assert_eq!(queue.dequeue_next(now()).map(|c| c.id), Some(first));
    }

    #[test]
    fn test_failure_reschedules_with_delay() {
        let mut queue = QueueScheduler::new(&rate(3));
        let id = queue.enqueue(lead("retry", Priority::High), now());
        queue.dequeue_next(now()).unwrap();

        let transition = queue.report_outcome(&id, &no_answer(), now()).unwrap();
        assert_eq!(
            transition,
            QueueTransition::RetryScheduled {
                attempts: 1,
                at: now() + Duration::minutes(30)
            }
        );
        let entry = queue.get(&id).unwrap();
        assert_eq!(entry.status, CallStatus::Pending);
        assert_eq!(entry.priority, Priority::High);
        assert!(queue.dequeue_next(now() + Duration::minutes(29)).is_none());
    }

    #[test]
    fn test_retry_cap_is_terminal() {
        let mut queue = QueueScheduler::new(&rate(2));
        let id = queue.enqueue(lead("doomed", Priority::Low), now());
        let mut t = now();

        queue.dequeue_next(t).unwrap();
        queue.report_outcome(&id, &no_answer(), t).unwrap();
        t += Duration::minutes(30);
        queue.dequeue_next(t).unwrap();
        let transition = queue.report_outcome(&id, &no_answer(), t).unwrap();

        assert_eq!(transition, QueueTransition::Exhausted { attempts: 2 });
        assert_eq!(queue.get(&id).unwrap().status, CallStatus::Failed);
        assert!(queue.dequeue_next(t + Duration::days(1)).is_none());
    }

    #[test]
    fn test_success_is_terminal() {
        let mut queue = QueueScheduler::new(&rate(3));
        let id = queue.enqueue(lead("won", Priority::Medium), now());
        queue.dequeue_next(now()).unwrap();
        let transition = queue
            .report_outcome(&id, &CallOutcome::Success(Disposition::Booked), now())
            .unwrap();
        assert_eq!(transition, QueueTransition::Completed);
        assert_eq!(queue.count(CallStatus::Completed), 1);
        assert!(queue.report_outcome(&id, &no_answer(), now()).is_err());
    }

    #[test]
    fn test_remove_only_pending() {
        let mut queue = QueueScheduler::new(&rate(3));
        let a = queue.enqueue(lead("a", Priority::Medium), now());
        let b = queue.enqueue(lead("bb", Priority::Medium), now());
        queue.dequeue_next(now()).unwrap();

        assert!(queue.remove(&a).is_err());
        assert_eq!(queue.remove(&b).unwrap().lead_name, "bb");
        assert_eq!(queue.pending_len(), 0);
        assert!(matches!(queue.remove(&b), Err(CallEngineError::CallNotFound(_))));
    }

    #[test]
    fn test_snapshot_partitions_cover_every_entry() {
        let mut queue = QueueScheduler::new(&rate(1));
        let done = queue.enqueue(lead("done", Priority::High), now());
        let failed = queue.enqueue(lead("failed", Priority::High), now());
        queue.enqueue(lead("calling", Priority::Medium), now());
        queue.enqueue(lead("waiting", Priority::Low), now());

        queue.dequeue_next(now()).unwrap();
        queue.dequeue_next(now()).unwrap();
        queue.dequeue_next(now()).unwrap();
        queue
            .report_outcome(&done, &CallOutcome::Success(Disposition::Interested), now())
            .unwrap();
        queue.report_outcome(&failed, &no_answer(), now()).unwrap();

        let snapshot = queue.snapshot();
        assert_eq!(snapshot.counts(), (1, 1, 1, 1));
        assert_eq!(snapshot.total(), queue.len());
    }

    #[test]
    fn test_excluding_skips_entries() {
        let mut queue = QueueScheduler::new(&rate(3));
        let blocked = queue.enqueue(lead("blocked", Priority::High), now());
        let next = queue.enqueue(lead("next", Priority::Low), now());

        let skip: HashSet<CallId> = [blocked.clone()].into_iter().collect();
        assert_eq!(queue.dequeue_next_excluding(now(), &skip).map(|c| c.id), Some(next));
        assert_eq!(queue.get(&blocked).unwrap().status, CallStatus::Pending);
    }
}
