use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;

use super::{validate_interval, Tick, TickCallback, Ticker, TickerHandle};
use crate::clock::{Clock, ManualClock};
use crate::errors::{InfraError, Result};

/// Virtual-time ticker
///
/// Nothing fires until [`advance`](ManualTicker::advance) is called. Due ticks
/// are delivered one at a time in due-time order (ties by subscription id) and
/// the shared [`ManualClock`] is moved to each tick's due instant before its
/// callback runs, so consumers reading the clock see consistent time.
#[derive(Clone)]
pub struct ManualTicker {
    clock: ManualClock,
    state: Arc<Mutex<ManualState>>,
}

#[derive(Default)]
struct ManualState {
    next_id: u64,
    subscriptions: BTreeMap<u64, Subscription>,
}

struct Subscription {
    period: ChronoDuration,
    next_due: DateTime<Utc>,
    seq: u64,
    on_tick: TickCallback,
}

impl ManualTicker {
    /// Create a ticker driving `clock`
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            state: Arc::new(Mutex::new(ManualState {
                next_id: 1,
                subscriptions: BTreeMap::new(),
            })),
        }
    }

    /// The clock this ticker moves
    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Number of live subscriptions
    pub fn active_subscriptions(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    /// Advance virtual time by `by`, delivering every tick that falls due.
    ///
    /// Returns the number of ticks delivered.
    pub fn advance(&self, by: Duration) -> usize {
        let by = ChronoDuration::from_std(by).unwrap_or_else(|_| ChronoDuration::zero());
        let target = self.clock.now() + by;
        let mut delivered = 0;

        loop {
            let next = {
                let mut state = self.state.lock();
                let due = state
                    .subscriptions
                    .iter()
                    .filter(|(_, sub)| sub.next_due <= target)
                    .min_by_key(|(id, sub)| (sub.next_due, **id))
                    .map(|(id, _)| *id);

                due.and_then(|id| state.subscriptions.get_mut(&id)).map(|sub| {
                    let at = sub.next_due;
                    sub.seq += 1;
                    sub.next_due = at + sub.period;
                    (Tick { seq: sub.seq, at }, sub.on_tick.clone())
                })
            };

            let Some((tick, on_tick)) = next else { break };
            self.clock.set(tick.at);
            on_tick(tick);
            delivered += 1;
        }

        self.clock.set(target);
        delivered
    }
}

impl fmt::Debug for ManualTicker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualTicker")
            .field("now", &self.clock.now())
            .field("subscriptions", &self.active_subscriptions())
            .finish()
    }
}

impl Ticker for ManualTicker {
    fn start(&self, period: Duration, on_tick: TickCallback) -> Result<TickerHandle> {
        validate_interval(period)?;
        let period = ChronoDuration::from_std(period)
            .map_err(|e| InfraError::Ticker(format!("tick interval out of range: {}", e)))?;

        let id = {
            let mut state = self.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.subscriptions.insert(
                id,
                Subscription {
                    period,
                    next_due: self.clock.now() + period,
                    seq: 0,
                    on_tick,
                },
            );
            id
        };

        let state: Weak<Mutex<ManualState>> = Arc::downgrade(&self.state);
        Ok(TickerHandle::new(id, move || {
            if let Some(state) = state.upgrade() {
                state.lock().subscriptions.remove(&id);
            }
        }))
    }
}
