use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{validate_interval, Tick, TickCallback, Ticker, TickerHandle};
use crate::clock::{Clock, SystemClock};
use crate::errors::{InfraError, Result};

/// Ticker backed by tokio timers
///
/// Each subscription runs in its own task. The callback runs while holding the
/// subscription's gate; stopping closes the gate under the same lock, which is
/// what makes stop synchronous with respect to delivery.
#[derive(Clone)]
pub struct TokioTicker {
    next_id: Arc<AtomicU64>,
    clock: Arc<dyn Clock>,
}

impl TokioTicker {
    /// Create a ticker stamping ticks with `clock`
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            next_id: Arc::new(AtomicU64::new(1)),
            clock,
        }
    }
}

impl Default for TokioTicker {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl fmt::Debug for TokioTicker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioTicker")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}

impl Ticker for TokioTicker {
    fn start(&self, period: Duration, on_tick: TickCallback) -> Result<TickerHandle> {
        validate_interval(period)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| InfraError::Ticker(format!("no tokio runtime available: {}", e)))?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();
        let gate = Arc::new(Mutex::new(true));

        let task_token = token.clone();
        let task_gate = gate.clone();
        let clock = self.clock.clone();

        runtime.spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut seq = 0u64;

            loop {
                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => break,
                    _ = interval.tick() => {
                        let open = task_gate.lock();
                        if !*open {
                            break;
                        }
                        seq += 1;
                        on_tick(Tick { seq, at: clock.now() });
                    }
                }
            }

            debug!(ticker_id = id, delivered = seq, "ticker task finished");
        });

        Ok(TickerHandle::new(id, move || {
            *gate.lock() = false;
            token.cancel();
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_callback() -> (Arc<AtomicUsize>, TickCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let sink = count.clone();
        (count, Arc::new(move |_tick: Tick| {
            sink.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_tick_per_interval() {
        let ticker = TokioTicker::default();
        let (count, callback) = counting_callback();
        let _handle = ticker.start(Duration::from_secs(1), callback).unwrap();

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ticks_after_stop() {
        let ticker = TokioTicker::default();
        let (count, callback) = counting_callback();
        let handle = ticker.start(Duration::from_secs(1), callback).unwrap();

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        ticker.stop(handle);
        let at_stop = count.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), at_stop);
        assert_eq!(at_stop, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_ticks() {
        let ticker = TokioTicker::default();
        let (count, callback) = counting_callback();
        let handle = ticker.start(Duration::from_secs(1), callback).unwrap();

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        drop(handle);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let ticker = TokioTicker::default();
        let (_count, callback) = counting_callback();
        assert!(ticker.start(Duration::ZERO, callback).is_err());
    }
}
