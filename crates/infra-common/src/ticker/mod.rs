//! # Cancellable periodic tickers
//!
//! A [`Ticker`] delivers one [`Tick`] per interval to a callback until the
//! subscription is stopped. Two guarantees matter to the rest of the system:
//!
//! 1. **Sequenced delivery** – every subscription numbers its ticks `1, 2, 3…`
//!    so consumers can drop duplicates and out-of-order deliveries.
//! 2. **Synchronous stop** – once [`Ticker::stop`] (or
//!    [`TickerHandle::cancel`], or dropping the handle) returns, the callback is
//!    never invoked again for that subscription. A callback that is already
//!    running finishes first; ticks that were due but not yet delivered are
//!    discarded.
//!
//! Callbacks must stay short and must not stop their own subscription (the
//! stop path waits for the running callback). In the control plane the callback
//! only forwards the tick into the engine's event queue.
//!
//! ## Implementations
//!
//! - [`TokioTicker`]: one tokio task per subscription, `tokio::time::interval`
//!   with [`MissedTickBehavior::Delay`](tokio::time::MissedTickBehavior::Delay)
//! - [`ManualTicker`]: virtual time for tests, advanced explicitly together with
//!   a [`ManualClock`](crate::clock::ManualClock)
//!
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use std::time::Duration;
//! use chrono::Utc;
//! use outdial_infra_common::{ManualClock, ManualTicker, Tick, Ticker};
//!
//! let clock = ManualClock::new(Utc::now());
//! let ticker = ManualTicker::new(clock.clone());
//! let seen = Arc::new(AtomicU64::new(0));
//! let sink = seen.clone();
//!
//! let handle = ticker
//!     .start(Duration::from_secs(1), Arc::new(move |tick: Tick| sink.store(tick.seq, Ordering::SeqCst)))
//!     .unwrap();
//! ticker.advance(Duration::from_secs(3));
//! assert_eq!(seen.load(Ordering::SeqCst), 3);
//!
//! ticker.stop(handle);
//! ticker.advance(Duration::from_secs(3));
//! assert_eq!(seen.load(Ordering::SeqCst), 3);
//! ```

mod manual;
mod tokio_ticker;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::errors::Result;

pub use manual::ManualTicker;
pub use tokio_ticker::TokioTicker;

/// One delivery of a periodic timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// Per-subscription sequence number, starting at 1
    pub seq: u64,
    /// Instant the tick was due
    pub at: DateTime<Utc>,
}

/// Callback invoked for each tick
pub type TickCallback = Arc<dyn Fn(Tick) + Send + Sync>;

/// Periodic timer source
pub trait Ticker: Send + Sync + fmt::Debug {
    /// Start delivering ticks every `interval`. The first tick is due one full
    /// interval after the call.
    fn start(&self, interval: Duration, on_tick: TickCallback) -> Result<TickerHandle>;

    /// Stop a subscription. No tick is delivered after this returns.
    fn stop(&self, handle: TickerHandle) {
        handle.cancel();
    }
}

/// Owned subscription to a [`Ticker`]
///
/// Dropping the handle stops the subscription, so a component that owns its
/// handle cannot outlive its ticks by accident.
pub struct TickerHandle {
    id: u64,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl TickerHandle {
    pub(crate) fn new(id: u64, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            id,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Subscription identifier, unique per ticker
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stop the subscription
    pub fn cancel(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
            tracing::trace!(ticker_id = self.id, "ticker subscription stopped");
        }
    }
}

impl Drop for TickerHandle {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for TickerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickerHandle")
            .field("id", &self.id)
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

pub(crate) fn validate_interval(interval: Duration) -> Result<()> {
    if interval.is_zero() {
        return Err(crate::errors::InfraError::Ticker(
            "tick interval must be greater than zero".to_string(),
        ));
    }
    Ok(())
}
