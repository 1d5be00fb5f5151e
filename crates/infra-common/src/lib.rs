//! # outdial infra-common
//!
//! Shared plumbing for the outdial control plane:
//!
//! - [`clock`]: wall-clock and virtual clocks behind one [`Clock`] trait
//! - [`ticker`]: cancellable periodic timers ([`Ticker`]) with a tokio-backed
//!   implementation for production and a manual one for deterministic tests
//! - [`logging`]: `tracing` subscriber setup shared by every binary
//! - [`errors`]: infrastructure error types
//!
//! Everything above the ticker (sessions, usage metering, pacing) advances on
//! [`Tick`] events, so the same logic runs unchanged against virtual time.

pub mod clock;
pub mod errors;
pub mod logging;
pub mod ticker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::{InfraError, Result};
pub use ticker::{ManualTicker, Tick, TickCallback, Ticker, TickerHandle, TokioTicker};
