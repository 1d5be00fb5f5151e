//! # Control Plane Orchestration
//!
//! The orchestrator ties the queue, pacer, sessions, usage ledger, daily
//! summary and export together behind one single-writer [`ControlPlane`].
//!
//! ## Module Organization
//!
//! - **[`core`]**: the [`ControlPlane`] itself: dispatch cycle, tick handling,
//!   terminal pipeline, operator actions and read models
//! - **[`types`]**: [`EngineEvent`] (timer input), [`EngineCommand`]
//!   (request/reply input) and [`EngineNotice`] (pushed output)
//!
//! ## Data flow
//!
//! ```text
//!  ticker callbacks ──► EngineEvent::Tick ──┐
//!                                           ▼
//!  EngineHandle ──► EngineCommand ──► ┌──────────────┐ ──► EngineNotice (broadcast)
//!                                     │ ControlPlane │
//!  dispatch interval ───────────────► └──────────────┘ ──► replies (oneshot)
//!                                       │  │  │  │
//!                        QueueScheduler ┘  │  │  └ DailySummaryAggregator
//!                                    Pacer ┘  └ UsageLedger
//!                               (owns CallSessions)
//! ```
//!
//! Every input is applied to completion before the next one is looked at, so
//! the shared usage accumulator and the queue partitions never see
//! interleaved writers.
//!
//! ## A call's life
//!
//! 1. `dispatch` dequeues the best ready lead and asks the pacer to admit it.
//!    Rejections put the lead back where it was; only a DNC hit lets the cycle
//!    move on to the next lead.
//! 2. On admission the session starts dialing, subscribes to the ticker and
//!    receives a [`CallPlan`](crate::outcome::CallPlan) from the outcome
//!    provider.
//! 3. Ringing ticks count down to connect (or to the planned failure).
//!    Connected ticks accrue usage and emit scripted lines; held ticks do
//!    nothing.
//! 4. When talk time is reached or an operator hangs up, the terminal
//!    pipeline runs in one step and the freed slot is offered to the queue
//!    straight away.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use chrono::{TimeZone, Utc};
//! use outdial_infra_common::{ManualClock, ManualTicker};
//! use outdial_call_engine::prelude::*;
//!
//! let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap());
//! let ticker = ManualTicker::new(clock.clone());
//! let provider = ScriptedOutcomeProvider::new(CallPlan::answered(2, 30, Disposition::Booked));
//!
//! let mut plane = ControlPlane::new(
//!     EngineConfig::default(),
//!     Arc::new(clock.clone()),
//!     Arc::new(ticker.clone()),
//!     Box::new(provider),
//!     Arc::new(InMemoryDncList::new()),
//! )
//! .unwrap();
//!
//! plane.enqueue_lead(Lead::new("Ada Lovelace", "+1 555 0100", Priority::High));
//! assert_eq!(plane.dispatch().len(), 1);
//!
//! for _ in 0..32 {
//!     ticker.advance(Duration::from_secs(1));
//!     plane.pump();
//! }
//! assert_eq!(plane.daily_summary(None).booked_calls, 1);
//! ```

pub mod core;
pub mod types;

pub use self::core::{ControlPlane, NOTICE_CHANNEL_CAPACITY};
pub use self::types::{EngineCommand, EngineEvent, EngineNotice, Reply};
