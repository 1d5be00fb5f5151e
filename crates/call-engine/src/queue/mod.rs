//! # Outbound Queue Scheduler
//!
//! Owns every lead the dialer will ever attempt and decides which one goes
//! next. Each entry lives in exactly one partition at a time:
//!
//! ```text
//!        enqueue                 dequeue_next
//!   ──────────────► ┌─────────┐ ─────────────► ┌─────────┐
//!                   │ Pending │                │ Calling │
//!                   └─────────┘ ◄───────────── └────┬────┘
//!                        ▲          defer           │ report_outcome
//!                        │                          │
//!                        │  failure, attempts left  │
//!                        └──────────────────────────┤
//!                                                   │
//!                         success ┌───────────┐     │     no attempts left ┌────────┐
//!                                 │ Completed │ ◄───┴────────────────────► │ Failed │
//!                                 └───────────┘                            └────────┘
//! ```
//!
//! ## Ordering
//!
//! `dequeue_next` returns the ready entry (scheduled time reached) with the
//! highest priority, then the earliest scheduled time, then insertion order.
//! The pending index is a `BTreeSet` keyed on exactly that tuple, so a lead
//! that is deferred after an admission rejection goes back to the same place.
//!
//! ## Retries
//!
//! `attempts` counts failed dials. A failure increments it; while it stays
//! below `retry_attempts` the entry returns to pending at
//! `now + retry_delay`, keeping its priority. Otherwise the entry is terminal.
//! Completed entries are never retried.

mod scheduler;
mod types;

pub use scheduler::QueueScheduler;
pub use types::{
    CallId, CallStatus, Lead, Priority, QueueSnapshot, QueueTransition, QueuedCall,
};
