//! # rxsched: where reactive streams run
//!
//! Thread-placement operators for reactive streams. `subscribe_on` decides on
//! which scheduler the subscription side effect (and hence the production of
//! values) happens; `observe_on` decides on which scheduler the consumer
//! receives its signals. Both are available on all five reactive shapes.
//!
//! ## Quick Start
//!
//! ```rust
//! use rxsched::prelude::*;
//!
//! let observer = flowable::from_callable(|| Ok::<_, ()>(expensive()))
//!   .subscribe_on(scheduler::new_thread())
//!   .observe_on(scheduler::single())
//!   .subscribe_with(TestObserver::new());
//!
//! assert!(observer.await_terminal(Duration::from_secs(5)));
//! assert_eq!(observer.values(), vec![42]);
//!
//! fn expensive() -> u32 { 42 }
//! ```
//!
//! ## Key Concepts
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Flowable`] | Many values, emitted against downstream demand |
//! | [`Observable`] | Many values, no backpressure |
//! | [`Single`] / [`Maybe`] / [`Completable`] | One value / at most one / none |
//! | [`Scheduler`] | A factory of sequential [`Worker`]s |
//! | [`Subscription`] | Handle to cancel an active subscription |
//!
//! Signals delivered to one consumer never overlap and never follow a terminal
//! signal, whichever schedulers are involved.
//!
//! ## Feature Flags
//!
//! - **`futures-scheduler`** (default): [`scheduler::ThreadPoolScheduler`]
//!   over `futures`' thread pool
//! - **`tokio-scheduler`**: [`scheduler::TokioScheduler`] over a tokio runtime
//!   handle
//!
//! [`Flowable`]: flowable::Flowable
//! [`Observable`]: observable::Observable
//! [`Single`]: single::Single
//! [`Maybe`]: maybe::Maybe
//! [`Completable`]: completable::Completable
//! [`Scheduler`]: scheduler::Scheduler
//! [`Worker`]: scheduler::Worker
//! [`Subscription`]: subscription::Subscription

pub mod completable;
pub mod config;
pub mod error;
pub mod flowable;
pub mod hooks;
pub mod maybe;
pub mod observable;
pub mod observer;
pub mod ops;
pub mod prelude;
pub mod scheduler;
pub mod single;
pub mod subscription;
pub mod test_observer;

// Re-export the prelude module
pub use prelude::*;

pub use crate::scheduler::{Duration, Instant};

#[cfg(doctest)]
mod __markdown_doctests {
  mod readme {
    #![doc = include_str!("../README.md")]
  }
}
