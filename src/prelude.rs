//! Prelude module for convenient imports
//!
//! This module re-exports commonly used types and traits for easy access.

// Reactive shapes, as modules for their sources and as traits for operators
pub use crate::{
  completable::{self, Completable},
  flowable::{self, Flowable},
  maybe::{self, Maybe},
  observable::{self, Emitter, Observable},
  single::{self, Single},
};
// Consumers
pub use crate::observer::{
  CompletableObserver, LambdaObserver, MaybeObserver, Notification, Observer, SingleObserver,
  Subscriber,
};
pub use crate::test_observer::TestObserver;
// Operators and their options
pub use crate::config::ObserveOnConfig;
pub use crate::ops::{ObserveOn, SubscribeOn};
// Schedulers
pub use crate::scheduler::{
  self, Duration, Instant, NewThreadScheduler, Scheduler, SingleScheduler, Task, TaskHandle,
  TestScheduler, Worker,
};
#[cfg(feature = "futures-scheduler")]
pub use crate::scheduler::ThreadPoolScheduler;
#[cfg(feature = "tokio-scheduler")]
pub use crate::scheduler::TokioScheduler;
// Subscription
pub use crate::subscription::*;
// Errors
pub use crate::error::RxError;
