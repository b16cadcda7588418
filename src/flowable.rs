//! Backpressured multi-value streams.
//!
//! A [`Flowable`] only emits against demand: nothing is delivered until the
//! subscriber calls `request(n)` on the handle it receives in `on_subscribe`.
//!
//! ```rust
//! use rxsched::prelude::*;
//!
//! let observer = TestObserver::new();
//! flowable::from_iter(0..5)
//!   .subscribe_on(scheduler::new_thread())
//!   .observe_on(scheduler::single())
//!   .subscribe_with(observer.clone());
//!
//! assert!(observer.await_terminal(Duration::from_secs(5)));
//! assert_eq!(observer.values(), vec![0, 1, 2, 3, 4]);
//! ```

use std::fmt::Debug;

use crate::{
  config::ObserveOnConfig,
  observer::{unhandled_error, LambdaObserver, Subscriber},
  ops::{observe_on::ObserveOn, subscribe_on::SubscribeOn},
  scheduler::Scheduler,
  subscription::SubscriptionHandle,
};

mod pull;
pub use pull::{
  empty, error, from_callable, from_iter, just, FlowableCallable, FlowableError, FlowableIter,
};

pub trait Flowable: Sized + Send + 'static {
  type Item: Send + 'static;
  type Err: Send + 'static;

  /// Start the stream for `subscriber`. `on_subscribe` is called before any
  /// other signal.
  fn actual_subscribe<O>(self, subscriber: O)
  where
    O: Subscriber<Self::Item, Self::Err> + Send + 'static;

  /// Run the subscription side effect, and every request, on a worker of
  /// `scheduler`.
  fn subscribe_on<S: Scheduler>(self, scheduler: S) -> SubscribeOn<Self, S> {
    SubscribeOn::new(self, scheduler)
  }

  /// Deliver every signal on a worker of `scheduler`, prefetching
  /// [`crate::config::buffer_size`] values.
  fn observe_on<S: Scheduler>(self, scheduler: S) -> ObserveOn<Self, S> {
    ObserveOn::new(self, scheduler, ObserveOnConfig::default())
  }

  fn observe_on_with<S: Scheduler>(
    self, scheduler: S, config: ObserveOnConfig,
  ) -> ObserveOn<Self, S> {
    ObserveOn::new(self, scheduler, config)
  }

  /// Subscribe a clone of `subscriber` and hand the original back, to be
  /// inspected or awaited.
  fn subscribe_with<O>(self, subscriber: O) -> O
  where
    O: Subscriber<Self::Item, Self::Err> + Clone + Send + 'static,
  {
    self.actual_subscribe(subscriber.clone());
    subscriber
  }

  /// Request everything and call `next` for each value. An error is reported
  /// to the error hook.
  fn subscribe<N>(self, next: N) -> SubscriptionHandle
  where
    N: FnMut(Self::Item) + Send + 'static,
    Self::Err: Debug,
  {
    self.subscribe_all(next, unhandled_error::<Self::Err>, || {})
  }

  fn subscribe_all<N, E, C>(self, next: N, error: E, complete: C) -> SubscriptionHandle
  where
    N: FnMut(Self::Item) + Send + 'static,
    E: FnOnce(Self::Err) + Send + 'static,
    C: FnOnce() + Send + 'static,
  {
    let subscriber = LambdaObserver::new(next, error, complete);
    let handle = subscriber.subscription();
    self.actual_subscribe(subscriber);
    handle
  }
}
