//! No values, only completion or an error.
//!
//! ```rust
//! use rxsched::prelude::*;
//!
//! let observer = completable::from_callable(|| Ok::<_, ()>(()))
//!   .subscribe_on(scheduler::new_thread())
//!   .observe_on(SingleScheduler::with_name("Delivery"))
//!   .subscribe_with(TestObserver::<(), ()>::new());
//!
//! assert!(observer.await_terminal(Duration::from_secs(5)));
//! assert_eq!(observer.completions(), 1);
//! assert!(observer.terminal_thread_name().unwrap().starts_with("Delivery-"));
//! ```

use std::{convert::Infallible, fmt::Debug};

use crate::{
  config::ObserveOnConfig,
  observer::{unhandled_error, CompletableObserver, LambdaObserver},
  ops::{observe_on::ObserveOn, subscribe_on::SubscribeOn},
  scheduler::Scheduler,
  subscription::{Subscription, SubscriptionFlag, SubscriptionHandle},
};

pub trait Completable: Sized + Send + 'static {
  type Err: Send + 'static;

  fn actual_subscribe<O>(self, observer: O)
  where
    O: CompletableObserver<Self::Err> + Send + 'static;

  fn subscribe_on<S: Scheduler>(self, scheduler: S) -> SubscribeOn<Self, S> {
    SubscribeOn::new(self, scheduler)
  }

  fn observe_on<S: Scheduler>(self, scheduler: S) -> ObserveOn<Self, S> {
    ObserveOn::new(self, scheduler, ObserveOnConfig::default())
  }

  fn subscribe_with<O>(self, observer: O) -> O
  where
    O: CompletableObserver<Self::Err> + Clone + Send + 'static,
  {
    self.actual_subscribe(observer.clone());
    observer
  }

  /// Call `complete` on completion. An error is reported to the error hook.
  fn subscribe<C>(self, complete: C) -> SubscriptionHandle
  where
    C: FnOnce() + Send + 'static,
    Self::Err: Debug,
  {
    self.subscribe_all(complete, unhandled_error::<Self::Err>)
  }

  fn subscribe_all<C, E>(self, complete: C, error: E) -> SubscriptionHandle
  where
    C: FnOnce() + Send + 'static,
    E: FnOnce(Self::Err) + Send + 'static,
  {
    let observer = LambdaObserver::new(|never: Infallible| match never {}, error, complete);
    let handle = observer.subscription();
    self.actual_subscribe(observer);
    handle
  }
}

fn subscribe_flag<Err, O: CompletableObserver<Err>>(observer: &mut O) -> SubscriptionFlag {
  let flag = SubscriptionFlag::default();
  observer.on_subscribe(flag.handle());
  flag
}

/// Runs `f` on subscription and completes, or fails with its error.
pub fn from_callable<F, E>(f: F) -> CompletableCallable<F>
where
  F: FnOnce() -> Result<(), E>,
{
  CompletableCallable(f)
}

#[derive(Clone)]
pub struct CompletableCallable<F>(F);

impl<F, E> Completable for CompletableCallable<F>
where
  F: FnOnce() -> Result<(), E> + Send + 'static,
  E: Send + 'static,
{
  type Err = E;

  fn actual_subscribe<O>(self, mut observer: O)
  where
    O: CompletableObserver<E> + Send + 'static,
  {
    let flag = subscribe_flag(&mut observer);
    if flag.is_closed() {
      return;
    }
    let result = (self.0)();
    if flag.is_closed() {
      return;
    }
    match result {
      Ok(()) => observer.complete(),
      Err(err) => observer.error(err),
    }
  }
}

/// Completes immediately.
pub fn complete() -> CompletableResult<Infallible> { CompletableResult(Ok(())) }

pub fn error<E>(err: E) -> CompletableResult<E> { CompletableResult(Err(err)) }

#[derive(Clone)]
pub struct CompletableResult<E>(Result<(), E>);

impl<E: Send + 'static> Completable for CompletableResult<E> {
  type Err = E;

  fn actual_subscribe<O>(self, mut observer: O)
  where
    O: CompletableObserver<E> + Send + 'static,
  {
    if subscribe_flag(&mut observer).is_closed() {
      return;
    }
    match self.0 {
      Ok(()) => observer.complete(),
      Err(err) => observer.error(err),
    }
  }
}

#[cfg(test)]
mod test {
  use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  };

  use super::*;
  use crate::{scheduler::TestScheduler, test_observer::TestObserver};

  #[rxsched_macro::test]
  fn callable_runs_side_effect_once() {
    let runs = Arc::new(AtomicUsize::new(0));
    let c_runs = runs.clone();
    let observer = from_callable(move || {
      c_runs.fetch_add(1, Ordering::SeqCst);
      Ok::<_, String>(())
    })
    .subscribe_with(TestObserver::<(), String>::new());
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(observer.completions(), 1);

    let observer = from_callable(|| Err("disk full".to_string()))
      .subscribe_with(TestObserver::<(), String>::new());
    assert_eq!(observer.errors(), vec!["disk full".to_string()]);
    assert_eq!(observer.completions(), 0);
  }

  #[rxsched_macro::test]
  fn lambda_subscribe_completes() {
    let done = Arc::new(AtomicUsize::new(0));
    let c_done = done.clone();
    let handle = complete().subscribe(move || {
      c_done.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(done.load(Ordering::SeqCst), 1);
    assert!(handle.is_closed());
  }

  #[rxsched_macro::test]
  fn cancel_before_subscribe_side_effect() {
    let scheduler = TestScheduler::new();
    let runs = Arc::new(AtomicUsize::new(0));
    let c_runs = runs.clone();
    let handle = from_callable(move || {
      c_runs.fetch_add(1, Ordering::SeqCst);
      Ok::<_, ()>(())
    })
    .subscribe_on(scheduler.clone())
    .subscribe(|| {});
    handle.unsubscribe();
    scheduler.flush();
    assert_eq!(runs.load(Ordering::SeqCst), 0);
  }

  #[rxsched_macro::test]
  fn error_passes_through_both_operators() {
    let subscribe_side = TestScheduler::new();
    let observe_side = TestScheduler::new();
    let observer = error("broken")
      .subscribe_on(subscribe_side.clone())
      .observe_on(observe_side.clone())
      .subscribe_with(TestObserver::<(), &str>::new());
    subscribe_side.flush();
    assert!(observer.errors().is_empty());
    observe_side.flush();
    assert_eq!(observer.errors(), vec!["broken"]);
    assert_eq!(observer.completions(), 0);
  }
}
