//! Exactly one value, or an error.

use std::{convert::Infallible, fmt::Debug, marker::PhantomData};

use crate::{
  config::ObserveOnConfig,
  observer::{unhandled_error, LambdaObserver, SingleObserver},
  ops::{observe_on::ObserveOn, subscribe_on::SubscribeOn},
  scheduler::Scheduler,
  subscription::{Subscription, SubscriptionFlag, SubscriptionHandle},
};

pub trait Single: Sized + Send + 'static {
  type Item: Send + 'static;
  type Err: Send + 'static;

  fn actual_subscribe<O>(self, observer: O)
  where
    O: SingleObserver<Self::Item, Self::Err> + Send + 'static;

  fn subscribe_on<S: Scheduler>(self, scheduler: S) -> SubscribeOn<Self, S> {
    SubscribeOn::new(self, scheduler)
  }

  fn observe_on<S: Scheduler>(self, scheduler: S) -> ObserveOn<Self, S> {
    ObserveOn::new(self, scheduler, ObserveOnConfig::default())
  }

  fn subscribe_with<O>(self, observer: O) -> O
  where
    O: SingleObserver<Self::Item, Self::Err> + Clone + Send + 'static,
  {
    self.actual_subscribe(observer.clone());
    observer
  }

  /// Call `success` with the value. An error is reported to the error hook.
  fn subscribe<N>(self, success: N) -> SubscriptionHandle
  where
    N: FnOnce(Self::Item) + Send + 'static,
    Self::Err: Debug,
  {
    self.subscribe_all(success, unhandled_error::<Self::Err>)
  }

  fn subscribe_all<N, E>(self, success: N, error: E) -> SubscriptionHandle
  where
    N: FnOnce(Self::Item) + Send + 'static,
    E: FnOnce(Self::Err) + Send + 'static,
  {
    let mut success = Some(success);
    let observer = LambdaObserver::new(
      move |value: Self::Item| {
        if let Some(success) = success.take() {
          success(value)
        }
      },
      error,
      || {},
    );
    let handle = observer.subscription();
    self.actual_subscribe(observer);
    handle
  }
}

fn subscribe_flag<Item, Err, O: SingleObserver<Item, Err>>(observer: &mut O) -> SubscriptionFlag {
  let flag = SubscriptionFlag::default();
  observer.on_subscribe(flag.handle());
  flag
}

// ==================== from_callable ====================

/// Calls `f` on subscription and signals its result.
pub fn from_callable<F, T, E>(f: F) -> SingleCallable<F>
where
  F: FnOnce() -> Result<T, E>,
{
  SingleCallable(f)
}

#[derive(Clone)]
pub struct SingleCallable<F>(F);

impl<F, T, E> Single for SingleCallable<F>
where
  F: FnOnce() -> Result<T, E> + Send + 'static,
  T: Send + 'static,
  E: Send + 'static,
{
  type Item = T;
  type Err = E;

  fn actual_subscribe<O>(self, mut observer: O)
  where
    O: SingleObserver<T, E> + Send + 'static,
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
      Ok(value) => observer.success(value),
      Err(err) => observer.error(err),
    }
  }
}

// ==================== just / error ====================

pub fn just<T>(value: T) -> SingleJust<T> { SingleJust(value) }

#[derive(Clone)]
pub struct SingleJust<T>(T);

impl<T: Send + 'static> Single for SingleJust<T> {
  type Item = T;
  type Err = Infallible;

  fn actual_subscribe<O>(self, mut observer: O)
  where
    O: SingleObserver<T, Infallible> + Send + 'static,
  {
    if !subscribe_flag(&mut observer).is_closed() {
      observer.success(self.0);
    }
  }
}

pub fn error<T, E>(err: E) -> SingleError<T, E> { SingleError { err, _item: PhantomData } }

#[derive(Clone)]
pub struct SingleError<T, E> {
  err: E,
  _item: PhantomData<fn() -> T>,
}

impl<T, E> Single for SingleError<T, E>
where
  T: Send + 'static,
  E: Send + 'static,
{
  type Item = T;
  type Err = E;

  fn actual_subscribe<O>(self, mut observer: O)
  where
    O: SingleObserver<T, E> + Send + 'static,
  {
    if !subscribe_flag(&mut observer).is_closed() {
      observer.error(self.err);
    }
  }
}

#[cfg(test)]
mod test {
  use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  };

  use parking_lot::Mutex;

  use super::*;
  use crate::{
    hooks::test_support::CapturedErrors, scheduler::TestScheduler, test_observer::TestObserver,
  };

  #[rxsched_macro::test]
  fn callable_success_and_error() {
    let observer = from_callable(|| Ok::<_, String>(3)).subscribe_with(TestObserver::new());
    assert_eq!(observer.values(), vec![3]);
    assert_eq!(observer.completions(), 1);

    let observer =
      from_callable(|| Err::<i32, _>("no".to_string())).subscribe_with(TestObserver::new());
    assert!(observer.values().is_empty());
    assert_eq!(observer.errors(), vec!["no".to_string()]);
  }

  #[rxsched_macro::test]
  fn lambda_subscribe() {
    let got = Arc::new(Mutex::new(None));
    let c_got = got.clone();
    let handle = just(9).subscribe(move |v| *c_got.lock() = Some(v));
    assert_eq!(*got.lock(), Some(9));
    assert!(handle.is_closed());
  }

  #[rxsched_macro::test]
  fn unhandled_error_goes_to_hook() {
    let captured = CapturedErrors::install();
    error::<i32, _>("single failed").subscribe(|_| {});
    assert!(captured
      .messages()
      .iter()
      .any(|m| m.contains("single failed")));
  }

  #[rxsched_macro::test]
  fn scheduled_both_ways() {
    let subscribe_side = TestScheduler::new();
    let observe_side = TestScheduler::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let c_calls = calls.clone();
    let observer = from_callable(move || {
      c_calls.fetch_add(1, Ordering::SeqCst);
      Ok::<_, ()>("done")
    })
    .subscribe_on(subscribe_side.clone())
    .observe_on(observe_side.clone())
    .subscribe_with(TestObserver::new());

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    subscribe_side.flush();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(observer.values().is_empty());
    observe_side.flush();
    assert_eq!(observer.values(), vec!["done"]);
    assert_eq!(observer.completions(), 1);
  }
}
