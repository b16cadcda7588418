//! At most one value: a success, an empty completion, or an error.

use std::{convert::Infallible, fmt::Debug, marker::PhantomData, sync::Arc};

use parking_lot::Mutex;

use crate::{
  config::ObserveOnConfig,
  observer::{unhandled_error, LambdaObserver, MaybeObserver},
  ops::{observe_on::ObserveOn, subscribe_on::SubscribeOn},
  scheduler::Scheduler,
  subscription::{Subscription, SubscriptionFlag, SubscriptionHandle},
};

pub trait Maybe: Sized + Send + 'static {
  type Item: Send + 'static;
  type Err: Send + 'static;

  fn actual_subscribe<O>(self, observer: O)
  where
    O: MaybeObserver<Self::Item, Self::Err> + Send + 'static;

  fn subscribe_on<S: Scheduler>(self, scheduler: S) -> SubscribeOn<Self, S> {
    SubscribeOn::new(self, scheduler)
  }

  fn observe_on<S: Scheduler>(self, scheduler: S) -> ObserveOn<Self, S> {
    ObserveOn::new(self, scheduler, ObserveOnConfig::default())
  }

  fn subscribe_with<O>(self, observer: O) -> O
  where
    O: MaybeObserver<Self::Item, Self::Err> + Clone + Send + 'static,
  {
    self.actual_subscribe(observer.clone());
    observer
  }

  fn subscribe<N>(self, success: N) -> SubscriptionHandle
  where
    N: FnOnce(Self::Item) + Send + 'static,
    Self::Err: Debug,
  {
    self.subscribe_all(success, unhandled_error::<Self::Err>, || {})
  }

  fn subscribe_all<N, E, C>(self, success: N, error: E, complete: C) -> SubscriptionHandle
  where
    N: FnOnce(Self::Item) + Send + 'static,
    E: FnOnce(Self::Err) + Send + 'static,
    C: FnOnce() + Send + 'static,
  {
    let complete = Arc::new(Mutex::new(Some(complete)));
    let c_complete = complete.clone();
    let mut success = Some(success);
    let observer = LambdaObserver::new(
      move |value: Self::Item| {
        // A success ends the stream on its own, `complete` must not follow.
        c_complete.lock().take();
        if let Some(success) = success.take() {
          success(value)
        }
      },
      error,
      move || {
        let complete = complete.lock().take();
        if let Some(complete) = complete {
          complete()
        }
      },
    );
    let handle = observer.subscription();
    self.actual_subscribe(observer);
    handle
  }
}

fn subscribe_flag<Item, Err, O: MaybeObserver<Item, Err>>(observer: &mut O) -> SubscriptionFlag {
  let flag = SubscriptionFlag::default();
  observer.on_subscribe(flag.handle());
  flag
}

// ==================== from_callable ====================

/// Calls `f` on subscription: `Ok(Some(v))` succeeds with `v`, `Ok(None)`
/// completes empty, `Err(e)` fails.
pub fn from_callable<F, T, E>(f: F) -> MaybeCallable<F>
where
  F: FnOnce() -> Result<Option<T>, E>,
{
  MaybeCallable(f)
}

#[derive(Clone)]
pub struct MaybeCallable<F>(F);

impl<F, T, E> Maybe for MaybeCallable<F>
where
  F: FnOnce() -> Result<Option<T>, E> + Send + 'static,
  T: Send + 'static,
  E: Send + 'static,
{
  type Item = T;
  type Err = E;

  fn actual_subscribe<O>(self, mut observer: O)
  where
    O: MaybeObserver<T, E> + Send + 'static,
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
      Ok(Some(value)) => observer.success(value),
      Ok(None) => observer.complete(),
      Err(err) => observer.error(err),
    }
  }
}

// ==================== just / empty / error ====================

pub fn just<T>(value: T) -> MaybeJust<T> { MaybeJust(Some(value)) }

pub fn empty<T>() -> MaybeJust<T> { MaybeJust(None) }

#[derive(Clone)]
pub struct MaybeJust<T>(Option<T>);

impl<T: Send + 'static> Maybe for MaybeJust<T> {
  type Item = T;
  type Err = Infallible;

  fn actual_subscribe<O>(self, mut observer: O)
  where
    O: MaybeObserver<T, Infallible> + Send + 'static,
  {
    if subscribe_flag(&mut observer).is_closed() {
      return;
    }
    match self.0 {
      Some(value) => observer.success(value),
      None => observer.complete(),
    }
  }
}

pub fn error<T, E>(err: E) -> MaybeError<T, E> { MaybeError { err, _item: PhantomData } }

#[derive(Clone)]
pub struct MaybeError<T, E> {
  err: E,
  _item: PhantomData<fn() -> T>,
}

impl<T, E> Maybe for MaybeError<T, E>
where
  T: Send + 'static,
  E: Send + 'static,
{
  type Item = T;
  type Err = E;

  fn actual_subscribe<O>(self, mut observer: O)
  where
    O: MaybeObserver<T, E> + Send + 'static,
  {
    if !subscribe_flag(&mut observer).is_closed() {
      observer.error(self.err);
    }
  }
}
