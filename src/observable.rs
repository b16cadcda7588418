//! Unbounded multi-value streams.
//!
//! An [`Observable`] pushes values as fast as it produces them; there is no
//! demand channel. `observe_on` buffers without bound.

use std::{convert::Infallible, fmt::Debug, marker::PhantomData};

use crate::{
  config::ObserveOnConfig,
  observer::{unhandled_error, LambdaObserver, Observer},
  ops::{observe_on::ObserveOn, subscribe_on::SubscribeOn},
  scheduler::Scheduler,
  subscription::{Subscription, SubscriptionFlag, SubscriptionHandle},
};

mod create;
pub use create::{create, Emitter, ObservableCreate};

pub trait Observable: Sized + Send + 'static {
  type Item: Send + 'static;
  type Err: Send + 'static;

  fn actual_subscribe<O>(self, observer: O)
  where
    O: Observer<Self::Item, Self::Err> + Send + 'static;

  fn subscribe_on<S: Scheduler>(self, scheduler: S) -> SubscribeOn<Self, S> {
    SubscribeOn::new(self, scheduler)
  }

  fn observe_on<S: Scheduler>(self, scheduler: S) -> ObserveOn<Self, S> {
    ObserveOn::new(self, scheduler, ObserveOnConfig::default())
  }

  fn subscribe_with<O>(self, observer: O) -> O
  where
    O: Observer<Self::Item, Self::Err> + Clone + Send + 'static,
  {
    self.actual_subscribe(observer.clone());
    observer
  }

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
    let observer = LambdaObserver::new(next, error, complete);
    let handle = observer.subscription();
    self.actual_subscribe(observer);
    handle
  }
}

fn subscribe_flag<Item, Err, O: Observer<Item, Err>>(observer: &mut O) -> SubscriptionFlag {
  let flag = SubscriptionFlag::default();
  observer.on_subscribe(flag.handle());
  flag
}

// ==================== from_iter / just / empty ====================

/// Creates an observable that produces values from an iterator.
///
/// Completes when all elements have been emitted. Never emits an error.
pub fn from_iter<I: IntoIterator>(iter: I) -> ObservableIter<I> { ObservableIter(iter) }

pub fn just<T>(value: T) -> ObservableIter<std::iter::Once<T>> { from_iter(std::iter::once(value)) }

pub fn empty<T>() -> ObservableIter<std::iter::Empty<T>> { from_iter(std::iter::empty()) }

#[derive(Clone)]
pub struct ObservableIter<I>(I);

impl<I> Observable for ObservableIter<I>
where
  I: IntoIterator + Send + 'static,
  I::Item: Send + 'static,
{
  type Item = I::Item;
  type Err = Infallible;

  fn actual_subscribe<O>(self, mut observer: O)
  where
    O: Observer<I::Item, Infallible> + Send + 'static,
  {
    let flag = subscribe_flag(&mut observer);
    for value in self.0 {
      if flag.is_closed() {
        return;
      }
      observer.next(value);
    }
    if !flag.is_closed() {
      observer.complete();
    }
  }
}

// ==================== from_callable / error ====================

/// Creates an observable that calls `f` on subscription and emits its
/// result: a value followed by completion, or an error.
pub fn from_callable<F, T, E>(f: F) -> ObservableCallable<F>
where
  F: FnOnce() -> Result<T, E>,
{
  ObservableCallable(f)
}

#[derive(Clone)]
pub struct ObservableCallable<F>(F);

impl<F, T, E> Observable for ObservableCallable<F>
where
  F: FnOnce() -> Result<T, E> + Send + 'static,
  T: Send + 'static,
  E: Send + 'static,
{
  type Item = T;
  type Err = E;

  fn actual_subscribe<O>(self, mut observer: O)
  where
    O: Observer<T, E> + Send + 'static,
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
      Ok(value) => {
        observer.next(value);
        observer.complete();
      }
      Err(err) => observer.error(err),
    }
  }
}

/// Creates an observable that emits no items and terminates with an error.
pub fn error<T, E>(err: E) -> ObservableError<T, E> { ObservableError { err, _item: PhantomData } }

#[derive(Clone)]
pub struct ObservableError<T, E> {
  err: E,
  _item: PhantomData<fn() -> T>,
}

impl<T, E> Observable for ObservableError<T, E>
where
  T: Send + 'static,
  E: Send + 'static,
{
  type Item = T;
  type Err = E;

  fn actual_subscribe<O>(self, mut observer: O)
  where
    O: Observer<T, E> + Send + 'static,
  {
    let flag = subscribe_flag(&mut observer);
    if !flag.is_closed() {
      observer.error(self.err);
    }
  }
}
