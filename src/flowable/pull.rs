//! Demand-driven sources.
//!
//! A source is a [`Pull`] producer polled by a drain loop that runs on the
//! thread that grants demand. The `wip` counter makes the loop re-entrant
//! safe: a `request` from inside `next` only bumps the counter and the running
//! loop picks it up.

use std::{
  convert::Infallible,
  iter::Peekable,
  marker::PhantomData,
  sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
  },
};

use parking_lot::Mutex;

use super::Flowable;
use crate::{
  observer::{FlowSink, Sink, Subscriber, Terminal},
  subscription::{demand, Demand, DemandHandle, Subscription},
};

pub(crate) enum Pulled<Item, Err> {
  Next(Item),
  End(Terminal<Item, Err>),
  /// Nothing can happen until more demand arrives.
  Idle,
}

pub(crate) trait Pull: Send + 'static {
  type Item: Send + 'static;
  type Err: Send + 'static;

  /// `Next` may only be returned when `can_emit`; `End` always may.
  fn poll(&mut self, can_emit: bool) -> Pulled<Self::Item, Self::Err>;
}

struct PullEmitter<P, D> {
  producer: Mutex<P>,
  sink: Mutex<Option<D>>,
  requested: AtomicU64,
  wip: AtomicUsize,
  closed: AtomicBool,
}

pub(crate) fn subscribe_pull<P, O>(producer: P, subscriber: O)
where
  P: Pull,
  O: Subscriber<P::Item, P::Err> + Send + 'static,
{
  let emitter = Arc::new(PullEmitter {
    producer: Mutex::new(producer),
    sink: Mutex::new(None),
    requested: AtomicU64::new(0),
    // Held by this call until the subscriber is parked.
    wip: AtomicUsize::new(1),
    closed: AtomicBool::new(false),
  });
  let mut sink = FlowSink(subscriber);
  sink.on_subscribe(DemandHandle::new(emitter.clone()));
  *emitter.sink.lock() = Some(sink);
  emitter.drain();
}

impl<P, D> PullEmitter<P, D>
where
  P: Pull,
  D: Sink<P::Item, P::Err>,
{
  fn drain(&self) {
    let mut missed = 1;
    loop {
      let sink = self.sink.lock().take();
      let Some(mut sink) = sink else {
        return;
      };
      let requested = self.requested.load(Ordering::Acquire);
      let mut emitted = 0;
      loop {
        if self.closed.load(Ordering::Acquire) {
          return;
        }
        let pulled = self.producer.lock().poll(emitted != requested);
        match pulled {
          Pulled::Next(value) => {
            sink.on_next(value);
            emitted += 1;
          }
          Pulled::End(terminal) => {
            self.closed.store(true, Ordering::Release);
            sink.on_terminal(terminal);
            return;
          }
          Pulled::Idle => break,
        }
      }
      if emitted != 0 {
        demand::produced(&self.requested, emitted);
      }
      *self.sink.lock() = Some(sink);
      missed = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
      if missed == 0 {
        return;
      }
    }
  }
}

impl<P, D> Subscription for PullEmitter<P, D>
where
  P: Pull,
  D: Sink<P::Item, P::Err>,
{
  fn unsubscribe(&self) { self.closed.store(true, Ordering::Release); }

  fn is_closed(&self) -> bool { self.closed.load(Ordering::Acquire) }
}

impl<P, D> Demand for PullEmitter<P, D>
where
  P: Pull,
  D: Sink<P::Item, P::Err>,
{
  fn request(&self, n: u64) {
    if !demand::validate(n) {
      return;
    }
    demand::add(&self.requested, n);
    if self.wip.fetch_add(1, Ordering::AcqRel) == 0 {
      self.drain();
    }
  }
}

// ==================== from_iter / just / empty ====================

/// Creates a flowable that emits the values of an iterator, one per unit of
/// demand, and completes when the iterator is exhausted. An empty iterator
/// completes without any demand.
pub fn from_iter<I>(iter: I) -> FlowableIter<I::IntoIter>
where
  I: IntoIterator,
{
  FlowableIter(iter.into_iter())
}

/// Creates a flowable emitting `value` once demand arrives, then completing.
pub fn just<T>(value: T) -> FlowableIter<std::iter::Once<T>> { from_iter(std::iter::once(value)) }

pub fn empty<T>() -> FlowableIter<std::iter::Empty<T>> { from_iter(std::iter::empty()) }

#[derive(Clone)]
pub struct FlowableIter<I>(I);

struct IterPull<I: Iterator>(Peekable<I>);

impl<I> Pull for IterPull<I>
where
  I: Iterator + Send + 'static,
  I::Item: Send + 'static,
{
  type Item = I::Item;
  type Err = Infallible;

  fn poll(&mut self, can_emit: bool) -> Pulled<I::Item, Infallible> {
    if self.0.peek().is_none() {
      return Pulled::End(Terminal::Complete);
    }
    if !can_emit {
      return Pulled::Idle;
    }
    match self.0.next() {
      Some(value) => Pulled::Next(value),
      None => Pulled::End(Terminal::Complete),
    }
  }
}

impl<I> Flowable for FlowableIter<I>
where
  I: Iterator + Send + 'static,
  I::Item: Send + 'static,
{
  type Item = I::Item;
  type Err = Infallible;

  fn actual_subscribe<O>(self, subscriber: O)
  where
    O: Subscriber<I::Item, Infallible> + Send + 'static,
  {
    subscribe_pull(IterPull(self.0.peekable()), subscriber)
  }
}

// ==================== from_callable ====================

/// Creates a flowable that calls `f` when subscribed. `Ok` is emitted once
/// demand arrives and followed by completion; `Err` is signalled right away.
pub fn from_callable<F, T, E>(f: F) -> FlowableCallable<F>
where
  F: FnOnce() -> Result<T, E>,
{
  FlowableCallable(f)
}

#[derive(Clone)]
pub struct FlowableCallable<F>(F);

enum CallState<F, T> {
  Pending(F),
  Ready(T),
  Emitted,
  Done,
}

struct CallablePull<F, T, E> {
  state: CallState<F, T>,
  _err: PhantomData<fn() -> E>,
}

impl<F, T, E> Pull for CallablePull<F, T, E>
where
  F: FnOnce() -> Result<T, E> + Send + 'static,
  T: Send + 'static,
  E: Send + 'static,
{
  type Item = T;
  type Err = E;

  fn poll(&mut self, can_emit: bool) -> Pulled<T, E> {
    loop {
      match std::mem::replace(&mut self.state, CallState::Done) {
        CallState::Pending(f) => match f() {
          Ok(value) => self.state = CallState::Ready(value),
          Err(err) => return Pulled::End(Terminal::Error(err)),
        },
        CallState::Ready(value) if can_emit => {
          self.state = CallState::Emitted;
          return Pulled::Next(value);
        }
        CallState::Ready(value) => {
          self.state = CallState::Ready(value);
          return Pulled::Idle;
        }
        CallState::Emitted => return Pulled::End(Terminal::Complete),
        CallState::Done => return Pulled::Idle,
      }
    }
  }
}

impl<F, T, E> Flowable for FlowableCallable<F>
where
  F: FnOnce() -> Result<T, E> + Send + 'static,
  T: Send + 'static,
  E: Send + 'static,
{
  type Item = T;
  type Err = E;

  fn actual_subscribe<O>(self, subscriber: O)
  where
    O: Subscriber<T, E> + Send + 'static,
  {
    let producer = CallablePull { state: CallState::Pending(self.0), _err: PhantomData };
    subscribe_pull(producer, subscriber)
  }
}

// ==================== error ====================

/// Creates a flowable that signals `err` on subscription, without demand.
pub fn error<T, E>(err: E) -> FlowableError<T, E> { FlowableError { err, _item: PhantomData } }

#[derive(Clone)]
pub struct FlowableError<T, E> {
  err: E,
  _item: PhantomData<fn() -> T>,
}

struct ErrorPull<T, E>(Option<E>, PhantomData<fn() -> T>);

impl<T, E> Pull for ErrorPull<T, E>
where
  T: Send + 'static,
  E: Send + 'static,
{
  type Item = T;
  type Err = E;

  fn poll(&mut self, _can_emit: bool) -> Pulled<T, E> {
    match self.0.take() {
      Some(err) => Pulled::End(Terminal::Error(err)),
      None => Pulled::Idle,
    }
  }
}

impl<T, E> Flowable for FlowableError<T, E>
where
  T: Send + 'static,
  E: Send + 'static,
{
  type Item = T;
  type Err = E;

  fn actual_subscribe<O>(self, subscriber: O)
  where
    O: Subscriber<T, E> + Send + 'static,
  {
    subscribe_pull(ErrorPull(Some(self.err), PhantomData), subscriber)
  }
}
