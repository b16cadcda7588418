//! Consumer traits, one per reactive shape.
//!
//! Each shape gets its own capability set instead of one universal trait with
//! optional methods, so a `Completable` consumer cannot be handed a value and a
//! `Single` consumer cannot be completed empty:
//!
//! | Trait | Signals |
//! |-------|---------|
//! | [`Subscriber`] | `on_subscribe(DemandHandle)`, `next`, `error`, `complete` |
//! | [`Observer`] | `on_subscribe(SubscriptionHandle)`, `next`, `error`, `complete` |
//! | [`SingleObserver`] | `on_subscribe`, `success`, `error` |
//! | [`MaybeObserver`] | `on_subscribe`, `success`, `error`, `complete` |
//! | [`CompletableObserver`] | `on_subscribe`, `complete`, `error` |
//!
//! Terminal methods consume the consumer, so at most one terminal signal can be
//! delivered and nothing can follow it.
//!
//! Internally every shape is lowered onto one cardinality-erased protocol,
//! [`Sink`], which is what the scheduling operators are written against.

use std::{convert::Infallible, fmt::Debug, sync::Arc};

use crate::{
  error::RxError,
  hooks,
  subscription::{
    Demand, DemandHandle, ProxySubscription, Subscription, SubscriptionHandle, UNBOUNDED,
  },
};

// ============================================================================
// Consumer traits
// ============================================================================

/// Consumer of a backpressured [`crate::flowable::Flowable`].
///
/// Nothing is delivered until demand is granted through the handle received
/// in `on_subscribe`; `request` may be called from inside `next`.
pub trait Subscriber<Item, Err> {
  fn on_subscribe(&mut self, subscription: DemandHandle);

  fn next(&mut self, value: Item);

  fn error(self, err: Err);

  fn complete(self);
}

/// Consumer of an unbounded [`crate::observable::Observable`].
pub trait Observer<Item, Err> {
  fn on_subscribe(&mut self, subscription: SubscriptionHandle);

  fn next(&mut self, value: Item);

  fn error(self, err: Err);

  fn complete(self);
}

/// Consumer of a [`crate::single::Single`]: exactly one value or an error.
pub trait SingleObserver<Item, Err> {
  fn on_subscribe(&mut self, subscription: SubscriptionHandle);

  fn success(self, value: Item);

  fn error(self, err: Err);
}

/// Consumer of a [`crate::maybe::Maybe`]: one value, nothing, or an error.
pub trait MaybeObserver<Item, Err> {
  fn on_subscribe(&mut self, subscription: SubscriptionHandle);

  fn success(self, value: Item);

  fn error(self, err: Err);

  fn complete(self);
}

/// Consumer of a [`crate::completable::Completable`].
pub trait CompletableObserver<Err> {
  fn on_subscribe(&mut self, subscription: SubscriptionHandle);

  fn complete(self);

  fn error(self, err: Err);
}

/// A single delivered signal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification<Item, Err> {
  Next(Item),
  Error(Err),
  Complete,
}

impl<Item, Err> Notification<Item, Err> {
  pub fn is_terminal(&self) -> bool { !matches!(self, Notification::Next(_)) }
}

// ============================================================================
// Sink: the cardinality-erased protocol
// ============================================================================

/// How a stream ended. `Success` carries the value of a `Single` or `Maybe`,
/// which never passes through `on_next`.
pub(crate) enum Terminal<Item, Err> {
  Complete,
  Success(Item),
  Error(Err),
}

/// The protocol the scheduling operators speak on both sides.
pub(crate) trait Sink<Item, Err>: Send + 'static {
  fn on_subscribe(&mut self, upstream: DemandHandle);

  fn on_next(&mut self, value: Item);

  fn on_terminal(self, terminal: Terminal<Item, Err>);
}

// ==================== consumer -> Sink ====================

pub(crate) struct FlowSink<O>(pub(crate) O);

impl<Item, Err, O> Sink<Item, Err> for FlowSink<O>
where
  O: Subscriber<Item, Err> + Send + 'static,
{
  fn on_subscribe(&mut self, upstream: DemandHandle) { self.0.on_subscribe(upstream) }

  fn on_next(&mut self, value: Item) { self.0.next(value) }

  fn on_terminal(self, terminal: Terminal<Item, Err>) {
    let mut subscriber = self.0;
    match terminal {
      Terminal::Complete => subscriber.complete(),
      Terminal::Error(err) => subscriber.error(err),
      Terminal::Success(value) => {
        subscriber.next(value);
        subscriber.complete();
      }
    }
  }
}

pub(crate) struct StreamSink<O>(pub(crate) O);

impl<Item, Err, O> Sink<Item, Err> for StreamSink<O>
where
  O: Observer<Item, Err> + Send + 'static,
{
  fn on_subscribe(&mut self, upstream: DemandHandle) { self.0.on_subscribe(upstream.into()) }

  fn on_next(&mut self, value: Item) { self.0.next(value) }

  fn on_terminal(self, terminal: Terminal<Item, Err>) {
    let mut observer = self.0;
    match terminal {
      Terminal::Complete => observer.complete(),
      Terminal::Error(err) => observer.error(err),
      Terminal::Success(value) => {
        observer.next(value);
        observer.complete();
      }
    }
  }
}

/// Holds a value passed through `on_next` until the terminal arrives.
pub(crate) struct SingleSink<O, Item> {
  observer: O,
  value: Option<Item>,
}

impl<O, Item> SingleSink<O, Item> {
  pub(crate) fn new(observer: O) -> Self { Self { observer, value: None } }
}

impl<Item, Err, O> Sink<Item, Err> for SingleSink<O, Item>
where
  O: SingleObserver<Item, Err> + Send + 'static,
  Item: Send + 'static,
{
  fn on_subscribe(&mut self, upstream: DemandHandle) { self.observer.on_subscribe(upstream.into()) }

  fn on_next(&mut self, value: Item) { self.value = Some(value); }

  fn on_terminal(self, terminal: Terminal<Item, Err>) {
    match terminal {
      Terminal::Success(value) => self.observer.success(value),
      Terminal::Error(err) => self.observer.error(err),
      Terminal::Complete => match self.value {
        Some(value) => self.observer.success(value),
        None => hooks::on_error(RxError::ProtocolViolation("single completed without a value")),
      },
    }
  }
}

pub(crate) struct MaybeSink<O, Item> {
  observer: O,
  value: Option<Item>,
}

impl<O, Item> MaybeSink<O, Item> {
  pub(crate) fn new(observer: O) -> Self { Self { observer, value: None } }
}

impl<Item, Err, O> Sink<Item, Err> for MaybeSink<O, Item>
where
  O: MaybeObserver<Item, Err> + Send + 'static,
  Item: Send + 'static,
{
  fn on_subscribe(&mut self, upstream: DemandHandle) { self.observer.on_subscribe(upstream.into()) }

  fn on_next(&mut self, value: Item) { self.value = Some(value); }

  fn on_terminal(self, terminal: Terminal<Item, Err>) {
    match terminal {
      Terminal::Success(value) => self.observer.success(value),
      Terminal::Error(err) => self.observer.error(err),
      Terminal::Complete => match self.value {
        Some(value) => self.observer.success(value),
        None => self.observer.complete(),
      },
    }
  }
}

pub(crate) struct CompletableSink<O>(pub(crate) O);

impl<Err, O> Sink<Infallible, Err> for CompletableSink<O>
where
  O: CompletableObserver<Err> + Send + 'static,
{
  fn on_subscribe(&mut self, upstream: DemandHandle) { self.0.on_subscribe(upstream.into()) }

  fn on_next(&mut self, value: Infallible) { match value {} }

  fn on_terminal(self, terminal: Terminal<Infallible, Err>) {
    match terminal {
      Terminal::Complete => self.0.complete(),
      Terminal::Error(err) => self.0.error(err),
      Terminal::Success(value) => match value {},
    }
  }
}

// ==================== Sink -> consumer ====================

/// Presents a [`Sink`] to an upstream of any shape.
pub(crate) struct SinkObserver<S>(pub(crate) S);

impl<Item, Err, S> Subscriber<Item, Err> for SinkObserver<S>
where
  S: Sink<Item, Err>,
{
  fn on_subscribe(&mut self, subscription: DemandHandle) { self.0.on_subscribe(subscription) }

  fn next(&mut self, value: Item) { self.0.on_next(value) }

  fn error(self, err: Err) { self.0.on_terminal(Terminal::Error(err)) }

  fn complete(self) { self.0.on_terminal(Terminal::Complete) }
}

impl<Item, Err, S> Observer<Item, Err> for SinkObserver<S>
where
  S: Sink<Item, Err>,
{
  fn on_subscribe(&mut self, subscription: SubscriptionHandle) {
    self.0.on_subscribe(DemandHandle::unbounded(subscription))
  }

  fn next(&mut self, value: Item) { self.0.on_next(value) }

  fn error(self, err: Err) { self.0.on_terminal(Terminal::Error(err)) }

  fn complete(self) { self.0.on_terminal(Terminal::Complete) }
}

impl<Item, Err, S> SingleObserver<Item, Err> for SinkObserver<S>
where
  S: Sink<Item, Err>,
{
  fn on_subscribe(&mut self, subscription: SubscriptionHandle) {
    self.0.on_subscribe(DemandHandle::unbounded(subscription))
  }

  fn success(self, value: Item) { self.0.on_terminal(Terminal::Success(value)) }

  fn error(self, err: Err) { self.0.on_terminal(Terminal::Error(err)) }
}

impl<Item, Err, S> MaybeObserver<Item, Err> for SinkObserver<S>
where
  S: Sink<Item, Err>,
{
  fn on_subscribe(&mut self, subscription: SubscriptionHandle) {
    self.0.on_subscribe(DemandHandle::unbounded(subscription))
  }

  fn success(self, value: Item) { self.0.on_terminal(Terminal::Success(value)) }

  fn error(self, err: Err) { self.0.on_terminal(Terminal::Error(err)) }

  fn complete(self) { self.0.on_terminal(Terminal::Complete) }
}

impl<Err, S> CompletableObserver<Err> for SinkObserver<S>
where
  S: Sink<Infallible, Err>,
{
  fn on_subscribe(&mut self, subscription: SubscriptionHandle) {
    self.0.on_subscribe(DemandHandle::unbounded(subscription))
  }

  fn complete(self) { self.0.on_terminal(Terminal::Complete) }

  fn error(self, err: Err) { self.0.on_terminal(Terminal::Error(err)) }
}

// ============================================================================
// LambdaObserver - closure adapter
// ============================================================================

/// Closure-backed consumer used by the `subscribe` helpers of every shape.
///
/// `next` doubles as the success callback of `Single` and `Maybe`. The
/// returned handle stays valid before the upstream attaches, and reports
/// closed once a terminal signal has been delivered.
pub struct LambdaObserver<N, E, C> {
  next: N,
  error: E,
  complete: C,
  subscription: Arc<ProxySubscription>,
}

impl<N, E, C> LambdaObserver<N, E, C> {
  pub fn new(next: N, error: E, complete: C) -> Self {
    Self { next, error, complete, subscription: Arc::default() }
  }

  /// The handle the upstream subscription will be attached to.
  pub fn subscription(&self) -> SubscriptionHandle {
    SubscriptionHandle::new(self.subscription.clone())
  }

  fn attach(&mut self, upstream: DemandHandle) { self.subscription.set(upstream) }

  fn emit<Item>(&mut self, value: Item)
  where
    N: FnMut(Item),
  {
    if !self.subscription.is_closed() {
      (self.next)(value);
    }
  }

  fn finish_error<Err>(self, err: Err)
  where
    E: FnOnce(Err),
  {
    if !self.subscription.is_closed() {
      self.subscription.unsubscribe();
      (self.error)(err);
    }
  }

  fn finish_complete(self)
  where
    C: FnOnce(),
  {
    if !self.subscription.is_closed() {
      self.subscription.unsubscribe();
      (self.complete)();
    }
  }
}

/// Error callback for `subscribe(next)` helpers: the error goes to the hook.
pub(crate) fn unhandled_error<Err: Debug>(err: Err) {
  hooks::on_error(RxError::OnErrorNotImplemented(format!("{err:?}")));
}

impl<Item, Err, N, E, C> Subscriber<Item, Err> for LambdaObserver<N, E, C>
where
  N: FnMut(Item),
  E: FnOnce(Err),
  C: FnOnce(),
{
  fn on_subscribe(&mut self, subscription: DemandHandle) {
    self.attach(subscription.clone());
    subscription.request(UNBOUNDED);
  }

  fn next(&mut self, value: Item) { self.emit(value) }

  fn error(self, err: Err) { self.finish_error(err) }

  fn complete(self) { self.finish_complete() }
}

impl<Item, Err, N, E, C> Observer<Item, Err> for LambdaObserver<N, E, C>
where
  N: FnMut(Item),
  E: FnOnce(Err),
  C: FnOnce(),
{
  fn on_subscribe(&mut self, subscription: SubscriptionHandle) {
    self.attach(DemandHandle::unbounded(subscription))
  }

  fn next(&mut self, value: Item) { self.emit(value) }

  fn error(self, err: Err) { self.finish_error(err) }

  fn complete(self) { self.finish_complete() }
}

impl<Item, Err, N, E, C> SingleObserver<Item, Err> for LambdaObserver<N, E, C>
where
  N: FnMut(Item),
  E: FnOnce(Err),
  C: FnOnce(),
{
  fn on_subscribe(&mut self, subscription: SubscriptionHandle) {
    self.attach(DemandHandle::unbounded(subscription))
  }

  fn success(mut self, value: Item) {
    self.emit(value);
    self.finish_complete();
  }

  fn error(self, err: Err) { self.finish_error(err) }
}

impl<Item, Err, N, E, C> MaybeObserver<Item, Err> for LambdaObserver<N, E, C>
where
  N: FnMut(Item),
  E: FnOnce(Err),
  C: FnOnce(),
{
  fn on_subscribe(&mut self, subscription: SubscriptionHandle) {
    self.attach(DemandHandle::unbounded(subscription))
  }

  fn success(mut self, value: Item) {
    self.emit(value);
    self.finish_complete();
  }

  fn error(self, err: Err) { self.finish_error(err) }

  fn complete(self) { self.finish_complete() }
}

impl<Err, N, E, C> CompletableObserver<Err> for LambdaObserver<N, E, C>
where
  E: FnOnce(Err),
  C: FnOnce(),
{
  fn on_subscribe(&mut self, subscription: SubscriptionHandle) {
    self.attach(DemandHandle::unbounded(subscription))
  }

  fn complete(self) { self.finish_complete() }

  fn error(self, err: Err) { self.finish_error(err) }
}
