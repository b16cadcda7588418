//! Relocates delivery onto a scheduler worker.
//!
//! Every upstream signal is parked in a queue (values) or in the terminal slot
//! and a single drain task on the worker hands them to the downstream. The
//! `wip` counter guarantees at most one drain is alive: whoever moves it off
//! zero schedules the drain, and the drain only exits once it has accounted
//! for every increment it observed. The producer never waits for the consumer.

use std::{
  convert::Infallible,
  panic::{catch_unwind, AssertUnwindSafe},
  sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
  },
};

use crossbeam::queue::{ArrayQueue, SegQueue};
use parking_lot::Mutex;

use crate::{
  completable::Completable,
  config::ObserveOnConfig,
  error::{panic_message, RxError},
  flowable::Flowable,
  hooks,
  maybe::Maybe,
  observable::Observable,
  observer::{
    CompletableObserver, CompletableSink, FlowSink, MaybeObserver, MaybeSink, Observer,
    SingleObserver, SingleSink, Sink, SinkObserver, StreamSink, Subscriber, Terminal,
  },
  scheduler::{Scheduler, Task, Worker},
  single::Single,
  subscription::{demand, Demand, DemandHandle, Subscription, UNBOUNDED},
};

/// How many values a shape can carry, which decides the queue and the drain
/// policy of the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cardinality {
  /// Backpressured: bounded queue of `prefetch` values, delivery limited by
  /// downstream demand, upstream replenished by `limit` at a time.
  FlowControlled { prefetch: usize, limit: usize, delay_error: bool },
  /// Unbounded queue, everything is delivered as soon as possible.
  Unbounded,
  /// At most one value, carried by the terminal signal.
  ZeroOrOne,
  /// No values at all.
  CompletionOnly,
}

impl Cardinality {
  /// A `prefetch` of zero, possible through the public field, is clamped to
  /// one: the drain queue cannot be empty.
  pub fn flow_controlled(config: ObserveOnConfig) -> Self {
    let prefetch = config.prefetch.max(1);
    Cardinality::FlowControlled {
      prefetch,
      limit: ObserveOnConfig { prefetch, ..config }.replenish_limit(),
      delay_error: config.delay_error,
    }
  }
}

/// `source.observe_on(scheduler)` for every reactive shape.
#[derive(Clone)]
pub struct ObserveOn<S, SD> {
  source: S,
  scheduler: SD,
  config: ObserveOnConfig,
}

impl<S, SD> ObserveOn<S, SD> {
  pub(crate) fn new(source: S, scheduler: SD, config: ObserveOnConfig) -> Self {
    Self { source, scheduler, config }
  }
}

impl<S, SD> Flowable for ObserveOn<S, SD>
where
  S: Flowable,
  SD: Scheduler,
{
  type Item = S::Item;
  type Err = S::Err;

  fn actual_subscribe<O>(self, subscriber: O)
  where
    O: Subscriber<S::Item, S::Err> + Send + 'static,
  {
    let cardinality = Cardinality::flow_controlled(self.config);
    let sink = ObserveOnSink::<S::Item, S::Err, _, _>::new(
      cardinality,
      FlowSink(subscriber),
      self.scheduler.create_worker(),
    );
    self.source.actual_subscribe(SinkObserver(sink));
  }
}

impl<S, SD> Observable for ObserveOn<S, SD>
where
  S: Observable,
  SD: Scheduler,
{
  type Item = S::Item;
  type Err = S::Err;

  fn actual_subscribe<O>(self, observer: O)
  where
    O: Observer<S::Item, S::Err> + Send + 'static,
  {
    let sink = ObserveOnSink::<S::Item, S::Err, _, _>::new(
      Cardinality::Unbounded,
      StreamSink(observer),
      self.scheduler.create_worker(),
    );
    self.source.actual_subscribe(SinkObserver(sink));
  }
}

impl<S, SD> Single for ObserveOn<S, SD>
where
  S: Single,
  SD: Scheduler,
{
  type Item = S::Item;
  type Err = S::Err;

  fn actual_subscribe<O>(self, observer: O)
  where
    O: SingleObserver<S::Item, S::Err> + Send + 'static,
  {
    let sink = ObserveOnSink::<S::Item, S::Err, _, _>::new(
      Cardinality::ZeroOrOne,
      SingleSink::new(observer),
      self.scheduler.create_worker(),
    );
    self.source.actual_subscribe(SinkObserver(sink));
  }
}

impl<S, SD> Maybe for ObserveOn<S, SD>
where
  S: Maybe,
  SD: Scheduler,
{
  type Item = S::Item;
  type Err = S::Err;

  fn actual_subscribe<O>(self, observer: O)
  where
    O: MaybeObserver<S::Item, S::Err> + Send + 'static,
  {
    let sink = ObserveOnSink::<S::Item, S::Err, _, _>::new(
      Cardinality::ZeroOrOne,
      MaybeSink::new(observer),
      self.scheduler.create_worker(),
    );
    self.source.actual_subscribe(SinkObserver(sink));
  }
}

impl<S, SD> Completable for ObserveOn<S, SD>
where
  S: Completable,
  SD: Scheduler,
{
  type Err = S::Err;

  fn actual_subscribe<O>(self, observer: O)
  where
    O: CompletableObserver<S::Err> + Send + 'static,
  {
    let sink = ObserveOnSink::<Infallible, S::Err, _, _>::new(
      Cardinality::CompletionOnly,
      CompletableSink(observer),
      self.scheduler.create_worker(),
    );
    self.source.actual_subscribe(SinkObserver(sink));
  }
}

// ============================================================================
// Engine
// ============================================================================

enum PendingQueue<Item> {
  Bounded(ArrayQueue<Item>),
  Unbounded(SegQueue<Item>),
  Empty,
}

impl<Item> PendingQueue<Item> {
  fn for_cardinality(cardinality: Cardinality) -> Self {
    match cardinality {
      Cardinality::FlowControlled { prefetch, .. } => {
        PendingQueue::Bounded(ArrayQueue::new(prefetch))
      }
      Cardinality::Unbounded => PendingQueue::Unbounded(SegQueue::new()),
      Cardinality::ZeroOrOne | Cardinality::CompletionOnly => PendingQueue::Empty,
    }
  }

  fn pop(&self) -> Option<Item> {
    match self {
      PendingQueue::Bounded(queue) => queue.pop(),
      PendingQueue::Unbounded(queue) => queue.pop(),
      PendingQueue::Empty => None,
    }
  }

  fn is_empty(&self) -> bool {
    match self {
      PendingQueue::Bounded(queue) => queue.is_empty(),
      PendingQueue::Unbounded(queue) => queue.is_empty(),
      PendingQueue::Empty => true,
    }
  }

  fn clear(&self) { while self.pop().is_some() {} }
}

/// The downstream while it is parked between drain passes.
struct DrainState<D> {
  sink: D,
  /// Deliveries since upstream was last replenished.
  consumed: usize,
}

struct ObserveOnState<Item, Err, D, W> {
  cardinality: Cardinality,
  queue: PendingQueue<Item>,
  terminal: Mutex<Option<Terminal<Item, Err>>>,
  done: AtomicBool,
  cancelled: AtomicBool,
  finished: AtomicBool,
  /// Starts at 1: the subscribe call holds the drain until `on_subscribe`
  /// returned.
  wip: AtomicUsize,
  requested: AtomicU64,
  downstream: Mutex<Option<DrainState<D>>>,
  upstream: Mutex<Option<DemandHandle>>,
  worker: W,
}

/// The upstream-facing half of the engine.
pub(crate) struct ObserveOnSink<Item, Err, D, W>(Arc<ObserveOnState<Item, Err, D, W>>);

impl<Item, Err, D, W> ObserveOnSink<Item, Err, D, W>
where
  Item: Send + 'static,
  Err: Send + 'static,
  D: Sink<Item, Err>,
  W: Worker,
{
  pub(crate) fn new(cardinality: Cardinality, downstream: D, worker: W) -> Self {
    Self(Arc::new(ObserveOnState {
      cardinality,
      queue: PendingQueue::for_cardinality(cardinality),
      terminal: Mutex::new(None),
      done: AtomicBool::new(false),
      cancelled: AtomicBool::new(false),
      finished: AtomicBool::new(false),
      wip: AtomicUsize::new(1),
      requested: AtomicU64::new(0),
      downstream: Mutex::new(Some(DrainState { sink: downstream, consumed: 0 })),
      upstream: Mutex::new(None),
      worker,
    }))
  }
}

impl<Item, Err, D, W> Sink<Item, Err> for ObserveOnSink<Item, Err, D, W>
where
  Item: Send + 'static,
  Err: Send + 'static,
  D: Sink<Item, Err>,
  W: Worker,
{
  fn on_subscribe(&mut self, upstream: DemandHandle) { self.0.on_subscribe(upstream) }

  fn on_next(&mut self, value: Item) { self.0.on_next(value) }

  fn on_terminal(self, terminal: Terminal<Item, Err>) { self.0.on_terminal(terminal) }
}

/// The downstream-facing half of the engine.
struct ObserveOnHandle<Item, Err, D, W>(Arc<ObserveOnState<Item, Err, D, W>>);

impl<Item, Err, D, W> Subscription for ObserveOnHandle<Item, Err, D, W>
where
  Item: Send + 'static,
  Err: Send + 'static,
  D: Sink<Item, Err>,
  W: Worker,
{
  fn unsubscribe(&self) { self.0.cancel() }

  fn is_closed(&self) -> bool {
    self.0.cancelled.load(Ordering::Acquire) || self.0.finished.load(Ordering::Acquire)
  }
}

impl<Item, Err, D, W> Demand for ObserveOnHandle<Item, Err, D, W>
where
  Item: Send + 'static,
  Err: Send + 'static,
  D: Sink<Item, Err>,
  W: Worker,
{
  fn request(&self, n: u64) {
    if !demand::validate(n) {
      return;
    }
    demand::add(&self.0.requested, n);
    self.0.trampoline();
  }
}

impl<Item, Err, D, W> ObserveOnState<Item, Err, D, W>
where
  Item: Send + 'static,
  Err: Send + 'static,
  D: Sink<Item, Err>,
  W: Worker,
{
  // ==================== producer side ====================

  fn on_subscribe(self: &Arc<Self>, upstream: DemandHandle) {
    *self.upstream.lock() = Some(upstream.clone());

    let state = self.downstream.lock().take();
    if let Some(mut state) = state {
      let handle = DemandHandle::new(Arc::new(ObserveOnHandle(self.clone())));
      if let Err(payload) = catch_unwind(AssertUnwindSafe(|| state.sink.on_subscribe(handle))) {
        self.fail(payload);
        return;
      }
      *self.downstream.lock() = Some(state);
    }

    if self.cancelled.load(Ordering::Acquire) {
      // Cancelled during `on_subscribe`, while the hold kept `cancel` from
      // clearing.
      upstream.unsubscribe();
      self.clear();
      return;
    }
    if let Cardinality::FlowControlled { prefetch, .. } = self.cardinality {
      upstream.request(prefetch as u64);
    }

    // Release the hold taken at construction; anything signalled meanwhile
    // needs a drain.
    if self
      .wip
      .compare_exchange(1, 0, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      self.schedule_drain();
    }
  }

  fn on_next(self: &Arc<Self>, value: Item) {
    if self.done.load(Ordering::Acquire) || self.cancelled.load(Ordering::Acquire) {
      return;
    }
    match &self.queue {
      PendingQueue::Unbounded(queue) => queue.push(value),
      PendingQueue::Bounded(queue) => {
        if queue.push(value).is_err() {
          self.overflow(queue.capacity());
          return;
        }
      }
      PendingQueue::Empty => {
        hooks::on_error(RxError::ProtocolViolation("value signalled to a source without values"));
        return;
      }
    }
    self.trampoline();
  }

  fn on_terminal(self: &Arc<Self>, terminal: Terminal<Item, Err>) {
    if self.done.load(Ordering::Acquire) || self.cancelled.load(Ordering::Acquire) {
      return;
    }
    *self.terminal.lock() = Some(terminal);
    self.done.store(true, Ordering::Release);
    self.trampoline();
  }

  fn overflow(self: &Arc<Self>, capacity: usize) {
    tracing::warn!(capacity, "observe_on queue full, upstream ignored backpressure");
    hooks::on_error(RxError::MissingBackpressure { capacity });
    self.cancel();
  }

  // ==================== scheduling ====================

  fn trampoline(self: &Arc<Self>) {
    if self.wip.fetch_add(1, Ordering::AcqRel) == 0 {
      self.schedule_drain();
    }
  }

  fn schedule_drain(self: &Arc<Self>) {
    let this = self.clone();
    // A disposed worker drops the task; that only happens once cancelled or
    // finished.
    let _ = self.worker.schedule(Task::new(move || this.drain()), None);
  }

  // ==================== consumer side (worker only) ====================

  fn drain(&self) {
    let mut missed = 1;
    let Some(mut state) = self.downstream.lock().take() else {
      return;
    };
    loop {
      let Some(parked) = self.drain_pass(state) else {
        return;
      };
      *self.downstream.lock() = Some(parked);
      missed = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
      if missed == 0 {
        return;
      }
      match self.downstream.lock().take() {
        Some(parked) => state = parked,
        None => return,
      }
    }
  }

  /// One pass over the available signals. Returns the downstream if it is
  /// still live, `None` once it was terminated, cancelled or failed.
  fn drain_pass(&self, mut state: DrainState<D>) -> Option<DrainState<D>> {
    let Cardinality::FlowControlled { limit, delay_error, .. } = self.cardinality else {
      loop {
        if self.check_cancelled() {
          return None;
        }
        let done = self.done.load(Ordering::Acquire);
        match self.queue.pop() {
          Some(value) => {
            if !self.deliver(&mut state, value) {
              return None;
            }
          }
          None if done => return self.finish(state),
          None => return Some(state),
        }
      }
    };

    let requested = self.requested.load(Ordering::Acquire);
    let mut emitted = 0;
    while emitted != requested {
      if self.check_cancelled() {
        return None;
      }
      let done = self.done.load(Ordering::Acquire);
      if done && !delay_error && self.has_error() {
        self.queue.clear();
        return self.finish(state);
      }
      let Some(value) = self.queue.pop() else {
        if done {
          return self.finish(state);
        }
        break;
      };
      if !self.deliver(&mut state, value) {
        return None;
      }
      emitted += 1;
      state.consumed += 1;
      if state.consumed == limit {
        state.consumed = 0;
        let upstream = self.upstream.lock().clone();
        if let Some(upstream) = upstream {
          upstream.request(limit as u64);
        }
      }
    }

    if emitted == requested {
      if self.check_cancelled() {
        return None;
      }
      let done = self.done.load(Ordering::Acquire);
      if done && ((!delay_error && self.has_error()) || self.queue.is_empty()) {
        self.queue.clear();
        return self.finish(state);
      }
    }
    if emitted != 0 && requested != UNBOUNDED {
      demand::produced(&self.requested, emitted);
    }
    Some(state)
  }

  fn has_error(&self) -> bool { matches!(*self.terminal.lock(), Some(Terminal::Error(_))) }

  fn check_cancelled(&self) -> bool {
    if self.cancelled.load(Ordering::Acquire) {
      self.clear();
      true
    } else {
      false
    }
  }

  /// Hand one value to the downstream. `false` if the callback panicked.
  fn deliver(&self, state: &mut DrainState<D>, value: Item) -> bool {
    match catch_unwind(AssertUnwindSafe(|| state.sink.on_next(value))) {
      Ok(()) => true,
      Err(payload) => {
        self.fail(payload);
        false
      }
    }
  }

  /// Deliver the recorded terminal and release the worker. `wip` is never
  /// decremented afterwards, so no drain can start again.
  fn finish(&self, state: DrainState<D>) -> Option<DrainState<D>> {
    let terminal = self.terminal.lock().take();
    self.finished.store(true, Ordering::Release);
    let upstream = self.upstream.lock().take();
    drop(upstream);
    if let Some(terminal) = terminal {
      tracing::trace!("observe_on delivering terminal");
      if let Err(payload) = catch_unwind(AssertUnwindSafe(|| state.sink.on_terminal(terminal))) {
        hooks::on_error(RxError::CallbackPanicked(panic_message(&*payload)));
      }
    }
    self.worker.dispose();
    None
  }

  // ==================== cancellation ====================

  fn cancel(&self) {
    if self.cancelled.swap(true, Ordering::AcqRel) {
      return;
    }
    tracing::trace!("observe_on cancelled");
    let upstream = self.upstream.lock().take();
    if let Some(upstream) = upstream {
      upstream.unsubscribe();
    }
    self.worker.dispose();
    if self.wip.fetch_add(1, Ordering::AcqRel) == 0 {
      self.clear();
    }
  }

  fn fail(&self, payload: Box<dyn std::any::Any + Send>) {
    self.cancel();
    self.clear();
    hooks::on_error(RxError::CallbackPanicked(panic_message(&*payload)));
  }

  fn clear(&self) {
    self.queue.clear();
    let terminal = self.terminal.lock().take();
    drop(terminal);
    let downstream = self.downstream.lock().take();
    drop(downstream);
  }
}
