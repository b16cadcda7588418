//! Relocates the subscription side effect onto a scheduler worker.

use std::{convert::Infallible, sync::Arc};

use crate::{
  completable::Completable,
  flowable::Flowable,
  maybe::Maybe,
  observable::Observable,
  observer::{
    CompletableObserver, CompletableSink, FlowSink, MaybeObserver, MaybeSink, Observer,
    SingleObserver, SingleSink, Sink, SinkObserver, StreamSink, Subscriber, Terminal,
  },
  scheduler::{Scheduler, Task, Worker},
  single::Single,
  subscription::{Demand, DemandHandle, ProxySubscription, Subscription},
};

/// `source.subscribe_on(scheduler)` for every reactive shape.
///
/// The downstream gets its handle synchronously, on the subscribing thread;
/// the source is subscribed later by a task on a worker of `scheduler`.
#[derive(Clone)]
pub struct SubscribeOn<S, SD> {
  source: S,
  scheduler: SD,
}

impl<S, SD> SubscribeOn<S, SD> {
  pub(crate) fn new(source: S, scheduler: SD) -> Self { Self { source, scheduler } }
}

struct SubscribeOnState<W> {
  proxy: ProxySubscription,
  worker: W,
}

/// Downstream handle: requests hop onto the worker so that a demand-driven
/// source produces there.
struct SubscribeOnHandle<W>(Arc<SubscribeOnState<W>>);

impl<W: Worker> Subscription for SubscribeOnHandle<W> {
  fn unsubscribe(&self) {
    self.0.proxy.unsubscribe();
    self.0.worker.dispose();
  }

  fn is_closed(&self) -> bool { self.0.proxy.is_closed() }
}

impl<W: Worker> Demand for SubscribeOnHandle<W> {
  fn request(&self, n: u64) {
    let state = self.0.clone();
    let _ = self.0.worker.schedule(Task::new(move || state.proxy.request(n)), None);
  }
}

/// Sits between the source and the downstream once the source is subscribed.
struct SubscribeOnSink<D, W> {
  downstream: D,
  state: Arc<SubscribeOnState<W>>,
}

impl<Item, Err, D, W> Sink<Item, Err> for SubscribeOnSink<D, W>
where
  D: Sink<Item, Err>,
  W: Worker,
{
  fn on_subscribe(&mut self, upstream: DemandHandle) { self.state.proxy.set(upstream) }

  fn on_next(&mut self, value: Item) { self.downstream.on_next(value) }

  fn on_terminal(self, terminal: Terminal<Item, Err>) {
    self.downstream.on_terminal(terminal);
    self.state.worker.dispose();
  }
}

fn subscribe_on<Item, Err, D, W>(
  worker: W, mut downstream: D,
  subscribe: impl FnOnce(SinkObserver<SubscribeOnSink<D, W>>) + Send + 'static,
) where
  D: Sink<Item, Err>,
  W: Worker,
{
  let state = Arc::new(SubscribeOnState { proxy: ProxySubscription::default(), worker });
  downstream.on_subscribe(DemandHandle::new(Arc::new(SubscribeOnHandle(state.clone()))));

  let c_state = state.clone();
  let _ = state.worker.schedule(
    Task::new(move || {
      if c_state.proxy.is_closed() {
        return;
      }
      tracing::trace!("subscribe_on subscribing upstream");
      subscribe(SinkObserver(SubscribeOnSink { downstream, state: c_state }));
    }),
    None,
  );
}

impl<S, SD> Flowable for SubscribeOn<S, SD>
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
    let source = self.source;
    subscribe_on::<S::Item, S::Err, _, _>(
      self.scheduler.create_worker(),
      FlowSink(subscriber),
      move |sink| source.actual_subscribe(sink),
    );
  }
}

impl<S, SD> Observable for SubscribeOn<S, SD>
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
    let source = self.source;
    subscribe_on::<S::Item, S::Err, _, _>(
      self.scheduler.create_worker(),
      StreamSink(observer),
      move |sink| source.actual_subscribe(sink),
    );
  }
}

impl<S, SD> Single for SubscribeOn<S, SD>
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
    let source = self.source;
    subscribe_on::<S::Item, S::Err, _, _>(
      self.scheduler.create_worker(),
      SingleSink::new(observer),
      move |sink| source.actual_subscribe(sink),
    );
  }
}

impl<S, SD> Maybe for SubscribeOn<S, SD>
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
    let source = self.source;
    subscribe_on::<S::Item, S::Err, _, _>(
      self.scheduler.create_worker(),
      MaybeSink::new(observer),
      move |sink| source.actual_subscribe(sink),
    );
  }
}

impl<S, SD> Completable for SubscribeOn<S, SD>
where
  S: Completable,
  SD: Scheduler,
{
  type Err = S::Err;

  fn actual_subscribe<O>(self, observer: O)
  where
    O: CompletableObserver<S::Err> + Send + 'static,
  {
    let source = self.source;
    subscribe_on::<Infallible, S::Err, _, _>(
      self.scheduler.create_worker(),
      CompletableSink(observer),
      move |sink| source.actual_subscribe(sink),
    );
  }
}
