use std::{
  marker::PhantomData,
  sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
  },
};

use crossbeam::queue::SegQueue;
use parking_lot::Mutex;

use super::Observable;
use crate::{
  observer::{Notification, Observer, Sink, StreamSink, Terminal},
  subscription::{DemandHandle, Subscription, SubscriptionHandle},
};

/// Creates an observable from a function that pushes signals through an
/// [`Emitter`].
///
/// The emitter may be cloned and moved to other threads; concurrent
/// emissions are serialized, never interleaved, and nothing passes once a
/// terminal signal was emitted or the subscriber unsubscribed.
///
/// ```rust
/// use rxsched::prelude::*;
///
/// let observer = observable::create(|mut emitter: Emitter<i32, ()>| {
///   emitter.next(1);
///   emitter.next(2);
///   emitter.complete();
/// })
/// .subscribe_with(TestObserver::new());
///
/// assert_eq!(observer.values(), vec![1, 2]);
/// ```
pub fn create<F, Item, Err>(f: F) -> ObservableCreate<F, Item, Err>
where
  F: FnOnce(Emitter<Item, Err>),
{
  ObservableCreate { f, _marker: PhantomData }
}

#[derive(Clone)]
pub struct ObservableCreate<F, Item, Err> {
  f: F,
  _marker: PhantomData<fn() -> (Item, Err)>,
}

impl<F, Item, Err> Observable for ObservableCreate<F, Item, Err>
where
  F: FnOnce(Emitter<Item, Err>) + Send + 'static,
  Item: Send + 'static,
  Err: Send + 'static,
{
  type Item = Item;
  type Err = Err;

  fn actual_subscribe<O>(self, observer: O)
  where
    O: Observer<Item, Err> + Send + 'static,
  {
    let state = Arc::new(EmitterState {
      queue: SegQueue::new(),
      wip: AtomicUsize::new(0),
      observer: Mutex::new(None),
      done: AtomicBool::new(false),
      closed: AtomicBool::new(false),
    });
    let mut sink = StreamSink(observer);
    sink.on_subscribe(DemandHandle::unbounded(SubscriptionHandle::new(state.clone())));
    *state.observer.lock() = Some(Box::new(sink));
    (self.f)(Emitter(state));
  }
}

/// Object-safe view of a [`Sink`], so the emitter does not carry the
/// observer type.
trait DynSink<Item, Err>: Send {
  fn next(&mut self, value: Item);

  fn terminate(self: Box<Self>, terminal: Terminal<Item, Err>);
}

impl<Item, Err, S: Sink<Item, Err>> DynSink<Item, Err> for S {
  fn next(&mut self, value: Item) { self.on_next(value) }

  fn terminate(self: Box<Self>, terminal: Terminal<Item, Err>) { (*self).on_terminal(terminal) }
}

struct EmitterState<Item, Err> {
  queue: SegQueue<Notification<Item, Err>>,
  wip: AtomicUsize,
  observer: Mutex<Option<Box<dyn DynSink<Item, Err>>>>,
  /// A terminal signal was accepted.
  done: AtomicBool,
  /// Terminated or unsubscribed.
  closed: AtomicBool,
}

impl<Item, Err> Subscription for EmitterState<Item, Err>
where
  Item: Send,
  Err: Send,
{
  fn unsubscribe(&self) { self.closed.store(true, Ordering::Release); }

  fn is_closed(&self) -> bool { self.closed.load(Ordering::Acquire) }
}

/// Pushes signals into an [`create`]d observable.
pub struct Emitter<Item, Err>(Arc<EmitterState<Item, Err>>);

impl<Item, Err> Clone for Emitter<Item, Err> {
  fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<Item, Err> Emitter<Item, Err> {
  pub fn next(&mut self, value: Item) { self.emit(Notification::Next(value)) }

  pub fn error(&mut self, err: Err) { self.emit(Notification::Error(err)) }

  pub fn complete(&mut self) { self.emit(Notification::Complete) }

  /// `true` once the stream terminated or the subscriber unsubscribed; a
  /// producer loop should stop.
  pub fn is_closed(&self) -> bool { self.0.closed.load(Ordering::Acquire) }

  fn emit(&self, notification: Notification<Item, Err>) {
    let state = &self.0;
    if state.closed.load(Ordering::Acquire) || state.done.load(Ordering::Acquire) {
      return;
    }
    if notification.is_terminal() && state.done.swap(true, Ordering::AcqRel) {
      return;
    }
    state.queue.push(notification);
    if state.wip.fetch_add(1, Ordering::AcqRel) == 0 {
      self.drain();
    }
  }

  fn drain(&self) {
    let state = &self.0;
    let mut missed = 1;
    loop {
      let observer = state.observer.lock().take();
      let Some(mut observer) = observer else {
        self.clear();
        return;
      };
      while let Some(notification) = state.queue.pop() {
        if state.closed.load(Ordering::Acquire) {
          self.clear();
          return;
        }
        match notification {
          Notification::Next(value) => observer.next(value),
          Notification::Error(err) => {
            state.closed.store(true, Ordering::Release);
            self.clear();
            observer.terminate(Terminal::Error(err));
            return;
          }
          Notification::Complete => {
            state.closed.store(true, Ordering::Release);
            self.clear();
            observer.terminate(Terminal::Complete);
            return;
          }
        }
      }
      *state.observer.lock() = Some(observer);
      missed = state.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
      if missed == 0 {
        return;
      }
    }
  }

  fn clear(&self) { while self.0.queue.pop().is_some() {} }
}

#[cfg(test)]
mod test {
  use std::thread;

  use super::*;
  use crate::test_observer::TestObserver;

  #[rxsched_macro::test]
  fn nothing_after_terminal() {
    let observer = create(|mut emitter: Emitter<i32, &str>| {
      emitter.next(1);
      emitter.error("first");
      emitter.next(2);
      emitter.complete();
    })
    .subscribe_with(TestObserver::new());
    assert_eq!(observer.values(), vec![1]);
    assert_eq!(observer.errors(), vec!["first"]);
    assert_eq!(observer.completions(), 0);
  }

  #[rxsched_macro::test]
  fn emitter_sees_unsubscribe() {
    let observer = TestObserver::<i32, ()>::new();
    let c_observer = observer.clone();
    let emitted = create(move |mut emitter: Emitter<i32, ()>| {
      let mut sent = 0;
      while !emitter.is_closed() && sent < 1000 {
        emitter.next(sent);
        sent += 1;
        if sent == 3 {
          c_observer.cancel();
        }
      }
      assert!(emitter.is_closed());
    })
    .subscribe_with(observer.clone());
    assert_eq!(emitted.values(), vec![0, 1, 2]);
  }

  #[rxsched_macro::test]
  fn concurrent_emitters_are_serialized() {
    let observer = TestObserver::<usize, ()>::new();
    create(|emitter: Emitter<usize, ()>| {
      let handles: Vec<_> = (0..4)
        .map(|t| {
          let mut emitter = emitter.clone();
          thread::spawn(move || {
            for i in 0..1000 {
              emitter.next(t * 1000 + i);
            }
          })
        })
        .collect();
      handles.into_iter().for_each(|h| h.join().unwrap());
      let mut emitter = emitter;
      emitter.complete();
    })
    .subscribe_with(observer.clone());

    assert!(!observer.overlapped());
    let mut values = observer.values();
    assert_eq!(values.len(), 4000);
    for t in 0..4 {
      let from_thread: Vec<_> = values.iter().copied().filter(|v| v / 1000 == t).collect();
      assert_eq!(from_thread, (t * 1000..(t + 1) * 1000).collect::<Vec<_>>());
    }
    values.sort_unstable();
    values.dedup();
    assert_eq!(values.len(), 4000);
    assert_eq!(observer.completions(), 1);
  }
}
