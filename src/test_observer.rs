//! A recording consumer for tests and examples.

use std::{
  sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
  },
  thread::{self, ThreadId},
};

use parking_lot::{Condvar, Mutex};

use crate::{
  observer::{
    CompletableObserver, MaybeObserver, Notification, Observer, SingleObserver, Subscriber,
  },
  scheduler::{Duration, Instant},
  subscription::{
    Demand, DemandHandle, ProxySubscription, Subscription, SubscriptionHandle, UNBOUNDED,
  },
};

/// Records every signal it receives, from any shape.
///
/// Clones share the recording, so the usual pattern is to subscribe a clone
/// (or use `subscribe_with`) and inspect the original:
///
/// ```rust
/// use rxsched::prelude::*;
///
/// let observer = single::just(1)
///   .subscribe_on(scheduler::new_thread())
///   .subscribe_with(TestObserver::<i32, std::convert::Infallible>::new());
///
/// assert!(observer.await_terminal(Duration::from_secs(5)));
/// assert_eq!(observer.values(), vec![1]);
/// assert_eq!(observer.completions(), 1);
/// ```
///
/// A `Single` or `Maybe` success is recorded as a value followed by a
/// completion.
pub struct TestObserver<Item, Err> {
  inner: Arc<Inner<Item, Err>>,
  config: Config,
}

#[derive(Clone, Copy)]
struct Config {
  initial_request: u64,
  request_on_next: u64,
  panic_at: Option<usize>,
}

struct Inner<Item, Err> {
  subscription: ProxySubscription,
  subscribed: AtomicBool,
  active: AtomicUsize,
  overlapped: AtomicBool,
  recorded: Mutex<Recorded<Item, Err>>,
  terminated: Condvar,
}

struct Recorded<Item, Err> {
  notifications: Vec<Notification<Item, Err>>,
  value_count: usize,
  threads: Vec<(ThreadId, Option<String>)>,
  terminal_thread: Option<(ThreadId, Option<String>)>,
}

impl<Item, Err> Recorded<Item, Err> {
  fn visit(&mut self) {
    let current = thread::current();
    if !self.threads.iter().any(|(id, _)| *id == current.id()) {
      self.threads.push((current.id(), current.name().map(str::to_owned)));
    }
  }
}

impl<Item, Err> Clone for TestObserver<Item, Err> {
  fn clone(&self) -> Self { Self { inner: self.inner.clone(), config: self.config } }
}

impl<Item, Err> Default for TestObserver<Item, Err> {
  fn default() -> Self { Self::new() }
}

impl<Item, Err> TestObserver<Item, Err> {
  /// Requests everything on subscribe.
  pub fn new() -> Self { Self::with_request(UNBOUNDED) }

  /// Requests `n` on subscribe; `0` requests nothing.
  pub fn with_request(n: u64) -> Self {
    Self {
      inner: Arc::new(Inner {
        subscription: ProxySubscription::default(),
        subscribed: AtomicBool::new(false),
        active: AtomicUsize::new(0),
        overlapped: AtomicBool::new(false),
        recorded: Mutex::new(Recorded {
          notifications: vec![],
          value_count: 0,
          threads: vec![],
          terminal_thread: None,
        }),
        terminated: Condvar::new(),
      }),
      config: Config { initial_request: n, request_on_next: 0, panic_at: None },
    }
  }

  /// Request `n` more after every value.
  pub fn request_on_next(mut self, n: u64) -> Self {
    self.config.request_on_next = n;
    self
  }

  /// Panic when the value at `index` (zero based) arrives, without recording
  /// it.
  pub fn panic_at(mut self, index: usize) -> Self {
    self.config.panic_at = Some(index);
    self
  }

  /// Request more; before the upstream is attached requests accumulate.
  pub fn request(&self, n: u64) { self.inner.subscription.request(n) }

  pub fn cancel(&self) { self.inner.subscription.unsubscribe() }

  pub fn is_subscribed(&self) -> bool { self.inner.subscribed.load(Ordering::Acquire) }

  pub fn is_terminated(&self) -> bool { self.inner.recorded.lock().terminal_thread.is_some() }

  pub fn completions(&self) -> usize {
    let recorded = self.inner.recorded.lock();
    recorded
      .notifications
      .iter()
      .filter(|n| matches!(n, Notification::Complete))
      .count()
  }

  /// `true` if two callbacks ever ran at the same time.
  pub fn overlapped(&self) -> bool { self.inner.overlapped.load(Ordering::Acquire) }

  /// Every thread a signal arrived on, in order of first appearance.
  pub fn callback_threads(&self) -> Vec<ThreadId> {
    self.inner.recorded.lock().threads.iter().map(|(id, _)| *id).collect()
  }

  /// Names of [`Self::callback_threads`]; unnamed threads are skipped.
  pub fn callback_thread_names(&self) -> Vec<String> {
    let recorded = self.inner.recorded.lock();
    recorded.threads.iter().filter_map(|(_, name)| name.clone()).collect()
  }

  pub fn terminal_thread(&self) -> Option<ThreadId> {
    self.inner.recorded.lock().terminal_thread.as_ref().map(|(id, _)| *id)
  }

  pub fn terminal_thread_name(&self) -> Option<String> {
    let recorded = self.inner.recorded.lock();
    recorded.terminal_thread.as_ref().and_then(|(_, name)| name.clone())
  }

  /// Block until a terminal signal was recorded or `timeout` elapsed. Returns
  /// whether the stream terminated.
  pub fn await_terminal(&self, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    let mut recorded = self.inner.recorded.lock();
    while recorded.terminal_thread.is_none() {
      if self.inner.terminated.wait_until(&mut recorded, deadline).timed_out() {
        return recorded.terminal_thread.is_some();
      }
    }
    true
  }

  fn enter(&self) -> CallbackGuard<'_> {
    if self.inner.active.fetch_add(1, Ordering::AcqRel) > 0 {
      self.inner.overlapped.store(true, Ordering::Release);
    }
    CallbackGuard(&self.inner.active)
  }

  fn attach(&self, upstream: DemandHandle) {
    self.inner.subscribed.store(true, Ordering::Release);
    self.inner.subscription.set(upstream);
    if self.config.initial_request > 0 {
      self.inner.subscription.request(self.config.initial_request);
    }
  }

  fn record_next(&self, value: Item) {
    {
      let _callback = self.enter();
      let mut recorded = self.inner.recorded.lock();
      recorded.visit();
      let index = recorded.value_count;
      if self.config.panic_at == Some(index) {
        drop(recorded);
        panic!("test observer panics at value {index}");
      }
      recorded.value_count += 1;
      recorded.notifications.push(Notification::Next(value));
    }
    if self.config.request_on_next > 0 {
      self.inner.subscription.request(self.config.request_on_next);
    }
  }

  fn record_terminal(&self, value: Option<Item>, terminal: Notification<Item, Err>) {
    let _callback = self.enter();
    let mut recorded = self.inner.recorded.lock();
    recorded.visit();
    if let Some(value) = value {
      recorded.value_count += 1;
      recorded.notifications.push(Notification::Next(value));
    }
    recorded.notifications.push(terminal);
    let current = thread::current();
    recorded.terminal_thread = Some((current.id(), current.name().map(str::to_owned)));
    drop(recorded);
    self.inner.terminated.notify_all();
  }
}

impl<Item: Clone, Err> TestObserver<Item, Err> {
  pub fn values(&self) -> Vec<Item> {
    let recorded = self.inner.recorded.lock();
    recorded
      .notifications
      .iter()
      .filter_map(|n| match n {
        Notification::Next(value) => Some(value.clone()),
        _ => None,
      })
      .collect()
  }
}

impl<Item, Err: Clone> TestObserver<Item, Err> {
  pub fn errors(&self) -> Vec<Err> {
    let recorded = self.inner.recorded.lock();
    recorded
      .notifications
      .iter()
      .filter_map(|n| match n {
        Notification::Error(err) => Some(err.clone()),
        _ => None,
      })
      .collect()
  }
}

impl<Item: Clone, Err: Clone> TestObserver<Item, Err> {
  /// Everything received, in arrival order.
  pub fn notifications(&self) -> Vec<Notification<Item, Err>> {
    self.inner.recorded.lock().notifications.clone()
  }
}

struct CallbackGuard<'a>(&'a AtomicUsize);

impl Drop for CallbackGuard<'_> {
  fn drop(&mut self) { self.0.fetch_sub(1, Ordering::AcqRel); }
}

// ==================== consumer traits ====================

impl<Item, Err> Subscriber<Item, Err> for TestObserver<Item, Err> {
  fn on_subscribe(&mut self, subscription: DemandHandle) { self.attach(subscription) }

  fn next(&mut self, value: Item) { self.record_next(value) }

  fn error(self, err: Err) { self.record_terminal(None, Notification::Error(err)) }

  fn complete(self) { self.record_terminal(None, Notification::Complete) }
}

impl<Item, Err> Observer<Item, Err> for TestObserver<Item, Err> {
  fn on_subscribe(&mut self, subscription: SubscriptionHandle) {
    self.attach(DemandHandle::unbounded(subscription))
  }

  fn next(&mut self, value: Item) { self.record_next(value) }

  fn error(self, err: Err) { self.record_terminal(None, Notification::Error(err)) }

  fn complete(self) { self.record_terminal(None, Notification::Complete) }
}

impl<Item, Err> SingleObserver<Item, Err> for TestObserver<Item, Err> {
  fn on_subscribe(&mut self, subscription: SubscriptionHandle) {
    self.attach(DemandHandle::unbounded(subscription))
  }

  fn success(self, value: Item) { self.record_terminal(Some(value), Notification::Complete) }

  fn error(self, err: Err) { self.record_terminal(None, Notification::Error(err)) }
}

impl<Item, Err> MaybeObserver<Item, Err> for TestObserver<Item, Err> {
  fn on_subscribe(&mut self, subscription: SubscriptionHandle) {
    self.attach(DemandHandle::unbounded(subscription))
  }

  fn success(self, value: Item) { self.record_terminal(Some(value), Notification::Complete) }

  fn error(self, err: Err) { self.record_terminal(None, Notification::Error(err)) }

  fn complete(self) { self.record_terminal(None, Notification::Complete) }
}

impl<Item, Err> CompletableObserver<Err> for TestObserver<Item, Err> {
  fn on_subscribe(&mut self, subscription: SubscriptionHandle) {
    self.attach(DemandHandle::unbounded(subscription))
  }

  fn complete(self) { self.record_terminal(None, Notification::Complete) }

  fn error(self, err: Err) { self.record_terminal(None, Notification::Error(err)) }
}

#[cfg(test)]
mod test {
  use std::panic::{catch_unwind, AssertUnwindSafe};

  use super::*;
  use crate::subscription::SubscriptionFlag;

  #[rxsched_macro::test]
  fn records_in_order() {
    let mut observer = TestObserver::<i32, &str>::new();
    let c_observer = observer.clone();
    Observer::on_subscribe(&mut observer, SubscriptionFlag::default().handle());
    Observer::next(&mut observer, 1);
    Observer::next(&mut observer, 2);
    Observer::error(observer, "e");

    assert!(c_observer.is_subscribed());
    assert_eq!(
      c_observer.notifications(),
      vec![Notification::Next(1), Notification::Next(2), Notification::Error("e")]
    );
    assert_eq!(c_observer.terminal_thread(), Some(thread::current().id()));
    assert_eq!(c_observer.callback_threads(), vec![thread::current().id()]);
    assert!(c_observer.await_terminal(Duration::ZERO));
    assert!(!c_observer.overlapped());
  }

  #[rxsched_macro::test]
  fn await_terminal_times_out() {
    let observer = TestObserver::<i32, ()>::new();
    assert!(!observer.await_terminal(Duration::from_millis(10)));
  }

  #[rxsched_macro::test]
  fn await_terminal_wakes_on_other_thread() {
    let observer = TestObserver::<i32, ()>::new();
    let c_observer = observer.clone();
    let handle = thread::spawn(move || {
      thread::sleep(Duration::from_millis(10));
      SingleObserver::success(c_observer, 3);
    });
    assert!(observer.await_terminal(Duration::from_secs(5)));
    handle.join().unwrap();
    assert_eq!(observer.values(), vec![3]);
    assert_eq!(observer.completions(), 1);
    assert_ne!(observer.terminal_thread(), Some(thread::current().id()));
  }

  #[rxsched_macro::test]
  fn cancel_before_subscribe_reaches_upstream() {
    let mut observer = TestObserver::<i32, ()>::new();
    observer.cancel();
    let flag = SubscriptionFlag::default();
    Observer::on_subscribe(&mut observer, flag.handle());
    assert!(flag.is_closed());
  }

  #[rxsched_macro::test]
  fn panic_at_skips_the_value() {
    let mut observer = TestObserver::<i32, ()>::new().panic_at(1);
    Observer::next(&mut observer, 10);
    let result = catch_unwind(AssertUnwindSafe(|| Observer::next(&mut observer, 11)));
    assert!(result.is_err());
    assert_eq!(observer.values(), vec![10]);
    // The guard was released while unwinding.
    let c_observer = observer.clone();
    Observer::complete(observer);
    assert!(!c_observer.overlapped());
    assert_eq!(c_observer.completions(), 1);
  }
}
