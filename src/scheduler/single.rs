use std::sync::Arc;

use super::{
  event_loop::{EventLoop, EventLoopWorker},
  Scheduler,
};

/// A scheduler backed by one persistent background thread.
///
/// Every worker created from the same `SingleScheduler` (and every clone of
/// it) shares that thread, so work from all of them is serialized in
/// submission order. Disposing a worker only discards that worker's pending
/// tasks; the thread lives until [`SingleScheduler::shutdown`] or until the
/// last clone and worker are dropped.
#[derive(Clone)]
pub struct SingleScheduler {
  event_loop: Arc<EventLoop>,
}

impl SingleScheduler {
  pub fn new() -> Self { Self::with_name("RxSingleScheduler") }

  /// Name the backing thread `{prefix}-{n}`.
  pub fn with_name(prefix: &str) -> Self { Self { event_loop: Arc::new(EventLoop::start(prefix)) } }

  /// Stop the backing thread. Pending tasks are dropped and workers created
  /// afterwards accept nothing.
  pub fn shutdown(&self) { self.event_loop.shutdown() }

  pub fn is_shutdown(&self) -> bool { self.event_loop.is_shutdown() }
}

impl Default for SingleScheduler {
  fn default() -> Self { Self::new() }
}

impl Scheduler for SingleScheduler {
  type Worker = EventLoopWorker;

  fn create_worker(&self) -> EventLoopWorker { EventLoopWorker::shared(self.event_loop.clone()) }
}

#[cfg(test)]
mod test {
  use std::{sync::mpsc, thread::ThreadId, time::Duration};

  use super::*;
  use crate::{
    scheduler::{Task, Worker},
    subscription::Subscription,
  };

  fn thread_of(worker: &EventLoopWorker) -> ThreadId {
    let (tx, rx) = mpsc::channel();
    worker.schedule(Task::new(move || tx.send(std::thread::current().id()).unwrap()), None);
    rx.recv_timeout(Duration::from_secs(5)).unwrap()
  }

  #[rxsched_macro::test]
  fn workers_share_one_thread() {
    let scheduler = SingleScheduler::with_name("SharedTest");
    let first = scheduler.create_worker();
    let second = scheduler.clone().create_worker();
    assert_eq!(thread_of(&first), thread_of(&second));
    assert!(first.thread_name().starts_with("SharedTest-"));
  }

  #[rxsched_macro::test]
  fn separate_instances_use_separate_threads() {
    let a = SingleScheduler::new().create_worker();
    let b = SingleScheduler::new().create_worker();
    assert_ne!(thread_of(&a), thread_of(&b));
  }

  #[rxsched_macro::test]
  fn disposing_one_worker_keeps_the_others() {
    let scheduler = SingleScheduler::new();
    let first = scheduler.create_worker();
    let second = scheduler.create_worker();
    first.dispose();
    assert!(!scheduler.is_shutdown());
    let _ = thread_of(&second);
  }

  #[rxsched_macro::test]
  fn shutdown_rejects_new_tasks() {
    let scheduler = SingleScheduler::new();
    scheduler.shutdown();
    let worker = scheduler.create_worker();
    assert!(worker.schedule(Task::new(|| {}), None).is_closed());
  }
}
