//! Schedulers and workers.
//!
//! A [`Scheduler`] is a factory of [`Worker`]s. A worker is a sequential task
//! queue bound to one execution unit: tasks submitted to the same worker run
//! one at a time, in submission order (delayed tasks by due time, then
//! submission order). Disposing a worker prevents every task that has not
//! started yet from running; scheduling on a disposed worker is a silent
//! no-op that returns an already closed [`TaskHandle`].
//!
//! | Scheduler | Execution unit |
//! |-----------|----------------|
//! | [`SingleScheduler`] | one persistent thread shared by all its workers |
//! | [`NewThreadScheduler`] | a dedicated thread per worker |
//! | [`ExecutorScheduler`] | a shared executor, serialized per worker |
//! | [`TestScheduler`] | virtual time, driven by the test |

use std::{
  collections::HashMap,
  panic::{catch_unwind, AssertUnwindSafe},
  sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
  },
};

pub use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::{
  error::{panic_message, RxError},
  hooks,
  subscription::Subscription,
};

mod event_loop;
mod executor;
mod new_thread;
mod single;
pub mod test_scheduler;

pub use event_loop::EventLoopWorker;
pub use executor::{Executor, ExecutorScheduler, ExecutorWorker};
#[cfg(feature = "futures-scheduler")]
pub use executor::{thread_pool, ThreadPoolScheduler};
#[cfg(feature = "tokio-scheduler")]
pub use executor::TokioScheduler;
pub use new_thread::NewThreadScheduler;
pub use single::SingleScheduler;
pub use test_scheduler::{TestScheduler, TestWorker};

// ==================== Task ====================

/// A unit of work submitted to a [`Worker`].
pub struct Task(Box<dyn FnOnce() + Send>);

impl Task {
  pub fn new(f: impl FnOnce() + Send + 'static) -> Self { Self(Box::new(f)) }

  #[inline]
  pub fn run(self) { (self.0)() }
}

// ==================== TaskHandle ====================

const PENDING: u8 = 0;
const FINISHED: u8 = 1;
const CANCELLED: u8 = 2;

/// Handle on one scheduled task. Unsubscribing prevents the task from
/// starting; a task that is already running still finishes.
#[derive(Clone)]
pub struct TaskHandle(Arc<AtomicU8>);

impl TaskHandle {
  pub fn new() -> Self { Self(Arc::new(AtomicU8::new(PENDING))) }

  /// A handle for a task that will never run.
  pub fn closed() -> Self { Self(Arc::new(AtomicU8::new(CANCELLED))) }

  pub fn is_finished(&self) -> bool { self.0.load(Ordering::Acquire) == FINISHED }

  pub fn is_cancelled(&self) -> bool { self.0.load(Ordering::Acquire) == CANCELLED }

  pub(crate) fn mark_finished(&self) {
    let _ = self
      .0
      .compare_exchange(PENDING, FINISHED, Ordering::AcqRel, Ordering::Acquire);
  }
}

impl Default for TaskHandle {
  fn default() -> Self { Self::new() }
}

impl Subscription for TaskHandle {
  fn unsubscribe(&self) {
    let _ = self
      .0
      .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire);
  }

  fn is_closed(&self) -> bool { self.0.load(Ordering::Acquire) != PENDING }
}

/// Run `task` unless its handle was cancelled. A panicking task is reported to
/// the error hook instead of tearing down the thread that runs it.
pub(crate) fn run_task(task: Task, handle: &TaskHandle) {
  if handle.is_closed() {
    return;
  }
  if let Err(payload) = catch_unwind(AssertUnwindSafe(|| task.run())) {
    hooks::on_error(RxError::TaskPanicked(panic_message(&*payload)));
  }
  handle.mark_finished();
}

// ==================== PendingTasks ====================

/// Tasks of one worker that have been submitted to a loop or timer shared
/// with others but have not started yet. Closing the registry cancels their
/// handles and drops them right away instead of when they fall due.
#[derive(Default)]
pub(crate) struct PendingTasks {
  inner: Mutex<Pending>,
}

#[derive(Default)]
struct Pending {
  next_key: u64,
  tasks: HashMap<u64, (Task, TaskHandle)>,
  closed: bool,
}

impl PendingTasks {
  /// Register `task`. Returns `None` once closed, with `handle` cancelled.
  pub(crate) fn park(self: &Arc<Self>, task: Task, handle: TaskHandle) -> Option<PendingKey> {
    let mut inner = self.inner.lock();
    if inner.closed {
      drop(inner);
      handle.unsubscribe();
      return None;
    }
    let key = inner.next_key;
    inner.next_key += 1;
    inner.tasks.insert(key, (task, handle));
    Some(PendingKey { tasks: self.clone(), key })
  }

  pub(crate) fn close(&self) {
    let tasks = {
      let mut inner = self.inner.lock();
      inner.closed = true;
      // Cancelled under the lock, so a task whose loop entry fires meanwhile
      // cannot be reported finished.
      inner.tasks.values().for_each(|(_, handle)| handle.unsubscribe());
      std::mem::take(&mut inner.tasks)
    };
    // Dropped outside the lock: a task may own the last reference to a
    // worker whose disposal comes back here.
    drop(tasks);
  }

  #[cfg(test)]
  pub(crate) fn len(&self) -> usize { self.inner.lock().tasks.len() }

  fn take(&self, key: u64) -> Option<(Task, TaskHandle)> { self.inner.lock().tasks.remove(&key) }
}

/// Claim on one parked task. Dropping it unclaimed discards the task.
pub(crate) struct PendingKey {
  tasks: Arc<PendingTasks>,
  key: u64,
}

impl PendingKey {
  /// The task and its handle, unless the registry was closed meanwhile.
  pub(crate) fn take(self) -> Option<(Task, TaskHandle)> { self.tasks.take(self.key) }
}

impl Drop for PendingKey {
  fn drop(&mut self) {
    let entry = self.tasks.take(self.key);
    drop(entry);
  }
}

// ==================== Traits ====================

/// A sequential execution context.
pub trait Worker: Send + Sync + 'static {
  /// Submit `task`, to run after `delay` if one is given.
  fn schedule(&self, task: Task, delay: Option<Duration>) -> TaskHandle;

  /// Stop accepting and running tasks. Idempotent, and safe to call from a
  /// task running on this worker.
  fn dispose(&self);

  fn is_disposed(&self) -> bool;
}

/// A factory of [`Worker`]s.
pub trait Scheduler: Clone + Send + Sync + 'static {
  type Worker: Worker;

  fn create_worker(&self) -> Self::Worker;

  /// Run one task on a fresh worker that is disposed once the task is done.
  fn schedule_direct(&self, task: Task, delay: Option<Duration>) -> TaskHandle {
    let worker = Arc::new(self.create_worker());
    let c_worker = worker.clone();
    worker.schedule(
      Task::new(move || {
        task.run();
        c_worker.dispose();
      }),
      delay,
    )
  }
}

// ==================== Shared instances ====================

static SINGLE: Lazy<SingleScheduler> = Lazy::new(SingleScheduler::new);

/// The process-wide [`SingleScheduler`]: every caller shares one background
/// thread.
pub fn single() -> SingleScheduler { SINGLE.clone() }

/// Returns a Scheduler that creates a new thread for each worker.
pub fn new_thread() -> NewThreadScheduler { NewThreadScheduler::default() }
