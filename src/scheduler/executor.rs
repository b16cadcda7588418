//! Schedulers over a shared executor (a thread pool or a tokio runtime).
//!
//! The executor may run jobs on any of its threads, in parallel. Each worker
//! keeps its own lock-free queue and drains it from at most one executor job
//! at a time, so tasks of one worker stay sequential and in order while
//! different workers run in parallel.

use std::sync::{
  atomic::{AtomicBool, AtomicUsize, Ordering},
  Arc,
};

use crossbeam::queue::SegQueue;

use super::{
  event_loop::timer, run_task, Duration, PendingTasks, Scheduler, Task, TaskHandle, Worker,
};
use crate::subscription::Subscription;

/// Something that runs a job on some thread, soon.
pub trait Executor: Clone + Send + Sync + 'static {
  fn execute(&self, job: Box<dyn FnOnce() + Send>);
}

#[cfg(feature = "futures-scheduler")]
impl Executor for futures::executor::ThreadPool {
  fn execute(&self, job: Box<dyn FnOnce() + Send>) { self.spawn_ok(async move { job() }) }
}

#[cfg(feature = "tokio-scheduler")]
impl Executor for tokio::runtime::Handle {
  // Tasks are synchronous and may block, so they go to the blocking pool.
  fn execute(&self, job: Box<dyn FnOnce() + Send>) { drop(self.spawn_blocking(job)); }
}

#[derive(Clone)]
pub struct ExecutorScheduler<E> {
  executor: E,
}

impl<E: Executor> ExecutorScheduler<E> {
  pub fn new(executor: E) -> Self { Self { executor } }
}

impl<E: Executor> Scheduler for ExecutorScheduler<E> {
  type Worker = ExecutorWorker<E>;

  fn create_worker(&self) -> ExecutorWorker<E> {
    ExecutorWorker {
      inner: Arc::new(WorkerQueue {
        executor: self.executor.clone(),
        queue: SegQueue::new(),
        wip: AtomicUsize::new(0),
        disposed: AtomicBool::new(false),
      }),
      delayed: Arc::default(),
    }
  }
}

pub struct ExecutorWorker<E> {
  inner: Arc<WorkerQueue<E>>,
  /// Tasks waiting out their delay on the shared timer.
  delayed: Arc<PendingTasks>,
}

struct WorkerQueue<E> {
  executor: E,
  queue: SegQueue<(Task, TaskHandle)>,
  wip: AtomicUsize,
  disposed: AtomicBool,
}

impl<E: Executor> WorkerQueue<E> {
  fn enqueue(self: &Arc<Self>, task: Task, handle: TaskHandle) {
    if self.disposed.load(Ordering::Acquire) {
      handle.unsubscribe();
      return;
    }
    self.queue.push((task, handle));
    if self.wip.fetch_add(1, Ordering::AcqRel) == 0 {
      let this = self.clone();
      self.executor.execute(Box::new(move || this.drain()));
    }
  }

  fn drain(&self) {
    let mut missed = 1;
    loop {
      while let Some((task, handle)) = self.queue.pop() {
        if self.disposed.load(Ordering::Acquire) {
          handle.unsubscribe();
          drop(task);
          self.clear();
          return;
        }
        run_task(task, &handle);
      }
      let prev = self.wip.fetch_sub(missed, Ordering::AcqRel);
      missed = prev - missed;
      if missed == 0 {
        break;
      }
    }
  }

  fn clear(&self) {
    while let Some((task, handle)) = self.queue.pop() {
      handle.unsubscribe();
      drop(task);
    }
  }
}

impl<E: Executor> Worker for ExecutorWorker<E> {
  fn schedule(&self, task: Task, delay: Option<Duration>) -> TaskHandle {
    if self.is_disposed() {
      return TaskHandle::closed();
    }
    let handle = TaskHandle::new();
    match delay {
      Some(delay) if !delay.is_zero() => {
        let Some(key) = self.delayed.park(task, handle.clone()) else {
          return handle;
        };
        let inner = self.inner.clone();
        let enqueue = Task::new(move || {
          if let Some((task, handle)) = key.take() {
            if !handle.is_closed() {
              inner.enqueue(task, handle);
            }
          }
        });
        if !timer().submit(enqueue, Some(delay), TaskHandle::new()) {
          handle.unsubscribe();
        }
      }
      _ => self.inner.enqueue(task, handle.clone()),
    }
    handle
  }

  fn dispose(&self) {
    if !self.inner.disposed.swap(true, Ordering::AcqRel) {
      tracing::trace!("executor worker disposed");
      self.delayed.close();
      // Clear only when no drain is running; a running drain clears on its
      // next poll.
      if self.inner.wip.fetch_add(1, Ordering::AcqRel) == 0 {
        self.inner.clear();
      }
    }
  }

  fn is_disposed(&self) -> bool { self.inner.disposed.load(Ordering::Acquire) }
}

// ==================== Thread pool ====================

#[cfg(feature = "futures-scheduler")]
pub type ThreadPoolScheduler = ExecutorScheduler<futures::executor::ThreadPool>;

#[cfg(feature = "futures-scheduler")]
static THREAD_POOL: once_cell::sync::OnceCell<futures::executor::ThreadPool> =
  once_cell::sync::OnceCell::new();

/// The process-wide thread pool scheduler, created on first use.
#[cfg(feature = "futures-scheduler")]
pub fn thread_pool() -> std::io::Result<ThreadPoolScheduler> {
  let pool = THREAD_POOL.get_or_try_init(|| {
    futures::executor::ThreadPool::builder()
      .name_prefix("RxThreadPool-")
      .create()
  })?;
  Ok(ExecutorScheduler::new(pool.clone()))
}

#[cfg(feature = "tokio-scheduler")]
pub type TokioScheduler = ExecutorScheduler<tokio::runtime::Handle>;

#[cfg(feature = "tokio-scheduler")]
impl TokioScheduler {
  /// Schedule on the runtime the caller is running in.
  ///
  /// # Panics
  ///
  /// Panics when called outside a tokio runtime.
  pub fn current() -> Self { Self::new(tokio::runtime::Handle::current()) }
}

#[cfg(test)]
mod test {
  use std::{
    sync::mpsc,
    thread,
    time::{Duration as StdDuration, Instant},
  };

  use parking_lot::Mutex;

  use super::*;

  /// Runs every job on a fresh thread: maximal parallelism between jobs.
  #[derive(Clone)]
  struct SpawnEach;

  impl Executor for SpawnEach {
    fn execute(&self, job: Box<dyn FnOnce() + Send>) {
      thread::spawn(job);
    }
  }

  #[rxsched_macro::test]
  fn tasks_of_one_worker_run_in_order() {
    let worker = ExecutorScheduler::new(SpawnEach).create_worker();
    let seen = Arc::new(Mutex::new(vec![]));
    let (tx, rx) = mpsc::channel();
    for i in 0..200 {
      let seen = seen.clone();
      let tx = tx.clone();
      worker.schedule(
        Task::new(move || {
          seen.lock().push(i);
          if i == 199 {
            tx.send(()).unwrap();
          }
        }),
        None,
      );
    }
    rx.recv_timeout(StdDuration::from_secs(5)).unwrap();
    assert_eq!(*seen.lock(), (0..200).collect::<Vec<_>>());
  }

  #[rxsched_macro::test]
  fn delayed_task_waits() {
    let worker = ExecutorScheduler::new(SpawnEach).create_worker();
    let (tx, rx) = mpsc::channel();
    let start = Instant::now();
    worker.schedule(
      Task::new(move || tx.send(Instant::now()).unwrap()),
      Some(Duration::from_millis(30)),
    );
    let ran_at = rx.recv_timeout(StdDuration::from_secs(5)).unwrap();
    assert!(ran_at - start >= Duration::from_millis(30));
  }

  #[rxsched_macro::test]
  fn dispose_drops_pending_and_future_tasks() {
    let worker = ExecutorScheduler::new(SpawnEach).create_worker();
    let (tx, rx) = mpsc::channel::<i32>();
    let c_tx = tx.clone();
    let delayed =
      worker.schedule(Task::new(move || c_tx.send(1).unwrap()), Some(Duration::from_millis(20)));
    worker.dispose();
    assert!(worker.schedule(Task::new(move || tx.send(2).unwrap()), None).is_closed());
    assert!(rx.recv_timeout(StdDuration::from_millis(100)).is_err());
    assert!(delayed.is_cancelled());
  }

  #[rxsched_macro::test]
  fn dispose_releases_delayed_tasks_right_away() {
    let worker = ExecutorScheduler::new(SpawnEach).create_worker();
    let captured = Arc::new(());
    let c_captured = captured.clone();
    let handle =
      worker.schedule(Task::new(move || drop(c_captured)), Some(Duration::from_secs(60)));
    assert_eq!(Arc::strong_count(&captured), 2);
    worker.dispose();
    assert_eq!(Arc::strong_count(&captured), 1);
    assert!(handle.is_cancelled());
  }

  #[cfg(feature = "futures-scheduler")]
  #[rxsched_macro::test]
  fn shared_thread_pool_runs_tasks_off_thread() {
    let worker = thread_pool().unwrap().create_worker();
    let (tx, rx) = mpsc::channel();
    worker.schedule(Task::new(move || tx.send(thread::current().id()).unwrap()), None);
    let id = rx.recv_timeout(StdDuration::from_secs(5)).unwrap();
    assert_ne!(id, thread::current().id());
  }
}
