//! Test Scheduler for deterministic testing of scheduled work.
//!
//! Provides virtual time that only advances when explicitly instructed.
//! Tasks run synchronously on the thread that advances time, in order of their
//! due time and then FIFO, so a test can observe every intermediate state of
//! an asynchronous pipeline without sleeping.
//!
//! # Usage
//!
//! ```rust
//! use rxsched::prelude::*;
//!
//! let scheduler = TestScheduler::new();
//! let observer = TestObserver::<i32, std::convert::Infallible>::new();
//! single::just(42)
//!   .observe_on(scheduler.clone())
//!   .subscribe_with(observer.clone());
//!
//! assert!(observer.values().is_empty());
//! scheduler.trigger_actions();
//! assert_eq!(observer.values(), vec![42]);
//! ```
//!
//! Every `TestScheduler::new()` has its own clock and queue; clones share them.

use std::{
  cmp::Ordering as CmpOrdering,
  collections::BinaryHeap,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
};

use parking_lot::Mutex;

use super::{run_task, Duration, Scheduler, Task, TaskHandle, Worker};

// ==================== Internal State ====================

#[derive(Default)]
struct TestSchedulerState {
  virtual_time: Duration,
  task_queue: BinaryHeap<ScheduledTask>,
  next_task_id: usize,
}

struct ScheduledTask {
  scheduled_time: Duration,
  task_id: usize,
  task: Task,
  handle: TaskHandle,
}

impl PartialEq for ScheduledTask {
  fn eq(&self, other: &Self) -> bool {
    self.scheduled_time == other.scheduled_time && self.task_id == other.task_id
  }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
  fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> { Some(self.cmp(other)) }
}

impl Ord for ScheduledTask {
  fn cmp(&self, other: &Self) -> CmpOrdering {
    // Min-heap: earlier times first, then FIFO by task_id
    other
      .scheduled_time
      .cmp(&self.scheduled_time)
      .then_with(|| other.task_id.cmp(&self.task_id))
  }
}

// ==================== TestScheduler ====================

/// A virtual time scheduler for deterministic testing.
#[derive(Clone, Default)]
pub struct TestScheduler {
  state: Arc<Mutex<TestSchedulerState>>,
}

impl TestScheduler {
  pub fn new() -> Self { Self::default() }

  /// Get the current virtual time.
  pub fn now(&self) -> Duration { self.state.lock().virtual_time }

  /// Get the number of queued tasks, including cancelled ones not yet
  /// discarded.
  pub fn pending_count(&self) -> usize { self.state.lock().task_queue.len() }

  pub fn is_empty(&self) -> bool { self.state.lock().task_queue.is_empty() }

  /// Advance virtual time by the specified duration and execute due tasks.
  ///
  /// Tasks are executed in order of their scheduled time, with FIFO ordering
  /// for tasks scheduled at the same time. Tasks scheduled while advancing
  /// run too if they fall due before the target time.
  pub fn advance_by(&self, duration: Duration) {
    let target_time = self.now() + duration;
    self.execute_tasks_until(Some(target_time));
    self.state.lock().virtual_time = target_time;
  }

  /// Execute the tasks due at the current virtual time.
  pub fn trigger_actions(&self) { self.advance_by(Duration::ZERO) }

  /// Execute all pending tasks by advancing time to each task's scheduled
  /// time.
  pub fn flush(&self) { self.execute_tasks_until(None) }

  fn execute_tasks_until(&self, target_time: Option<Duration>) {
    loop {
      let task = {
        let mut state = self.state.lock();
        let due = state
          .task_queue
          .peek()
          .is_some_and(|peek| target_time.is_none_or(|limit| peek.scheduled_time <= limit));
        if !due {
          break;
        }
        let scheduled_task = state.task_queue.pop();
        if let Some(scheduled_task) = &scheduled_task {
          state.virtual_time = state.virtual_time.max(scheduled_task.scheduled_time);
        }
        scheduled_task
      };
      // Run outside the lock: tasks schedule more work on this scheduler.
      if let Some(scheduled_task) = task {
        run_task(scheduled_task.task, &scheduled_task.handle);
      }
    }
  }

  fn submit(&self, task: Task, delay: Option<Duration>) -> TaskHandle {
    let mut state = self.state.lock();
    let scheduled_time = state.virtual_time + delay.unwrap_or(Duration::ZERO);
    let task_id = state.next_task_id;
    state.next_task_id += 1;
    let handle = TaskHandle::new();
    state.task_queue.push(ScheduledTask { scheduled_time, task_id, task, handle: handle.clone() });
    handle
  }
}

impl Scheduler for TestScheduler {
  type Worker = TestWorker;

  fn create_worker(&self) -> TestWorker {
    TestWorker { scheduler: self.clone(), disposed: Arc::default() }
  }
}

/// Worker of a [`TestScheduler`]; all workers share its clock and queue.
pub struct TestWorker {
  scheduler: TestScheduler,
  disposed: Arc<AtomicBool>,
}

impl Worker for TestWorker {
  fn schedule(&self, task: Task, delay: Option<Duration>) -> TaskHandle {
    if self.is_disposed() {
      return TaskHandle::closed();
    }
    let disposed = self.disposed.clone();
    self.scheduler.submit(
      Task::new(move || {
        if !disposed.load(Ordering::Acquire) {
          task.run();
        }
      }),
      delay,
    )
  }

  fn dispose(&self) { self.disposed.store(true, Ordering::Release); }

  fn is_disposed(&self) -> bool { self.disposed.load(Ordering::Acquire) }
}
