//! A dedicated thread running a timed task queue.

use std::{
  cmp::Ordering as CmpOrdering,
  collections::BinaryHeap,
  sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
  },
};

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};

use super::{run_task, Duration, Instant, PendingTasks, Task, TaskHandle, Worker};
use crate::subscription::Subscription;

static THREAD_COUNTER: AtomicUsize = AtomicUsize::new(1);

static TIMER: Lazy<EventLoop> = Lazy::new(|| EventLoop::start("RxSchedulerTimer"));

/// Process-wide loop used to wait out delays for schedulers that have no
/// timer of their own.
pub(crate) fn timer() -> &'static EventLoop { &TIMER }

struct Entry {
  due: Instant,
  seq: u64,
  task: Task,
  handle: TaskHandle,
}

impl PartialEq for Entry {
  fn eq(&self, other: &Self) -> bool { self.due == other.due && self.seq == other.seq }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
  fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> { Some(self.cmp(other)) }
}

impl Ord for Entry {
  fn cmp(&self, other: &Self) -> CmpOrdering {
    // Min-heap: earlier times first, then FIFO by seq
    other
      .due
      .cmp(&self.due)
      .then_with(|| other.seq.cmp(&self.seq))
  }
}

#[derive(Default)]
struct Queue {
  entries: BinaryHeap<Entry>,
  next_seq: u64,
  shutdown: bool,
}

#[derive(Default)]
struct Shared {
  queue: Mutex<Queue>,
  available: Condvar,
}

pub(crate) struct EventLoop {
  shared: Arc<Shared>,
  name: String,
}

impl EventLoop {
  /// Spawn the loop thread, named `{prefix}-{n}`. If the thread cannot be
  /// spawned the loop starts out shut down, so every submission is dropped
  /// as if cancelled.
  pub(crate) fn start(prefix: &str) -> Self {
    let name = format!("{prefix}-{}", THREAD_COUNTER.fetch_add(1, Ordering::Relaxed));
    let shared = Arc::new(Shared::default());
    let c_shared = shared.clone();
    let spawned = std::thread::Builder::new()
      .name(name.clone())
      .spawn(move || run(&c_shared));
    if let Err(err) = spawned {
      tracing::error!(%err, thread = %name, "failed to spawn event loop thread");
      shared.queue.lock().shutdown = true;
    } else {
      tracing::debug!(thread = %name, "event loop started");
    }
    Self { shared, name }
  }

  /// Queue `task`. Returns `false` if the loop is shut down and the task was
  /// dropped.
  pub(crate) fn submit(&self, task: Task, delay: Option<Duration>, handle: TaskHandle) -> bool {
    let mut queue = self.shared.queue.lock();
    if queue.shutdown {
      return false;
    }
    let seq = queue.next_seq;
    queue.next_seq += 1;
    let due = Instant::now() + delay.unwrap_or(Duration::ZERO);
    queue.entries.push(Entry { due, seq, task, handle });
    drop(queue);
    self.shared.available.notify_one();
    true
  }

  /// Stop the thread after its current task and drop everything queued.
  pub(crate) fn shutdown(&self) {
    let entries = {
      let mut queue = self.shared.queue.lock();
      if queue.shutdown {
        return;
      }
      queue.shutdown = true;
      std::mem::take(&mut queue.entries)
    };
    self.shared.available.notify_all();
    tracing::debug!(thread = %self.name, dropped = entries.len(), "event loop shut down");
    // Dropped outside the lock: a task may own the last reference to a worker
    // whose disposal comes back here.
    drop(entries);
  }

  pub(crate) fn is_shutdown(&self) -> bool { self.shared.queue.lock().shutdown }

  #[cfg(test)]
  pub(crate) fn pending(&self) -> usize { self.shared.queue.lock().entries.len() }
}

impl Drop for EventLoop {
  fn drop(&mut self) { self.shutdown(); }
}

fn run(shared: &Shared) {
  loop {
    let entry = {
      let mut queue = shared.queue.lock();
      loop {
        if queue.shutdown {
          return;
        }
        match queue.entries.peek().map(|entry| entry.due) {
          None => shared.available.wait(&mut queue),
          Some(due) if due <= Instant::now() => break queue.entries.pop(),
          Some(due) => {
            shared.available.wait_until(&mut queue, due);
          }
        }
      }
    };
    if let Some(entry) = entry {
      run_task(entry.task, &entry.handle);
    }
  }
}

// ==================== EventLoopWorker ====================

/// Worker backed by an [`EventLoop`] thread, used by
/// [`super::SingleScheduler`] (shared loop) and
/// [`super::NewThreadScheduler`] (owned loop).
pub struct EventLoopWorker {
  event_loop: Arc<EventLoop>,
  pending: Arc<PendingTasks>,
  disposed: AtomicBool,
  owns_loop: bool,
}

impl EventLoopWorker {
  pub(crate) fn shared(event_loop: Arc<EventLoop>) -> Self { Self::new(event_loop, false) }

  pub(crate) fn owning(event_loop: EventLoop) -> Self { Self::new(Arc::new(event_loop), true) }

  fn new(event_loop: Arc<EventLoop>, owns_loop: bool) -> Self {
    Self { event_loop, pending: Arc::default(), disposed: AtomicBool::new(false), owns_loop }
  }

  /// Name of the thread this worker runs its tasks on.
  pub fn thread_name(&self) -> &str { &self.event_loop.name }
}

impl Worker for EventLoopWorker {
  fn schedule(&self, task: Task, delay: Option<Duration>) -> TaskHandle {
    if self.is_disposed() {
      return TaskHandle::closed();
    }
    let handle = TaskHandle::new();
    let Some(key) = self.pending.park(task, handle.clone()) else {
      return handle;
    };
    let gated = Task::new(move || {
      if let Some((task, _)) = key.take() {
        task.run();
      }
    });
    if !self.event_loop.submit(gated, delay, handle.clone()) {
      handle.unsubscribe();
    }
    handle
  }

  fn dispose(&self) {
    if self.disposed.swap(true, Ordering::AcqRel) {
      return;
    }
    tracing::trace!(thread = %self.event_loop.name, "worker disposed");
    self.pending.close();
    if self.owns_loop {
      self.event_loop.shutdown();
    }
  }

  fn is_disposed(&self) -> bool { self.disposed.load(Ordering::Acquire) }
}

#[cfg(test)]
mod test {
  use std::{sync::mpsc, time::Duration as StdDuration};

  use super::*;

  #[rxsched_macro::test]
  fn runs_in_submission_order_on_one_thread() {
    let event_loop = Arc::new(EventLoop::start("TestLoop"));
    let worker = EventLoopWorker::shared(event_loop);
    let (tx, rx) = mpsc::channel();
    for i in 0..100 {
      let tx = tx.clone();
      worker.schedule(
        Task::new(move || {
          tx.send((i, std::thread::current().id())).unwrap();
        }),
        None,
      );
    }
    let received: Vec<_> = (0..100)
      .map(|_| rx.recv_timeout(StdDuration::from_secs(5)).unwrap())
      .collect();
    assert_eq!(received.iter().map(|(i, _)| *i).collect::<Vec<_>>(), (0..100).collect::<Vec<_>>());
    assert!(received.iter().all(|(_, id)| *id == received[0].1));
    assert_ne!(received[0].1, std::thread::current().id());
  }

  #[rxsched_macro::test]
  fn delayed_tasks_run_by_due_time() {
    let worker = EventLoopWorker::owning(EventLoop::start("TestLoop"));
    let (tx, rx) = mpsc::channel();
    let c_tx = tx.clone();
    worker.schedule(Task::new(move || c_tx.send("late").unwrap()), Some(Duration::from_millis(50)));
    worker.schedule(Task::new(move || tx.send("now").unwrap()), None);
    assert_eq!(rx.recv_timeout(StdDuration::from_secs(5)).unwrap(), "now");
    assert_eq!(rx.recv_timeout(StdDuration::from_secs(5)).unwrap(), "late");
  }

  #[rxsched_macro::test]
  fn disposed_worker_skips_pending_tasks() {
    let event_loop = Arc::new(EventLoop::start("TestLoop"));
    let worker = EventLoopWorker::shared(event_loop.clone());
    let ran = Arc::new(AtomicBool::new(false));
    let c_ran = ran.clone();
    let handle = worker.schedule(
      Task::new(move || c_ran.store(true, Ordering::SeqCst)),
      Some(Duration::from_millis(30)),
    );
    worker.dispose();
    worker.dispose();
    assert!(worker.is_disposed());
    assert!(worker.schedule(Task::new(|| {}), None).is_closed());

    std::thread::sleep(StdDuration::from_millis(80));
    assert!(!ran.load(Ordering::SeqCst));
    assert!(handle.is_cancelled());
    assert!(!handle.is_finished());
    // A shared loop outlives its workers.
    assert!(!event_loop.is_shutdown());
  }

  #[rxsched_macro::test]
  fn dispose_releases_delayed_tasks_right_away() {
    let event_loop = Arc::new(EventLoop::start("TestLoop"));
    let worker = EventLoopWorker::shared(event_loop.clone());
    let captured = Arc::new(());
    let c_captured = captured.clone();
    worker.schedule(Task::new(move || drop(c_captured)), Some(Duration::from_secs(60)));
    assert_eq!(Arc::strong_count(&captured), 2);
    assert_eq!(worker.pending.len(), 1);

    worker.dispose();
    assert_eq!(Arc::strong_count(&captured), 1);
    assert_eq!(worker.pending.len(), 0);
    // The loop entry itself waits out its delay, holding nothing.
    assert_eq!(event_loop.pending(), 1);
  }

  #[rxsched_macro::test]
  fn cancelled_task_leaves_no_residue() {
    let worker = EventLoopWorker::owning(EventLoop::start("TestLoop"));
    let (tx, rx) = mpsc::channel();
    let handle = worker.schedule(Task::new(|| {}), Some(Duration::from_millis(10)));
    handle.unsubscribe();
    worker.schedule(Task::new(move || tx.send(()).unwrap()), Some(Duration::from_millis(30)));
    rx.recv_timeout(StdDuration::from_secs(5)).unwrap();
    assert_eq!(worker.pending.len(), 0);
  }

  #[rxsched_macro::test]
  fn owned_loop_stops_with_its_worker() {
    let worker = EventLoopWorker::owning(EventLoop::start("TestLoop"));
    worker.schedule(Task::new(|| {}), Some(Duration::from_secs(60)));
    assert_eq!(worker.event_loop.pending(), 1);
    worker.dispose();
    assert!(worker.event_loop.is_shutdown());
    assert_eq!(worker.event_loop.pending(), 0);
  }

  #[rxsched_macro::test]
  fn cancelled_handle_skips_task() {
    let worker = EventLoopWorker::owning(EventLoop::start("TestLoop"));
    let (tx, rx) = mpsc::channel();
    let c_tx = tx.clone();
    let handle = worker.schedule(
      Task::new(move || c_tx.send("cancelled").unwrap()),
      Some(Duration::from_millis(20)),
    );
    handle.unsubscribe();
    worker.schedule(Task::new(move || tx.send("kept").unwrap()), Some(Duration::from_millis(40)));
    assert_eq!(rx.recv_timeout(StdDuration::from_secs(5)).unwrap(), "kept");
    assert!(handle.is_cancelled());
  }
}
