//! Example: Custom Scheduler
//!
//! Any type implementing `Scheduler` can be handed to `subscribe_on` and
//! `observe_on`. This one logs every task and runs it on a dedicated thread
//! per worker, fed through a channel.

use std::{
  sync::{
    atomic::{AtomicBool, Ordering},
    mpsc, Arc,
  },
  thread,
};

use rxsched::prelude::*;

// ==================================================================================
// 1. The Worker: one thread draining a channel
// ==================================================================================

pub struct VerboseWorker {
  name: String,
  jobs: mpsc::Sender<(Task, TaskHandle, Option<Duration>)>,
  disposed: Arc<AtomicBool>,
}

impl VerboseWorker {
  fn spawn(name: String) -> Self {
    let (jobs, rx) = mpsc::channel::<(Task, TaskHandle, Option<Duration>)>();
    let disposed = Arc::new(AtomicBool::new(false));
    let c_disposed = disposed.clone();
    let c_name = name.clone();
    thread::Builder::new()
      .name(name.clone())
      .spawn(move || {
        for (task, handle, delay) in rx {
          if let Some(delay) = delay {
            // Tasks are sequential, so blocking here delays everything behind it.
            thread::sleep(delay);
          }
          if c_disposed.load(Ordering::Acquire) || handle.is_closed() {
            println!("[{c_name}] skipping task");
            continue;
          }
          println!("[{c_name}] running task");
          task.run();
        }
        println!("[{c_name}] stopped");
      })
      .expect("failed to spawn worker thread");
    Self { name, jobs, disposed }
  }
}

impl Worker for VerboseWorker {
  fn schedule(&self, task: Task, delay: Option<Duration>) -> TaskHandle {
    if self.is_disposed() {
      return TaskHandle::closed();
    }
    println!("[{}] scheduling task, delay {delay:?}", self.name);
    let handle = TaskHandle::new();
    if self.jobs.send((task, handle.clone(), delay)).is_err() {
      handle.unsubscribe();
    }
    handle
  }

  fn dispose(&self) {
    if !self.disposed.swap(true, Ordering::AcqRel) {
      println!("[{}] disposed", self.name);
    }
  }

  fn is_disposed(&self) -> bool { self.disposed.load(Ordering::Acquire) }
}

// ==================================================================================
// 2. The Scheduler: a worker factory
// ==================================================================================

#[derive(Clone)]
pub struct VerboseScheduler(&'static str);

impl Scheduler for VerboseScheduler {
  type Worker = VerboseWorker;

  fn create_worker(&self) -> VerboseWorker { VerboseWorker::spawn(format!("{}-worker", self.0)) }
}

// ==================================================================================
// 3. Usage
// ==================================================================================

fn main() {
  println!("--- Starting Custom Scheduler Example ---");

  let observer = flowable::from_iter(1..=3)
    .subscribe_on(VerboseScheduler("producer"))
    .observe_on(VerboseScheduler("consumer"))
    .subscribe_with(TestObserver::<i32, std::convert::Infallible>::new());

  observer.await_terminal(Duration::from_secs(5));
  println!(
    "Consumer received {:?} on {:?}",
    observer.values(),
    observer.terminal_thread_name()
  );

  println!("--- Example Finished ---");
}
