use std::sync::Arc;

use super::{
  event_loop::{EventLoop, EventLoopWorker},
  Scheduler,
};

/// Creates a dedicated thread per worker; the thread stops when the worker is
/// disposed or dropped.
#[derive(Clone)]
pub struct NewThreadScheduler {
  prefix: Arc<str>,
}

impl NewThreadScheduler {
  /// Name each worker thread `{prefix}-{n}`.
  pub fn with_name(prefix: &str) -> Self { Self { prefix: prefix.into() } }
}

impl Default for NewThreadScheduler {
  fn default() -> Self { Self::with_name("RxNewThreadScheduler") }
}

impl Scheduler for NewThreadScheduler {
  type Worker = EventLoopWorker;

  fn create_worker(&self) -> EventLoopWorker {
    EventLoopWorker::owning(EventLoop::start(&self.prefix))
  }
}
