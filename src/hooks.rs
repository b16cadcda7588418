//! Process-wide error hook.
//!
//! Some failures happen after the downstream is gone: a consumer callback
//! panicked, a cancelled subscription received an error, or a source broke
//! the protocol. They cannot be signalled through `error`, so they are routed
//! here instead. Without a custom handler they are logged through `tracing`.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::error::RxError;

type ErrorHandler = Arc<dyn Fn(&RxError) + Send + Sync>;

static ERROR_HANDLER: Lazy<RwLock<Option<ErrorHandler>>> = Lazy::new(|| RwLock::new(None));

/// Install a handler receiving every undeliverable error, replacing the
/// previous one.
pub fn set_error_handler(handler: impl Fn(&RxError) + Send + Sync + 'static) {
  *ERROR_HANDLER.write() = Some(Arc::new(handler));
}

/// Restore the default handler, which logs through `tracing::error!`.
pub fn reset_error_handler() { ERROR_HANDLER.write().take(); }

/// Report an undeliverable error.
pub fn on_error(err: RxError) {
  // Clone out so the handler runs without the lock held.
  let handler = ERROR_HANDLER.read().clone();
  match handler {
    Some(handler) => handler(&err),
    None => tracing::error!(error = %err, "undeliverable error"),
  }
}

#[cfg(test)]
pub(crate) mod test_support {
  use parking_lot::{const_mutex, Mutex, MutexGuard};

  use super::*;

  static HOOK_LOCK: Mutex<()> = const_mutex(());

  /// Installs a collecting handler for the lifetime of the guard. Tests that
  /// assert on hook output hold it so they don't observe each other.
  pub(crate) struct CapturedErrors {
    errors: Arc<Mutex<Vec<String>>>,
    _lock: MutexGuard<'static, ()>,
  }

  impl CapturedErrors {
    pub(crate) fn install() -> Self {
      let lock = HOOK_LOCK.lock();
      let errors = Arc::new(Mutex::new(Vec::new()));
      let c_errors = errors.clone();
      set_error_handler(move |err| c_errors.lock().push(err.to_string()));
      Self { errors, _lock: lock }
    }

    pub(crate) fn messages(&self) -> Vec<String> { self.errors.lock().clone() }
  }

  impl Drop for CapturedErrors {
    fn drop(&mut self) { reset_error_handler(); }
  }
}
