//! Crate-level error type.
//!
//! Errors raised by a source travel to the consumer through the generic `Err`
//! parameter of each reactive shape. `RxError` only covers failures that the
//! scheduling machinery itself detects and that have no downstream left to
//! receive them; those are handed to the process-wide hook in
//! [`crate::hooks`].

use std::any::Any;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RxError {
  /// An upstream emitted more values than were requested and the bounded
  /// drain queue overflowed.
  #[error("could not emit value due to lack of requests (queue capacity {capacity})")]
  MissingBackpressure { capacity: usize },

  /// `request(0)` was issued; demand must be positive.
  #[error("n > 0 required but it was {0}")]
  InvalidRequest(u64),

  /// A consumer callback panicked while the drain loop was delivering to it.
  #[error("consumer callback panicked: {0}")]
  CallbackPanicked(String),

  /// A task submitted to a worker panicked.
  #[error("scheduled task panicked: {0}")]
  TaskPanicked(String),

  /// A lambda subscriber without an error handler received an error.
  #[error("the error was not handled by the subscriber: {0}")]
  OnErrorNotImplemented(String),

  /// A source broke the signal protocol.
  #[error("protocol violation: {0}")]
  ProtocolViolation(&'static str),
}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "<non-string panic payload>".to_string()
  }
}
