//! Tunables for the scheduling operators.

use once_cell::sync::Lazy;

/// Prefetch used by `observe_on` when nothing else is configured.
pub const DEFAULT_BUFFER_SIZE: usize = 128;

/// Environment variable overriding [`DEFAULT_BUFFER_SIZE`] for the whole
/// process. Read once, on first use.
pub const BUFFER_SIZE_ENV: &str = "RXSCHED_BUFFER_SIZE";

const MIN_BUFFER_SIZE: usize = 16;

static BUFFER_SIZE: Lazy<usize> =
  Lazy::new(|| parse_buffer_size(std::env::var(BUFFER_SIZE_ENV).ok().as_deref()));

fn parse_buffer_size(raw: Option<&str>) -> usize {
  match raw.map(str::trim).map(str::parse::<usize>) {
    Some(Ok(size)) => size.max(MIN_BUFFER_SIZE),
    Some(Err(err)) => {
      tracing::warn!(%err, var = BUFFER_SIZE_ENV, "ignoring unparsable buffer size");
      DEFAULT_BUFFER_SIZE
    }
    None => DEFAULT_BUFFER_SIZE,
  }
}

/// The process-wide default buffer size.
pub fn buffer_size() -> usize { *BUFFER_SIZE }

/// Options of the backpressured `observe_on`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObserveOnConfig {
  /// How many values are requested from upstream ahead of delivery; also the
  /// capacity of the drain queue.
  pub prefetch: usize,
  /// When `true`, an upstream error waits until the queued values have been
  /// delivered. When `false` it cuts ahead of them.
  pub delay_error: bool,
}

impl Default for ObserveOnConfig {
  fn default() -> Self { Self { prefetch: buffer_size(), delay_error: false } }
}

impl ObserveOnConfig {
  /// A prefetch of zero is bumped to one.
  pub fn with_prefetch(mut self, prefetch: usize) -> Self {
    self.prefetch = prefetch.max(1);
    self
  }

  pub fn with_delay_error(mut self, delay_error: bool) -> Self {
    self.delay_error = delay_error;
    self
  }

  /// Number of deliveries after which upstream is asked for more.
  pub(crate) fn replenish_limit(&self) -> usize { (self.prefetch - (self.prefetch >> 2)).max(1) }
}
