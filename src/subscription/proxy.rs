//! A subscription handed out before the subscription it stands for exists.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::{demand, Demand, DemandHandle, Subscription};

/// Forwards cancellation and demand to an upstream handle that is attached
/// later with [`ProxySubscription::set`].
///
/// Requests made before the upstream arrives are accumulated and forwarded in
/// one call on attach; a cancellation made before then cancels the upstream as
/// soon as it is attached. The lock only guards the slot and is never held
/// while calling into the upstream.
#[derive(Default)]
pub struct ProxySubscription {
  closed: AtomicBool,
  state: Mutex<ProxyState>,
}

#[derive(Default)]
struct ProxyState {
  upstream: Option<DemandHandle>,
  pending: u64,
}

impl ProxySubscription {
  /// Attach the upstream. Only the first call has an effect.
  pub fn set(&self, upstream: DemandHandle) {
    let pending = {
      let mut state = self.state.lock();
      if state.upstream.is_some() {
        drop(state);
        tracing::warn!("upstream attached twice to the same proxy subscription");
        upstream.unsubscribe();
        return;
      }
      if self.closed.load(Ordering::Acquire) {
        None
      } else {
        state.upstream = Some(upstream.clone());
        Some(std::mem::take(&mut state.pending))
      }
    };

    match pending {
      None => upstream.unsubscribe(),
      Some(0) => {}
      Some(n) => upstream.request(n),
    }
  }

  pub fn has_upstream(&self) -> bool { self.state.lock().upstream.is_some() }
}

impl Subscription for ProxySubscription {
  fn unsubscribe(&self) {
    if self.closed.swap(true, Ordering::AcqRel) {
      return;
    }
    let upstream = self.state.lock().upstream.take();
    if let Some(upstream) = upstream {
      upstream.unsubscribe();
    }
  }

  fn is_closed(&self) -> bool { self.closed.load(Ordering::Acquire) }
}

impl Demand for ProxySubscription {
  fn request(&self, n: u64) {
    if !demand::validate(n) {
      return;
    }
    let upstream = {
      let mut state = self.state.lock();
      match &state.upstream {
        Some(upstream) => Some(upstream.clone()),
        None => {
          state.pending = state.pending.saturating_add(n);
          None
        }
      }
    };
    if let Some(upstream) = upstream {
      upstream.request(n);
    }
  }
}

#[cfg(test)]
mod test {
  use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
  };

  use super::*;

  #[derive(Default)]
  struct Recording {
    requested: AtomicU64,
    closed: AtomicBool,
  }

  impl Subscription for Recording {
    fn unsubscribe(&self) { self.closed.store(true, Ordering::Release); }

    fn is_closed(&self) -> bool { self.closed.load(Ordering::Acquire) }
  }

  impl Demand for Recording {
    fn request(&self, n: u64) { demand::add(&self.requested, n); }
  }

  #[rxsched_macro::test]
  fn requests_before_attach_are_accumulated() {
    let proxy = ProxySubscription::default();
    proxy.request(3);
    proxy.request(4);
    let upstream = Arc::new(Recording::default());
    proxy.set(DemandHandle::new(upstream.clone()));
    assert_eq!(upstream.requested.load(Ordering::Acquire), 7);

    proxy.request(1);
    assert_eq!(upstream.requested.load(Ordering::Acquire), 8);
  }

  #[rxsched_macro::test]
  fn cancel_before_attach_cancels_upstream() {
    let proxy = ProxySubscription::default();
    proxy.request(3);
    proxy.unsubscribe();
    assert!(proxy.is_closed());

    let upstream = Arc::new(Recording::default());
    proxy.set(DemandHandle::new(upstream.clone()));
    assert!(upstream.is_closed());
    assert_eq!(upstream.requested.load(Ordering::Acquire), 0);
    assert!(!proxy.has_upstream());
  }

  #[rxsched_macro::test]
  fn cancel_after_attach() {
    let proxy = ProxySubscription::default();
    let upstream = Arc::new(Recording::default());
    proxy.set(DemandHandle::new(upstream.clone()));
    assert!(proxy.has_upstream());
    proxy.unsubscribe();
    proxy.unsubscribe();
    assert!(upstream.is_closed());
  }

  #[rxsched_macro::test]
  fn second_upstream_is_rejected() {
    let proxy = ProxySubscription::default();
    let first = Arc::new(Recording::default());
    let second = Arc::new(Recording::default());
    proxy.set(DemandHandle::new(first.clone()));
    proxy.set(DemandHandle::new(second.clone()));
    assert!(!first.is_closed());
    assert!(second.is_closed());
  }
}
