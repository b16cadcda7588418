//! Cancellation and demand handles.
//!
//! A [`Subscription`] is the consumer's handle on a running stream. Every
//! method takes `&self`: handles are shared between the consumer, the
//! operators in between and the worker threads delivering signals, and
//! `unsubscribe` must be callable from any of them, any number of times.

use std::{
  fmt::{Debug, Formatter},
  sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
  },
};

use crate::{error::RxError, hooks};

mod proxy;
pub use proxy::ProxySubscription;

/// Demand value meaning "no flow control".
pub const UNBOUNDED: u64 = u64::MAX;

/// Subscription returned to a consumer to allow cancelling.
pub trait Subscription: Send + Sync {
  /// Stop the stream. Idempotent; may race with in-flight delivery.
  fn unsubscribe(&self);

  fn is_closed(&self) -> bool;
}

/// The backpressure channel of a [`crate::flowable::Flowable`]: the consumer
/// grants permission for `n` more values.
pub trait Demand: Subscription {
  fn request(&self, n: u64);
}

// ==================== Handles ====================

/// Cloneable, type-erased [`Subscription`].
#[derive(Clone)]
pub struct SubscriptionHandle(Arc<dyn Subscription>);

impl SubscriptionHandle {
  pub fn new(subscription: Arc<impl Subscription + 'static>) -> Self { Self(subscription) }

  /// A handle that is already closed.
  pub fn closed() -> Self {
    let flag = SubscriptionFlag::default();
    flag.unsubscribe();
    Self::new(Arc::new(flag))
  }

  /// Activates "RAII" behavior: the returned guard unsubscribes when dropped.
  ///
  /// **Attention:** if the guard is not bound to a variable it is dropped
  /// immediately, which is probably not what you want.
  pub fn unsubscribe_when_dropped(self) -> SubscriptionGuard { SubscriptionGuard(self) }
}

impl Subscription for SubscriptionHandle {
  #[inline]
  fn unsubscribe(&self) { self.0.unsubscribe() }

  #[inline]
  fn is_closed(&self) -> bool { self.0.is_closed() }
}

impl Debug for SubscriptionHandle {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SubscriptionHandle")
      .field("is_closed", &self.is_closed())
      .finish()
  }
}

/// Cloneable, type-erased [`Demand`].
#[derive(Clone)]
pub struct DemandHandle(Arc<dyn Demand>);

impl DemandHandle {
  pub fn new(demand: Arc<impl Demand + 'static>) -> Self { Self(demand) }

  /// Adapt a plain subscription; requests on the result are ignored.
  pub fn unbounded(subscription: SubscriptionHandle) -> Self {
    Self(Arc::new(IgnoreDemand(subscription)))
  }
}

impl Subscription for DemandHandle {
  #[inline]
  fn unsubscribe(&self) { self.0.unsubscribe() }

  #[inline]
  fn is_closed(&self) -> bool { self.0.is_closed() }
}

impl Demand for DemandHandle {
  #[inline]
  fn request(&self, n: u64) { self.0.request(n) }
}

impl Debug for DemandHandle {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("DemandHandle")
      .field("is_closed", &self.is_closed())
      .finish()
  }
}

impl From<DemandHandle> for SubscriptionHandle {
  fn from(demand: DemandHandle) -> Self { Self(Arc::new(demand)) }
}

struct IgnoreDemand(SubscriptionHandle);

impl Subscription for IgnoreDemand {
  fn unsubscribe(&self) { self.0.unsubscribe() }

  fn is_closed(&self) -> bool { self.0.is_closed() }
}

impl Demand for IgnoreDemand {
  fn request(&self, _n: u64) {}
}

// ==================== SubscriptionFlag ====================

/// The simplest subscription: a shared cancelled flag.
#[derive(Clone, Default)]
pub struct SubscriptionFlag(Arc<AtomicBool>);

impl SubscriptionFlag {
  /// A handle that closes this flag.
  pub fn handle(&self) -> SubscriptionHandle { SubscriptionHandle::new(Arc::new(self.clone())) }
}

impl Subscription for SubscriptionFlag {
  #[inline]
  fn unsubscribe(&self) { self.0.store(true, Ordering::Release); }

  #[inline]
  fn is_closed(&self) -> bool { self.0.load(Ordering::Acquire) }
}

// ==================== SubscriptionGuard ====================

/// An RAII implementation of a "scoped subscribed" of a subscription.
/// When this structure is dropped (falls out of scope), the subscription will
/// be unsubscribed.
#[derive(Debug)]
#[must_use]
pub struct SubscriptionGuard(SubscriptionHandle);

impl Drop for SubscriptionGuard {
  #[inline]
  fn drop(&mut self) { self.0.unsubscribe() }
}

// ==================== Demand arithmetic ====================

/// Saturating demand accounting shared by the backpressured sources and
/// operators.
pub(crate) mod demand {
  use super::*;

  /// Demand must be positive. Invalid requests are reported to the error hook
  /// and otherwise ignored.
  pub(crate) fn validate(n: u64) -> bool {
    if n == 0 {
      hooks::on_error(RxError::InvalidRequest(n));
      false
    } else {
      true
    }
  }

  /// Add `n` to `requested`, capping at [`UNBOUNDED`]. Returns the previous
  /// value.
  pub(crate) fn add(requested: &AtomicU64, n: u64) -> u64 {
    let mut current = requested.load(Ordering::Acquire);
    loop {
      if current == UNBOUNDED {
        return UNBOUNDED;
      }
      let next = current.saturating_add(n);
      match requested.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
        Ok(prev) => return prev,
        Err(actual) => current = actual,
      }
    }
  }

  /// Subtract `n` delivered values unless demand is unbounded. Returns the
  /// remaining demand.
  pub(crate) fn produced(requested: &AtomicU64, n: u64) -> u64 {
    let mut current = requested.load(Ordering::Acquire);
    loop {
      if current == UNBOUNDED {
        return UNBOUNDED;
      }
      let next = current.saturating_sub(n);
      match requested.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => return next,
        Err(actual) => current = actual,
      }
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[rxsched_macro::test]
  fn flag_is_idempotent() {
    let flag = SubscriptionFlag::default();
    let handle = SubscriptionHandle::new(Arc::new(flag.clone()));
    assert!(!handle.is_closed());
    handle.unsubscribe();
    handle.unsubscribe();
    assert!(flag.is_closed());
    assert!(SubscriptionHandle::closed().is_closed());
  }

  #[rxsched_macro::test]
  fn guard_unsubscribes_on_drop() {
    let flag = SubscriptionFlag::default();
    {
      let _guard = SubscriptionHandle::new(Arc::new(flag.clone())).unsubscribe_when_dropped();
      assert!(!flag.is_closed());
    }
    assert!(flag.is_closed());
  }

  #[rxsched_macro::test]
  fn unbounded_adapter_ignores_requests() {
    let flag = SubscriptionFlag::default();
    let demand = DemandHandle::unbounded(SubscriptionHandle::new(Arc::new(flag.clone())));
    demand.request(10);
    let plain: SubscriptionHandle = demand.into();
    plain.unsubscribe();
    assert!(flag.is_closed());
  }

  #[rxsched_macro::test]
  fn demand_saturates() {
    let requested = AtomicU64::new(0);
    assert_eq!(demand::add(&requested, 5), 0);
    assert_eq!(demand::add(&requested, 3), 5);
    assert_eq!(demand::produced(&requested, 2), 6);
    assert_eq!(demand::add(&requested, UNBOUNDED - 1), 6);
    assert_eq!(requested.load(Ordering::Acquire), UNBOUNDED);
    assert_eq!(demand::produced(&requested, 100), UNBOUNDED);
    assert_eq!(demand::add(&requested, 1), UNBOUNDED);
  }

  #[rxsched_macro::test]
  fn zero_request_is_invalid() {
    let captured = crate::hooks::test_support::CapturedErrors::install();
    assert!(!demand::validate(0));
    assert!(demand::validate(1));
    assert!(captured.messages().contains(&"n > 0 required but it was 0".to_string()));
  }
}
