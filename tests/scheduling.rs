//! Cross-thread behavior of `subscribe_on` / `observe_on` on real schedulers.

use std::{
  convert::Infallible,
  sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  },
  thread,
};

use parking_lot::Mutex;
use rxsched::prelude::*;

const TIMEOUT: Duration = Duration::from_secs(10);

fn init_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
  let deadline = Instant::now() + TIMEOUT;
  while !condition() {
    if Instant::now() > deadline {
      return false;
    }
    thread::sleep(Duration::from_millis(1));
  }
  true
}

#[rxsched_macro::test]
fn flowable_preserves_order_across_threads() {
  init_tracing();
  let observer = flowable::from_iter(0..10_000)
    .subscribe_on(scheduler::new_thread())
    .observe_on_with(scheduler::single(), ObserveOnConfig::default().with_prefetch(32))
    .subscribe_with(TestObserver::<i32, Infallible>::new());

  assert!(observer.await_terminal(TIMEOUT));
  assert_eq!(observer.values(), (0..10_000).collect::<Vec<_>>());
  assert_eq!(observer.completions(), 1);
  assert!(!observer.overlapped());
}

#[rxsched_macro::test]
fn nothing_follows_a_terminal_signal() {
  init_tracing();
  let observer = observable::create(|mut emitter: Emitter<i32, &'static str>| {
    emitter.next(1);
    emitter.error("first");
    emitter.next(2);
    emitter.error("second");
    emitter.complete();
  })
  .subscribe_on(scheduler::new_thread())
  .observe_on(scheduler::new_thread())
  .subscribe_with(TestObserver::new());

  assert!(observer.await_terminal(TIMEOUT));
  // Give stray signals a chance to show up.
  thread::sleep(Duration::from_millis(20));
  assert_eq!(
    observer.notifications(),
    vec![Notification::Next(1), Notification::Error("first")]
  );
}

#[rxsched_macro::test]
fn observe_on_never_outruns_its_prefetch() {
  let produced = Arc::new(AtomicUsize::new(0));
  let c_produced = produced.clone();
  let scheduler = TestScheduler::new();
  let observer = flowable::from_iter((0..1_000).inspect(move |_| {
    c_produced.fetch_add(1, Ordering::SeqCst);
  }))
  .observe_on_with(scheduler.clone(), ObserveOnConfig::default().with_prefetch(16))
  .subscribe_with(TestObserver::<i32, Infallible>::with_request(5));

  scheduler.flush();
  assert_eq!(observer.values(), vec![0, 1, 2, 3, 4]);
  // The source may peek one value ahead of what it was asked for.
  assert!(produced.load(Ordering::SeqCst) <= 16 + 1);

  observer.request(20);
  scheduler.flush();
  assert_eq!(observer.values().len(), 25);
  // Replenished in batches, but never beyond the prefetch window.
  assert!(produced.load(Ordering::SeqCst) <= 25 + 16 + 1);
}

#[rxsched_macro::test]
fn single_drain_under_concurrent_producers() {
  init_tracing();
  const THREADS: usize = 4;
  const PER_THREAD: usize = 2_500;

  let observer = observable::create(|emitter: Emitter<usize, ()>| {
    let producers: Vec<_> = (0..THREADS)
      .map(|t| {
        let mut emitter = emitter.clone();
        thread::spawn(move || {
          for i in 0..PER_THREAD {
            emitter.next(t * PER_THREAD + i);
          }
        })
      })
      .collect();
    for producer in producers {
      producer.join().unwrap();
    }
    let mut emitter = emitter;
    emitter.complete();
  })
  .observe_on(scheduler::single())
  .subscribe_with(TestObserver::new());

  assert!(observer.await_terminal(TIMEOUT));
  assert!(!observer.overlapped());
  assert_eq!(observer.callback_threads().len(), 1);
  let values = observer.values();
  assert_eq!(values.len(), THREADS * PER_THREAD);
  for t in 0..THREADS {
    let of_thread: Vec<_> = values.iter().copied().filter(|v| v / PER_THREAD == t).collect();
    assert_eq!(of_thread, (t * PER_THREAD..(t + 1) * PER_THREAD).collect::<Vec<_>>());
  }
}

#[rxsched_macro::test]
fn cancel_cuts_delivery_off() {
  init_tracing();
  let observer = TestObserver::<u64, Infallible>::with_request(10);
  flowable::from_iter(0..)
    .subscribe_on(scheduler::new_thread())
    .observe_on(scheduler::new_thread())
    .subscribe_with(observer.clone());

  assert!(wait_until(|| observer.values().len() == 10));
  observer.cancel();
  observer.request(10);
  thread::sleep(Duration::from_millis(50));
  assert_eq!(observer.values(), (0..10).collect::<Vec<_>>());
  assert!(!observer.is_terminated());
}

#[rxsched_macro::test]
fn subscribe_on_defers_the_side_effect() {
  let scheduler = TestScheduler::new();
  let calls = Arc::new(AtomicUsize::new(0));
  let c_calls = calls.clone();
  let observer =
    single::from_callable(move || Ok::<_, ()>(c_calls.fetch_add(1, Ordering::SeqCst)))
      .subscribe_on(scheduler.clone())
      .subscribe_with(TestObserver::new());

  assert!(observer.is_subscribed());
  assert_eq!(calls.load(Ordering::SeqCst), 0);
  scheduler.flush();
  assert_eq!(calls.load(Ordering::SeqCst), 1);
  assert_eq!(observer.values(), vec![0]);
}

#[rxsched_macro::test]
fn subscribe_on_runs_the_side_effect_elsewhere() {
  let ran_on = Arc::new(Mutex::new(None));
  let c_ran_on = ran_on.clone();
  let observer = single::from_callable(move || {
    *c_ran_on.lock() = Some(thread::current().id());
    Ok::<_, ()>(())
  })
  .subscribe_on(scheduler::new_thread())
  .subscribe_with(TestObserver::new());

  assert!(observer.await_terminal(TIMEOUT));
  let ran_on = (*ran_on.lock()).expect("callable never ran");
  assert_ne!(ran_on, thread::current().id());
  assert_eq!(observer.terminal_thread(), Some(ran_on));
}

#[rxsched_macro::test]
fn completable_pipeline_completes_on_the_observing_worker() {
  init_tracing();
  let produced_on = Arc::new(Mutex::new(None));
  let c_produced_on = produced_on.clone();
  let observer = completable::from_callable(move || {
    *c_produced_on.lock() = thread::current().name().map(str::to_owned);
    Ok::<_, ()>(())
  })
  .subscribe_on(SingleScheduler::with_name("S1"))
  .observe_on(SingleScheduler::with_name("S2"))
  .subscribe_with(TestObserver::<(), ()>::new());

  assert!(observer.await_terminal(TIMEOUT));
  thread::sleep(Duration::from_millis(20));
  assert_eq!(observer.completions(), 1);
  assert!(observer.errors().is_empty());
  assert!(produced_on.lock().as_deref().is_some_and(|name| name.starts_with("S1-")));
  assert!(observer
    .terminal_thread_name()
    .is_some_and(|name| name.starts_with("S2-")));
}

#[rxsched_macro::test]
fn maybe_and_single_deliver_on_the_observing_worker() {
  let maybe = maybe::from_callable(|| Ok::<Option<i32>, ()>(None))
    .observe_on(SingleScheduler::with_name("MaybeDelivery"))
    .subscribe_with(TestObserver::new());
  let single = single::just("value")
    .subscribe_on(scheduler::new_thread())
    .observe_on(SingleScheduler::with_name("SingleDelivery"))
    .subscribe_with(TestObserver::<&str, Infallible>::new());

  assert!(maybe.await_terminal(TIMEOUT));
  assert!(single.await_terminal(TIMEOUT));
  assert!(maybe.values().is_empty());
  assert_eq!(maybe.completions(), 1);
  assert!(maybe
    .terminal_thread_name()
    .is_some_and(|name| name.starts_with("MaybeDelivery-")));
  assert_eq!(single.values(), vec!["value"]);
  assert!(single
    .terminal_thread_name()
    .is_some_and(|name| name.starts_with("SingleDelivery-")));
}

#[cfg(feature = "futures-scheduler")]
#[rxsched_macro::test]
fn thread_pool_workers_stay_sequential() {
  let pool = scheduler::thread_pool().expect("thread pool");
  let observer = observable::from_iter(0..5_000)
    .subscribe_on(pool.clone())
    .observe_on(pool)
    .subscribe_with(TestObserver::<i32, Infallible>::new());

  assert!(observer.await_terminal(TIMEOUT));
  assert!(!observer.overlapped());
  assert_eq!(observer.values(), (0..5_000).collect::<Vec<_>>());
}

#[cfg(feature = "tokio-scheduler")]
#[rxsched_macro::test(shared)]
async fn tokio_runtime_as_scheduler() {
  let scheduler = TokioScheduler::current();
  let observer = flowable::from_iter(0..100)
    .subscribe_on(scheduler.clone())
    .observe_on(scheduler)
    .subscribe_with(TestObserver::<i32, Infallible>::new());

  let waiter = observer.clone();
  let terminated =
    tokio::task::spawn_blocking(move || waiter.await_terminal(TIMEOUT)).await.unwrap();
  assert!(terminated);
  assert_eq!(observer.values(), (0..100).collect::<Vec<_>>());
}
