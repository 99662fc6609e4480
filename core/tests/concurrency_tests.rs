// tests/concurrency_tests.rs
mod common;

use common::*;
use parking_lot::Mutex;
use reqscope::{attach, AttachedData, ContextRegistry, DataRef, ExecutionContext};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

const THREADS: usize = 8;
const KEYS: usize = 1000;

// Counts live instances so leaks show up as a non-zero balance.
struct Audited {
  live: Arc<AtomicUsize>,
}

impl Audited {
  fn new(live: &Arc<AtomicUsize>) -> Self {
    live.fetch_add(1, Ordering::SeqCst);
    Self { live: Arc::clone(live) }
  }
}

impl AttachedData for Audited {}

impl Drop for Audited {
  fn drop(&mut self) {
    self.live.fetch_sub(1, Ordering::SeqCst);
  }
}

type EventLog = Arc<Mutex<Vec<&'static str>>>;

// Callback payload keeping its own ordered event log.
struct Sequenced {
  id: usize,
  log: EventLog,
}

impl Sequenced {
  fn create(id: usize) -> (DataRef, EventLog) {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    (Arc::new(Sequenced { id, log: Arc::clone(&log) }), log)
  }
}

impl AttachedData for Sequenced {
  fn has_callback(&self) -> bool {
    true
  }

  fn on_set(&self) {
    self.log.lock().push("set");
  }

  fn on_unset(&self) {
    self.log.lock().push("unset");
  }
}

// Callback payload whose `on_unset` meets another thread at a barrier.
struct Rendezvous {
  barrier: Arc<Barrier>,
}

impl AttachedData for Rendezvous {
  fn has_callback(&self) -> bool {
    true
  }

  fn on_unset(&self) {
    self.barrier.wait();
  }
}

#[test]
fn test_racing_set_if_absent_has_one_winner_per_key() {
  setup_tracing();
  let ctx = ExecutionContext::create();
  let live = Arc::new(AtomicUsize::new(0));
  let wins: Arc<Vec<AtomicUsize>> = Arc::new((0..KEYS).map(|_| AtomicUsize::new(0)).collect());
  let keys: Arc<Vec<String>> = Arc::new((0..KEYS).map(|i| format!("key.{}", i)).collect());
  let barrier = Arc::new(Barrier::new(THREADS));

  let handles: Vec<_> = (0..THREADS)
    .map(|t| {
      let (ctx, live, wins, keys, barrier) = (
        Arc::clone(&ctx),
        Arc::clone(&live),
        Arc::clone(&wins),
        Arc::clone(&keys),
        Arc::clone(&barrier),
      );
      thread::spawn(move || {
        barrier.wait();
        for i in 0..KEYS {
          // Stagger start positions so threads collide on different keys.
          let idx = (i + t * 131) % KEYS;
          if ctx.set_if_absent(&keys[idx], attach(Audited::new(&live))) {
            wins[idx].fetch_add(1, Ordering::SeqCst);
          }
        }
      })
    })
    .collect();
  for handle in handles {
    handle.join().unwrap();
  }

  assert!(wins.iter().all(|w| w.load(Ordering::SeqCst) == 1));
  assert_eq!(ctx.len(), KEYS);
  // Every losing payload is already gone; only the winners are alive.
  assert_eq!(live.load(Ordering::SeqCst), KEYS);

  drop(ctx);
  assert_eq!(live.load(Ordering::SeqCst), 0);
}

#[test]
fn test_concurrent_readers_and_writers() {
  setup_tracing();
  let ctx = ExecutionContext::create();
  let live = Arc::new(AtomicUsize::new(0));
  let barrier = Arc::new(Barrier::new(THREADS));

  thread::scope(|scope| {
    for t in 0..THREADS {
      let (ctx, live, barrier) = (&ctx, &live, &barrier);
      scope.spawn(move || {
        barrier.wait();
        for i in 0..500 {
          let key = format!("slot.{}", i % 16);
          match (t + i) % 4 {
            0 => ctx.set(&key, attach(Audited::new(live))),
            1 => ctx.overwrite(&key, attach(Audited::new(live))),
            2 => ctx.clear(&key),
            _ => {
              if let Some(data) = ctx.get(&key) {
                assert!(!data.has_callback());
              }
              let _ = ctx.has(&key);
            }
          }
        }
      });
    }
  });

  assert_eq!(live.load(Ordering::SeqCst), ctx.keys().iter().filter(|k| ctx.get(k).is_some()).count());
  drop(ctx);
  assert_eq!(live.load(Ordering::SeqCst), 0);
}

#[test]
fn test_opposite_switches_with_concurrent_writers() {
  setup_tracing();
  let a = ExecutionContext::create();
  let b = ExecutionContext::create();
  let (shared, shared_counters) = Probe::tracked("shared");
  a.set("shared", Some(Arc::clone(&shared)));
  b.set("shared", Some(Arc::clone(&shared)));
  let baseline = (shared_counters.sets(), shared_counters.unsets());
  let rounds = 2000;

  thread::scope(|scope| {
    for t in 0..4 {
      let (a, b) = (&a, &b);
      scope.spawn(move || {
        let registry = ContextRegistry::new();
        let (first, second) = if t % 2 == 0 { (a, b) } else { (b, a) };
        registry.switch_to(Some(Arc::clone(first)));
        for _ in 0..rounds {
          registry.switch_to(Some(Arc::clone(second)));
          registry.switch_to(Some(Arc::clone(first)));
        }
        registry.switch_to(None);
      });
    }
    for t in 0..2 {
      let target = if t == 0 { &a } else { &b };
      scope.spawn(move || {
        for i in 0..rounds {
          let (probe, _) = Probe::tracked("churn");
          target.set(&format!("churn.{}", i % 8), Some(probe));
          target.clear(&format!("churn.{}", (i + 3) % 8));
        }
      });
    }
  });

  // Entering and leaving from/to nothing notifies `shared` once each way per
  // switching thread; the diff switches in between never touch it.
  assert_eq!(shared_counters.sets(), baseline.0 + 4);
  assert_eq!(shared_counters.unsets(), baseline.1 + 4);
}

#[test]
fn test_clear_waits_for_replacement_callbacks() {
  setup_tracing();
  let ctx = ExecutionContext::create();
  let barrier = Arc::new(Barrier::new(2));
  ctx.set(
    "k",
    Some(Arc::new(Rendezvous {
      barrier: Arc::clone(&barrier),
    })),
  );
  let (x, x_log) = Sequenced::create(0);

  thread::scope(|scope| {
    // The displaced payload's on_unset lets the clearing thread go before the
    // replacement has received on_set.
    scope.spawn(|| ctx.overwrite("k", Some(x)));
    scope.spawn(|| {
      barrier.wait();
      ctx.clear("k");
    });
  });

  assert!(!ctx.has("k"));
  assert_eq!(*x_log.lock(), vec!["set", "unset"]);
}

#[test]
fn test_clear_during_switch_waits_for_notifications() {
  setup_tracing();
  let a = ExecutionContext::create();
  let b = ExecutionContext::create();
  let barrier = Arc::new(Barrier::new(2));
  a.set(
    "outgoing",
    Some(Arc::new(Rendezvous {
      barrier: Arc::clone(&barrier),
    })),
  );
  let (y, y_log) = Sequenced::create(0);
  b.set("y", Some(y));

  thread::scope(|scope| {
    scope.spawn(|| {
      let registry = ContextRegistry::new();
      registry.switch_to(Some(Arc::clone(&a)));
      // Blocks in the outgoing entry's on_unset until the other thread is
      // about to clear `y` from the incoming context.
      registry.switch_to(Some(Arc::clone(&b)));
    });
    scope.spawn(|| {
      barrier.wait();
      b.clear("y");
    });
  });

  assert!(!b.has("y"));
  // Attached, made visible by the switch, then cleared.
  assert_eq!(*y_log.lock(), vec!["set", "set", "unset"]);
}

#[test]
fn test_callback_order_under_set_and_clear_churn() {
  setup_tracing();
  let ctx = ExecutionContext::create();
  let rounds = 500;

  let logs: Vec<(usize, EventLog)> = thread::scope(|scope| {
    let handles: Vec<_> = (0..THREADS)
      .map(|t| {
        let ctx = &ctx;
        scope.spawn(move || {
          let mut logs = Vec::new();
          for i in 0..rounds {
            let key = format!("slot.{}", i % 8);
            let id = t * rounds + i;
            match (t + i) % 3 {
              0 => {
                let (data, log) = Sequenced::create(id);
                ctx.set(&key, Some(data));
                logs.push((id, log));
              }
              1 => {
                let (data, log) = Sequenced::create(id);
                ctx.overwrite(&key, Some(data));
                logs.push((id, log));
              }
              _ => ctx.clear(&key),
            }
          }
          logs
        })
      })
      .collect();
    handles.into_iter().flat_map(|handle| handle.join().unwrap()).collect()
  });

  let held: HashSet<usize> = ctx
    .keys()
    .iter()
    .filter_map(|key| ctx.get_as::<Sequenced>(key).unwrap())
    .map(|data| data.id)
    .collect();
  assert_eq!(held.len(), ctx.len());

  for (id, log) in logs {
    let expected = if held.contains(&id) { vec!["set"] } else { vec!["set", "unset"] };
    assert_eq!(*log.lock(), expected, "payload {}", id);
  }
}
