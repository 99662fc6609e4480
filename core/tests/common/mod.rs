// tests/common/mod.rs
#![allow(dead_code)] // Allow unused code in this common test module

use parking_lot::Mutex;
use reqscope::{lane, AttachedData, DataRef};
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use tracing::Level;

// --- Counters shared between a probe and the test observing it ---
#[derive(Debug, Default)]
pub struct Counters {
  pub sets: AtomicUsize,
  pub unsets: AtomicUsize,
  pub drops: AtomicUsize,
}

impl Counters {
  pub fn sets(&self) -> usize {
    self.sets.load(Ordering::SeqCst)
  }

  pub fn unsets(&self) -> usize {
    self.unsets.load(Ordering::SeqCst)
  }

  pub fn drops(&self) -> usize {
    self.drops.load(Ordering::SeqCst)
  }
}

// --- Ordered log of callback events, tagged with the lane context at the time ---
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
  pub event: &'static str,
  pub name: &'static str,
  /// Address of the context installed on the calling thread's lane, 0 if none.
  pub installed: usize,
}

pub type Journal = Arc<Mutex<Vec<JournalEntry>>>;

pub fn new_journal() -> Journal {
  Arc::new(Mutex::new(Vec::new()))
}

fn lane_installed_addr() -> usize {
  lane::installed().map_or(0, |ctx| Arc::as_ptr(&ctx) as usize)
}

/// Test payload recording every lifecycle event it receives.
pub struct Probe {
  pub name: &'static str,
  callback: bool,
  counters: Arc<Counters>,
  journal: Option<Journal>,
}

impl Probe {
  /// A callback-bearing probe.
  pub fn tracked(name: &'static str) -> (DataRef, Arc<Counters>) {
    Self::build(name, true, None)
  }

  /// A probe without callbacks; only its drop is counted.
  pub fn plain(name: &'static str) -> (DataRef, Arc<Counters>) {
    Self::build(name, false, None)
  }

  /// A callback-bearing probe that also appends to `journal`.
  pub fn journaled(name: &'static str, journal: &Journal) -> (DataRef, Arc<Counters>) {
    Self::build(name, true, Some(Arc::clone(journal)))
  }

  fn build(name: &'static str, callback: bool, journal: Option<Journal>) -> (DataRef, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let probe = Probe {
      name,
      callback,
      counters: Arc::clone(&counters),
      journal,
    };
    (Arc::new(probe), counters)
  }

  fn record(&self, event: &'static str) {
    if let Some(journal) = &self.journal {
      journal.lock().push(JournalEntry {
        event,
        name: self.name,
        installed: lane_installed_addr(),
      });
    }
  }
}

impl AttachedData for Probe {
  fn has_callback(&self) -> bool {
    self.callback
  }

  fn on_set(&self) {
    self.counters.sets.fetch_add(1, Ordering::SeqCst);
    self.record("set");
  }

  fn on_unset(&self) {
    self.counters.unsets.fetch_add(1, Ordering::SeqCst);
    self.record("unset");
  }
}

impl Drop for Probe {
  fn drop(&mut self) {
    self.counters.drops.fetch_add(1, Ordering::SeqCst);
  }
}

/// Payload carrying a value, for typed lookups.
#[derive(Debug, PartialEq, Eq)]
pub struct RequestId(pub u64);

impl AttachedData for RequestId {}

#[derive(Debug, PartialEq, Eq)]
pub struct TenantName(pub String);

impl AttachedData for TenantName {}

pub fn addr<T: ?Sized>(value: &Arc<T>) -> usize {
  Arc::as_ptr(value).cast::<()>() as usize
}

// --- Helper for Tracing Setup (call once per test run if needed) ---
use once_cell::sync::Lazy;
static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::TRACE)
    .with_test_writer() // Important for tests to capture output
    .try_init()
    .ok(); // Allow multiple initializations in tests (ok if fails)
});

pub fn setup_tracing() {
  Lazy::force(&TRACING_INIT);
}
