// reqscope/src/core/store.rs

//! `ContextStore`: the keyed map of attached data behind a single context.
//!
//! All state lives behind one `parking_lot::RwLock`. Queries take a shared
//! read lock. Mutations that first need to know whether a key exists start
//! from an upgradable read, which coexists with plain readers but excludes
//! other upgraders and writers, and only upgrade once they decide to write.
//!
//! Lifecycle callbacks and the destruction of displaced payloads never run
//! under that lock: both are arbitrary user code that may come back into this
//! same store. Instead every mutation holds the store's dispatch lock, a
//! `parking_lot::ReentrantMutex`, from before it touches the map until its
//! callbacks have returned. Other threads therefore observe "mutation plus
//! notification" as one step, while a callback on the mutating thread can still
//! re-enter the store. Context switches hold the dispatch locks of both stores
//! for the same reason.

use super::callbacks::CallbackIndex;
use super::data::{acquire, AttachedData, DataRef};
use crate::config::ContextConfig;
use parking_lot::{
  MappedRwLockReadGuard, ReentrantMutex, ReentrantMutexGuard, RwLock, RwLockReadGuard, RwLockUpgradableReadGuard,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{event, Level};

static OVERWRITE_WARNINGS: AtomicU64 = AtomicU64::new(0);

/// Number of overwrite advisories emitted so far in this process.
pub fn overwrite_warning_count() -> u64 {
  OVERWRITE_WARNINGS.load(Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetBehaviour {
  /// Replace an existing entry, reporting the conflict.
  Set,
  SetIfAbsent,
  /// Replace an existing entry silently.
  Overwrite,
}

#[derive(Default)]
struct StoreState {
  // `None` values are explicitly cleared slots: present, but holding nothing.
  entries: HashMap<String, Option<DataRef>>,
  callbacks: CallbackIndex,
}

#[derive(Default)]
pub struct ContextStore {
  state: RwLock<StoreState>,
  // Serializes mutations together with their callbacks across threads.
  dispatch: ReentrantMutex<()>,
}

impl ContextStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Installs `data` under `key`, replacing any existing entry. The first
  /// replacements in the process are reported with a `WARN` event.
  pub fn set(&self, key: &str, data: Option<DataRef>) {
    self.do_set(key, data, SetBehaviour::Set);
  }

  /// Installs `data` under `key` only if the key is not present at all (an
  /// explicitly-null entry counts as present). Returns whether it was installed;
  /// on `false`, `data` is dropped untouched.
  pub fn set_if_absent(&self, key: &str, data: Option<DataRef>) -> bool {
    self.do_set(key, data, SetBehaviour::SetIfAbsent)
  }

  /// Like [`ContextStore::set`] but never reports the replacement.
  pub fn overwrite(&self, key: &str, data: Option<DataRef>) {
    self.do_set(key, data, SetBehaviour::Overwrite);
  }

  pub fn has(&self, key: &str) -> bool {
    self.state.read().entries.contains_key(key)
  }

  /// Returns a new owning handle to the data stored under `key`, or `None` if
  /// the key is absent or explicitly null.
  pub fn get(&self, key: &str) -> Option<DataRef> {
    acquire(self.state.read().entries.get(key).and_then(Option::as_ref))
  }

  /// Borrows the data stored under `key` without taking a reference.
  ///
  /// The store stays read-locked while the guard lives: drop it before
  /// mutating this store from the same thread.
  pub fn get_ref(&self, key: &str) -> Option<MappedRwLockReadGuard<'_, dyn AttachedData + Send + Sync>> {
    RwLockReadGuard::try_map(self.state.read(), |state| {
      state.entries.get(key).and_then(|slot| slot.as_deref())
    })
    .ok()
  }

  /// Removes `key` entirely. No-op if the key is absent.
  pub fn clear(&self, key: &str) {
    let dispatch = self.dispatch.lock();
    let displaced = {
      let state = self.state.upgradable_read();
      if !state.entries.contains_key(key) {
        return;
      }

      let mut state = RwLockUpgradableReadGuard::upgrade(state);
      let state = &mut *state;
      let displaced = state.entries.remove(key).flatten();
      if let Some(old) = displaced.as_ref().filter(|old| old.has_callback()) {
        state.callbacks.remove(old);
      }
      displaced
    };

    event!(Level::TRACE, key = key, "Context data cleared.");
    finish_mutation(dispatch, displaced, None);
  }

  pub fn len(&self) -> usize {
    self.state.read().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.state.read().entries.is_empty()
  }

  /// Keys currently present, in no particular order.
  pub fn keys(&self) -> Vec<String> {
    self.state.read().entries.keys().cloned().collect()
  }

  /// Snapshot of the callback-bearing entries. Cheap: shares storage with the
  /// store until the next mutation.
  pub fn callback_snapshot(&self) -> CallbackIndex {
    self.state.read().callbacks.clone()
  }

  /// Builds a new store holding a fresh reference to every entry of this one.
  /// The payloads themselves are shared, not cloned.
  pub fn shallow_copy(&self) -> ContextStore {
    let state = self.state.read();
    let entries = state
      .entries
      .iter()
      .map(|(key, data)| (key.clone(), acquire(data.as_ref())))
      .collect();

    ContextStore {
      state: RwLock::new(StoreState {
        entries,
        callbacks: state.callbacks.clone(),
      }),
      dispatch: ReentrantMutex::new(()),
    }
  }

  /// Holds off mutations from other threads. Re-entrant on the calling thread.
  pub(crate) fn lock_dispatch(&self) -> ReentrantMutexGuard<'_, ()> {
    self.dispatch.lock()
  }

  fn do_set(&self, key: &str, data: Option<DataRef>, behaviour: SetBehaviour) -> bool {
    let dispatch = self.dispatch.lock();
    let (displaced, installed, replaced) = {
      let state = self.state.upgradable_read();
      let replaced = state.entries.contains_key(key);
      if replaced && behaviour == SetBehaviour::SetIfAbsent {
        drop(state);
        event!(Level::TRACE, key = key, "Context data already present, not replacing.");
        return false;
      }

      let mut state = RwLockUpgradableReadGuard::upgrade(state);
      let state = &mut *state;

      if let Some(new) = data.as_ref().filter(|new| new.has_callback()) {
        state.callbacks.insert(new);
      }
      let installed = acquire(data.as_ref().filter(|new| new.has_callback()));

      let displaced = match state.entries.get_mut(key) {
        Some(slot) => std::mem::replace(slot, data),
        None => {
          state.entries.insert(key.to_owned(), data);
          None
        }
      };
      if let Some(old) = displaced.as_ref().filter(|old| old.has_callback()) {
        state.callbacks.remove(old);
      }

      (displaced, installed, replaced)
    };

    if replaced && behaviour == SetBehaviour::Set {
      warn_overwrite(key);
    }
    event!(Level::TRACE, key = key, ?behaviour, "Context data installed.");
    finish_mutation(dispatch, displaced, installed);
    true
  }
}

/// Runs the tail of a mutation once the state lock is gone: notify the displaced
/// entry, notify the installed one, then release the dispatch lock and finally
/// the displaced handle (possibly destroying it).
fn finish_mutation(dispatch: ReentrantMutexGuard<'_, ()>, displaced: Option<DataRef>, installed: Option<DataRef>) {
  if let Some(old) = displaced.as_ref().filter(|old| old.has_callback()) {
    old.on_unset();
  }
  if let Some(new) = installed {
    new.on_set();
  }
  drop(dispatch);
  drop(displaced);
}

fn warn_overwrite(key: &str) {
  let limit = ContextConfig::global().overwrite_warning_limit;
  let claimed = OVERWRITE_WARNINGS
    .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |emitted| (emitted < limit).then_some(emitted + 1))
    .is_ok();
  if claimed {
    event!(Level::WARN, key = key, "Calling set for context data that is already set; replacing it.");
  }
}

/// Dispatch locks of both sides of a context switch.
pub(crate) struct DispatchPair<'a> {
  _first: ReentrantMutexGuard<'a, ()>,
  _second: Option<ReentrantMutexGuard<'a, ()>>,
}

/// Locks the dispatch locks of two stores, so neither can be mutated by another
/// thread while a switch diffs and notifies their callback entries.
///
/// Locks are taken in address order so that concurrent switches in opposite
/// directions cannot deadlock each other.
pub(crate) fn lock_dispatch_pair<'a>(a: &'a ContextStore, b: &'a ContextStore) -> DispatchPair<'a> {
  if std::ptr::eq(a, b) {
    return DispatchPair {
      _first: a.lock_dispatch(),
      _second: None,
    };
  }

  let (first, second) = if (a as *const ContextStore) < (b as *const ContextStore) { (a, b) } else { (b, a) };
  let first = first.lock_dispatch();
  let second = second.lock_dispatch();
  DispatchPair {
    _first: first,
    _second: Some(second),
  }
}

impl fmt::Debug for ContextStore {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.state.read();
    f.debug_struct("ContextStore")
      .field("entries", &state.entries.len())
      .field("callbacks", &state.callbacks.len())
      .finish()
  }
}
