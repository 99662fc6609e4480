// reqscope/src/core/context.rs

//! Defines `ExecutionContext`, the unit callers attach request-scoped data to.

use super::callbacks::CallbackIndex;
use super::data::{downcast, AttachedData, DataRef};
use super::store::ContextStore;
use crate::error::{ContextError, ContextResult};
use parking_lot::MappedRwLockReadGuard;
use std::fmt;
use std::sync::Arc;

/// The keyed bag of attached data representing "which logical request is
/// running right now".
///
/// Contexts are normally handled as `Arc<ExecutionContext>` and installed on a
/// lane through a [`ContextRegistry`](crate::ContextRegistry). Each context owns
/// its own map; payloads can be shared between contexts via
/// [`ExecutionContext::shallow_copy`].
#[derive(Default)]
pub struct ExecutionContext {
  store: ContextStore,
}

impl ExecutionContext {
  pub fn new() -> Self {
    Self::default()
  }

  /// Convenience for `Arc::new(ExecutionContext::new())`.
  pub fn create() -> Arc<Self> {
    Arc::new(Self::new())
  }

  /// Attaches `data` under `key`, replacing (and reporting) any existing entry.
  pub fn set(&self, key: &str, data: Option<DataRef>) {
    self.store.set(key, data);
  }

  /// Attaches `data` under `key` unless the key is already present. Returns
  /// `false` if someone else got there first.
  pub fn set_if_absent(&self, key: &str, data: Option<DataRef>) -> bool {
    self.store.set_if_absent(key, data)
  }

  /// Attaches `data` under `key`, silently replacing any existing entry.
  pub fn overwrite(&self, key: &str, data: Option<DataRef>) {
    self.store.overwrite(key, data);
  }

  pub fn has(&self, key: &str) -> bool {
    self.store.has(key)
  }

  pub fn get(&self, key: &str) -> Option<DataRef> {
    self.store.get(key)
  }

  /// Borrow-scoped view of the data under `key`. See [`ContextStore::get_ref`].
  pub fn get_ref(&self, key: &str) -> Option<MappedRwLockReadGuard<'_, dyn AttachedData + Send + Sync>> {
    self.store.get_ref(key)
  }

  /// Typed lookup. `Ok(None)` if nothing is attached; an error if something of
  /// a different type is.
  pub fn get_as<T: AttachedData>(&self, key: &str) -> ContextResult<Option<Arc<T>>> {
    match self.store.get(key) {
      None => Ok(None),
      Some(data) => downcast::<T>(data).map(Some).ok_or_else(|| ContextError::TypeMismatch {
        key: key.to_string(),
        expected_type: std::any::type_name::<T>().to_string(),
      }),
    }
  }

  pub fn clear(&self, key: &str) {
    self.store.clear(key);
  }

  pub fn len(&self) -> usize {
    self.store.len()
  }

  pub fn is_empty(&self) -> bool {
    self.store.is_empty()
  }

  pub fn keys(&self) -> Vec<String> {
    self.store.keys()
  }

  pub fn callbacks(&self) -> CallbackIndex {
    self.store.callback_snapshot()
  }

  /// Notifies every callback-bearing entry that this context became visible.
  ///
  /// Mutations from other threads wait until every entry has been notified.
  pub fn on_set(&self) {
    let _dispatch = self.store.lock_dispatch();
    for data in self.callbacks().iter() {
      data.on_set();
    }
  }

  /// Notifies every callback-bearing entry that this context stopped being visible.
  pub fn on_unset(&self) {
    let _dispatch = self.store.lock_dispatch();
    for data in self.callbacks().iter() {
      data.on_unset();
    }
  }

  /// Creates a child context that shares every entry of this one by identity.
  ///
  /// Mutating the child's map afterwards never affects this context.
  pub fn shallow_copy(&self) -> ExecutionContext {
    ExecutionContext {
      store: self.store.shallow_copy(),
    }
  }

  pub(crate) fn store(&self) -> &ContextStore {
    &self.store
  }
}

impl fmt::Debug for ExecutionContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("ExecutionContext").field(&self.store).finish()
  }
}
