// reqscope/src/core/callbacks.rs

//! Ordered identity index of the callback-bearing entries of a store.
//!
//! The index is copy-on-write: cloning it (to snapshot a store for a context
//! switch, or to seed a shallow copy) is an `Arc` clone, and only the next
//! mutation of either side pays for a real copy.

use super::data::{DataId, DataRef};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
struct Tracked {
  data: DataRef,
  // Number of keys in the owning store currently holding this instance.
  keys: usize,
}

#[derive(Clone, Default)]
pub struct CallbackIndex {
  entries: Arc<BTreeMap<DataId, Tracked>>,
}

impl CallbackIndex {
  pub fn new() -> Self {
    Self::default()
  }

  /// Records one more key holding `data`.
  pub(crate) fn insert(&mut self, data: &DataRef) {
    Arc::make_mut(&mut self.entries)
      .entry(DataId::of(data))
      .and_modify(|tracked| tracked.keys += 1)
      .or_insert_with(|| Tracked {
        data: Arc::clone(data),
        keys: 1,
      });
  }

  /// Records that one key stopped holding `data`, dropping the identity once no
  /// key holds it anymore.
  pub(crate) fn remove(&mut self, data: &DataRef) {
    let id = DataId::of(data);
    let entries = Arc::make_mut(&mut self.entries);
    let Some(tracked) = entries.get_mut(&id) else {
      panic!("reqscope invariant violated: {:?} missing from callback index", id);
    };
    tracked.keys -= 1;
    if tracked.keys == 0 {
      entries.remove(&id);
    }
  }

  pub fn contains(&self, data: &DataRef) -> bool {
    self.entries.contains_key(&DataId::of(data))
  }

  /// Number of distinct callback-bearing instances.
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Iterates the indexed instances in identity order.
  pub fn iter(&self) -> impl Iterator<Item = &DataRef> + '_ {
    self.entries.values().map(|tracked| &tracked.data)
  }

  /// True when both indexes are the same unmodified snapshot.
  pub fn shares_storage(&self, other: &CallbackIndex) -> bool {
    Arc::ptr_eq(&self.entries, &other.entries)
  }
}

impl fmt::Debug for CallbackIndex {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_set().entries(self.entries.keys()).finish()
  }
}

/// Calls `exec` on every instance in `data` that is not in `other`.
///
/// Both indexes are ordered by identity, so this is a single merge walk in
/// `O(|data| + |other|)` without building an intermediate collection.
pub fn for_each_difference<F>(data: &CallbackIndex, other: &CallbackIndex, mut exec: F)
where
  F: FnMut(&DataRef),
{
  if data.shares_storage(other) {
    return;
  }

  let mut other_ids = other.entries.keys().copied().peekable();
  for (&id, tracked) in data.entries.iter() {
    while other_ids.next_if(|other_id| *other_id < id).is_some() {}
    if other_ids.peek() != Some(&id) {
      exec(&tracked.data);
    }
  }
}
