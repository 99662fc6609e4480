// reqscope/src/core/data.rs

//! The payload side of a context: [`AttachedData`] and its shared handle.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A value attached to an [`ExecutionContext`](crate::ExecutionContext) under a key.
///
/// Payloads are shared between contexts by reference counting, so a single
/// instance may be visible from a parent context and any number of shallow
/// copies at once. Its `Drop` runs exactly once, when the last context (or
/// caller) holding it lets go.
///
/// Payloads that want to know when they become part of, or stop being part of,
/// the context visible on a lane report `has_callback() == true` and override
/// `on_set` / `on_unset`. The answer of `has_callback` must not change over the
/// lifetime of the object. Callbacks must not panic; they are invoked with no
/// store lock held and may freely read or mutate contexts.
pub trait AttachedData: Any + Send + Sync {
  fn has_callback(&self) -> bool {
    false
  }

  fn on_set(&self) {}

  fn on_unset(&self) {}
}

/// Owning, shareable handle to attached data.
pub type DataRef = Arc<dyn AttachedData + Send + Sync>;

/// Wraps a concrete payload into the optional handle taken by the store's setters.
pub fn attach<D: AttachedData>(data: D) -> Option<DataRef> {
  Some(Arc::new(data))
}

/// Takes a new owning reference on `data`, if any.
///
/// The caller already holds `data`, so the count cannot concurrently reach zero
/// and the relaxed increment inside `Arc::clone` is enough. Release is the
/// handle's `Drop`, an acquire-release decrement that frees the payload on the
/// 1 -> 0 transition.
pub fn acquire(data: Option<&DataRef>) -> Option<DataRef> {
  data.map(Arc::clone)
}

/// Address identity of a payload. Two handles compare equal iff they point at
/// the same instance. The ordering is arbitrary but total and stable for the
/// lifetime of the instance.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataId(usize);

impl DataId {
  pub fn of(data: &DataRef) -> Self {
    DataId(Arc::as_ptr(data).cast::<()>() as usize)
  }
}

impl fmt::Debug for DataId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "DataId({:#x})", self.0)
  }
}

/// Attempts to view a shared payload as its concrete type.
pub(crate) fn downcast<T: AttachedData>(data: DataRef) -> Option<Arc<T>> {
  let any: Arc<dyn Any + Send + Sync> = data;
  any.downcast::<T>().ok()
}
