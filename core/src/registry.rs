// reqscope/src/registry.rs

//! Defines `ContextRegistry`, the slot holding the context currently visible on
//! one lane, and the switch protocol that keeps lifecycle callbacks exact.

use crate::core::callbacks::for_each_difference;
use crate::core::context::ExecutionContext;
use crate::core::data::DataRef;
use crate::core::store::lock_dispatch_pair;
use crate::lane;
use arc_swap::ArcSwapOption;
use once_cell::sync::Lazy;
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{event, Level};

static DEFAULT_CONTEXT: Lazy<Arc<ExecutionContext>> = Lazy::new(ExecutionContext::create);

/// The process-wide context seen by every lane with nothing installed.
pub fn default_context() -> Arc<ExecutionContext> {
  Arc::clone(&DEFAULT_CONTEXT)
}

/// Identity of an optional context, for trace events.
fn context_addr(ctx: Option<&Arc<ExecutionContext>>) -> usize {
  ctx.map_or(0, |ctx| Arc::as_ptr(ctx) as usize)
}

fn same_context(a: Option<&Arc<ExecutionContext>>, b: Option<&Arc<ExecutionContext>>) -> bool {
  match (a, b) {
    (Some(a), Some(b)) => Arc::ptr_eq(a, b),
    (None, None) => true,
    _ => false,
  }
}

/// One lane's "current context" slot.
///
/// Reads never block. Each thread gets one through [`crate::lane`]; tests and
/// cooperative schedulers can create independent registries directly.
///
/// A registry belongs to a single lane: it can be moved to another thread but
/// not shared between threads, so a switch always diffs against the context it
/// is about to replace.
///
/// ```compile_fail
/// fn shared_between_threads<T: Sync>() {}
/// shared_between_threads::<reqscope::ContextRegistry>();
/// ```
#[derive(Default)]
pub struct ContextRegistry {
  current: ArcSwapOption<ExecutionContext>,
  _single_lane: PhantomData<Cell<()>>,
}

impl ContextRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// The context installed in this slot, or `None` if the slot is defaulted.
  pub fn installed(&self) -> Option<Arc<ExecutionContext>> {
    self.current.load_full()
  }

  /// The installed context, or the process-wide default one.
  pub fn current(&self) -> Arc<ExecutionContext> {
    self.installed().unwrap_or_else(default_context)
  }

  /// Installs `new_ctx` and returns the previously installed context.
  ///
  /// Only entries whose visibility actually changes are notified: `on_unset`
  /// fires for callback entries of the outgoing context missing from the
  /// incoming one while the outgoing context is still installed, and `on_set`
  /// fires for entries new to the incoming context once it is installed.
  /// Switching to the context already installed does nothing.
  pub fn switch_to(&self, new_ctx: Option<Arc<ExecutionContext>>) -> Option<Arc<ExecutionContext>> {
    let cur_ctx = self.current.load_full();
    if same_context(cur_ctx.as_ref(), new_ctx.as_ref()) {
      return new_ctx;
    }

    event!(
      Level::TRACE,
      from = context_addr(cur_ctx.as_ref()),
      to = context_addr(new_ctx.as_ref()),
      "Switching execution context."
    );

    // The dispatch locks keep other threads from mutating either store until
    // every notification of this switch has been delivered.
    let incoming = new_ctx.clone();
    match (&cur_ctx, &incoming) {
      (Some(cur), Some(new)) => {
        let _dispatch = lock_dispatch_pair(cur.store(), new.store());
        let (cur_callbacks, new_callbacks) = (cur.callbacks(), new.callbacks());
        for_each_difference(&cur_callbacks, &new_callbacks, |data| data.on_unset());
        let prev = self.current.swap(new_ctx);
        for_each_difference(&new_callbacks, &cur_callbacks, |data| data.on_set());
        prev
      }
      (Some(cur), None) => {
        let _dispatch = cur.store().lock_dispatch();
        cur.on_unset();
        self.current.swap(None)
      }
      (None, Some(new)) => {
        let _dispatch = new.store().lock_dispatch();
        let prev = self.current.swap(new_ctx);
        new.on_set();
        prev
      }
      (None, None) => self.current.swap(None),
    }
  }

  /// Installs a shallow copy of the current context and returns the previously
  /// installed one.
  ///
  /// The child shares every payload of its parent by identity, so nothing
  /// changes visibility and no callbacks fire.
  pub fn fork_shallow_copy(&self) -> Option<Arc<ExecutionContext>> {
    let parent = self.current();
    let child = Arc::new(parent.shallow_copy());
    event!(
      Level::TRACE,
      parent = Arc::as_ptr(&parent) as usize,
      child = Arc::as_ptr(&child) as usize,
      entries = child.len(),
      "Installed shallow copy of execution context."
    );
    self.current.swap(Some(child))
  }

  /// Switches to `ctx` until the returned guard is dropped.
  pub fn enter(&self, ctx: Arc<ExecutionContext>) -> ContextScopeGuard<'_> {
    ContextScopeGuard::enter(Slot::Registry(self), Some(ctx))
  }

  /// Switches to a fresh, empty context until the returned guard is dropped.
  pub fn enter_new(&self) -> ContextScopeGuard<'_> {
    self.enter(ExecutionContext::create())
  }

  /// Forks the current context until the returned guard is dropped.
  pub fn enter_shallow_copy(&self) -> ContextScopeGuard<'_> {
    ContextScopeGuard::shallow_copy(Slot::Registry(self))
  }

  /// Forks the current context and replaces `key` in the child until the
  /// returned guard is dropped. The parent never sees the replacement.
  pub fn enter_shallow_copy_with(&self, key: &str, data: Option<DataRef>) -> ContextScopeGuard<'_> {
    ContextScopeGuard::shallow_copy_with(Slot::Registry(self), key, data)
  }
}

impl fmt::Debug for ContextRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ContextRegistry")
      .field("installed", &self.installed().map(|ctx| Arc::as_ptr(&ctx)))
      .finish()
  }
}

/// Which slot a guard restores.
pub(crate) enum Slot<'r> {
  Registry(&'r ContextRegistry),
  /// The calling thread's lane.
  Lane,
}

impl Slot<'_> {
  fn switch_to(&self, ctx: Option<Arc<ExecutionContext>>) -> Option<Arc<ExecutionContext>> {
    match self {
      Slot::Registry(registry) => registry.switch_to(ctx),
      Slot::Lane => lane::switch_to(ctx),
    }
  }

  fn fork_shallow_copy(&self) -> Option<Arc<ExecutionContext>> {
    match self {
      Slot::Registry(registry) => registry.fork_shallow_copy(),
      Slot::Lane => lane::fork_shallow_copy(),
    }
  }

  fn current(&self) -> Arc<ExecutionContext> {
    match self {
      Slot::Registry(registry) => registry.current(),
      Slot::Lane => lane::current(),
    }
  }
}

/// Restores the previously installed context (through a regular switch) when
/// dropped.
#[must_use = "the previous context is restored as soon as the guard is dropped"]
pub struct ContextScopeGuard<'r> {
  slot: Slot<'r>,
  prev: Option<Arc<ExecutionContext>>,
  // Restores the slot of the lane that created it.
  _not_send: PhantomData<*const ()>,
}

impl<'r> ContextScopeGuard<'r> {
  pub(crate) fn enter(slot: Slot<'r>, ctx: Option<Arc<ExecutionContext>>) -> Self {
    let prev = slot.switch_to(ctx);
    Self {
      slot,
      prev,
      _not_send: PhantomData,
    }
  }

  pub(crate) fn shallow_copy(slot: Slot<'r>) -> Self {
    let prev = slot.fork_shallow_copy();
    Self {
      slot,
      prev,
      _not_send: PhantomData,
    }
  }

  pub(crate) fn shallow_copy_with(slot: Slot<'r>, key: &str, data: Option<DataRef>) -> Self {
    let guard = Self::shallow_copy(slot);
    guard.slot.current().overwrite(key, data);
    guard
  }

  /// The context that will be restored when this guard drops.
  pub fn previous(&self) -> Option<&Arc<ExecutionContext>> {
    self.prev.as_ref()
  }
}

impl Drop for ContextScopeGuard<'_> {
  fn drop(&mut self) {
    self.slot.switch_to(self.prev.take());
  }
}
