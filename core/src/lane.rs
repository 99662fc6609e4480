// reqscope/src/lane.rs

//! The calling thread's context slot.
//!
//! Every OS thread owns one [`ContextRegistry`]. Code running on a thread sees
//! whatever context was last installed there; async tasks that hop between
//! worker threads carry theirs along with [`crate::propagation`].

use crate::core::context::ExecutionContext;
use crate::core::data::DataRef;
use crate::registry::{ContextRegistry, ContextScopeGuard, Slot};
use std::sync::Arc;

thread_local! {
  static LANE: ContextRegistry = ContextRegistry::new();
}

/// Runs `f` against this thread's registry.
pub fn with_registry<R>(f: impl FnOnce(&ContextRegistry) -> R) -> R {
  LANE.with(f)
}

/// The context installed on this thread, or the process-wide default one.
pub fn current() -> Arc<ExecutionContext> {
  with_registry(ContextRegistry::current)
}

/// The context installed on this thread, if any.
pub fn installed() -> Option<Arc<ExecutionContext>> {
  with_registry(ContextRegistry::installed)
}

/// See [`ContextRegistry::switch_to`].
pub fn switch_to(ctx: Option<Arc<ExecutionContext>>) -> Option<Arc<ExecutionContext>> {
  with_registry(|registry| registry.switch_to(ctx))
}

/// See [`ContextRegistry::fork_shallow_copy`].
pub fn fork_shallow_copy() -> Option<Arc<ExecutionContext>> {
  with_registry(ContextRegistry::fork_shallow_copy)
}

pub fn enter(ctx: Arc<ExecutionContext>) -> ContextScopeGuard<'static> {
  ContextScopeGuard::enter(Slot::Lane, Some(ctx))
}

pub fn enter_new() -> ContextScopeGuard<'static> {
  enter(ExecutionContext::create())
}

pub fn enter_shallow_copy() -> ContextScopeGuard<'static> {
  ContextScopeGuard::shallow_copy(Slot::Lane)
}

pub fn enter_shallow_copy_with(key: &str, data: Option<DataRef>) -> ContextScopeGuard<'static> {
  ContextScopeGuard::shallow_copy_with(Slot::Lane, key, data)
}
