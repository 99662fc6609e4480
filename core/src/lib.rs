// src/lib.rs

//! reqscope: execution-scoped request context for Rust.
//!
//! A request context is a keyed bag of shared data that follows one logical
//! request across callbacks, worker threads and async tasks, so tracing,
//! accounting or cancellation code can ask "which request am I serving?"
//! without threading that information through every call.
//!
//!  - [`ExecutionContext`] holds the data: `set`, `set_if_absent`, `overwrite`,
//!    `get`, `has`, `clear`.
//!  - [`AttachedData`] payloads are reference counted and may opt into
//!    `on_set` / `on_unset` notifications when they become visible or hidden.
//!  - [`ContextRegistry`] is a lane's "current context" slot. Switching between
//!    contexts only notifies the entries whose visibility actually changes, and
//!    forking a shallow copy notifies nobody.
//!  - [`lane`] exposes the calling thread's registry, and
//!    [`ContextFutureExt`] carries a context through async code.

pub mod config;
pub mod core;
pub mod error;
pub mod lane;
pub mod propagation;
pub mod registry;

// --- Re-exports for the Public API ---

pub use crate::core::callbacks::CallbackIndex;
pub use crate::core::context::ExecutionContext;
pub use crate::core::data::{acquire, attach, AttachedData, DataId, DataRef};
pub use crate::core::store::{overwrite_warning_count, ContextStore};

pub use crate::registry::{default_context, ContextRegistry, ContextScopeGuard};

pub use crate::propagation::{ContextFutureExt, WithContext};

pub use crate::config::ContextConfig;
pub use crate::error::{ContextError, ContextResult};

/*
    Typical flow:
    1. A server accepts a request and calls `lane::enter_new()` (or installs a
       prepared context with `lane::enter(ctx)`).
    2. Subsystems attach their data: `lane::current().set_if_absent("tracing.span", attach(span))`.
    3. Work handed to another thread or task captures the context, e.g.
       `fut.in_current_context()`, and sees the same data when it runs.
    4. A sub-operation that needs to tweak one entry without affecting its parent
       uses `lane::enter_shallow_copy_with(key, data)`.
    5. Dropping the guards restores the previous contexts in order.
*/
