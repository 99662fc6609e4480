// reqscope/src/propagation.rs

//! Carrying a context across `.await` points and worker-thread hops.
//!
//! A future wrapped in [`WithContext`] installs its captured context on the
//! polling thread's lane for the duration of every `poll`, and restores
//! whatever was there before when `poll` returns. Code inside the future
//! therefore always observes the context it was bound to, no matter which
//! worker thread the executor resumes it on.

use crate::core::context::ExecutionContext;
use crate::lane;
use crate::registry::{ContextScopeGuard, Slot};
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

pin_project! {
  /// Future adapter returned by [`ContextFutureExt`].
  #[must_use = "futures do nothing unless polled"]
  pub struct WithContext<F> {
    #[pin]
    inner: F,
    context: Option<Arc<ExecutionContext>>,
  }
}

impl<F> WithContext<F> {
  pub fn new(inner: F, context: Option<Arc<ExecutionContext>>) -> Self {
    Self { inner, context }
  }

  /// The context installed around each poll. `None` means the lane default.
  pub fn context(&self) -> Option<&Arc<ExecutionContext>> {
    self.context.as_ref()
  }
}

impl<F: Future> Future for WithContext<F> {
  type Output = F::Output;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let this = self.project();
    let _scope = ContextScopeGuard::enter(Slot::Lane, this.context.clone());
    this.inner.poll(cx)
  }
}

pub trait ContextFutureExt: Future + Sized {
  /// Runs this future inside `context`.
  fn in_context(self, context: Arc<ExecutionContext>) -> WithContext<Self> {
    WithContext::new(self, Some(context))
  }

  /// Runs this future inside whatever context is installed on the calling
  /// thread right now.
  fn in_current_context(self) -> WithContext<Self> {
    WithContext::new(self, lane::installed())
  }
}

impl<F: Future> ContextFutureExt for F {}
