// reqscope/examples/request_scope.rs

use reqscope::{attach, lane, AttachedData, ExecutionContext};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

// 1. A payload without callbacks: just data.
#[derive(Debug)]
struct RequestId(u64);

impl AttachedData for RequestId {}

// 2. A payload that wants to know when its request is on- and off-CPU.
struct CpuTimer {
  name: &'static str,
  activations: AtomicU64,
}

impl AttachedData for CpuTimer {
  fn has_callback(&self) -> bool {
    true
  }

  fn on_set(&self) {
    let n = self.activations.fetch_add(1, Ordering::Relaxed) + 1;
    info!(timer = self.name, activation = n, "Request became current.");
  }

  fn on_unset(&self) {
    info!(timer = self.name, "Request stopped being current.");
  }
}

fn handle(step: &str) {
  let ctx = lane::current();
  let id = ctx.get_as::<RequestId>("request.id").ok().flatten();
  info!(step = step, request_id = ?id.map(|id| id.0), "Handling step.");
}

fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();
  info!("--- Request Scope Example ---");

  let first = ExecutionContext::create();
  first.set("request.id", attach(RequestId(1)));
  first.set(
    "cpu.timer",
    attach(CpuTimer {
      name: "first",
      activations: AtomicU64::new(0),
    }),
  );

  let second = ExecutionContext::create();
  second.set("request.id", attach(RequestId(2)));

  // Interleave two requests on one thread, as an event loop would.
  for round in 0..2 {
    info!(round = round, "Round starting.");
    {
      let _scope = lane::enter(first.clone());
      handle("parse");
    }
    {
      let _scope = lane::enter(second.clone());
      handle("parse");
    }
  }

  // A second subsystem racing to attach the same key keeps the first value.
  let won = first.set_if_absent("request.id", attach(RequestId(99)));
  info!(won = won, "Second attach of request.id.");

  Ok(())
}
