// reqscope/examples/shallow_copy.rs

use reqscope::{attach, lane, AttachedData, ExecutionContext};
use tracing::info;

#[derive(Debug)]
struct Deadline(&'static str);

impl AttachedData for Deadline {}

fn describe(label: &str) {
  let ctx = lane::current();
  let deadline = ctx.get_as::<Deadline>("deadline").ok().flatten();
  info!(label = label, entries = ctx.len(), deadline = ?deadline.map(|d| d.0), "Current context.");
}

fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();
  info!("--- Shallow Copy Example ---");

  let request = ExecutionContext::create();
  request.set("deadline", attach(Deadline("500ms")));
  request.set("user", attach(Deadline("unused")));

  let _request_scope = lane::enter(request.clone());
  describe("request");

  {
    // A sub-call with a tighter deadline; everything else is shared with the parent.
    let _child = lane::enter_shallow_copy_with("deadline", attach(Deadline("50ms")));
    describe("sub-call");
  }

  describe("request again");
  Ok(())
}
