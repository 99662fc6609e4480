// reqscope/examples/async_propagation.rs

use reqscope::{attach, lane, AttachedData, ContextFutureExt, ExecutionContext};
use std::time::Duration;
use tracing::info;

#[derive(Debug)]
struct RequestId(u64);

impl AttachedData for RequestId {}

async fn fetch_profile() {
  tokio::time::sleep(Duration::from_millis(5)).await;
  let id = lane::current().get_as::<RequestId>("request.id").ok().flatten();
  info!(request_id = ?id.map(|id| id.0), thread = ?std::thread::current().id(), "Profile fetched.");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();
  info!("--- Async Propagation Example ---");

  let mut tasks = Vec::new();
  for n in 0..4 {
    let ctx = ExecutionContext::create();
    ctx.set("request.id", attach(RequestId(n)));
    tasks.push(tokio::spawn(
      async {
        fetch_profile().await;
        fetch_profile().await;
      }
      .in_context(ctx),
    ));
  }

  for task in tasks {
    task.await?;
  }
  Ok(())
}
