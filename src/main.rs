use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;
use inflight::{config::Config, routes::routes, RunningJobs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let config = Config::from_env().context("Failed to read configuration")?;
  let port = config.server_port;
  let mount = format!("/{}", config.route_prefix.join("/"));
  let manager = RunningJobs::connect(config)
    .await
    .context("Failed to connect to the job store")?;

  info!("Serving running jobs on port {} under {}", port, mount);
  warp::serve(routes(Arc::new(manager)))
    .run(([0, 0, 0, 0], port))
    .await;
  Ok(())
}
