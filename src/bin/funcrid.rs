use std::sync::Arc;

use anyhow::Result;
use funcri::backend::{self, FunctionStore};
use rpcweb_lite::{Router, RpcServer};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_LISTEN: &str = "127.0.0.1:50051";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let listen = std::env::var("FUNCRI_LISTEN").unwrap_or_else(|_| DEFAULT_LISTEN.to_owned());
    let addr = listen.parse()?;

    let shutdown = CancellationToken::new();
    let store = Arc::new(FunctionStore::new());
    let router = Arc::new(
        Router::new(shutdown.clone()).install(backend::services(&store))?,
    );

    let server = router.server(addr);
    let handle = server.start().await?;
    info!(addr = %handle.local_addr(), paths = router.path_count(), "funcrid listening");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    shutdown.cancel();
    server.stop().await?;
    Ok(())
}
