use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use concierge::server::Server;
use concierge::{Core, CoreConfig};

const DEFAULT_BIND: &str = "127.0.0.1:4860";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let bind: SocketAddr = std::env::var("CONCIERGE_ADDR")
        .unwrap_or_else(|_| DEFAULT_BIND.to_string())
        .parse()?;

    let config = CoreConfig::from_env();
    let core = Arc::new(Core::with_defaults(config));
    core.spawn_sweeper();

    let mut server = Server::start(core, bind).await?;
    tracing::info!(addr = %server.addr(), "concierge listening");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    server.shutdown()?;
    Ok(())
}
