use std::net::SocketAddr;
use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

const DEFAULT_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_DIR: &str = "bundles";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let addr: SocketAddr = std::env::var("ASSET_SERVER_ADDR")
        .unwrap_or_else(|_| DEFAULT_ADDR.to_string())
        .parse()?;
    let dir = PathBuf::from(
        std::env::var("ASSET_SERVER_DIR").unwrap_or_else(|_| DEFAULT_DIR.to_string()),
    );

    asset_server::serve(addr, dir).await
}
