use std::path::PathBuf;
use torii::config::GatewayConfig;
use torii::proxy::ProxyServer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = GatewayConfig::load(config_path.as_deref())?;

    ProxyServer::new(config).start().await
}
