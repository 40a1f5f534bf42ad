//! faceoff coordinator binary.

use faceoff_server::{Server, ServerConfig};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = ServerConfig::from_env();
    if config.persistence_url.is_some() {
        tracing::info!("persistence URL configured; inject a store via Server::builder to use it");
    }

    Server::builder().config(config).build().run().await
}
