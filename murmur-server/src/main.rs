use anyhow::Context;
use murmur_server::{router_with_body_limit, Config, OpenAiProvider, StreamingRelay};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    info!("Using OpenAI model: {}", config.model);

    let provider = Arc::new(OpenAiProvider::new(&config));
    let relay = StreamingRelay::new(provider).with_channel_capacity(config.channel_capacity);
    let app = router_with_body_limit(relay, config.max_body_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    info!("Server listening on {}", config.bind);
    axum::serve(listener, app).await?;

    Ok(())
}
