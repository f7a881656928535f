use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use loraserve::config::{Args, Settings};
use loraserve::runtime::RuntimeRegistry;
use loraserve::server::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let settings = Settings::load(&args)?;

    let chat_config = settings.chat_runtime_config()?;
    let adapter_config = settings.adapter_runtime_config();
    info!(
        provider = %settings.chat.provider,
        training = adapter_config.is_some(),
        "starting loraserve"
    );

    let registry = Arc::new(RuntimeRegistry::new(chat_config, adapter_config));
    let state = AppState::new(Arc::clone(&registry), settings.chat.provider.clone());

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    server::serve(addr, state).await?;

    // Runtimes may hold device memory and an in-flight training job; tear
    // them down off the async runtime before exiting.
    tokio::task::spawn_blocking(move || registry.reset_all()).await?;
    info!("shutdown complete");
    Ok(())
}
