mod api;
mod config;
mod request_processor;
mod response_body;
mod server;

use request_processor::AppState;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gateway=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("gateway starting...");

    let args = config::parse_args();
    let gateway_config = config::GatewayConfig::from_args(&args)?;
    let state = AppState::new(gateway_config);

    server::run(state).await?;

    Ok(())
}
