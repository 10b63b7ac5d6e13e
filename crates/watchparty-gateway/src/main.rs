use std::net::SocketAddr;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use watchparty_gateway::GatewayConfig;

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let config = GatewayConfig::parse();

    watchparty_common::init_tracing_with_default(&config.log_level);
    config.check_bind_allowed()?;

    let (app, _state) = watchparty_gateway::app(&config);

    let listener = TcpListener::bind(config.listen_addr()).await?;
    let bound_addr = listener.local_addr()?;
    info!("gateway listening on {}", bound_addr);
    info!("gateway signaling url ws://{}/ws", bound_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}
