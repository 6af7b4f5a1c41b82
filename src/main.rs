use club_sync::{router, AppState, Config, FileStore, HttpGateway};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config = Config::from_env();
    if config.api_url.is_none() {
        warn!("CLUB_API_URL is not set, remote calls will fail");
    }
    info!("caching club data under {}", config.data_dir.display());

    let state = AppState::new(
        HttpGateway::new(config.api_url.clone()),
        FileStore::new(&config.data_dir),
    );
    state.start().await;

    let addr = config.addr();
    info!("listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
