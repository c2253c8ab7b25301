use plug_energy_monitor::{
    api, device::bridge::BridgeFactory, App, Scheduler, Settings,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    info!("Starting plug energy monitor");
    let settings = Settings::from_env();

    let factory = Arc::new(BridgeFactory::new(settings.bridge_url.clone()));
    let app = App::load(&settings, factory).await;

    // Start the periodic activities:
    // 1. Connection upkeep (reconnect or refresh)
    // 2. Reading capture
    // 3. Persistence flush
    let scheduler = Scheduler::start(app.clone(), &settings);

    let listener = TcpListener::bind(&settings.listen_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", settings.listen_addr, e))?;
    info!("API server listening on {}", settings.listen_addr);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    if let Err(e) = axum::serve(listener, api::create_router(app.clone()))
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!(error = %e, "API server error");
    }

    scheduler.stop();
    app.supervisor.shutdown().await;
    app.flush().await;

    info!("Shutdown complete");
    Ok(())
}
