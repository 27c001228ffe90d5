use connector_core::observability::init_tracing;
use sync_service::config::ConnectorConfig;
use sync_service::services::init_metrics;
use sync_service::startup::Application;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_tracing("sync-service", "info");
    init_metrics();

    let config = ConnectorConfig::load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    let app = Application::build(config).await.map_err(|e| {
        tracing::error!("Failed to build application: {}", e);
        std::io::Error::other(format!("Startup error: {}", e))
    })?;

    app.run_until_stopped().await
}
