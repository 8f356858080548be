//! # Say Hi Server
//!
//! Application entry point: tracing, configuration, then the combined
//! gateway + service process.

use anyhow::Result;
use tracing::info;

use sayhi_server::config::Settings;
use sayhi_server::startup::Application;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for structured logging
    sayhi_server::telemetry::init_tracing();

    info!("Starting Say Hi server...");

    // Load configuration from environment and config files
    let settings = Settings::load()?;
    info!(
        host = %settings.server.host,
        port = %settings.server.port,
        environment = %settings.environment,
        broker = %settings.broker.driver,
        "Configuration loaded"
    );

    // Build and run the application
    let application = Application::build(settings).await?;
    info!(queues = ?application.bound_queues(), "Queue consumers bound");

    info!("Server ready to accept connections");
    application.run_until_stopped().await?;

    Ok(())
}
