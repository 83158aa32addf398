use anyhow::Result;
use gradconnect_server::{server, telemetry, ServerConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize telemetry
    let json_logs = matches!(
        std::env::var("GRADCONNECT_LOG_FORMAT").as_deref(),
        Ok("json")
    );
    if json_logs {
        telemetry::init_json().map_err(|e| anyhow::anyhow!("Failed to init telemetry: {}", e))?;
    } else {
        telemetry::init().map_err(|e| anyhow::anyhow!("Failed to init telemetry: {}", e))?;
    }

    info!("GradConnect notification server starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let server_config = ServerConfig::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load server configuration: {}", e))?;
    server_config.log_config();

    // Start the server
    server::start(server_config).await?;

    telemetry::shutdown();

    Ok(())
}
