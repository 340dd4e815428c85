use anyhow::{Context, Result};
use sessionflow_server::config::ServiceConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Set up logging first so configuration warnings are recorded
    sessionflow_monitoring::init_logging(&ServiceConfig::monitoring_from_env())
        .context("Failed to initialize logging")?;

    // Load configuration from environment variables
    let config = ServiceConfig::load().context("Failed to load configuration")?;

    // Run the server using the library's run function
    sessionflow_server::run(config).await.context("Server error")?;

    Ok(())
}
