//! Shouban Trading - first-board screening and auto-trading bot.
//!
//! Screens A-share concept boards during the opening momentum window and
//! buys first-board candidates at the limit-up price through the broker
//! gateway.

use anyhow::Result;
use shouban_common::config::Config;
use shouban_common::logging::init_logging;
use shouban_trading::BotService;

#[tokio::main]
async fn main() -> Result<()> {
    // Start timing immediately for cold-start measurement
    let startup_start = std::time::Instant::now();

    // Load configuration
    let config = Config::load_with_env()?;

    // Initialize logging
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    tracing::info!("Shouban Trading v{}", env!("CARGO_PKG_VERSION"));

    config.validate()?;

    // Start the bot service
    let service = BotService::new(config);

    // Log startup timing before entering the scheduler loop
    let startup_duration = startup_start.elapsed();
    tracing::info!(
        duration_ms = startup_duration.as_millis() as u64,
        "Service initialized in {:?}",
        startup_duration
    );

    service.start().await
}
