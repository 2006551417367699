pub mod chat;
pub mod config_cmd;
pub mod tables;

use sqlpilot_agent::TurnController;
use sqlpilot_config::AppConfig;
use std::sync::Arc;

/// Load configuration from the default location.
pub fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}

/// Wire provider, SQL engine and tools into a turn controller.
pub async fn build_controller(
    config: AppConfig,
) -> Result<TurnController, Box<dyn std::error::Error>> {
    let timezone = config.parsed_timezone()?;
    let provider = sqlpilot_providers::build_from_config(&config)?;
    let tools = sqlpilot_tools::registry_from_config(&config, timezone).await?;
    let controller = TurnController::new(Arc::new(config), provider, Arc::new(tools))?;
    Ok(controller)
}
