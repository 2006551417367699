//! Tools the SQLPilot agent can call.
//!
//! - `sql_db_query`, `sql_db_schema`, `sql_db_list_tables` talk to the
//!   configured SQL engine (Trino over HTTP, or SQLite locally)
//! - `epoch_to_local` turns epoch milliseconds into local wall-clock time

pub mod epoch;
pub mod sql;

use chrono_tz::Tz;
use sqlpilot_config::AppConfig;
use sqlpilot_core::tool::ToolRegistry;
use std::sync::Arc;

pub use epoch::EpochToLocalTool;
pub use sql::{SqlEngine, SqlError};

/// Build the registry for an already-open engine.
pub fn build_registry(
    engine: Arc<dyn SqlEngine>,
    sql: &sqlpilot_config::SqlConfig,
    timezone: Tz,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(sql::QueryTool::new(
        engine.clone(),
        sql.max_result_chars,
    )));
    registry.register(Box::new(sql::TableSchemaTool::new(
        engine.clone(),
        sql.sample_rows,
    )));
    registry.register(Box::new(sql::ListTablesTool::new(engine)));
    registry.register(Box::new(EpochToLocalTool::new(timezone)));
    registry
}

/// Connect to the configured engine and build the full registry.
pub async fn registry_from_config(
    config: &AppConfig,
    timezone: Tz,
) -> Result<ToolRegistry, SqlError> {
    let connection_string = config
        .sql
        .connection_string
        .as_deref()
        .ok_or(SqlError::NotConfigured)?;
    let engine = sql::connect(connection_string).await?;
    let registry = build_registry(engine, &config.sql, timezone);
    tracing::info!(tools = ?registry.names(), "Tool registry ready");
    Ok(registry)
}
