//! `sqlpilot tables`: List the tables the agent can query.

use sqlpilot_tools::sql;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;
    let connection_string = config
        .sql
        .connection_string
        .as_deref()
        .ok_or(sqlpilot_tools::SqlError::NotConfigured)?;

    let engine = sql::connect(connection_string).await?;
    let tables = engine.list_tables().await?;

    println!("🗄️  {} tables ({} dialect)", tables.len(), engine.dialect());
    println!("─────────────────────────────────────");
    for table in &tables {
        println!("  {table}");
    }
    Ok(())
}
