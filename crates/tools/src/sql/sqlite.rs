//! SQLite engine for local development and tests.

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

use super::engine::{QueryOutput, RowCollector, SqlEngine, SqlError};

pub struct SqliteEngine {
    pool: SqlitePool,
}

impl SqliteEngine {
    /// Open a database from a `sqlite:` URL.
    ///
    /// `sqlite::memory:` gives a private in-process database held by a
    /// single connection for the life of the engine.
    pub async fn connect(url: &str) -> Result<Self, SqlError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| SqlError::InvalidConnectionString(format!("{url}: {e}")))?;

        let in_memory = url.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 4 });
        if in_memory {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| SqlError::Connection(format!("failed to open SQLite: {e}")))?;

        info!("SQLite engine opened at {url}");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn map_sqlx_error(e: sqlx::Error) -> SqlError {
    match e {
        sqlx::Error::Database(db) => SqlError::Query(db.message().to_string()),
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => SqlError::Connection(e.to_string()),
        other => SqlError::Query(other.to_string()),
    }
}

/// Decode one column into JSON, trying the storage classes SQLite has.
fn decode_cell(row: &SqliteRow, index: usize) -> serde_json::Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return v.map(serde_json::Value::from).unwrap_or(serde_json::Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return v.map(serde_json::Value::from).unwrap_or(serde_json::Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return v.map(serde_json::Value::from).unwrap_or(serde_json::Value::Null);
    }
    match row.try_get::<Option<Vec<u8>>, _>(index) {
        Ok(Some(bytes)) => serde_json::Value::from(format!("<blob {} bytes>", bytes.len())),
        _ => serde_json::Value::Null,
    }
}

#[async_trait]
impl SqlEngine for SqliteEngine {
    fn dialect(&self) -> &str {
        "sqlite"
    }

    async fn list_tables(&self) -> Result<Vec<String>, SqlError> {
        let rows = sqlx::query(
            "SELECT name FROM sqlite_master \
             WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' \
             ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(map_sqlx_error))
            .collect()
    }

    async fn table_ddl(&self, table: &str) -> Result<String, SqlError> {
        let row = sqlx::query(
            "SELECT sql FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?",
        )
        .bind(table)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(row) => row.try_get::<String, _>("sql").map_err(map_sqlx_error),
            None => Err(SqlError::TableNotFound(vec![table.to_string()])),
        }
    }

    async fn query_limited(&self, sql: &str, max_chars: usize) -> Result<QueryOutput, SqlError> {
        debug!(sql, "Executing SQLite query");
        let mut stream = sqlx::query(sql).fetch(&self.pool);
        let mut collector = RowCollector::new(max_chars);

        while let Some(row) = stream.try_next().await.map_err(map_sqlx_error)? {
            collector.columns(|| row.columns().iter().map(|c| c.name().to_string()).collect());
            let cells = (0..row.len()).map(|i| decode_cell(&row, i)).collect();
            if !collector.push(cells) {
                debug!(max_chars, "Result budget reached, not reading further rows");
                break;
            }
        }

        Ok(collector.finish())
    }
}
