//! The SQL engine boundary.
//!
//! The SQL tools never talk to a database directly. They go through
//! [`SqlEngine`], which has one implementation per connection scheme.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use super::sqlite::SqliteEngine;
use super::trino::TrinoEngine;

/// Errors from the SQL engine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SqlError {
    #[error("no SQL connection configured (set sql.connection_string or SQLPILOT_SQL_URL)")]
    NotConfigured,

    #[error("unsupported connection string '{0}'")]
    InvalidConnectionString(String),

    /// The engine could not be reached or stopped answering.
    #[error("connection to SQL engine failed: {0}")]
    Connection(String),

    /// The engine rejected the statement.
    #[error("{0}")]
    Query(String),

    #[error("table_names {0:?} not found in database")]
    TableNotFound(Vec<String>),
}

impl SqlError {
    /// True when the engine itself is unavailable, as opposed to a bad statement.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::InvalidConnectionString(_) | Self::NotConfigured
        )
    }
}

/// Column names and rows returned by a statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    /// The engine stopped reading before the last row.
    pub truncated: bool,
}

impl QueryOutput {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows as JSON objects keyed by column name.
    pub fn to_json_rows(&self) -> Vec<serde_json::Value> {
        self.rows
            .iter()
            .map(|row| {
                let object: serde_json::Map<String, serde_json::Value> = self
                    .columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect();
                serde_json::Value::Object(object)
            })
            .collect()
    }

    /// Render rows as JSON, cut to at most `max_chars` characters.
    pub fn render(&self, max_chars: usize) -> String {
        if self.is_empty() {
            return "Query returned no rows.".into();
        }
        let json = serde_json::to_string(&self.to_json_rows()).unwrap_or_default();
        if self.truncated {
            let kept: String = json.chars().take(max_chars).collect();
            return format!("{kept}\n... (truncated, further rows were not read)");
        }
        truncate_chars(&json, max_chars)
    }

    /// Tab-separated rendering with a header line, used for schema samples.
    pub fn render_tsv(&self) -> String {
        let mut out = self.columns.join("\t");
        for row in &self.rows {
            out.push('\n');
            let cells: Vec<String> = row.iter().map(render_cell).collect();
            out.push_str(&cells.join("\t"));
        }
        out
    }
}

fn render_cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "None".into(),
        other => other.to_string(),
    }
}

/// Gathers rows until they are certain to overflow a rendering budget.
///
/// Each row is measured as a JSON array, which is never longer than the
/// object form [`QueryOutput::render`] produces. Once the measured size
/// passes `max_chars` the rendered output would be cut anyway, so the
/// remaining rows need not be read.
#[derive(Debug)]
pub struct RowCollector {
    output: QueryOutput,
    max_chars: usize,
    chars: usize,
}

impl RowCollector {
    pub fn new(max_chars: usize) -> Self {
        Self {
            output: QueryOutput::default(),
            max_chars,
            chars: 0,
        }
    }

    /// Set the column names, keeping the first ones reported.
    pub fn columns(&mut self, columns: impl FnOnce() -> Vec<String>) {
        if self.output.columns.is_empty() {
            self.output.columns = columns();
        }
    }

    pub fn is_full(&self) -> bool {
        self.chars > self.max_chars
    }

    /// Add a row. Returns false, and marks the output truncated, when the
    /// budget was already exceeded.
    pub fn push(&mut self, row: Vec<serde_json::Value>) -> bool {
        if self.is_full() {
            self.output.truncated = true;
            return false;
        }
        let size = serde_json::to_string(&row)
            .map(|s| s.chars().count())
            .unwrap_or_default();
        self.chars = self.chars.saturating_add(size);
        self.output.rows.push(row);
        true
    }

    /// Record that rows were left unread.
    pub fn mark_truncated(&mut self) {
        self.output.truncated = true;
    }

    pub fn finish(self) -> QueryOutput {
        self.output
    }
}

/// Truncate on a character boundary, noting how much was cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{kept}\n... (truncated, {} more characters)", total - max_chars)
}

/// Quote an identifier with double quotes, doubling any embedded quote.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// A queryable SQL engine.
#[async_trait]
pub trait SqlEngine: Send + Sync {
    /// Dialect name as the model should see it (e.g. "trino").
    fn dialect(&self) -> &str;

    /// Names of the tables visible in the configured scope.
    async fn list_tables(&self) -> Result<Vec<String>, SqlError>;

    /// `CREATE TABLE` statement for one table.
    async fn table_ddl(&self, table: &str) -> Result<String, SqlError>;

    /// Run a statement, reading rows only until their rendering is known
    /// to exceed `max_chars`.
    async fn query_limited(&self, sql: &str, max_chars: usize) -> Result<QueryOutput, SqlError>;

    /// Run a statement and collect every row.
    async fn query(&self, sql: &str) -> Result<QueryOutput, SqlError> {
        self.query_limited(sql, usize::MAX).await
    }

    /// The first `limit` rows of a table.
    async fn sample_rows(&self, table: &str, limit: u32) -> Result<QueryOutput, SqlError> {
        self.query(&format!("SELECT * FROM {} LIMIT {limit}", quote_identifier(table)))
            .await
    }
}

/// Open an engine for a connection string.
///
/// - `trino://user@host:port/catalog/schema[?ssl=true]`
/// - `sqlite:path` or `sqlite::memory:`
pub async fn connect(connection_string: &str) -> Result<Arc<dyn SqlEngine>, SqlError> {
    if connection_string.starts_with("trino://") {
        let engine = TrinoEngine::from_connection_string(connection_string)?;
        tracing::info!(url = %engine.base_url(), catalog = %engine.catalog(), "Using Trino SQL engine");
        Ok(Arc::new(engine))
    } else if connection_string.starts_with("sqlite:") {
        let engine = SqliteEngine::connect(connection_string).await?;
        Ok(Arc::new(engine))
    } else {
        let scheme = connection_string.split("://").next().unwrap_or_default();
        Err(SqlError::InvalidConnectionString(format!("{scheme}://...")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> QueryOutput {
        QueryOutput {
            columns: vec!["asset_id".into(), "avg_temp".into()],
            rows: vec![
                vec![json!("T-001"), json!(41.5)],
                vec![json!("T-002"), json!(null)],
            ],
            truncated: false,
        }
    }

    #[test]
    fn renders_rows_as_json_objects() {
        let rendered = sample().render(4000);
        assert_eq!(
            rendered,
            r#"[{"asset_id":"T-001","avg_temp":41.5},{"asset_id":"T-002","avg_temp":null}]"#
        );
    }

    #[test]
    fn empty_result_has_a_message() {
        assert_eq!(QueryOutput::default().render(100), "Query returned no rows.");
    }

    #[test]
    fn long_results_are_truncated() {
        let rendered = sample().render(10);
        assert!(rendered.starts_with(r#"[{"asset"#));
        assert!(rendered.contains("truncated"));
    }

    #[test]
    fn collector_stops_once_rendering_would_overflow() {
        let mut collector = RowCollector::new(20);
        collector.columns(|| vec!["asset_id".into(), "avg_temp".into()]);
        let mut accepted = 0;
        for i in 0..1000 {
            if !collector.push(vec![json!(format!("T-{i:03}")), json!(40.0)]) {
                break;
            }
            accepted += 1;
        }
        // ["T-000",40.0] is 14 characters, so two rows already pass 20.
        assert_eq!(accepted, 2);
        let out = collector.finish();
        assert!(out.truncated);
        assert_eq!(out.rows.len(), 2);

        let rendered = out.render(20);
        assert_eq!(rendered.lines().next().map(|l| l.chars().count()), Some(20));
        assert!(rendered.contains("further rows were not read"));
    }

    #[test]
    fn collector_within_budget_keeps_everything() {
        let mut collector = RowCollector::new(4000);
        for row in sample().rows {
            assert!(collector.push(row));
        }
        let out = collector.finish();
        assert!(!out.truncated);
        assert_eq!(out.rows.len(), 2);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let out = truncate_chars("ééééé", 2);
        assert!(out.starts_with("éé\n"));
        assert!(out.contains("3 more characters"));
    }

    #[test]
    fn tsv_has_header_and_rows() {
        let tsv = sample().render_tsv();
        assert_eq!(tsv, "asset_id\tavg_temp\nT-001\t41.5\nT-002\tNone");
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_identifier("turbines"), "\"turbines\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn transport_classification() {
        assert!(SqlError::Connection("refused".into()).is_transport());
        assert!(!SqlError::Query("syntax error".into()).is_transport());
        assert!(!SqlError::TableNotFound(vec!["x".into()]).is_transport());
    }

    #[tokio::test]
    async fn unknown_scheme_is_rejected() {
        let err = match connect("postgres://localhost/db").await {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(matches!(err, SqlError::InvalidConnectionString(_)));
    }
}
