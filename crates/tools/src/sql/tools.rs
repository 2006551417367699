//! The SQL toolkit exposed to the model.
//!
//! Engine rejections (bad column, syntax error, unknown table) come back as
//! tool result text so the model can rewrite its query. Only an unreachable
//! engine is reported as an error.

use async_trait::async_trait;
use sqlpilot_core::error::ToolError;
use sqlpilot_core::tool::{Tool, ToolResult};
use std::sync::Arc;

use super::engine::{SqlEngine, SqlError};

fn to_tool_outcome(tool_name: &str, err: SqlError) -> Result<ToolResult, ToolError> {
    if err.is_transport() {
        Err(ToolError::Transport {
            tool_name: tool_name.to_string(),
            reason: err.to_string(),
        })
    } else {
        Ok(ToolResult::failure(format!("Error: {err}")))
    }
}

/// `sql_db_list_tables`
pub struct ListTablesTool {
    engine: Arc<dyn SqlEngine>,
}

impl ListTablesTool {
    pub fn new(engine: Arc<dyn SqlEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for ListTablesTool {
    fn name(&self) -> &str {
        "sql_db_list_tables"
    }

    fn description(&self) -> &str {
        "Input is an empty string, output is a comma-separated list of tables in the database."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "tool_input": {
                    "type": "string",
                    "description": "An empty string"
                }
            }
        })
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        match self.engine.list_tables().await {
            Ok(tables) => Ok(ToolResult::success(tables.join(", "))),
            Err(e) => to_tool_outcome(self.name(), e),
        }
    }
}

/// `sql_db_schema`: DDL plus a few example rows for each requested table.
pub struct TableSchemaTool {
    engine: Arc<dyn SqlEngine>,
    sample_rows: u32,
}

impl TableSchemaTool {
    pub fn new(engine: Arc<dyn SqlEngine>, sample_rows: u32) -> Self {
        Self { engine, sample_rows }
    }

    async fn describe(&self, table: &str) -> Result<String, SqlError> {
        let ddl = self.engine.table_ddl(table).await?;
        if self.sample_rows == 0 {
            return Ok(ddl);
        }
        let sample = match self.engine.sample_rows(table, self.sample_rows).await {
            Ok(sample) => sample.render_tsv(),
            Err(e) if e.is_transport() => return Err(e),
            Err(e) => format!("Error: {e}"),
        };
        Ok(format!(
            "{ddl}\n\n/*\n{} rows from {table} table:\n{sample}\n*/",
            self.sample_rows
        ))
    }
}

#[async_trait]
impl Tool for TableSchemaTool {
    fn name(&self) -> &str {
        "sql_db_schema"
    }

    fn description(&self) -> &str {
        "Input to this tool is a comma-separated list of tables, output is the schema and sample \
         rows for those tables. Be sure that the tables actually exist by calling \
         sql_db_list_tables first! Example Input: table1, table2, table3"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "table_names": {
                    "type": "string",
                    "description": "A comma-separated list of the table names for which to return the schema. Example input: 'table1, table2, table3'"
                }
            },
            "required": ["table_names"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let requested = arguments["table_names"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'table_names' argument".into()))?;

        let tables: Vec<&str> = requested
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect();
        if tables.is_empty() {
            return Err(ToolError::InvalidArguments(
                "'table_names' must name at least one table".into(),
            ));
        }

        let known = match self.engine.list_tables().await {
            Ok(known) => known,
            Err(e) => return to_tool_outcome(self.name(), e),
        };
        let missing: Vec<String> = tables
            .iter()
            .filter(|t| !known.iter().any(|k| k == *t))
            .map(|t| t.to_string())
            .collect();
        if !missing.is_empty() {
            return to_tool_outcome(self.name(), SqlError::TableNotFound(missing));
        }

        let mut sections = Vec::with_capacity(tables.len());
        for table in tables {
            match self.describe(table).await {
                Ok(section) => sections.push(section),
                Err(e) => return to_tool_outcome(self.name(), e),
            }
        }
        Ok(ToolResult::success(sections.join("\n\n")))
    }
}

/// `sql_db_query`
pub struct QueryTool {
    engine: Arc<dyn SqlEngine>,
    max_result_chars: usize,
}

impl QueryTool {
    pub fn new(engine: Arc<dyn SqlEngine>, max_result_chars: usize) -> Self {
        Self {
            engine,
            max_result_chars,
        }
    }
}

#[async_trait]
impl Tool for QueryTool {
    fn name(&self) -> &str {
        "sql_db_query"
    }

    fn description(&self) -> &str {
        "Input to this tool is a detailed and correct SQL query, output is a result from the \
         database. If the query is not correct, an error message will be returned. If an error \
         is returned, rewrite the query, check the query, and try again. If you encounter an \
         issue with Unknown column 'xxxx' in 'field list', use sql_db_schema to query the \
         correct table fields."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "A detailed and correct SQL query."
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let query = arguments["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;

        match self.engine.query_limited(query, self.max_result_chars).await {
            Ok(output) => {
                tracing::debug!(rows = output.rows.len(), truncated = output.truncated, "Query succeeded");
                Ok(ToolResult::success(output.render(self.max_result_chars)))
            }
            Err(e) => {
                tracing::debug!(error = %e, "Query rejected by engine");
                to_tool_outcome(self.name(), e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::engine::QueryOutput;
    use crate::sql::sqlite::tests::turbine_db;

    /// An engine whose network is down.
    struct DownEngine;

    #[async_trait]
    impl SqlEngine for DownEngine {
        fn dialect(&self) -> &str {
            "trino"
        }
        async fn list_tables(&self) -> Result<Vec<String>, SqlError> {
            Err(SqlError::Connection("connection refused".into()))
        }
        async fn table_ddl(&self, _table: &str) -> Result<String, SqlError> {
            Err(SqlError::Connection("connection refused".into()))
        }
        async fn query_limited(&self, _sql: &str, _max_chars: usize) -> Result<QueryOutput, SqlError> {
            Err(SqlError::Connection("connection refused".into()))
        }
    }

    async fn engine() -> Arc<dyn SqlEngine> {
        Arc::new(turbine_db().await)
    }

    #[tokio::test]
    async fn list_tables_is_comma_separated() {
        let tool = ListTablesTool::new(engine().await);
        let result = tool.execute(serde_json::json!({})).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output, "readings, turbines");
    }

    #[tokio::test]
    async fn schema_includes_ddl_and_samples() {
        let tool = TableSchemaTool::new(engine().await, 2);
        let result = tool
            .execute(serde_json::json!({"table_names": "turbines"}))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.output.contains("CREATE TABLE turbines"));
        assert!(result.output.contains("2 rows from turbines table:"));
        assert!(result.output.contains("asset_id\tsite\nT-001\tNorth"));
    }

    #[tokio::test]
    async fn schema_handles_several_tables() {
        let tool = TableSchemaTool::new(engine().await, 0);
        let result = tool
            .execute(serde_json::json!({"table_names": "turbines, readings"}))
            .await
            .unwrap();
        assert!(result.output.contains("CREATE TABLE turbines"));
        assert!(result.output.contains("CREATE TABLE readings"));
        assert!(!result.output.contains("rows from"));
    }

    #[tokio::test]
    async fn schema_of_unknown_table_is_text() {
        let tool = TableSchemaTool::new(engine().await, 3);
        let result = tool
            .execute(serde_json::json!({"table_names": "turbines, nacelles"}))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.output.contains("nacelles"));
    }

    #[tokio::test]
    async fn query_returns_json_rows() {
        let tool = QueryTool::new(engine().await, 4000);
        let result = tool
            .execute(serde_json::json!({"query": "SELECT COUNT(*) AS n FROM turbines"}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output, r#"[{"n":3}]"#);
    }

    #[tokio::test]
    async fn query_error_is_returned_as_text() {
        let tool = QueryTool::new(engine().await, 4000);
        let result = tool
            .execute(serde_json::json!({"query": "SELECT temp FROM readings"}))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.output.starts_with("Error:"));
        assert!(result.output.contains("temp"));
    }

    #[tokio::test]
    async fn query_output_is_truncated() {
        let tool = QueryTool::new(engine().await, 20);
        let result = tool
            .execute(serde_json::json!({"query": "SELECT * FROM readings"}))
            .await
            .unwrap();
        assert!(result.output.contains("truncated"));
    }

    #[tokio::test]
    async fn missing_query_argument() {
        let tool = QueryTool::new(engine().await, 4000);
        let err = tool.execute(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn unreachable_engine_is_a_transport_error() {
        let tool = QueryTool::new(Arc::new(DownEngine), 4000);
        let err = tool
            .execute(serde_json::json!({"query": "SELECT 1"}))
            .await
            .unwrap_err();
        assert!(err.is_fatal());

        let tool = ListTablesTool::new(Arc::new(DownEngine));
        assert!(tool.execute(serde_json::json!({})).await.is_err());
    }
}
