//! SQL toolkit: list tables, describe tables, run queries.

pub mod engine;
pub mod sqlite;
pub mod tools;
pub mod trino;

pub use engine::{QueryOutput, SqlEngine, SqlError, connect};
pub use sqlite::SqliteEngine;
pub use tools::{ListTablesTool, QueryTool, TableSchemaTool};
pub use trino::TrinoEngine;
