//! Epoch-to-local-time tool.
//!
//! Query results often carry event times as Unix epoch milliseconds. This
//! tool renders such a value as a wall-clock time in the configured zone so
//! the model can answer in terms the user recognises.

use async_trait::async_trait;
use chrono::{DateTime, Timelike};
use chrono_tz::Tz;
use sqlpilot_core::error::ToolError;
use sqlpilot_core::tool::{Tool, ToolResult};

const INVALID_EPOCH: &str = "InvalidArgument: Invalid epoch time provided. Please provide a valid \
     integer representing milliseconds since the Unix epoch.";

pub struct EpochToLocalTool {
    timezone: Tz,
}

impl EpochToLocalTool {
    pub fn new(timezone: Tz) -> Self {
        Self { timezone }
    }

    /// Render `epoch_ms` in the tool's zone, e.g. `2023-11-15 09:13:20+11:00`.
    pub fn convert(&self, epoch_ms: i64) -> Option<String> {
        let utc = DateTime::from_timestamp_millis(epoch_ms)?;
        let local = utc.with_timezone(&self.timezone);
        let formatted = if local.nanosecond() == 0 {
            local.format("%Y-%m-%d %H:%M:%S%:z").to_string()
        } else {
            local.format("%Y-%m-%d %H:%M:%S%.6f%:z").to_string()
        };
        Some(format!(
            "The local time for epoch {epoch_ms} (milliseconds) in {} is {formatted}",
            self.timezone
        ))
    }
}

/// Accept a JSON integer or a string holding one.
fn parse_epoch(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

#[async_trait]
impl Tool for EpochToLocalTool {
    fn name(&self) -> &str {
        "epoch_to_local"
    }

    fn description(&self) -> &str {
        "Use this to convert Unix epoch time (in milliseconds) to local time."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "epoch_time": {
                    "type": "integer",
                    "description": "Milliseconds since the Unix epoch, e.g. 1700000000000"
                }
            },
            "required": ["epoch_time"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let rendered = arguments
            .get("epoch_time")
            .and_then(parse_epoch)
            .and_then(|ms| self.convert(ms));

        match rendered {
            Some(text) => Ok(ToolResult::success(text)),
            None => {
                tracing::debug!(arguments = %arguments, "Rejected epoch argument");
                Ok(ToolResult::failure(INVALID_EPOCH))
            }
        }
    }
}
