//! Turn-level streaming events.
//!
//! `TurnEvent` wraps provider-level stream chunks into the events a front
//! end renders while a turn is running:
//! - `chunk`      : answer text from the model
//! - `interim`    : text the model wrote alongside tool calls
//! - `tool_call`  : the model asked for a tool
//! - `tool_result`: a tool finished
//! - `answer`     : the final answer of the turn
//! - `usage`      : session token totals after the answer
//! - `error`      : the turn was aborted

use serde::{Deserialize, Serialize};
use sqlpilot_telemetry::TokenTotals;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Answer text. Responses that request tools never produce a chunk.
    Chunk { content: String },

    /// Text from a response that also requested tools. Not part of the
    /// answer.
    Interim { content: String },

    /// The model is calling a tool.
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Tool execution completed.
    ToolResult {
        id: String,
        name: String,
        output: String,
        success: bool,
    },

    /// The complete final answer.
    Answer { content: String },

    /// Cumulative session usage, sent after the answer when the session
    /// has token display enabled.
    Usage { totals: TokenTotals, summary: String },

    /// The turn failed; the session history was left untouched.
    Error { message: String },
}

impl TurnEvent {
    /// Event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::Interim { .. } => "interim",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Answer { .. } => "answer",
            Self::Usage { .. } => "usage",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_serialization() {
        let event = TurnEvent::Chunk {
            content: "Hello".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"chunk""#));
        assert!(json.contains(r#""content":"Hello""#));
    }

    #[test]
    fn tool_call_serialization() {
        let event = TurnEvent::ToolCall {
            id: "toolu_1".into(),
            name: "sql_db_list_tables".into(),
            input: serde_json::json!({}),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"tool_call""#));
        assert!(json.contains(r#""name":"sql_db_list_tables""#));
    }

    #[test]
    fn usage_serialization() {
        let event = TurnEvent::Usage {
            totals: TokenTotals {
                input_tokens: 120,
                output_tokens: 30,
                total_tokens: 150,
            },
            summary: "Token usage for this session".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"usage""#));
        assert!(json.contains(r#""total_tokens":150"#));
    }

    #[test]
    fn event_type_names() {
        assert_eq!(TurnEvent::Chunk { content: "x".into() }.event_type(), "chunk");
        assert_eq!(
            TurnEvent::ToolResult {
                id: "a".into(),
                name: "b".into(),
                output: "c".into(),
                success: true
            }
            .event_type(),
            "tool_result"
        );
        assert_eq!(TurnEvent::Interim { content: "x".into() }.event_type(), "interim");
        assert_eq!(TurnEvent::Answer { content: "x".into() }.event_type(), "answer");
        assert_eq!(TurnEvent::Error { message: "x".into() }.event_type(), "error");
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"type":"answer","content":"There are 3 turbines."}"#;
        let event: TurnEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            TurnEvent::Answer {
                content: "There are 3 turbines.".into()
            }
        );
    }
}
