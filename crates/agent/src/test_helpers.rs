//! Shared test helpers for controller and store tests.

use async_trait::async_trait;
use sqlpilot_core::error::{ProviderError, ToolError};
use sqlpilot_core::message::{Message, MessageToolCall};
use sqlpilot_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use sqlpilot_core::tool::{Tool, ToolRegistry, ToolResult};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// A mock provider that returns a sequence of scripted responses and
/// records every request it receives.
///
/// Once the script runs out it keeps returning `repeat`, if set, and
/// panics otherwise.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    repeat: Option<ProviderResponse>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A provider that gives the same response forever.
    pub fn repeating(response: ProviderResponse) -> Self {
        Self {
            repeat: Some(response),
            ..Self::new(vec![])
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        match self.script.lock().unwrap().pop_front() {
            Some(next) => next,
            None => match &self.repeat {
                Some(response) => Ok(response.clone()),
                None => panic!("ScriptedProvider: script exhausted"),
            },
        }
    }
}

/// A provider whose calls never complete.
pub struct HangingProvider;

#[async_trait]
impl Provider for HangingProvider {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        std::future::pending().await
    }
}

pub fn text(content: &str, input: u32, output: u32) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(content),
        usage: Some(Usage::new(input, output)),
        model: "mock-model".into(),
    }
}

/// A tool-use response for `(id, name, arguments)` triples.
pub fn tool_use(calls: &[(&str, &str, &str)], input: u32, output: u32) -> ProviderResponse {
    let calls = calls
        .iter()
        .map(|(id, name, arguments)| MessageToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        })
        .collect();
    ProviderResponse {
        message: Message::assistant_with_tool_calls("", calls),
        usage: Some(Usage::new(input, output)),
        model: "mock-model".into(),
    }
}

/// Echoes its `text` argument back as `echo: <text>`.
pub struct EchoTool {
    name: &'static str,
    delay: Duration,
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "Echo the input text"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let text = arguments["text"].as_str().unwrap_or_default();
        Ok(ToolResult::success(format!("echo: {text}")))
    }
}

/// Fails in one of the ways a real tool can.
pub struct BrokenTool {
    name: &'static str,
    error: Option<ToolError>,
}

#[async_trait]
impl Tool for BrokenTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "A tool that never succeeds"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        match &self.error {
            Some(e) => Err(e.clone()),
            None => std::future::pending().await,
        }
    }
}

/// `echo`, `slow_echo`, `always_fails`, `engine_down` and `hang`.
pub fn test_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(EchoTool {
        name: "echo",
        delay: Duration::ZERO,
    }));
    registry.register(Box::new(EchoTool {
        name: "slow_echo",
        delay: Duration::from_millis(50),
    }));
    registry.register(Box::new(BrokenTool {
        name: "always_fails",
        error: Some(ToolError::ExecutionFailed {
            tool_name: "always_fails".into(),
            reason: "table does not exist".into(),
        }),
    }));
    registry.register(Box::new(BrokenTool {
        name: "engine_down",
        error: Some(ToolError::Transport {
            tool_name: "engine_down".into(),
            reason: "connection refused".into(),
        }),
    }));
    registry.register(Box::new(BrokenTool {
        name: "hang",
        error: None,
    }));
    registry
}
