//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly.
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Sampling controls: temperature, top_p, top_k, stop_sequences
//! - Streaming via SSE with `content_block_delta` events and usage from
//!   `message_start` / `message_delta`

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use sqlpilot_core::error::ProviderError;
use sqlpilot_core::message::{Message, MessageToolCall, Role};
use sqlpilot_core::provider::*;
use std::time::Duration;
use tracing::{debug, trace, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    ///
    /// No overall request timeout is set here; the turn controller bounds
    /// every call.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Extract system messages from the message list.
    /// Anthropic puts system prompt as a top-level field, not in messages.
    fn extract_system(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut non_system: Vec<&Message> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => system_parts.push(&msg.content),
                _ => non_system.push(msg),
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };

        (system, non_system)
    }

    /// Convert messages to Anthropic API format with content blocks.
    ///
    /// Consecutive tool results are folded into a single user message, which
    /// is how the API expects the answers to one multi-call response.
    fn to_api_messages(messages: &[&Message]) -> Vec<AnthropicMessage> {
        let mut result: Vec<AnthropicMessage> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::User => {
                    result.push(AnthropicMessage {
                        role: "user".into(),
                        content: AnthropicContent::Text(msg.content.clone()),
                    });
                }
                Role::Assistant => {
                    if msg.tool_calls.is_empty() {
                        result.push(AnthropicMessage {
                            role: "assistant".into(),
                            content: AnthropicContent::Text(msg.content.clone()),
                        });
                    } else {
                        let mut blocks: Vec<ContentBlock> = Vec::new();
                        if !msg.content.is_empty() {
                            blocks.push(ContentBlock::Text {
                                text: msg.content.clone(),
                            });
                        }
                        for tc in &msg.tool_calls {
                            let input: serde_json::Value = serde_json::from_str(&tc.arguments)
                                .unwrap_or_else(|_| serde_json::json!({}));
                            blocks.push(ContentBlock::ToolUse {
                                id: tc.id.clone(),
                                name: tc.name.clone(),
                                input,
                            });
                        }
                        result.push(AnthropicMessage {
                            role: "assistant".into(),
                            content: AnthropicContent::Blocks(blocks),
                        });
                    }
                }
                Role::Tool => {
                    let block = ContentBlock::ToolResult {
                        tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                        content: msg.content.clone(),
                    };
                    match result.last_mut() {
                        Some(AnthropicMessage {
                            role,
                            content: AnthropicContent::Blocks(blocks),
                        }) if role.as_str() == "user" => blocks.push(block),
                        _ => result.push(AnthropicMessage {
                            role: "user".into(),
                            content: AnthropicContent::Blocks(vec![block]),
                        }),
                    }
                }
                Role::System => {} // handled separately
            }
        }

        result
    }

    /// Convert tool definitions to Anthropic format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect()
    }

    /// Build the JSON request body shared by `complete` and `stream`.
    fn build_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let (system, messages) = Self::extract_system(&request.messages);
        let api_messages = Self::to_api_messages(&messages);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": api_messages,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.temperature,
        });

        if stream {
            body["stream"] = serde_json::json!(true);
        }
        if let Some(ref sys) = system {
            body["system"] = serde_json::json!(sys);
        }
        if let Some(top_p) = request.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        if let Some(top_k) = request.top_k {
            body["top_k"] = serde_json::json!(top_k);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }
        if !request.stop.is_empty() {
            body["stop_sequences"] = serde_json::json!(request.stop);
        }

        body
    }

    async fn send(
        &self,
        body: &serde_json::Value,
        stream: bool,
    ) -> std::result::Result<reqwest::Response, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let mut builder = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json");
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }
        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid Anthropic API key".into(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let body = Self::build_body(&request, false);
        debug!(provider = "anthropic", model = %request.model, "Sending completion request");

        let response = self.send(&body, false).await?;
        let api_resp: AnthropicResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderError::ApiError {
                    status_code: 200,
                    message: format!("Failed to parse Anthropic response: {e}"),
                })?;

        Ok(Self::response_to_provider_response(api_resp))
    }

    async fn stream(&self, request: ProviderRequest) -> std::result::Result<ChunkReceiver, ProviderError> {
        let body = Self::build_body(&request, true);
        debug!(provider = "anthropic", model = %request.model, "Sending streaming request");

        let response = self.send(&body, true).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();
            let mut state = SseState::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                buffer.extend_from_slice(&bytes);

                for line in drain_lines(&mut buffer) {
                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data.is_empty() {
                        continue;
                    }

                    let event: serde_json::Value = match serde_json::from_str(data) {
                        Ok(v) => v,
                        Err(e) => {
                            trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                            continue;
                        }
                    };

                    match state.handle(&event) {
                        Ok(Some(chunk)) => {
                            let done = chunk.done;
                            if tx.send(Ok(chunk)).await.is_err() || done {
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }

            // The body ended without message_stop
            let _ = tx
                .send(Err(ProviderError::StreamInterrupted(
                    "stream ended before message_stop".into(),
                )))
                .await;
        });

        Ok(rx)
    }
}

impl AnthropicProvider {
    /// Convert Anthropic API response to our ProviderResponse.
    fn response_to_provider_response(resp: AnthropicResponse) -> ProviderResponse {
        let mut text_content = String::new();
        let mut tool_calls = Vec::new();

        for block in &resp.content {
            match block {
                ResponseContentBlock::Text { text } => {
                    if !text_content.is_empty() {
                        text_content.push('\n');
                    }
                    text_content.push_str(text);
                }
                ResponseContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(MessageToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        arguments: serde_json::to_string(input).unwrap_or_default(),
                    });
                }
                ResponseContentBlock::Other => {}
            }
        }

        let usage = resp.usage;
        let mut message =
            Message::assistant_with_tool_calls(text_content, tool_calls).with_usage(usage);
        message.id = resp.id;

        ProviderResponse {
            message,
            usage,
            model: resp.model,
        }
    }
}

/// Split complete lines off the front of `buffer`.
///
/// A multi-byte character can straddle two network chunks, so bytes are
/// only decoded once their line is complete; the tail stays buffered.
fn drain_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(line_end) = buffer.iter().position(|&b| b == b'\n') {
        let raw: Vec<u8> = buffer.drain(..=line_end).collect();
        let raw = &raw[..line_end];
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let line = match std::str::from_utf8(raw) {
            Ok(text) => text.to_string(),
            Err(e) => {
                warn!(error = %e, "Anthropic SSE line is not valid UTF-8");
                String::from_utf8_lossy(raw).into_owned()
            }
        };
        lines.push(line);
    }
    lines
}

/// Accumulates one streamed message across SSE events.
#[derive(Default)]
struct SseState {
    current_tool: Option<MessageToolCall>,
    tool_calls: Vec<MessageToolCall>,
    usage: Option<Usage>,
}

impl SseState {
    fn finish_tool(&mut self) {
        if let Some(call) = self.current_tool.take() {
            self.tool_calls.push(call);
        }
    }

    fn record_usage(&mut self, value: Option<&serde_json::Value>) {
        let Some(value) = value else { return };
        if let Ok(reported) = serde_json::from_value::<Usage>(value.clone()) {
            self.usage.get_or_insert_with(Usage::default).merge(reported);
        }
    }

    /// Apply one event; returns a chunk to forward, if any.
    fn handle(
        &mut self,
        event: &serde_json::Value,
    ) -> std::result::Result<Option<StreamChunk>, ProviderError> {
        match event["type"].as_str().unwrap_or("") {
            "message_start" => {
                self.record_usage(event["message"].get("usage"));
            }
            "content_block_start" => {
                let block = &event["content_block"];
                if block["type"].as_str() == Some("tool_use") {
                    self.finish_tool();
                    self.current_tool = Some(MessageToolCall {
                        id: block["id"].as_str().unwrap_or("").to_string(),
                        name: block["name"].as_str().unwrap_or("").to_string(),
                        arguments: String::new(),
                    });
                }
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => {
                        if let Some(text) = delta["text"].as_str() {
                            return Ok(Some(StreamChunk {
                                content: Some(text.to_string()),
                                ..StreamChunk::default()
                            }));
                        }
                    }
                    "input_json_delta" => {
                        if let (Some(call), Some(partial)) =
                            (self.current_tool.as_mut(), delta["partial_json"].as_str())
                        {
                            call.arguments.push_str(partial);
                        }
                    }
                    _ => {}
                }
            }
            "content_block_stop" => self.finish_tool(),
            "message_delta" => {
                self.record_usage(event.get("usage"));
            }
            "message_stop" => {
                self.finish_tool();
                let tool_calls = std::mem::take(&mut self.tool_calls)
                    .into_iter()
                    .map(|mut call| {
                        if call.arguments.trim().is_empty() {
                            call.arguments = "{}".into();
                        }
                        call
                    })
                    .collect();
                return Ok(Some(StreamChunk {
                    content: None,
                    tool_calls,
                    done: true,
                    usage: self.usage.take(),
                }));
            }
            "error" => {
                let message = event["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown streaming error")
                    .to_string();
                return Err(ProviderError::StreamInterrupted(message));
            }
            _ => {}
        }
        Ok(None)
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: String,
    model: String,
    content: Vec<ResponseContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(messages: Vec<Message>) -> ProviderRequest {
        ProviderRequest {
            model: "claude-3-5-haiku-20241022".into(),
            messages,
            temperature: 0.1,
            top_p: Some(0.9),
            top_k: Some(250),
            max_tokens: Some(4096),
            tools: vec![],
            stream: false,
            stop: vec!["\n\nHuman".into()],
        }
    }

    #[test]
    fn constructor_with_base_url() {
        let provider = AnthropicProvider::new("sk-ant-test")
            .unwrap()
            .with_base_url("https://custom.proxy.com/");
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.base_url, "https://custom.proxy.com");
    }

    #[test]
    fn system_extraction() {
        let messages = vec![
            Message::system("You are a data analyst"),
            Message::user("How many turbines?"),
            Message::assistant("Three."),
        ];

        let (system, non_system) = AnthropicProvider::extract_system(&messages);
        assert_eq!(system.as_deref(), Some("You are a data analyst"));
        assert_eq!(non_system.len(), 2);
        assert_eq!(non_system[0].role, Role::User);
    }

    #[test]
    fn body_carries_sampling_parameters() {
        let body = AnthropicProvider::build_body(
            &request(vec![Message::system("sys"), Message::user("hi")]),
            false,
        );
        assert_eq!(body["system"], "sys");
        assert_eq!(body["top_k"], 250);
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["stop_sequences"][0], "\n\nHuman");
        assert!(body["top_p"].as_f64().is_some());
        assert!(body.get("stream").is_none());
        assert!(body.get("tools").is_none());
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn tool_round_trip_conversion() {
        let call = |id: &str| MessageToolCall {
            id: id.into(),
            name: "sql_db_schema".into(),
            arguments: r#"{"table_names":"turbines"}"#.into(),
        };
        let messages = vec![
            Message::user("describe"),
            Message::assistant_with_tool_calls("Checking", vec![call("toolu_1"), call("toolu_2")]),
            Message::tool_result("toolu_1", "CREATE TABLE turbines"),
            Message::tool_result("toolu_2", "CREATE TABLE readings"),
        ];
        let refs: Vec<&Message> = messages.iter().collect();
        let api_msgs = AnthropicProvider::to_api_messages(&refs);
        assert_eq!(api_msgs.len(), 3);

        match &api_msgs[1].content {
            AnthropicContent::Blocks(blocks) => {
                assert_eq!(blocks.len(), 3);
                match &blocks[1] {
                    ContentBlock::ToolUse { id, input, .. } => {
                        assert_eq!(id, "toolu_1");
                        assert_eq!(input["table_names"], "turbines");
                    }
                    _ => panic!("Expected tool_use block"),
                }
            }
            _ => panic!("Expected blocks content"),
        }

        assert_eq!(api_msgs[2].role, "user");
        match &api_msgs[2].content {
            AnthropicContent::Blocks(blocks) => {
                assert_eq!(blocks.len(), 2);
                match &blocks[1] {
                    ContentBlock::ToolResult { tool_use_id, content } => {
                        assert_eq!(tool_use_id, "toolu_2");
                        assert_eq!(content, "CREATE TABLE readings");
                    }
                    _ => panic!("Expected tool_result block"),
                }
            }
            _ => panic!("Expected blocks content"),
        }
    }

    #[test]
    fn parse_tool_use_response() {
        let resp: AnthropicResponse = serde_json::from_str(
            r#"{
                "id": "msg_02",
                "model": "claude-3-5-haiku-20241022",
                "content": [
                    {"type": "text", "text": "Let me look"},
                    {"type": "tool_use", "id": "toolu_abc", "name": "sql_db_list_tables", "input": {}}
                ],
                "usage": {"input_tokens": 20, "output_tokens": 10},
                "stop_reason": "tool_use"
            }"#,
        )
        .unwrap();

        let pr = AnthropicProvider::response_to_provider_response(resp);
        assert_eq!(pr.message.id, "msg_02");
        assert_eq!(pr.message.content, "Let me look");
        assert!(pr.message.requests_tools());
        assert_eq!(pr.message.tool_calls[0].arguments, "{}");
        assert_eq!(pr.usage, Some(Usage::new(20, 10)));
        assert_eq!(pr.message.usage, pr.usage);
    }

    #[test]
    fn missing_usage_is_tolerated() {
        let resp: AnthropicResponse = serde_json::from_str(
            r#"{"id": "m", "model": "x", "content": [{"type": "text", "text": "ok"}]}"#,
        )
        .unwrap();
        let pr = AnthropicProvider::response_to_provider_response(resp);
        assert!(pr.usage.is_none());
    }

    #[test]
    fn sse_state_assembles_tool_calls_and_usage() {
        let mut state = SseState::default();
        let events = [
            serde_json::json!({"type": "message_start", "message": {"usage": {"input_tokens": 321, "output_tokens": 1}}}),
            serde_json::json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
            serde_json::json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Checking"}}),
            serde_json::json!({"type": "content_block_stop", "index": 0}),
            serde_json::json!({"type": "content_block_start", "index": 1, "content_block": {"type": "tool_use", "id": "toolu_1", "name": "sql_db_query"}}),
            serde_json::json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "{\"query\": \"SELECT"}}),
            serde_json::json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": " 1\"}"}}),
            serde_json::json!({"type": "content_block_stop", "index": 1}),
            serde_json::json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 42}}),
        ];

        let mut text = String::new();
        for event in &events {
            if let Some(chunk) = state.handle(event).unwrap() {
                text.push_str(chunk.content.as_deref().unwrap_or(""));
                assert!(!chunk.done);
            }
        }
        assert_eq!(text, "Checking");

        let last = state
            .handle(&serde_json::json!({"type": "message_stop"}))
            .unwrap()
            .unwrap();
        assert!(last.done);
        assert_eq!(last.usage, Some(Usage::new(321, 42)));
        assert_eq!(last.tool_calls.len(), 1);
        assert_eq!(last.tool_calls[0].arguments, r#"{"query": "SELECT 1"}"#);
    }

    #[test]
    fn split_multibyte_characters_survive_chunking() {
        let line = "data: {\"text\":\"café 21.5°C\"}\r\n".as_bytes();
        let split = line.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let mut buffer = Vec::new();
        buffer.extend_from_slice(&line[..split]);
        assert!(drain_lines(&mut buffer).is_empty());
        assert_eq!(buffer.len(), split);

        buffer.extend_from_slice(&line[split..]);
        let lines = drain_lines(&mut buffer);
        assert_eq!(lines, vec!["data: {\"text\":\"café 21.5°C\"}".to_string()]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn drain_lines_keeps_partial_tail() {
        let mut buffer = b"event: x\ndata: {}\n\ndata: {\"ty".to_vec();
        let lines = drain_lines(&mut buffer);
        assert_eq!(lines, vec!["event: x", "data: {}", ""]);
        assert_eq!(buffer, b"data: {\"ty");
    }

    #[test]
    fn sse_error_event_is_an_error() {
        let mut state = SseState::default();
        let err = state
            .handle(&serde_json::json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}))
            .unwrap_err();
        assert!(err.to_string().contains("Overloaded"));
    }

    #[tokio::test]
    async fn complete_against_mock_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-ant-test"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .and(body_partial_json(serde_json::json!({"top_k": 250, "system": "sys"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "msg_1",
                "model": "claude-3-5-haiku-20241022",
                "content": [{"type": "text", "text": "There are 3 turbines."}],
                "usage": {"input_tokens": 50, "output_tokens": 7}
            })))
            .mount(&server)
            .await;

        let provider = AnthropicProvider::new("sk-ant-test")
            .unwrap()
            .with_base_url(server.uri());
        let resp = provider
            .complete(request(vec![Message::system("sys"), Message::user("How many?")]))
            .await
            .unwrap();
        assert_eq!(resp.message.content, "There are 3 turbines.");
        assert_eq!(resp.usage, Some(Usage::new(50, 7)));
    }

    #[tokio::test]
    async fn stream_against_mock_server() {
        let sse = [
            r#"{"type":"message_start","message":{"id":"msg_1","usage":{"input_tokens":12,"output_tokens":1}}}"#,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":" there"}}"#,
            r#"{"type":"content_block_stop","index":0}"#,
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":3}}"#,
            r#"{"type":"message_stop"}"#,
        ]
        .iter()
        .map(|d| format!("event: x\ndata: {d}\n\n"))
        .collect::<String>();

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(body_partial_json(serde_json::json!({"stream": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse),
            )
            .mount(&server)
            .await;

        let provider = AnthropicProvider::new("k").unwrap().with_base_url(server.uri());
        let mut rx = provider.stream(request(vec![Message::user("hi")])).await.unwrap();

        let mut text = String::new();
        let mut last = None;
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk.unwrap();
            if let Some(c) = &chunk.content {
                text.push_str(c);
            }
            if chunk.done {
                last = Some(chunk);
            }
        }
        assert_eq!(text, "Hello there");
        let last = last.unwrap();
        assert!(last.tool_calls.is_empty());
        assert_eq!(last.usage, Some(Usage::new(12, 3)));
    }

    #[tokio::test]
    async fn auth_failure_maps_to_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let provider = AnthropicProvider::new("bad").unwrap().with_base_url(server.uri());
        let err = provider.complete(request(vec![Message::user("hi")])).await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
    }

    #[tokio::test]
    async fn rate_limit_reads_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "17"))
            .mount(&server)
            .await;

        let provider = AnthropicProvider::new("k").unwrap().with_base_url(server.uri());
        let err = provider.complete(request(vec![Message::user("hi")])).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited { retry_after_secs: 17 }));
    }
}
