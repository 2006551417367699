//! The turn controller: ask the model, run the tools it requests, resubmit.
//!
//! One call to [`TurnController::run_turn`] takes a session from
//! *awaiting input* to either a final answer or an aborted turn:
//!
//! ```text
//! AwaitingUserInput → ModelInvoked → (ToolsRequested → ToolsExecuting → ModelInvoked)* → FinalAnswer
//!                                  ↘ Aborted (ceiling, transport, timeout, structure, cancel)
//! ```
//!
//! The turn works on its own copy of the history. Nothing reaches the
//! session until the final answer arrives, so an aborted turn leaves the
//! session exactly as it was, apart from the token totals.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use sqlpilot_config::{AppConfig, ConfigError, SessionSettings};
use sqlpilot_core::error::{ProviderError, ToolError};
use sqlpilot_core::message::{Message, MessageToolCall, ThreadId};
use sqlpilot_core::provider::{Provider, ProviderRequest, Usage};
use sqlpilot_core::tool::{ToolCall, ToolRegistry, ToolResult};
use sqlpilot_telemetry::TokenTotals;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::token::{estimate_message_tokens, estimate_tools_tokens};
use crate::context::trimmer::{StructureError, check_tool_call_ids, trim};
use crate::prompt::{PromptCatalog, PromptError};
use crate::session::Session;
use crate::stream_event::TurnEvent;

/// Why a turn was aborted.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("model call failed: {0}")]
    Transport(#[from] ProviderError),

    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("tool failed: {0}")]
    Tool(#[from] ToolError),

    #[error("no final answer after {limit} tool rounds")]
    CeilingExceeded { limit: u32 },

    #[error("invalid message sequence: {0}")]
    Structure(#[from] StructureError),

    #[error("turn cancelled")]
    Cancelled,

    #[error("session {0} is already running a turn")]
    SessionBusy(ThreadId),

    #[error("unknown session {0}")]
    UnknownSession(ThreadId),

    #[error("{0}")]
    Settings(#[from] SettingsError),

    #[error("empty input")]
    EmptyInput,
}

/// A settings update that could not be applied. The session keeps its
/// previous settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error(transparent)]
    Invalid(#[from] ConfigError),

    #[error(transparent)]
    Prompt(#[from] PromptError),
}

/// A completed turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub answer: String,
    /// Tool rounds executed before the answer.
    pub tool_rounds: u32,
    /// Individual tool calls executed.
    pub tool_calls: usize,
    /// Session totals after the turn.
    pub totals: TokenTotals,
}

/// Drives turns for any number of sessions.
///
/// Holds only shared read-only resources; per-session state lives in
/// [`Session`].
pub struct TurnController {
    config: Arc<AppConfig>,
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    prompts: PromptCatalog,
    max_iterations: u32,
    model_timeout: Duration,
    tool_timeout: Duration,
}

impl TurnController {
    pub fn new(
        config: Arc<AppConfig>,
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
    ) -> Result<Self, SettingsError> {
        let timezone = config.parsed_timezone()?;
        let prompts = PromptCatalog::from_config(&config, timezone);
        Ok(Self {
            max_iterations: config.agent.max_tool_iterations,
            model_timeout: Duration::from_secs(config.agent.model_timeout_secs),
            tool_timeout: Duration::from_secs(config.agent.tool_timeout_secs),
            config,
            provider,
            tools,
            prompts,
        })
    }

    /// Set the maximum number of tool rounds per turn.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn prompts(&self) -> &PromptCatalog {
        &self.prompts
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Start a session with the configured default settings.
    pub fn new_session(&self) -> Result<Session, SettingsError> {
        self.new_session_with(self.config.default_session_settings())
    }

    pub fn new_session_with(&self, settings: SessionSettings) -> Result<Session, SettingsError> {
        self.config.validate_settings(&settings)?;
        let system = self.prompts.system_message(&settings.prompt, Utc::now())?;
        let session = Session::new(settings, system);
        info!(thread_id = %session.thread_id(), model = %session.settings().model, "Session started");
        Ok(session)
    }

    /// Replace a session's settings as one unit.
    ///
    /// The system prompt is re-rendered (so its date-time is fresh). History
    /// and token totals carry over. On error nothing changes.
    pub fn update_settings(
        &self,
        session: &mut Session,
        settings: SessionSettings,
    ) -> Result<(), SettingsError> {
        self.config.validate_settings(&settings)?;
        let system = self.prompts.system_message(&settings.prompt, Utc::now())?;
        info!(
            thread_id = %session.thread_id(),
            model = %settings.model,
            prompt = %settings.prompt,
            trimming = settings.enable_trimming,
            "Session settings updated"
        );
        session.apply_settings(settings, system);
        Ok(())
    }

    /// Run one turn for `input`.
    ///
    /// Text is streamed through `events` as it arrives, followed by the
    /// final answer (and a usage event when the session shows token
    /// counts). A dropped receiver does not stop the turn; `cancel` does.
    pub async fn run_turn(
        &self,
        session: &mut Session,
        input: &str,
        events: &mpsc::Sender<TurnEvent>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, TurnError> {
        let result = self.drive(session, input, events, cancel).await;
        if let Err(e) = &result {
            warn!(thread_id = %session.thread_id(), error = %e, "Turn aborted");
            emit(events, TurnEvent::Error { message: e.to_string() }).await;
        }
        result
    }

    async fn drive(
        &self,
        session: &mut Session,
        input: &str,
        events: &mpsc::Sender<TurnEvent>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, TurnError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(TurnError::EmptyInput);
        }

        let settings = session.settings().clone();
        let tool_definitions = self.tools.definitions();
        let reserved = self.config.model.max_tokens as usize
            + estimate_message_tokens(session.system())
            + estimate_tools_tokens(&tool_definitions);
        let budget = self.config.agent.max_context_tokens.saturating_sub(reserved);

        info!(
            thread_id = %session.thread_id(),
            model = %settings.model,
            history = session.history().len(),
            budget,
            "Processing turn"
        );

        let mut working = session.history().to_vec();
        let turn_start = working.len();
        working.push(Message::user(input));

        let mut rounds: u32 = 0;
        let mut calls_made = 0;

        loop {
            let (context, report) = trim(
                session.system(),
                &working,
                budget,
                settings.enable_trimming,
            )?;
            debug!(
                thread_id = %session.thread_id(),
                iteration = rounds,
                messages = context.len(),
                estimated_tokens = report.estimated_tokens,
                groups_dropped = report.groups_dropped(),
                over_budget = report.over_budget,
                "Context trimmed"
            );

            let request = ProviderRequest {
                model: settings.model.clone(),
                messages: context,
                temperature: self.config.model.temperature,
                top_p: Some(self.config.model.top_p),
                top_k: Some(self.config.model.top_k),
                max_tokens: Some(self.config.model.max_tokens),
                tools: tool_definitions.clone(),
                stream: true,
                stop: self.config.model.stop_sequences.clone(),
            };

            let (message, usage) = self.invoke_model(request, events, cancel).await?;
            session.accountant_mut().update(usage.as_ref());

            if !message.requests_tools() {
                let answer = message.content.clone();
                working.push(message);
                session.commit(working.split_off(turn_start));

                emit(events, TurnEvent::Answer { content: answer.clone() }).await;
                let totals = session.token_totals();
                if settings.show_token_count {
                    emit(
                        events,
                        TurnEvent::Usage {
                            totals,
                            summary: session.accountant().summary(),
                        },
                    )
                    .await;
                }

                info!(
                    thread_id = %session.thread_id(),
                    tool_rounds = rounds,
                    tool_calls = calls_made,
                    total_tokens = totals.total_tokens,
                    "Turn complete"
                );
                return Ok(TurnOutcome {
                    answer,
                    tool_rounds: rounds,
                    tool_calls: calls_made,
                    totals,
                });
            }

            check_tool_call_ids(&message, working.len() + 1)?;

            if rounds >= self.max_iterations {
                warn!(
                    thread_id = %session.thread_id(),
                    limit = self.max_iterations,
                    "Tool round ceiling reached"
                );
                return Err(TurnError::CeilingExceeded {
                    limit: self.max_iterations,
                });
            }
            rounds += 1;

            let calls = message.tool_calls.clone();
            working.push(message);
            debug!(
                thread_id = %session.thread_id(),
                iteration = rounds,
                tool_count = calls.len(),
                "Executing tool calls"
            );
            let results = self.execute_tools(&calls, events, cancel).await?;
            calls_made += results.len();
            working.extend(results);
        }
    }

    /// One model call, streamed and collected into a message.
    async fn invoke_model(
        &self,
        request: ProviderRequest,
        events: &mpsc::Sender<TurnEvent>,
        cancel: &CancellationToken,
    ) -> Result<(Message, Option<Usage>), TurnError> {
        let collect = async {
            let mut rx = self.provider.stream(request).await?;
            let mut content = String::new();
            let mut tool_calls: Vec<MessageToolCall> = Vec::new();
            let mut usage: Option<Usage> = None;

            while let Some(chunk) = rx.recv().await {
                let chunk = chunk?;
                if let Some(text) = chunk.content {
                    content.push_str(&text);
                }
                tool_calls.extend(chunk.tool_calls);
                if let Some(u) = chunk.usage {
                    usage.get_or_insert_with(Usage::default).merge(u);
                }
                if chunk.done {
                    break;
                }
            }

            // Whether the text is the answer is only known once the
            // response is complete.
            if !content.is_empty() {
                let event = if tool_calls.is_empty() {
                    TurnEvent::Chunk {
                        content: content.clone(),
                    }
                } else {
                    TurnEvent::Interim {
                        content: content.clone(),
                    }
                };
                emit(events, event).await;
            }
            Ok::<_, ProviderError>((content, tool_calls, usage))
        };

        let (content, tool_calls, usage) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TurnError::Cancelled),
            result = tokio::time::timeout(self.model_timeout, collect) => match result {
                Ok(collected) => collected?,
                Err(_) => {
                    return Err(TurnError::Timeout {
                        secs: self.model_timeout.as_secs(),
                    });
                }
            },
        };

        let message = if tool_calls.is_empty() {
            Message::assistant(content)
        } else {
            Message::assistant_with_tool_calls(content, tool_calls)
        };
        Ok((message.with_usage(usage), usage))
    }

    /// Run every call of one assistant response concurrently.
    ///
    /// Results come back in request order. A fatal tool error aborts the
    /// turn; anything else becomes result text for the model.
    async fn execute_tools(
        &self,
        calls: &[MessageToolCall],
        events: &mpsc::Sender<TurnEvent>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>, TurnError> {
        for call in calls {
            emit(
                events,
                TurnEvent::ToolCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: serde_json::from_str(&call.arguments).unwrap_or(serde_json::Value::Null),
                },
            )
            .await;
        }

        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TurnError::Cancelled),
            results = join_all(calls.iter().map(|call| self.execute_one(call))) => results,
        };

        let mut messages = Vec::with_capacity(calls.len());
        for (call, result) in calls.iter().zip(results) {
            let result = result.map_err(|e| match e {
                ToolError::Timeout { timeout_secs, .. } => TurnError::Timeout { secs: timeout_secs },
                other => TurnError::Tool(other),
            })?;
            emit(
                events,
                TurnEvent::ToolResult {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    output: result.output.clone(),
                    success: result.success,
                },
            )
            .await;
            messages.push(Message::tool_result(&call.id, result.output));
        }
        Ok(messages)
    }

    async fn execute_one(&self, call: &MessageToolCall) -> Result<ToolResult, ToolError> {
        let arguments = if call.arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            match serde_json::from_str(&call.arguments) {
                Ok(value) => value,
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "Tool arguments are not valid JSON");
                    return Ok(failure(call, format!("Error: invalid JSON arguments: {e}")));
                }
            }
        };
        let tool_call = ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments,
        };

        let start = Instant::now();
        let outcome = tokio::time::timeout(self.tool_timeout, self.tools.execute(&tool_call)).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Err(_) => {
                warn!(tool = %call.name, duration_ms, "Tool timed out");
                Err(ToolError::Timeout {
                    tool_name: call.name.clone(),
                    timeout_secs: self.tool_timeout.as_secs(),
                })
            }
            Ok(Ok(result)) => {
                debug!(tool = %call.name, success = result.success, duration_ms, "Tool executed");
                Ok(result)
            }
            Ok(Err(e)) if e.is_fatal() => {
                warn!(tool = %call.name, error = %e, "Tool failed fatally");
                Err(e)
            }
            Ok(Err(e)) => {
                warn!(tool = %call.name, error = %e, "Tool execution failed");
                Ok(failure(call, format!("Error: {e}")))
            }
        }
    }
}

fn failure(call: &MessageToolCall, output: String) -> ToolResult {
    let mut result = ToolResult::failure(output);
    result.call_id = call.id.clone();
    result
}

async fn emit(events: &mpsc::Sender<TurnEvent>, event: TurnEvent) {
    // A closed receiver only means nobody is watching.
    let _ = events.send(event).await;
}
