//! `sqlpilot chat`: Interactive or single-message chat mode.
//!
//! Lines starting with `/` are commands; everything else is a question for
//! the agent. Ctrl+C cancels the turn in progress, or exits when idle.

use std::io::Write;

use sqlpilot_agent::{SessionStore, TurnController, TurnError, TurnEvent};
use sqlpilot_config::{AppConfig, SessionSettings};
use sqlpilot_core::message::ThreadId;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::config_cmd::on_off;

const QUESTION_PROMPT: &str = "Please select a question or type your own:";

/// A slash command typed at the chat prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Settings,
    Model(Option<String>),
    Prompt(Option<String>),
    Trim(Option<bool>),
    Fixed(Option<bool>),
    Tokens(Option<bool>),
    Usage,
    New,
    Help,
    Quit,
}

/// Parse a `/command [arg]` line. Returns `None` for ordinary input.
pub fn parse_command(line: &str) -> Option<Result<ChatCommand, String>> {
    let line = line.trim();
    let rest = line.strip_prefix('/')?;
    let mut parts = rest.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let arg = parts.next().map(str::trim).filter(|a| !a.is_empty());

    let flag = |arg: Option<&str>| -> Result<Option<bool>, String> {
        match arg {
            None => Ok(None),
            Some("on" | "true" | "yes") => Ok(Some(true)),
            Some("off" | "false" | "no") => Ok(Some(false)),
            Some(other) => Err(format!("expected 'on' or 'off', got '{other}'")),
        }
    };

    let command = match name {
        "settings" => Ok(ChatCommand::Settings),
        "model" => Ok(ChatCommand::Model(arg.map(String::from))),
        "prompt" => Ok(ChatCommand::Prompt(arg.map(String::from))),
        "trim" => flag(arg).map(ChatCommand::Trim),
        "fixed" => flag(arg).map(ChatCommand::Fixed),
        "tokens" => flag(arg).map(ChatCommand::Tokens),
        "usage" => Ok(ChatCommand::Usage),
        "new" => Ok(ChatCommand::New),
        "help" | "?" => Ok(ChatCommand::Help),
        "quit" | "exit" | "q" => Ok(ChatCommand::Quit),
        other => Err(format!("unknown command '/{other}' (try /help)")),
    };
    Some(command)
}

/// In fixed-question mode a bare number picks a canned question.
pub fn resolve_question(line: &str, fixed_mode: bool, questions: &[String]) -> String {
    let line = line.trim();
    if fixed_mode {
        if let Ok(n) = line.parse::<usize>() {
            if let Some(q) = n.checked_sub(1).and_then(|i| questions.get(i)) {
                return q.clone();
            }
        }
    }
    line.to_string()
}

/// Apply a settings command to a copy of the current settings.
///
/// Returns `None` for commands that do not change settings.
pub fn updated_settings(current: &SessionSettings, command: &ChatCommand) -> Option<SessionSettings> {
    let mut next = current.clone();
    match command {
        ChatCommand::Model(Some(model)) => next.model = model.clone(),
        ChatCommand::Prompt(Some(prompt)) => next.prompt = prompt.clone(),
        ChatCommand::Trim(flag) => next.enable_trimming = flag.unwrap_or(!current.enable_trimming),
        ChatCommand::Fixed(flag) => next.fixed_questions = flag.unwrap_or(!current.fixed_questions),
        ChatCommand::Tokens(flag) => {
            next.show_token_count = flag.unwrap_or(!current.show_token_count)
        }
        _ => return None,
    }
    Some(next)
}

pub async fn run(message: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    SQLPILOT_API_KEY=sk-ant-...");
        eprintln!("    ANTHROPIC_API_KEY=sk-ant-...");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let controller = super::build_controller(config).await?;
    let store = SessionStore::new();
    let mut thread = store.insert(controller.new_session()?).await;

    if let Some(msg) = message {
        submit(&controller, &store, &thread, &msg).await?;
        return Ok(());
    }

    let config = controller.config();
    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║         SQLPilot : Interactive Mode          ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Model:     {}", config.model.default_model);
    println!("  Prompt:    {}", config.default_prompt);
    println!("  Tools:     {}", controller.tools().names().join(", "));
    println!("  Session:   {thread}");
    println!();
    println!("  Type your question and press Enter. /help lists commands.");
    println!();

    let mut lines = spawn_stdin_reader();
    if current_settings(&store, &thread).await?.fixed_questions {
        print_questions(config);
    }

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.recv() => match line {
                Some(line) => line,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match parse_command(&line) {
            Some(Ok(command)) => command,
            Some(Err(e)) => {
                eprintln!("  [Error] {e}");
                continue;
            }
            None => {
                let settings = current_settings(&store, &thread).await?;
                let question =
                    resolve_question(&line, settings.fixed_questions, &config.session.questions);
                if question != line.trim() {
                    println!("  You > {question}");
                }
                if let Err(e) = submit(&controller, &store, &thread, &question).await {
                    eprintln!("  [Error] {e}");
                }
                println!();
                if settings.fixed_questions {
                    print_questions(config);
                }
                continue;
            }
        };

        match command {
            ChatCommand::Quit => break,
            ChatCommand::Help => print_help(),
            ChatCommand::Settings => print_settings(&current_settings(&store, &thread).await?),
            ChatCommand::Usage => {
                let handle = store.get(&thread).await.ok_or("session disappeared")?;
                println!("  System (Token Usage)");
                for line in handle.lock().await.accountant().summary().lines() {
                    println!("  {line}");
                }
            }
            ChatCommand::New => {
                store.remove(&thread).await;
                thread = store.insert(controller.new_session()?).await;
                println!("  Started a new session: {thread}");
                if current_settings(&store, &thread).await?.fixed_questions {
                    print_questions(config);
                }
            }
            ChatCommand::Model(None) => {
                println!("  Available models: {}", config.model.available_models.join(", "));
            }
            ChatCommand::Prompt(None) => {
                println!("  Available prompts: {}", controller.prompts().names().join(", "));
            }
            other => {
                let current = current_settings(&store, &thread).await?;
                let Some(next) = updated_settings(&current, &other) else {
                    continue;
                };
                match store.update_settings(&controller, &thread, next.clone()).await {
                    Ok(()) => {
                        println!("  Settings updated.");
                        print_settings(&next);
                        if next.fixed_questions {
                            print_questions(config);
                        }
                    }
                    Err(e) => eprintln!("  [Error] {e}"),
                }
            }
        }
    }

    println!();
    println!("  Goodbye! 👋");
    println!();
    Ok(())
}

/// Run one turn, printing events as they arrive. Ctrl+C cancels it.
async fn submit(
    controller: &TurnController,
    store: &SessionStore,
    thread: &ThreadId,
    question: &str,
) -> Result<(), TurnError> {
    let (tx, rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let printer = tokio::spawn(print_events(rx));
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let result = store.submit(controller, thread, question, &tx, &cancel).await;

    interrupt.abort();
    drop(tx);
    let _ = printer.await;
    result.map(|_| ())
}

async fn print_events(mut rx: mpsc::Receiver<TurnEvent>) {
    let mut streaming = false;
    while let Some(event) = rx.recv().await {
        match event {
            TurnEvent::Chunk { content } => {
                if !streaming {
                    print!("  Assistant > ");
                    streaming = true;
                }
                print!("{content}");
                let _ = std::io::stdout().flush();
            }
            TurnEvent::Interim { content } => {
                tracing::debug!(%content, "Model narration");
            }
            TurnEvent::ToolCall { name, input, .. } => {
                if streaming {
                    println!();
                    streaming = false;
                }
                tracing::debug!(tool = %name, %input, "Tool requested");
                eprintln!("  [tool] {name}");
            }
            TurnEvent::ToolResult { name, success, .. } => {
                if !success {
                    eprintln!("  [tool] {name} reported an error");
                }
            }
            TurnEvent::Answer { .. } => {
                if streaming {
                    println!();
                    streaming = false;
                }
            }
            TurnEvent::Usage { summary, .. } => {
                println!();
                println!("  System (Token Usage)");
                for line in summary.lines() {
                    println!("  {line}");
                }
            }
            TurnEvent::Error { .. } => {
                if streaming {
                    println!();
                    streaming = false;
                }
            }
        }
    }
}

async fn current_settings(
    store: &SessionStore,
    thread: &ThreadId,
) -> Result<SessionSettings, Box<dyn std::error::Error>> {
    let handle = store.get(thread).await.ok_or("session disappeared")?;
    let settings = handle.lock().await.settings().clone();
    Ok(settings)
}

/// Read stdin lines on a background task.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("stdin read failed: {e}");
                    break;
                }
            }
        }
    });
    rx
}

fn print_questions(config: &AppConfig) {
    if config.session.questions.is_empty() {
        return;
    }
    println!("  {QUESTION_PROMPT}");
    for (i, q) in config.session.questions.iter().enumerate() {
        println!("    {}. {q}", i + 1);
    }
    println!();
}

fn print_settings(settings: &SessionSettings) {
    println!("  Model:            {}", settings.model);
    println!("  Prompt:           {}", settings.prompt);
    println!("  Trimming:         {}", on_off(settings.enable_trimming));
    println!("  Fixed questions:  {}", on_off(settings.fixed_questions));
    println!("  Show token count: {}", on_off(settings.show_token_count));
}

fn print_help() {
    println!("  /settings         Show the current session settings");
    println!("  /model [ID]       List models, or switch to ID");
    println!("  /prompt [NAME]    List prompts, or switch to NAME");
    println!("  /trim [on|off]    Toggle context trimming");
    println!("  /fixed [on|off]   Toggle the fixed question list");
    println!("  /tokens [on|off]  Toggle the token usage summary after answers");
    println!("  /usage            Show token usage for this session");
    println!("  /new              Start a new session");
    println!("  /quit             Exit");
}
