//! System prompt catalog.
//!
//! Templates are opaque text with three placeholders filled in when a
//! session starts or its settings change:
//!
//! | Placeholder | Value |
//! |-------------|-------|
//! | `{dialect}` | SQL dialect of the configured engine |
//! | `{current_datetime}` | now in the configured zone, `%Y-%m-%d %H:%M:%S %Z` |
//! | `{current_epoch}` | now in epoch milliseconds |
//!
//! `{{` and `}}` produce literal braces. Any other `{name}` is left as is.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use sqlpilot_config::AppConfig;
use sqlpilot_core::message::Message;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PromptError {
    #[error("unknown prompt '{name}' (available: {available})")]
    UnknownPrompt { name: String, available: String },
}

#[derive(Debug, Clone)]
pub struct PromptCatalog {
    prompts: Vec<(String, String)>,
    dialect: String,
    timezone: Tz,
}

impl PromptCatalog {
    pub fn new(dialect: impl Into<String>, timezone: Tz) -> Self {
        Self {
            prompts: Vec::new(),
            dialect: dialect.into(),
            timezone,
        }
    }

    pub fn from_config(config: &AppConfig, timezone: Tz) -> Self {
        let mut catalog = Self::new(config.sql.dialect.clone(), timezone);
        for prompt in &config.prompts {
            catalog = catalog.with_prompt(&prompt.name, &prompt.template);
        }
        catalog
    }

    /// Add or replace a named template.
    pub fn with_prompt(mut self, name: &str, template: &str) -> Self {
        match self.prompts.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = template.to_string(),
            None => self.prompts.push((name.to_string(), template.to_string())),
        }
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.prompts.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.prompts.iter().any(|(n, _)| n == name)
    }

    /// Render the named template at `now`.
    pub fn render(&self, name: &str, now: DateTime<Utc>) -> Result<String, PromptError> {
        let template = self
            .prompts
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t.as_str())
            .ok_or_else(|| PromptError::UnknownPrompt {
                name: name.to_string(),
                available: self.names().join(", "),
            })?;

        let local = now.with_timezone(&self.timezone);
        let datetime = local.format("%Y-%m-%d %H:%M:%S %Z").to_string();
        let epoch = now.timestamp_millis().to_string();

        Ok(substitute(template, |key| match key {
            "dialect" => Some(self.dialect.as_str()),
            "current_datetime" => Some(datetime.as_str()),
            "current_epoch" => Some(epoch.as_str()),
            _ => None,
        }))
    }

    /// Render the named template as the session's system message.
    pub fn system_message(&self, name: &str, now: DateTime<Utc>) -> Result<Message, PromptError> {
        self.render(name, now).map(Message::system)
    }
}

fn substitute<'a>(template: &str, lookup: impl Fn(&str) -> Option<&'a str>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") || tail.starts_with("}}") {
            out.push_str(&tail[..1]);
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with('}') {
            out.push('}');
            rest = &tail[1..];
            continue;
        }

        let Some(end) = tail.find('}') else {
            out.push_str(tail);
            rest = "";
            break;
        };
        let key = &tail[1..end];
        match lookup(key) {
            Some(value) => out.push_str(value),
            None => {
                tracing::warn!(placeholder = key, "Unknown prompt placeholder left unchanged");
                out.push_str(&tail[..=end]);
            }
        }
        rest = &tail[end + 1..];
    }

    out.push_str(rest);
    out
}
