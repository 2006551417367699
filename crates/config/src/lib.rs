//! Configuration loading, validation, and management for SQLPilot.
//!
//! Loads configuration from `~/.sqlpilot/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.sqlpilot/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the model endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Override for the model endpoint base URL (proxies, tests)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// IANA zone used for prompt timestamps and the epoch tool
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Model selection and sampling parameters
    #[serde(default)]
    pub model: ModelConfig,

    /// Turn controller limits
    #[serde(default)]
    pub agent: AgentConfig,

    /// SQL engine connection
    #[serde(default)]
    pub sql: SqlConfig,

    /// Name of the prompt selected for new sessions
    #[serde(default = "default_prompt_name")]
    pub default_prompt: String,

    /// Named system prompt templates
    #[serde(default = "default_prompts")]
    pub prompts: Vec<PromptConfig>,

    /// Defaults applied to every new session
    #[serde(default)]
    pub session: SessionDefaults,
}

fn default_timezone() -> String {
    "Australia/Sydney".into()
}
fn default_prompt_name() -> String {
    "Business".into()
}
fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("timezone", &self.timezone)
            .field("model", &self.model)
            .field("agent", &self.agent)
            .field("sql", &self.sql)
            .field("default_prompt", &self.default_prompt)
            .field("prompts", &self.prompts.iter().map(|p| &p.name).collect::<Vec<_>>())
            .field("session", &self.session)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Models a session may switch to. Empty means "any".
    #[serde(default = "default_available_models")]
    pub available_models: Vec<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    #[serde(default = "default_top_k")]
    pub top_k: u32,

    /// Maximum tokens per model response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_stop_sequences")]
    pub stop_sequences: Vec<String>,
}

fn default_model() -> String {
    "claude-3-5-haiku-20241022".into()
}
fn default_available_models() -> Vec<String> {
    vec![
        "claude-3-5-haiku-20241022".into(),
        "claude-3-5-sonnet-20241022".into(),
        "claude-3-haiku-20240307".into(),
        "claude-3-sonnet-20240229".into(),
        "claude-3-5-sonnet-20240620".into(),
    ]
}
fn default_temperature() -> f32 {
    0.1
}
fn default_top_p() -> f32 {
    0.9
}
fn default_top_k() -> u32 {
    250
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_stop_sequences() -> Vec<String> {
    vec!["\n\nHuman".into()]
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            available_models: default_available_models(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            max_tokens: default_max_tokens(),
            stop_sequences: default_stop_sequences(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Tool rounds allowed per turn before the turn is declared stuck
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,

    /// Context window size assumed for trimming, in estimated tokens
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    #[serde(default = "default_model_timeout_secs")]
    pub model_timeout_secs: u64,

    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

fn default_max_tool_iterations() -> u32 {
    25
}
fn default_max_context_tokens() -> usize {
    32_000
}
fn default_model_timeout_secs() -> u64 {
    120
}
fn default_tool_timeout_secs() -> u64 {
    60
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: default_max_tool_iterations(),
            max_context_tokens: default_max_context_tokens(),
            model_timeout_secs: default_model_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlConfig {
    /// `trino://user@host:port/catalog/schema` or `sqlite:path`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,

    /// Dialect name injected into prompts
    #[serde(default = "default_dialect")]
    pub dialect: String,

    /// Query results longer than this are truncated before reaching the model
    #[serde(default = "default_max_result_chars")]
    pub max_result_chars: usize,

    /// Example rows included with each table schema
    #[serde(default = "default_sample_rows")]
    pub sample_rows: u32,
}

fn default_dialect() -> String {
    "trino".into()
}
fn default_max_result_chars() -> usize {
    4_000
}
fn default_sample_rows() -> u32 {
    3
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            dialect: default_dialect(),
            max_result_chars: default_max_result_chars(),
            sample_rows: default_sample_rows(),
        }
    }
}

/// A named system prompt template.
///
/// Templates may reference `{dialect}`, `{current_datetime}` and `{current_epoch}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptConfig {
    pub name: String,
    pub template: String,
}

fn default_prompts() -> Vec<PromptConfig> {
    vec![
        PromptConfig {
            name: "Data".into(),
            template: concat!(
                "You are a data analyst with access to a {dialect} SQL engine. ",
                "Inspect the available tables and their schemas before writing queries, ",
                "show the SQL you ran, and explain results precisely.\n",
                "The current time is {current_datetime} (epoch milliseconds: {current_epoch}).",
            )
            .into(),
        },
        PromptConfig {
            name: "Business".into(),
            template: concat!(
                "You help business users understand operational data stored in a {dialect} SQL engine. ",
                "Use the tools to look up facts, then answer in plain language without SQL jargon.\n",
                "The current time is {current_datetime} (epoch milliseconds: {current_epoch}).",
            )
            .into(),
        },
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDefaults {
    #[serde(default = "default_true")]
    pub enable_trimming: bool,

    #[serde(default)]
    pub fixed_questions: bool,

    #[serde(default)]
    pub show_token_count: bool,

    /// Canned questions offered in fixed-question mode
    #[serde(default = "default_questions")]
    pub questions: Vec<String>,
}

fn default_questions() -> Vec<String> {
    vec![
        "How many turbines are in the database and what are their asset ids?".into(),
        "Which of these turbines has had the highest average temperature and what was it?".into(),
        "How was this average temp determined?".into(),
    ]
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            enable_trimming: true,
            fixed_questions: false,
            show_token_count: false,
            questions: default_questions(),
        }
    }
}

/// Per-session settings, replaced as a whole when the user changes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    pub model: String,
    pub prompt: String,
    pub enable_trimming: bool,
    pub fixed_questions: bool,
    pub show_token_count: bool,
}

impl AppConfig {
    /// Load configuration from the default path (~/.sqlpilot/config.toml).
    ///
    /// Environment variables override the file:
    /// - `SQLPILOT_API_KEY`, then `ANTHROPIC_API_KEY`
    /// - `SQLPILOT_MODEL`
    /// - `SQLPILOT_SQL_URL`
    /// - `SQLPILOT_TIMEZONE`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides using the given lookup.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = lookup("SQLPILOT_API_KEY").or_else(|| lookup("ANTHROPIC_API_KEY"));
        }
        if let Some(model) = lookup("SQLPILOT_MODEL") {
            self.model.default_model = model;
        }
        if let Some(url) = lookup("SQLPILOT_SQL_URL") {
            self.sql.connection_string = Some(url);
        }
        if let Some(tz) = lookup("SQLPILOT_TIMEZONE") {
            self.timezone = tz;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".sqlpilot")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.model.temperature) {
            return Err(ConfigError::ValidationError(
                "model.temperature must be between 0.0 and 1.0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.model.top_p) {
            return Err(ConfigError::ValidationError(
                "model.top_p must be between 0.0 and 1.0".into(),
            ));
        }
        if self.model.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "model.max_tokens must be > 0".into(),
            ));
        }
        if self.agent.max_tool_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_tool_iterations must be > 0".into(),
            ));
        }
        if self.agent.max_context_tokens <= self.model.max_tokens as usize {
            return Err(ConfigError::ValidationError(
                "agent.max_context_tokens must exceed model.max_tokens".into(),
            ));
        }
        self.parsed_timezone()?;
        if self.prompt(&self.default_prompt).is_none() {
            return Err(ConfigError::ValidationError(format!(
                "default_prompt '{}' is not defined in [[prompts]]",
                self.default_prompt
            )));
        }
        Ok(())
    }

    /// The configured zone as a `chrono_tz::Tz`.
    pub fn parsed_timezone(&self) -> Result<chrono_tz::Tz, ConfigError> {
        self.timezone.parse().map_err(|_| {
            ConfigError::ValidationError(format!("unknown timezone '{}'", self.timezone))
        })
    }

    /// Look up a prompt template by name.
    pub fn prompt(&self, name: &str) -> Option<&PromptConfig> {
        self.prompts.iter().find(|p| p.name == name)
    }

    /// Settings a fresh session starts with.
    pub fn default_session_settings(&self) -> SessionSettings {
        SessionSettings {
            model: self.model.default_model.clone(),
            prompt: self.default_prompt.clone(),
            enable_trimming: self.session.enable_trimming,
            fixed_questions: self.session.fixed_questions,
            show_token_count: self.session.show_token_count,
        }
    }

    /// Check that settings only reference configured models and prompts.
    pub fn validate_settings(&self, settings: &SessionSettings) -> Result<(), ConfigError> {
        if !self.model.available_models.is_empty()
            && !self.model.available_models.contains(&settings.model)
        {
            return Err(ConfigError::ValidationError(format!(
                "model '{}' is not one of: {}",
                settings.model,
                self.model.available_models.join(", ")
            )));
        }
        if self.prompt(&settings.prompt).is_none() {
            let names: Vec<&str> = self.prompts.iter().map(|p| p.name.as_str()).collect();
            return Err(ConfigError::ValidationError(format!(
                "prompt '{}' is not one of: {}",
                settings.prompt,
                names.join(", ")
            )));
        }
        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: None,
            timezone: default_timezone(),
            model: ModelConfig::default(),
            agent: AgentConfig::default(),
            sql: SqlConfig::default(),
            default_prompt: default_prompt_name(),
            prompts: default_prompts(),
            session: SessionDefaults::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
