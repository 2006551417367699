//! `sqlpilot config`: Configuration management commands.

use sqlpilot_config::AppConfig;

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   ✅ Config parsed and validated");

            let mut warnings = Vec::new();
            if !config.has_api_key() {
                warnings.push("No API key set (set SQLPILOT_API_KEY or ANTHROPIC_API_KEY)".to_string());
            }
            if config.sql.connection_string.is_none() {
                warnings.push("No SQL connection (set sql.connection_string or SQLPILOT_SQL_URL)".to_string());
            }
            for question in &config.session.questions {
                if question.trim().is_empty() {
                    warnings.push("Fixed question list contains an empty entry".to_string());
                    break;
                }
            }

            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            let prompts: Vec<&str> = config.prompts.iter().map(|p| p.name.as_str()).collect();
            println!();
            println!("   Model:     {}", config.model.default_model);
            println!("   Prompt:    {} (available: {})", config.default_prompt, prompts.join(", "));
            println!("   Timezone:  {}", config.timezone);
            println!("   Dialect:   {}", config.sql.dialect);
            println!("   Trimming:  {}", on_off(config.session.enable_trimming));
            println!("   Max tool rounds: {}", config.agent.max_tool_iterations);
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config()?;
    if config.api_key.is_some() {
        config.api_key = Some("[REDACTED]".into());
    }
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}

pub fn on_off(flag: bool) -> &'static str {
    if flag { "on" } else { "off" }
}
