use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::NaiveTime;

use crate::llm_client::DEFAULT_BASE_URL;

/// Application configuration loaded from environment variables.
/// Startup fails if a required variable is missing or a value does not parse.
#[derive(Debug, Clone)]
pub struct Config {
    /// Unset means in-memory stores. Nothing survives a restart.
    pub database_url: Option<String>,
    pub anthropic_api_key: String,
    pub anthropic_base_url: String,
    pub port: u16,
    pub rust_log: String,
    pub gateway_timeout_secs: u64,
    /// Tokens granted to every newly opened account.
    pub initial_token_grant: i64,
    pub learning_enabled: bool,
    /// Daily learning run, UTC.
    pub learning_run_at: NaiveTime,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: optional_env("DATABASE_URL"),
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            anthropic_base_url: optional_env("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            port: parse_or("PORT", optional_env("PORT"), 8080)?,
            rust_log: optional_env("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            gateway_timeout_secs: parse_or(
                "GATEWAY_TIMEOUT_SECS",
                optional_env("GATEWAY_TIMEOUT_SECS"),
                90,
            )?,
            initial_token_grant: parse_or(
                "INITIAL_TOKEN_GRANT",
                optional_env("INITIAL_TOKEN_GRANT"),
                10_000,
            )?,
            learning_enabled: parse_flag(
                "LEARNING_ENABLED",
                optional_env("LEARNING_ENABLED"),
                true,
            )?,
            learning_run_at: parse_run_at(optional_env("LEARNING_RUN_AT"))?,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

/// Blank values count as unset.
fn optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(value) => value
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value '{value}'")),
        None => Ok(default),
    }
}

fn parse_flag(key: &str, raw: Option<String>, default: bool) -> Result<bool> {
    match raw.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => anyhow::bail!("{key} must be a boolean, got '{other}'"),
    }
}

fn parse_run_at(raw: Option<String>) -> Result<NaiveTime> {
    let raw = raw.unwrap_or_else(|| "03:20".to_string());
    NaiveTime::parse_from_str(&raw, "%H:%M")
        .with_context(|| format!("LEARNING_RUN_AT must be HH:MM (UTC), got '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_or_uses_default_when_unset() {
        assert_eq!(parse_or::<u16>("PORT", None, 8080).unwrap(), 8080);
        assert_eq!(parse_or::<u16>("PORT", Some("3000".into()), 8080).unwrap(), 3000);
        assert!(parse_or::<u16>("PORT", Some("http".into()), 8080).is_err());
    }

    #[test]
    fn test_parse_flag_variants() {
        assert!(parse_flag("X", None, true).unwrap());
        assert!(!parse_flag("X", Some("Off".into()), true).unwrap());
        assert!(parse_flag("X", Some("maybe".into()), true).is_err());
    }

    #[test]
    fn test_run_at_defaults_to_0320_utc() {
        assert_eq!(
            parse_run_at(None).unwrap(),
            NaiveTime::from_hms_opt(3, 20, 0).unwrap()
        );
        assert!(parse_run_at(Some("25:00".into())).is_err());
    }
}
