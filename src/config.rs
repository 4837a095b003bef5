//! Configuration types, built from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Outreach dispatcher configuration.
#[derive(Debug, Clone)]
pub struct OutreachConfig {
    /// Maximum sends per rate window.
    pub rate_limit_per_minute: u32,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Simulate sends instead of performing them.
    pub dry_run: bool,
    /// Length of the sliding rate window.
    pub rate_window: Duration,
    /// Minimum gap between any two sends.
    pub min_spacing: Duration,
    /// Backoff base; attempt `n` waits `backoff_base * 2^n`.
    pub backoff_base: Duration,
}

impl Default for OutreachConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: 10,
            max_retries: 2,
            dry_run: true,
            rate_window: Duration::from_secs(60),
            min_spacing: Duration::from_secs(1),
            backoff_base: Duration::from_secs(1),
        }
    }
}

impl OutreachConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let rate_limit_per_minute =
            parse_env("RATE_LIMIT_PER_MINUTE", defaults.rate_limit_per_minute)?;
        if rate_limit_per_minute == 0 {
            return Err(ConfigError::InvalidValue {
                key: "RATE_LIMIT_PER_MINUTE".into(),
                message: "must be at least 1".into(),
            });
        }

        Ok(Self {
            rate_limit_per_minute,
            max_retries: parse_env("MAX_RETRIES", defaults.max_retries)?,
            dry_run: std::env::var("DRY_RUN_MODE")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.dry_run),
            ..defaults
        })
    }
}

/// SMTP settings for live email outreach.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl SmtpConfig {
    /// Returns `None` if `SMTP_USERNAME` is not set (live email disabled).
    pub fn from_env() -> Option<Self> {
        let username = std::env::var("SMTP_USERNAME")
            .ok()
            .filter(|s| !s.is_empty())?;

        let host = std::env::var("SMTP_HOST").unwrap_or_else(|_| "smtp.gmail.com".to_string());
        let port: u16 = std::env::var("SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);
        let password = SecretString::from(std::env::var("SMTP_PASSWORD").unwrap_or_default());
        let from_address =
            std::env::var("SMTP_FROM_EMAIL").unwrap_or_else(|_| username.clone());

        Some(Self {
            host,
            port,
            username,
            password,
            from_address,
        })
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub api_port: u16,
    pub outreach: OutreachConfig,
    pub smtp: Option<SmtpConfig>,
    pub llm: Option<crate::llm::LlmConfig>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_path = std::env::var("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/leads.db"));

        Ok(Self {
            database_path,
            api_port: parse_env("API_PORT", 8000)?,
            outreach: OutreachConfig::from_env()?,
            smtp: SmtpConfig::from_env(),
            llm: crate::llm::LlmConfig::from_env(),
        })
    }
}

/// Parse an optional env var, falling back to `default` when unset.
fn parse_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        }
        _ => Ok(default),
    }
}
