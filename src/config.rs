//! Configuration management for the DocuBot client.
//!
//! Configuration can be set via environment variables:
//! - `DOCUBOT_API_URL` - Optional. Backend origin. Defaults to `http://localhost:8000`.
//! - `DOCUBOT_STATE_DIR` - Optional. Where local storage lives. Defaults to `./.docubot`.
//! - `DOCUBOT_POLL_INTERVAL_SECS` - Optional. Task poll interval. Defaults to `8`.
//! - `DOCUBOT_TOAST_DURATION_MS` - Optional. Notification lifetime. Defaults to `4000`.
//! - `DOCUBOT_REQUEST_TIMEOUT_SECS` - Optional. Timeout for JSON calls. Defaults to `30`.
//! - `DOCUBOT_REMEMBER_LOGIN` - Optional. Keep tokens across runs. Defaults to `true`.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Versioned path prefix every API call is issued under.
pub const API_PREFIX: &str = "/api/v1";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend origin, without the `/api/v1` prefix and without a trailing slash
    pub api_url: String,

    /// Directory holding `storage.json`
    pub state_dir: PathBuf,

    /// Delay between task poll cycles
    pub poll_interval: Duration,

    /// Default lifetime of a notification
    pub toast_duration: Duration,

    /// Timeout applied to request/response calls (not to the chat stream)
    pub request_timeout: Duration,

    /// Whether a fresh login lands in the persistent token slot
    pub remember_login: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_url = std::env::var("DOCUBOT_API_URL")
            .unwrap_or_else(|_| "http://localhost:8000".to_string());
        let api_url = normalize_api_url(&api_url)
            .map_err(|e| ConfigError::InvalidValue("DOCUBOT_API_URL".to_string(), e))?;

        let state_dir = std::env::var("DOCUBOT_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::current_dir()
                    .unwrap_or_else(|_| PathBuf::from("."))
                    .join(".docubot")
            });

        let poll_secs: u64 = parse_var("DOCUBOT_POLL_INTERVAL_SECS", 8)?;
        if poll_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "DOCUBOT_POLL_INTERVAL_SECS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let toast_ms: u64 = parse_var("DOCUBOT_TOAST_DURATION_MS", 4000)?;
        let timeout_secs: u64 = parse_var("DOCUBOT_REQUEST_TIMEOUT_SECS", 30)?;

        let remember_login = std::env::var("DOCUBOT_REMEMBER_LOGIN")
            .ok()
            .map(|v| {
                parse_bool(&v)
                    .map_err(|e| ConfigError::InvalidValue("DOCUBOT_REMEMBER_LOGIN".to_string(), e))
            })
            .transpose()?
            .unwrap_or(true);

        Ok(Self {
            api_url,
            state_dir,
            poll_interval: Duration::from_secs(poll_secs),
            toast_duration: Duration::from_millis(toast_ms),
            request_timeout: Duration::from_secs(timeout_secs),
            remember_login,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(api_url: impl Into<String>, state_dir: PathBuf) -> Self {
        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            state_dir,
            poll_interval: Duration::from_secs(8),
            toast_duration: Duration::from_millis(4000),
            request_timeout: Duration::from_secs(30),
            remember_login: true,
        }
    }

    /// Base URL every API path is appended to.
    pub fn api_base(&self) -> String {
        format!("{}{}", self.api_url, API_PREFIX)
    }
}

fn parse_var(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{}", e))),
        Err(_) => Ok(default),
    }
}

fn normalize_api_url(raw: &str) -> Result<String, String> {
    let parsed = url::Url::parse(raw.trim()).map_err(|e| e.to_string())?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(format!("unsupported scheme: {}", other)),
    }
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => Ok(true),
        "0" | "false" | "f" | "no" | "n" | "off" => Ok(false),
        other => Err(format!("expected boolean-like value, got: {}", other)),
    }
}
