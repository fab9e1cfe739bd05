use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::constants::{DEFAULT_COOKIE_DOMAIN, DEFAULT_FORUM_URL, DEFAULT_TRAINING_URL};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Target
    pub target: String,

    // Credentials
    /// Without a token, the browsers' cookie databases are searched.
    pub token: Option<String>,
    pub chromium_cookies_path: Option<PathBuf>,
    pub firefox_cookies_path: Option<PathBuf>,

    // Endpoints
    pub forum_url: String,
    pub training_url: String,
    /// Domain the credential cookie is scoped to; `None` means host-only.
    pub cookie_domain: Option<String>,

    // Transport
    pub http_timeout: Duration,
    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            target: required_env("LIKER_TARGET")?,

            token: optional_env("LIKER_TOKEN"),
            chromium_cookies_path: optional_env("CHROMIUM_COOKIES_PATH").map(PathBuf::from),
            firefox_cookies_path: optional_env("FIREFOX_COOKIES_PATH").map(PathBuf::from),

            forum_url: trim_slash(&env_or_default("FORUM_URL", DEFAULT_FORUM_URL)),
            training_url: trim_slash(&env_or_default("TRAINING_URL", DEFAULT_TRAINING_URL)),
            // Set but empty explicitly asks for host-only cookies
            cookie_domain: match std::env::var("COOKIE_DOMAIN") {
                Ok(v) if v.is_empty() => None,
                Ok(v) => Some(v),
                Err(_) => Some(DEFAULT_COOKIE_DOMAIN.to_string()),
            },

            http_timeout: Duration::from_secs(parse_env_u64("HTTP_TIMEOUT_SECS", 30)?),
            retry_max_attempts: parse_env_u32("RETRY_MAX_ATTEMPTS", 5)?,
            retry_base_delay: Duration::from_millis(parse_env_u64("RETRY_BASE_DELAY_MS", 100)?),
        })
    }

    /// Configuration pointing at local mock servers.
    #[must_use]
    pub fn for_testing(forum_url: &str, training_url: &str) -> Self {
        Self {
            target: "target-user".to_string(),
            token: Some("secret-token".to_string()),
            chromium_cookies_path: None,
            firefox_cookies_path: None,
            forum_url: trim_slash(forum_url),
            training_url: trim_slash(training_url),
            cookie_domain: None,
            http_timeout: Duration::from_secs(10),
            retry_max_attempts: 3,
            retry_base_delay: Duration::from_millis(1),
        }
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "LIKER_TARGET".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if self.retry_max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: "RETRY_MAX_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        validate_url("FORUM_URL", &self.forum_url)?;
        validate_url("TRAINING_URL", &self.training_url)?;
        Ok(())
    }
}

fn validate_url(name: &str, value: &str) -> Result<(), ConfigError> {
    match url::Url::parse(value) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => Ok(()),
        Ok(u) => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("unsupported scheme '{}'", u.scheme()),
        }),
        Err(e) => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            message: e.to_string(),
        }),
    }
}

fn trim_slash(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}
