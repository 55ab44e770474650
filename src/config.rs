use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

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
    // Forum
    pub forum_base_url: String,
    pub cookie_user: String,
    pub cookie_session: String,
    pub cookie_tfa_trust: String,
    pub cookie_csrf: String,

    // Polling
    pub poll_interval: Duration,
    pub fetch_timeout: Duration,
    pub fetch_concurrency: usize,
    pub keepalive_interval: Duration,

    // Notifications
    pub excerpt_max_chars: usize,

    // Database
    pub database_path: PathBuf,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Forum
            forum_base_url: required_env("FORUM_BASE_URL")?,
            cookie_user: required_env("XF_USER")?,
            cookie_session: required_env("XF_SESSION")?,
            cookie_tfa_trust: env_or_default("XF_TFA_TRUST", ""),
            cookie_csrf: env_or_default("XF_CSRF", ""),

            // Polling
            poll_interval: Duration::from_secs(parse_env_u64("POLL_INTERVAL_SECS", 20)?),
            fetch_timeout: Duration::from_secs(parse_env_u64("FETCH_TIMEOUT_SECS", 20)?),
            fetch_concurrency: parse_env_usize("FETCH_CONCURRENCY", 4)?,
            keepalive_interval: Duration::from_secs(parse_env_u64("KEEPALIVE_INTERVAL_SECS", 180)?),

            // Notifications
            excerpt_max_chars: parse_env_usize("EXCERPT_MAX_CHARS", 1500)?,

            // Database
            database_path: PathBuf::from(env_or_default("DATABASE_PATH", "./data/bridge.sqlite")),
        })
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.forum_base_url.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "FORUM_BASE_URL".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if !self.forum_base_url.starts_with("http://") && !self.forum_base_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidValue {
                name: "FORUM_BASE_URL".to_string(),
                message: "must include a scheme".to_string(),
            });
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "POLL_INTERVAL_SECS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.fetch_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                name: "FETCH_CONCURRENCY".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.excerpt_max_chars == 0 {
            return Err(ConfigError::InvalidValue {
                name: "EXCERPT_MAX_CHARS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// A configuration suitable for tests: no real credentials, fast timings.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            forum_base_url: "https://forum.example.com".to_string(),
            cookie_user: "test-user".to_string(),
            cookie_session: "test-session".to_string(),
            cookie_tfa_trust: String::new(),
            cookie_csrf: String::new(),
            poll_interval: Duration::from_secs(1),
            fetch_timeout: Duration::from_secs(5),
            fetch_concurrency: 4,
            keepalive_interval: Duration::from_secs(60),
            excerpt_max_chars: 1500,
            database_path: PathBuf::from(":memory:"),
        }
    }
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
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

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}
