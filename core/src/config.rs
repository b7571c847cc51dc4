//! Client configuration.
//!
//! Values come from code or from `DASHBOARD_API_*` environment variables.
//! `from_lookup` takes the variable source as a closure so it can be tested
//! without touching the process environment.

use std::time::Duration;

use thiserror::Error;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub const ENV_BASE_URL: &str = "DASHBOARD_API_URL";
pub const ENV_TIMEOUT_SECS: &str = "DASHBOARD_API_TIMEOUT_SECS";
pub const ENV_TOKEN: &str = "DASHBOARD_API_TOKEN";
pub const ENV_DEDUPE: &str = "DASHBOARD_API_DEDUPE";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid base URL {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Origin plus optional path prefix, without a trailing slash.
    pub base_url: String,
    /// Whole-request timeout for JSON and multipart calls. Event streams
    /// only use it for connecting.
    pub timeout: Duration,
    /// Global switch for read deduplication. Per-call options can only
    /// narrow it.
    pub dedupe_reads: bool,
    pub access_token: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            dedupe_reads: true,
            access_token: None,
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup(ENV_BASE_URL) {
            Some(url) => Self::new(&url),
            None => Self::default(),
        };
        config.validate()?;

        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            let secs: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                name: ENV_TIMEOUT_SECS,
                value: raw.clone(),
            })?;
            if secs == 0 {
                return Err(ConfigError::InvalidValue {
                    name: ENV_TIMEOUT_SECS,
                    value: raw,
                });
            }
            config.timeout = Duration::from_secs(secs);
        }

        if let Some(raw) = lookup(ENV_DEDUPE) {
            config.dedupe_reads = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: ENV_DEDUPE,
                        value: raw,
                    })
                }
            };
        }

        config.access_token = lookup(ENV_TOKEN).filter(|token| !token.is_empty());
        Ok(config)
    }

    /// The base URL must be an absolute http(s) URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.base_url).map_err(|e| ConfigError::InvalidBaseUrl {
            url: self.base_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidBaseUrl {
                url: self.base_url.clone(),
                reason: format!("unsupported scheme {}", url.scheme()),
            });
        }
        Ok(())
    }

    /// Scheme, host and port of the base URL, dropping any path prefix.
    pub fn origin(&self) -> String {
        match Url::parse(&self.base_url) {
            Ok(url) => url.origin().ascii_serialization(),
            Err(_) => self.base_url.clone(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_access_token(mut self, token: &str) -> Self {
        self.access_token = Some(token.to_string());
        self
    }

    pub fn with_dedupe_reads(mut self, enabled: bool) -> Self {
        self.dedupe_reads = enabled;
        self
    }
}
