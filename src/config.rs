//! Configuration module for the tweetgate service.
//!
//! This module contains the service settings and environment variable handling
//! for the X account client, the log store and the HTTP server.

use log::{debug, info, warn};
use std::env;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::retry::RetryPolicy;

const DEFAULT_API_BASE: &str = "https://api.x.com";
const DEFAULT_DATABASE_URL: &str = "sqlite://data/app.db";

/// Errors raised while loading [`Settings`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Credentials and endpoint settings for the X account client.
#[derive(Clone)]
pub struct TwitterCredentials {
    /// Screen name of the account, used by the health check
    pub username: String,
    /// OAuth 2.0 User Context access token
    pub access_token: Option<String>,
    /// Refresh token for automatically renewing the access token
    pub refresh_token: Option<String>,
    /// Client ID for OAuth 2.0 token refresh
    pub client_id: Option<String>,
    /// Client secret for OAuth 2.0 token refresh
    pub client_secret: Option<String>,
    /// Base URL of the X API
    pub api_base: String,
}

impl TwitterCredentials {
    /// Checks if automatic token refresh is available.
    ///
    /// Returns true if all of client_id, client_secret and refresh_token are present.
    pub fn can_refresh_token(&self) -> bool {
        self.client_id.is_some() && self.client_secret.is_some() && self.refresh_token.is_some()
    }
}

impl fmt::Debug for TwitterCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwitterCredentials")
            .field("username", &self.username)
            .field("access_token", &self.access_token.as_deref().map(mask_secret))
            .field("refresh_token", &self.refresh_token.as_deref().map(mask_secret))
            .field("client_id", &self.client_id.as_deref().map(mask_secret))
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("api_base", &self.api_base)
            .finish()
    }
}

/// Settings for the whole service, loaded once at startup.
#[derive(Clone)]
pub struct Settings {
    pub twitter: TwitterCredentials,
    pub host: IpAddr,
    pub port: u16,
    pub database_url: String,
    pub log_level: String,
    pub max_retry_attempts: u32,
    pub retry_delay: Duration,
    pub retry_max_delay: Duration,
    /// 64-character hex key for encrypting the persisted session
    pub session_encryption_key: Option<String>,
    pub rate_limit_replenish_seconds: u64,
    pub rate_limit_burst: u32,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("twitter", &self.twitter)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database_url", &self.database_url)
            .field("log_level", &self.log_level)
            .field("max_retry_attempts", &self.max_retry_attempts)
            .field("retry_delay", &self.retry_delay)
            .field("retry_max_delay", &self.retry_max_delay)
            .field(
                "session_encryption_key",
                &self.session_encryption_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("rate_limit_replenish_seconds", &self.rate_limit_replenish_seconds)
            .field("rate_limit_burst", &self.rate_limit_burst)
            .finish()
    }
}

impl Settings {
    /// Creates a new `Settings` instance from the process environment.
    ///
    /// # Required Environment Variables
    ///
    /// - `TWITTER_USERNAME`: screen name of the posting account
    /// - `TWITTER_ACCESS_TOKEN`, or `TWITTER_REFRESH_TOKEN` together with
    ///   `TWITTER_CLIENT_ID` and `TWITTER_CLIENT_SECRET`
    ///
    /// Everything else has a default; see [`Settings::from_lookup`].
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use tweetgate::Settings;
    ///
    /// std::env::set_var("TWITTER_USERNAME", "example");
    /// std::env::set_var("TWITTER_ACCESS_TOKEN", "your_access_token");
    /// let settings = Settings::from_env().unwrap();
    /// assert_eq!(settings.port, 8000);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        info!("Loading configuration from environment variables");
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds settings from an arbitrary key lookup.
    ///
    /// Empty values are treated the same as missing ones.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let username = get("TWITTER_USERNAME").ok_or(ConfigError::Missing("TWITTER_USERNAME"))?;
        let username = username.trim_start_matches('@').to_string();

        let access_token = get("TWITTER_ACCESS_TOKEN");
        let refresh_token = get("TWITTER_REFRESH_TOKEN");
        let client_id = get("TWITTER_CLIENT_ID");
        let client_secret = get("TWITTER_CLIENT_SECRET");

        if let Some(token) = &access_token {
            debug!("Access token (masked): {}", mask_secret(token));
            if token.len() < 10 {
                warn!(
                    "Access token seems unusually short ({} characters)",
                    token.len()
                );
            }
        }

        let twitter = TwitterCredentials {
            username,
            access_token,
            refresh_token,
            client_id,
            client_secret,
            api_base: get("TWITTER_API_BASE")
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
        };

        if twitter.access_token.is_none() && !twitter.can_refresh_token() {
            return Err(ConfigError::Missing(
                "TWITTER_ACCESS_TOKEN (or TWITTER_REFRESH_TOKEN with TWITTER_CLIENT_ID and TWITTER_CLIENT_SECRET)",
            ));
        }
        if twitter.refresh_token.is_some() && !twitter.can_refresh_token() {
            warn!("Refresh token is provided but client credentials are missing - automatic token refresh will be disabled");
        }

        url::Url::parse(&twitter.api_base).map_err(|e| ConfigError::Invalid {
            key: "TWITTER_API_BASE",
            reason: e.to_string(),
        })?;

        let host = match get("HOST") {
            Some(host) => host.parse().map_err(|_| ConfigError::Invalid {
                key: "HOST",
                reason: format!("'{}' is not an IP address", host),
            })?,
            None => IpAddr::from([0, 0, 0, 0]),
        };

        let port = parse_or("PORT", get("PORT"), 8000u16)?;
        let max_retry_attempts = parse_or("MAX_RETRY_ATTEMPTS", get("MAX_RETRY_ATTEMPTS"), 3u32)?;
        if max_retry_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_RETRY_ATTEMPTS",
                reason: "must be at least 1".to_string(),
            });
        }

        let retry_delay = parse_or("RETRY_DELAY", get("RETRY_DELAY"), 2u64)?;
        let retry_max_delay = parse_or("RETRY_MAX_DELAY", get("RETRY_MAX_DELAY"), 10u64)?;
        if retry_max_delay < retry_delay {
            return Err(ConfigError::Invalid {
                key: "RETRY_MAX_DELAY",
                reason: format!("must not be smaller than RETRY_DELAY ({})", retry_delay),
            });
        }

        let session_encryption_key = get("SESSION_ENCRYPTION_KEY");
        if let Some(key) = &session_encryption_key {
            crate::crypto::SessionCipher::from_hex(key).map_err(|e| ConfigError::Invalid {
                key: "SESSION_ENCRYPTION_KEY",
                reason: e.to_string(),
            })?;
        }

        let rate_limit_replenish_seconds = parse_or(
            "RATE_LIMIT_REPLENISH_SECONDS",
            get("RATE_LIMIT_REPLENISH_SECONDS"),
            1u64,
        )?;
        let rate_limit_burst = parse_or("RATE_LIMIT_BURST", get("RATE_LIMIT_BURST"), 30u32)?;
        if rate_limit_replenish_seconds == 0 || rate_limit_burst == 0 {
            return Err(ConfigError::Invalid {
                key: "RATE_LIMIT_BURST",
                reason: "rate limit settings must be greater than zero".to_string(),
            });
        }

        let settings = Settings {
            twitter,
            host,
            port,
            database_url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            max_retry_attempts,
            retry_delay: Duration::from_secs(retry_delay),
            retry_max_delay: Duration::from_secs(retry_max_delay),
            session_encryption_key,
            rate_limit_replenish_seconds,
            rate_limit_burst,
        };

        info!("Configuration loaded successfully");
        if settings.twitter.can_refresh_token() {
            info!("Automatic token refresh is enabled");
        } else {
            info!("Automatic token refresh is disabled - manual token refresh required");
        }
        if settings.session_encryption_key.is_none() {
            warn!("SESSION_ENCRYPTION_KEY is not set - the session cache will be stored unencrypted");
        }

        Ok(settings)
    }

    /// The socket address the HTTP server binds to.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Retry policy for account client calls.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retry_attempts,
            min_delay: self.retry_delay,
            max_delay: self.retry_max_delay,
            multiplier: Duration::from_secs(1),
        }
    }
}

/// Reads the log level used to initialise `env_logger` before settings are loaded.
pub fn log_level_from_env() -> String {
    env::var("LOG_LEVEL")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "info".to_string())
        .to_lowercase()
}

/// Reads `LOG_FILE`, the optional path logs are written to instead of stderr.
pub fn log_file_from_env() -> Option<PathBuf> {
    env::var("LOG_FILE")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Opens `path` for appending, creating it and its parent directory if needed.
pub fn open_log_file(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn parse_or<T>(key: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match value {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: format!("'{}': {}", raw, e),
        }),
        None => Ok(default),
    }
}

/// Masks a secret for logging, keeping at most the first and last eight characters.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    let len = chars.len();
    if len > 16 {
        let prefix: String = chars[..8].iter().collect();
        let suffix: String = chars[len - 8..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        let prefix: String = chars.iter().take(len.min(8) / 2).collect();
        format!("{}...", prefix)
    }
}
