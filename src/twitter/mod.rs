//! X account client.
//!
//! [`AccountClient`] is the seam between the HTTP layer and the account: it
//! authenticates, posts tweets, uploads media and reports connection health.
//! [`XApiClient`] implements it against the X API v2 using OAuth 2.0 User
//! Context tokens, keeping the current session in a [`SessionCache`].

mod api;
pub mod media;
mod session;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

pub use api::XApiClient;
pub(crate) use api::{error_for_status, error_message, sanitize_for_logging};
pub use media::MediaAttachment;
pub use session::{Session, SessionCache};

/// Errors returned by an [`AccountClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited by X API: {0}")]
    RateLimited(String),

    #[error("X API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("unexpected response from X API: {0}")]
    InvalidResponse(String),

    #[error("session cache error: {0}")]
    Session(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// True when the failure means the cached authentication can no longer be trusted.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, ClientError::Auth(_))
    }
}

/// The account a session belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountIdentity {
    pub user_id: String,
    pub username: String,
    pub name: Option<String>,
}

/// A tweet about to be posted.
#[derive(Debug, Clone, Default)]
pub struct NewTweet {
    pub text: String,
    pub media_ids: Vec<String>,
    pub reply_to: Option<String>,
}

/// A tweet that was posted successfully.
#[derive(Debug, Clone, Serialize)]
pub struct PublishedTweet {
    pub tweet_id: String,
    pub text: String,
    pub created_at: Option<DateTime<Utc>>,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
}

/// Public details of an existing tweet.
#[derive(Debug, Clone, Serialize)]
pub struct TweetInfo {
    pub id: String,
    pub text: String,
    pub created_at: Option<DateTime<Utc>>,
    pub author_id: Option<String>,
    pub user_name: Option<String>,
    pub like_count: u64,
    pub retweet_count: u64,
    pub reply_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

/// Result of an account health check.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: ConnectionState,
    pub message: String,
}

impl HealthStatus {
    pub fn connected(message: impl Into<String>) -> Self {
        Self {
            status: ConnectionState::Connected,
            message: message.into(),
        }
    }

    pub fn disconnected(message: impl Into<String>) -> Self {
        Self {
            status: ConnectionState::Disconnected,
            message: message.into(),
        }
    }
}

/// Operations the service needs from the posting account.
///
/// Implementations authenticate lazily: `create_tweet`, `upload_media` and
/// `get_tweet` establish a session first when none is cached.
#[async_trait]
pub trait AccountClient: Send + Sync {
    /// Establishes (or reuses) an authenticated session.
    async fn authenticate(&self) -> Result<AccountIdentity, ClientError>;

    /// Posts a tweet.
    async fn create_tweet(&self, tweet: &NewTweet) -> Result<PublishedTweet, ClientError>;

    /// Uploads attachments and returns their media ids in order.
    async fn upload_media(&self, media: &[MediaAttachment]) -> Result<Vec<String>, ClientError>;

    /// Looks up a tweet; `Ok(None)` when it does not exist.
    async fn get_tweet(&self, tweet_id: &str) -> Result<Option<TweetInfo>, ClientError>;

    /// Checks the account connection. Never fails; problems are reported in the status.
    async fn health_check(&self) -> HealthStatus;

    /// Drops cached authentication so the next call re-authenticates.
    async fn invalidate_session(&self);
}
