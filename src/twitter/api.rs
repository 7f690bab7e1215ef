//! X API v2 implementation of [`AccountClient`].
//!
//! Every request carries the cached session's access token. Sessions are
//! established lazily: saved session first, then the configured access token,
//! then a refresh-token grant.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::Mutex;

use super::{
    AccountClient, AccountIdentity, ClientError, HealthStatus, MediaAttachment, NewTweet,
    PublishedTweet, Session, SessionCache, TweetInfo,
};
use crate::config::TwitterCredentials;
use crate::oauth::{build_oauth2_user_context_header, refresh_access_token};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Sanitizes text for safe logging by truncating and escaping control characters.
///
/// This function:
/// - Truncates long text to prevent log flooding
/// - Replaces control characters that could manipulate log output
/// - Escapes newlines to prevent log injection
pub(crate) fn sanitize_for_logging(text: &str, max_len: usize) -> String {
    let sanitized: String = text
        .chars()
        .map(|c| match c {
            '\n' | '\r' | '\t' => ' ',
            c if c.is_control() => '?',
            c => c,
        })
        .collect();

    if sanitized.chars().count() > max_len {
        let truncated: String = sanitized.chars().take(max_len).collect();
        format!(
            "{}... [truncated, {} total bytes]",
            truncated,
            text.len()
        )
    } else {
        sanitized
    }
}

/// Maps a non-success response to a [`ClientError`].
///
/// 401 and 403 are authentication failures, 429 is rate limiting and
/// everything else is a generic API error carrying the best message X gave.
pub(crate) fn error_for_status(status: StatusCode, body: &str) -> ClientError {
    let message = error_message(body);

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ClientError::Auth(format!("{} {}", status.as_u16(), message))
        }
        StatusCode::TOO_MANY_REQUESTS => ClientError::RateLimited(message),
        _ => ClientError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

/// The most useful message in an X error body, or the sanitized body itself.
pub(crate) fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| {
            json.get("detail")
                .or_else(|| json.get("title"))
                .or_else(|| json.pointer("/errors/0/message"))
                .or_else(|| json.get("error_description"))
                .or_else(|| json.get("error"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| sanitize_for_logging(body, 200))
}

fn parse_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_identity(body: &Value) -> Result<AccountIdentity, ClientError> {
    let data = body
        .get("data")
        .ok_or_else(|| ClientError::InvalidResponse("user response has no data".into()))?;

    match (
        data.get("id").and_then(|v| v.as_str()),
        data.get("username").and_then(|v| v.as_str()),
    ) {
        (Some(id), Some(username)) => Ok(AccountIdentity {
            user_id: id.to_string(),
            username: username.to_string(),
            name: data.get("name").and_then(|v| v.as_str()).map(str::to_string),
        }),
        _ => Err(ClientError::InvalidResponse(
            "user response is missing id or username".into(),
        )),
    }
}

fn parse_tweet_info(body: &Value) -> Option<TweetInfo> {
    let data = body.get("data")?;
    let id = data.get("id")?.as_str()?.to_string();
    let text = data.get("text")?.as_str()?.to_string();
    let author_id = data
        .get("author_id")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let user_name = body
        .pointer("/includes/users")
        .and_then(|users| users.as_array())
        .and_then(|users| {
            users
                .iter()
                .find(|u| u.get("id").and_then(|v| v.as_str()) == author_id.as_deref())
        })
        .and_then(|u| u.get("name"))
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let metric = |name: &str| {
        data.get("public_metrics")
            .and_then(|m| m.get(name))
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    };

    Some(TweetInfo {
        id,
        text,
        created_at: parse_timestamp(data.get("created_at")),
        author_id,
        user_name,
        like_count: metric("like_count"),
        retweet_count: metric("retweet_count"),
        reply_count: metric("reply_count"),
    })
}

/// Account client backed by the X API v2.
pub struct XApiClient {
    http: Client,
    credentials: TwitterCredentials,
    sessions: SessionCache,
    auth_lock: Mutex<()>,
}

impl XApiClient {
    /// Creates a client. No request is made until the first operation.
    pub fn new(credentials: TwitterCredentials, sessions: SessionCache) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("tweetgate/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            credentials,
            sessions,
            auth_lock: Mutex::new(()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.credentials.api_base, path)
    }

    /// Sends a request and returns the parsed JSON body of a successful response.
    ///
    /// A 401 drops the cached session before the error is returned.
    async fn send(
        &self,
        request_builder: RequestBuilder,
        operation_name: &str,
    ) -> Result<Value, ClientError> {
        debug!("Sending request for operation: {}", operation_name);

        let response = request_builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        info!(
            "Received response with status: {} for operation: {}",
            status, operation_name
        );

        if status.is_success() {
            debug!(
                "Response summary for '{}': {} bytes received",
                operation_name,
                body.len()
            );
            if body.trim().is_empty() {
                return Ok(Value::Null);
            }
            return Ok(serde_json::from_str(&body)?);
        }

        error!("Operation '{}' failed - Status: {}", operation_name, status);
        debug!(
            "Error response for '{}': {}",
            operation_name,
            sanitize_for_logging(&body, 200)
        );

        if status == StatusCode::UNAUTHORIZED {
            warn!(
                "Received 401 Unauthorized for operation '{}' - dropping cached session",
                operation_name
            );
            self.sessions.clear().await;
        }

        Err(error_for_status(status, &body))
    }

    /// Checks a token against `GET /2/users/me`.
    async fn verify_token(&self, access_token: &str) -> Result<AccountIdentity, ClientError> {
        let request = self
            .http
            .get(self.url("/2/users/me"))
            .header("Authorization", build_oauth2_user_context_header(access_token));
        let body = self.send(request, "verify_credentials").await?;
        parse_identity(&body)
    }

    /// Drops the saved session once nothing in it can be used any more.
    async fn forget_saved_session(&self) {
        if let Err(e) = self.sessions.forget_persisted().await {
            warn!("Failed to remove saved session: {}", e);
        }
    }

    /// Runs the authentication chain and returns a verified session.
    ///
    /// The saved session stays in storage until it is replaced by a verified
    /// one, unless its own refresh token is rejected by X. Its refresh token
    /// may be the only valid one after a rotation.
    async fn establish_session(&self) -> Result<Session, ClientError> {
        let mut failures = Vec::new();
        let mut refresh_candidates = Vec::new();
        let mut saved_refresh_token = None;

        match self.sessions.load_persisted().await {
            Ok(Some(saved)) => match self.verify_token(&saved.access_token).await {
                Ok(identity) => {
                    info!("Authenticated with saved session as @{}", identity.username);
                    return Ok(Session::new(saved.access_token, saved.refresh_token, identity));
                }
                Err(e) if e.is_auth_error() => {
                    warn!("Saved session access token is no longer valid: {}", e);
                    failures.push(format!("saved session: {}", e));
                    match saved.refresh_token {
                        Some(refresh_token) => {
                            saved_refresh_token = Some(refresh_token.clone());
                            refresh_candidates.push(refresh_token);
                        }
                        None => self.forget_saved_session().await,
                    }
                }
                Err(e) => return Err(e),
            },
            Ok(None) => info!("No saved session found"),
            Err(e) => warn!("Failed to load saved session: {}", e),
        }

        if let Some(token) = &self.credentials.access_token {
            match self.verify_token(token).await {
                Ok(identity) => {
                    info!("Authenticated with configured access token as @{}", identity.username);
                    return Ok(Session::new(
                        token.clone(),
                        self.credentials.refresh_token.clone(),
                        identity,
                    ));
                }
                Err(e) if e.is_auth_error() => {
                    warn!("Configured access token was rejected: {}", e);
                    failures.push(format!("access token: {}", e));
                }
                Err(e) => return Err(e),
            }
        }

        if let (Some(client_id), Some(client_secret)) =
            (&self.credentials.client_id, &self.credentials.client_secret)
        {
            refresh_candidates.extend(self.credentials.refresh_token.clone());
            refresh_candidates.dedup();

            for refresh_token in refresh_candidates {
                let refreshed = match refresh_access_token(
                    &self.http,
                    &self.credentials.api_base,
                    client_id,
                    client_secret,
                    &refresh_token,
                )
                .await
                {
                    Ok(tokens) => tokens,
                    Err(e) if e.is_auth_error() => {
                        warn!("Refresh token was rejected: {}", e);
                        if saved_refresh_token.as_deref() == Some(refresh_token.as_str()) {
                            self.forget_saved_session().await;
                        }
                        failures.push(format!("token refresh: {}", e));
                        continue;
                    }
                    Err(e) => {
                        warn!("Token refresh failed, keeping refresh token for the next attempt: {}", e);
                        return Err(e);
                    }
                };

                let identity = self.verify_token(&refreshed.access_token).await?;
                info!("Authenticated with refreshed token as @{}", identity.username);
                return Ok(Session::new(
                    refreshed.access_token,
                    refreshed.refresh_token.or(Some(refresh_token)),
                    identity,
                ));
            }
        }

        if failures.is_empty() {
            failures.push("no usable credentials".to_string());
        }
        Err(ClientError::Auth(failures.join("; ")))
    }

    /// Returns the live session, authenticating first if needed.
    async fn session(&self) -> Result<Session, ClientError> {
        if let Some(session) = self.sessions.current().await {
            return Ok(session);
        }
        self.authenticate().await?;
        self.sessions
            .current()
            .await
            .ok_or_else(|| ClientError::Auth("session was dropped during authentication".into()))
    }

    async fn upload_one(
        &self,
        session: &Session,
        attachment: &MediaAttachment,
    ) -> Result<String, ClientError> {
        let payload = json!({
            "media": attachment.to_base64(),
            "media_category": attachment.category(),
            "media_type": attachment.mime_type,
        });

        let request = self
            .http
            .post(self.url("/2/media/upload"))
            .header(
                "Authorization",
                build_oauth2_user_context_header(&session.access_token),
            )
            .json(&payload);

        let body = self.send(request, "upload_media").await?;
        body.pointer("/data/id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| ClientError::InvalidResponse("media upload response has no id".into()))
    }
}

#[async_trait]
impl AccountClient for XApiClient {
    async fn authenticate(&self) -> Result<AccountIdentity, ClientError> {
        if let Some(session) = self.sessions.current().await {
            return Ok(session.identity());
        }

        let _guard = self.auth_lock.lock().await;
        // Another request may have finished authenticating while we waited.
        if let Some(session) = self.sessions.current().await {
            return Ok(session.identity());
        }

        info!("Authenticating X account @{}", self.credentials.username);
        let session = match self.establish_session().await {
            Ok(session) => session,
            Err(e) => {
                error!("X authentication failed: {}", e);
                return Err(e);
            }
        };

        if !session.username.eq_ignore_ascii_case(&self.credentials.username) {
            warn!(
                "Authenticated as @{} but TWITTER_USERNAME is @{}",
                session.username, self.credentials.username
            );
        }

        if let Err(e) = self.sessions.persist(&session).await {
            warn!("Failed to save session, continuing with in-memory session: {}", e);
        }
        let identity = session.identity();
        self.sessions.set(session).await;
        Ok(identity)
    }

    async fn create_tweet(&self, tweet: &NewTweet) -> Result<PublishedTweet, ClientError> {
        let session = self.session().await?;
        info!(
            "Posting tweet: '{}'",
            sanitize_for_logging(&tweet.text, 50)
        );

        let mut payload = json!({ "text": tweet.text });
        if !tweet.media_ids.is_empty() {
            payload["media"] = json!({ "media_ids": tweet.media_ids });
        }
        if let Some(reply_to) = &tweet.reply_to {
            payload["reply"] = json!({ "in_reply_to_tweet_id": reply_to });
        }
        debug!("Request headers: Authorization: Bearer [REDACTED], Content-Type: application/json");

        let request = self
            .http
            .post(self.url("/2/tweets"))
            .header(
                "Authorization",
                build_oauth2_user_context_header(&session.access_token),
            )
            .json(&payload);

        let body = self.send(request, "create_tweet").await?;
        let data = body
            .get("data")
            .ok_or_else(|| ClientError::InvalidResponse("tweet response has no data".into()))?;
        let tweet_id = data
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ClientError::InvalidResponse("tweet response has no id".into()))?
            .to_string();
        let text = data
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or(&tweet.text)
            .to_string();

        info!("Tweet posted successfully: {}", tweet_id);
        Ok(PublishedTweet {
            tweet_id,
            text,
            created_at: parse_timestamp(data.get("created_at")).or_else(|| Some(Utc::now())),
            user_id: Some(session.user_id),
            user_name: session.name.or(Some(session.username)),
        })
    }

    async fn upload_media(&self, media: &[MediaAttachment]) -> Result<Vec<String>, ClientError> {
        let session = self.session().await?;
        let mut media_ids = Vec::with_capacity(media.len());

        for (i, attachment) in media.iter().enumerate() {
            match self.upload_one(&session, attachment).await {
                Ok(media_id) => {
                    info!(
                        "Media {} uploaded successfully: {} ({:?})",
                        i, media_id, attachment
                    );
                    media_ids.push(media_id);
                }
                Err(e) => {
                    error!("Media upload failed ({}): {}", i, e);
                    return Err(e);
                }
            }
        }

        Ok(media_ids)
    }

    async fn get_tweet(&self, tweet_id: &str) -> Result<Option<TweetInfo>, ClientError> {
        let session = self.session().await?;
        let url = format!(
            "{}?tweet.fields=created_at,public_metrics,author_id&expansions=author_id&user.fields=name,username",
            self.url(&format!("/2/tweets/{}", urlencoding::encode(tweet_id)))
        );

        let request = self.http.get(&url).header(
            "Authorization",
            build_oauth2_user_context_header(&session.access_token),
        );

        match self.send(request, "get_tweet").await {
            Ok(body) => {
                let info = parse_tweet_info(&body);
                if info.is_none() {
                    info!("Tweet {} not found", tweet_id);
                }
                Ok(info)
            }
            Err(ClientError::Api { status: 404, .. }) => {
                info!("Tweet {} not found", tweet_id);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn health_check(&self) -> HealthStatus {
        let session = match self.session().await {
            Ok(session) => session,
            Err(e) => return HealthStatus::disconnected(format!("X API connection failed: {}", e)),
        };

        let url = self.url(&format!(
            "/2/users/by/username/{}",
            urlencoding::encode(&self.credentials.username)
        ));
        let request = self.http.get(&url).header(
            "Authorization",
            build_oauth2_user_context_header(&session.access_token),
        );

        match self.send(request, "health_check").await {
            Ok(body) if body.get("data").is_some() => HealthStatus::connected(format!(
                "X API connection OK (@{})",
                session.username
            )),
            Ok(_) => HealthStatus::disconnected(format!(
                "X account @{} not found",
                self.credentials.username
            )),
            Err(e) => HealthStatus::disconnected(format!("X API connection failed: {}", e)),
        }
    }

    async fn invalidate_session(&self) {
        warn!("Authentication error detected, resetting X session");
        self.sessions.clear().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_for_logging() {
        assert_eq!(sanitize_for_logging("a\nb\tc\u{7}", 20), "a b c?");
        let long = "x".repeat(30);
        assert_eq!(
            sanitize_for_logging(&long, 10),
            "xxxxxxxxxx... [truncated, 30 total bytes]"
        );
    }

    #[test]
    fn test_error_for_status_classification() {
        let err = error_for_status(
            StatusCode::UNAUTHORIZED,
            r#"{"title":"Unauthorized","detail":"Unauthorized","status":401}"#,
        );
        assert!(err.is_auth_error());

        let err = error_for_status(
            StatusCode::FORBIDDEN,
            r#"{"detail":"You are not allowed to create a Tweet with duplicate content."}"#,
        );
        assert!(err.is_auth_error());
        assert!(err.to_string().contains("duplicate content"));

        let err = error_for_status(StatusCode::TOO_MANY_REQUESTS, "Too Many Requests");
        assert!(matches!(err, ClientError::RateLimited(ref m) if m == "Too Many Requests"));

        let err = error_for_status(
            StatusCode::BAD_REQUEST,
            r#"{"errors":[{"message":"text is too long"}]}"#,
        );
        assert!(
            matches!(err, ClientError::Api { status: 400, ref message } if message == "text is too long")
        );
    }

    #[test]
    fn test_parse_identity() {
        let body = json!({"data": {"id": "42", "username": "gatebot", "name": "Gate Bot"}});
        let identity = parse_identity(&body).unwrap();
        assert_eq!(identity.user_id, "42");
        assert_eq!(identity.username, "gatebot");
        assert_eq!(identity.name.as_deref(), Some("Gate Bot"));

        assert!(parse_identity(&json!({"errors": []})).is_err());
    }

    #[test]
    fn test_parse_tweet_info() {
        let body = json!({
            "data": {
                "id": "1800000000000000000",
                "text": "hello",
                "author_id": "42",
                "created_at": "2024-01-15T10:30:00.000Z",
                "public_metrics": {"like_count": 3, "retweet_count": 1, "reply_count": 2}
            },
            "includes": {"users": [{"id": "42", "name": "Gate Bot", "username": "gatebot"}]}
        });

        let info = parse_tweet_info(&body).unwrap();
        assert_eq!(info.id, "1800000000000000000");
        assert_eq!(info.user_name.as_deref(), Some("Gate Bot"));
        assert_eq!(info.like_count, 3);
        assert_eq!(info.retweet_count, 1);
        assert_eq!(info.reply_count, 2);
        assert_eq!(
            info.created_at.map(|dt| dt.to_rfc3339()),
            Some("2024-01-15T10:30:00+00:00".to_string())
        );

        assert!(parse_tweet_info(&json!({"errors": [{"title": "Not Found Error"}]})).is_none());
    }

    mod mock_x {
        //! A minimal in-process X API for driving the real client over HTTP.

        use axum::extract::{Path, State};
        use axum::http::{HeaderMap, StatusCode as HttpStatus};
        use axum::routing::{get, post};
        use axum::{Form, Json, Router};
        use serde_json::{json, Value};
        use std::collections::HashMap;
        use std::sync::{Arc, Mutex};

        #[derive(Default)]
        pub struct MockX {
            pub valid_tokens: Vec<String>,
            /// refresh token -> (new access token, new refresh token); each grant is single use
            pub refresh_grants: HashMap<String, (String, String)>,
            /// token requests answered with 503 before the endpoint recovers
            pub token_outages: u32,
            pub token_requests: u32,
        }

        pub type SharedMockX = Arc<Mutex<MockX>>;

        type Reply = (HttpStatus, Json<Value>);

        fn authorized(mock: &SharedMockX, headers: &HeaderMap) -> bool {
            let token = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .unwrap_or_default();
            mock.lock().unwrap().valid_tokens.iter().any(|t| t == token)
        }

        fn unauthorized() -> Reply {
            (
                HttpStatus::UNAUTHORIZED,
                Json(json!({"title": "Unauthorized", "detail": "Unauthorized", "status": 401})),
            )
        }

        async fn users_me(State(mock): State<SharedMockX>, headers: HeaderMap) -> Reply {
            if !authorized(&mock, &headers) {
                return unauthorized();
            }
            (
                HttpStatus::OK,
                Json(json!({"data": {"id": "42", "username": "gatebot", "name": "Gate Bot"}})),
            )
        }

        async fn oauth_token(
            State(mock): State<SharedMockX>,
            Form(form): Form<HashMap<String, String>>,
        ) -> Reply {
            let mut state = mock.lock().unwrap();
            state.token_requests += 1;
            if state.token_outages > 0 {
                state.token_outages -= 1;
                return (
                    HttpStatus::SERVICE_UNAVAILABLE,
                    Json(json!({"title": "Service Unavailable"})),
                );
            }

            let refresh_token = form.get("refresh_token").cloned().unwrap_or_default();
            match state.refresh_grants.remove(&refresh_token) {
                Some((access_token, new_refresh_token)) => {
                    state.valid_tokens.push(access_token.clone());
                    (
                        HttpStatus::OK,
                        Json(json!({
                            "token_type": "bearer",
                            "access_token": access_token,
                            "refresh_token": new_refresh_token,
                        })),
                    )
                }
                None => (
                    HttpStatus::BAD_REQUEST,
                    Json(json!({
                        "error": "invalid_request",
                        "error_description": "Value passed for the token was invalid."
                    })),
                ),
            }
        }

        async fn post_tweet(
            State(mock): State<SharedMockX>,
            headers: HeaderMap,
            Json(body): Json<Value>,
        ) -> Reply {
            if !authorized(&mock, &headers) {
                return unauthorized();
            }
            (
                HttpStatus::CREATED,
                Json(json!({"data": {"id": "1900000000000000001", "text": body["text"]}})),
            )
        }

        async fn lookup_tweet(
            State(mock): State<SharedMockX>,
            Path(id): Path<String>,
            headers: HeaderMap,
        ) -> Reply {
            if !authorized(&mock, &headers) {
                return unauthorized();
            }
            if id != "123" {
                return (
                    HttpStatus::NOT_FOUND,
                    Json(json!({"title": "Not Found Error", "detail": "Could not find tweet"})),
                );
            }
            (
                HttpStatus::OK,
                Json(json!({
                    "data": {
                        "id": "123",
                        "text": "hello",
                        "author_id": "42",
                        "public_metrics": {"like_count": 5, "retweet_count": 0, "reply_count": 1}
                    },
                    "includes": {"users": [{"id": "42", "name": "Gate Bot", "username": "gatebot"}]}
                })),
            )
        }

        async fn user_by_username(
            State(mock): State<SharedMockX>,
            Path(username): Path<String>,
            headers: HeaderMap,
        ) -> Reply {
            if !authorized(&mock, &headers) {
                return unauthorized();
            }
            (
                HttpStatus::OK,
                Json(json!({"data": {"id": "42", "username": username}})),
            )
        }

        /// Serves `mock` on a random local port and returns its base URL.
        pub async fn spawn(mock: MockX) -> (String, SharedMockX) {
            let mock = Arc::new(Mutex::new(mock));
            let app = Router::new()
                .route("/2/users/me", get(users_me))
                .route("/2/oauth2/token", post(oauth_token))
                .route("/2/tweets", post(post_tweet))
                .route("/2/tweets/:id", get(lookup_tweet))
                .route("/2/users/by/username/:username", get(user_by_username))
                .with_state(mock.clone());

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            (format!("http://{}", addr), mock)
        }
    }

    use crate::db;
    use crate::twitter::ConnectionState;
    use mock_x::MockX;
    use sqlx::SqlitePool;
    use std::collections::HashMap;

    async fn test_pool() -> SqlitePool {
        let pool = db::init_pool("sqlite::memory:").await.unwrap();
        db::init_database(&pool).await.unwrap();
        pool
    }

    fn credentials(
        api_base: &str,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> TwitterCredentials {
        TwitterCredentials {
            username: "gatebot".to_string(),
            access_token: access_token.map(str::to_string),
            refresh_token: refresh_token.map(str::to_string),
            client_id: Some("client-id".to_string()),
            client_secret: Some("client-secret".to_string()),
            api_base: api_base.to_string(),
        }
    }

    fn x_client(pool: &SqlitePool, credentials: TwitterCredentials) -> XApiClient {
        XApiClient::new(credentials, SessionCache::new(pool.clone(), None)).unwrap()
    }

    fn session_with(access_token: &str, refresh_token: Option<&str>) -> Session {
        Session::new(
            access_token.to_string(),
            refresh_token.map(str::to_string),
            AccountIdentity {
                user_id: "42".to_string(),
                username: "gatebot".to_string(),
                name: Some("Gate Bot".to_string()),
            },
        )
    }

    async fn saved_session(pool: &SqlitePool) -> Option<Session> {
        SessionCache::new(pool.clone(), None)
            .load_persisted()
            .await
            .unwrap()
    }

    fn tweet(text: &str) -> NewTweet {
        NewTweet {
            text: text.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_configured_token_is_verified_and_saved() {
        let (api_base, mock) = mock_x::spawn(MockX {
            valid_tokens: vec!["at-1".to_string()],
            ..Default::default()
        })
        .await;
        let pool = test_pool().await;
        let client = x_client(&pool, credentials(&api_base, Some("at-1"), None));

        let identity = client.authenticate().await.unwrap();
        assert_eq!(identity.user_id, "42");
        assert_eq!(identity.username, "gatebot");

        let saved = saved_session(&pool).await.unwrap();
        assert_eq!(saved.access_token, "at-1");
        assert_eq!(mock.lock().unwrap().token_requests, 0);
    }

    #[tokio::test]
    async fn test_rejected_access_token_falls_back_to_refresh() {
        let (api_base, mock) = mock_x::spawn(MockX {
            refresh_grants: HashMap::from([(
                "rt-1".to_string(),
                ("at-2".to_string(), "rt-2".to_string()),
            )]),
            ..Default::default()
        })
        .await;
        let pool = test_pool().await;
        let client = x_client(&pool, credentials(&api_base, Some("expired-at"), Some("rt-1")));

        client.authenticate().await.unwrap();

        // rt-1 is single use, so the rotated token has to be the one kept
        let saved = saved_session(&pool).await.unwrap();
        assert_eq!(saved.access_token, "at-2");
        assert_eq!(saved.refresh_token.as_deref(), Some("rt-2"));
        assert_eq!(mock.lock().unwrap().token_requests, 1);
    }

    #[tokio::test]
    async fn test_token_endpoint_outage_keeps_saved_refresh_token() {
        let (api_base, mock) = mock_x::spawn(MockX {
            refresh_grants: HashMap::from([(
                "rotated-rt".to_string(),
                ("at-3".to_string(), "rt-4".to_string()),
            )]),
            token_outages: 1,
            ..Default::default()
        })
        .await;
        let pool = test_pool().await;
        SessionCache::new(pool.clone(), None)
            .persist(&session_with("stale-at", Some("rotated-rt")))
            .await
            .unwrap();
        // The configured refresh token predates the rotation and is dead.
        let client = x_client(&pool, credentials(&api_base, None, Some("old-rt")));

        let err = client.authenticate().await.unwrap_err();
        assert!(!err.is_auth_error());
        assert!(matches!(err, ClientError::Api { status: 503, .. }));

        let saved = saved_session(&pool).await.unwrap();
        assert_eq!(saved.refresh_token.as_deref(), Some("rotated-rt"));

        client.authenticate().await.unwrap();
        let saved = saved_session(&pool).await.unwrap();
        assert_eq!(saved.access_token, "at-3");
        assert_eq!(saved.refresh_token.as_deref(), Some("rt-4"));
        assert_eq!(mock.lock().unwrap().token_requests, 2);
    }

    #[tokio::test]
    async fn test_rejected_saved_refresh_token_is_forgotten() {
        let (api_base, _mock) = mock_x::spawn(MockX::default()).await;
        let pool = test_pool().await;
        SessionCache::new(pool.clone(), None)
            .persist(&session_with("stale-at", Some("dead-rt")))
            .await
            .unwrap();
        let client = x_client(&pool, credentials(&api_base, None, None));

        let err = client.authenticate().await.unwrap_err();
        assert!(err.is_auth_error());
        assert!(saved_session(&pool).await.is_none());
    }

    #[tokio::test]
    async fn test_unauthorized_drops_session_and_next_call_reauthenticates() {
        let (api_base, mock) = mock_x::spawn(MockX {
            valid_tokens: vec!["at-1".to_string()],
            refresh_grants: HashMap::from([(
                "rt-1".to_string(),
                ("at-2".to_string(), "rt-2".to_string()),
            )]),
            ..Default::default()
        })
        .await;
        let pool = test_pool().await;
        let client = x_client(&pool, credentials(&api_base, Some("at-1"), Some("rt-1")));

        let first = client.create_tweet(&tweet("first")).await.unwrap();
        assert_eq!(first.tweet_id, "1900000000000000001");
        assert_eq!(first.user_id.as_deref(), Some("42"));

        mock.lock().unwrap().valid_tokens.retain(|t| t != "at-1");

        let err = client.create_tweet(&tweet("second")).await.unwrap_err();
        assert!(err.is_auth_error());
        assert!(client.sessions.current().await.is_none());

        let retried = client.create_tweet(&tweet("second")).await.unwrap();
        assert_eq!(retried.text, "second");
        assert_eq!(
            client.sessions.current().await.map(|s| s.access_token),
            Some("at-2".to_string())
        );
        let saved = saved_session(&pool).await.unwrap();
        assert_eq!(saved.refresh_token.as_deref(), Some("rt-2"));
    }

    #[tokio::test]
    async fn test_get_tweet_and_health_check() {
        let (api_base, mock) = mock_x::spawn(MockX {
            valid_tokens: vec!["at-1".to_string()],
            ..Default::default()
        })
        .await;
        let pool = test_pool().await;
        let client = x_client(&pool, credentials(&api_base, Some("at-1"), None));

        let info = client.get_tweet("123").await.unwrap().unwrap();
        assert_eq!(info.like_count, 5);
        assert_eq!(info.user_name.as_deref(), Some("Gate Bot"));
        assert!(client.get_tweet("999").await.unwrap().is_none());

        let health = client.health_check().await;
        assert_eq!(health.status, ConnectionState::Connected);

        mock.lock().unwrap().valid_tokens.clear();
        client.invalidate_session().await;

        let health = client.health_check().await;
        assert_eq!(health.status, ConnectionState::Disconnected);
        assert!(health.message.contains("X API connection failed"));
    }
}
