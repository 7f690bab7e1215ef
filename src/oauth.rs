//! OAuth 2.0 helpers for the X API.
//!
//! This module builds User Context authorization headers and performs the
//! refresh-token grant used to renew an expired access token.

use log::{debug, error, info};
use reqwest::{Client, StatusCode};

use crate::config::mask_secret;
use crate::twitter::{error_for_status, error_message, sanitize_for_logging, ClientError};

/// Builds the Authorization header for OAuth 2.0 User Context authentication.
///
/// # Example
///
/// ```rust
/// use tweetgate::build_oauth2_user_context_header;
///
/// let header = build_oauth2_user_context_header("your_access_token");
/// assert_eq!(header, "Bearer your_access_token");
/// ```
pub fn build_oauth2_user_context_header(access_token: &str) -> String {
    format!("Bearer {}", access_token)
}

/// Tokens returned by a successful refresh.
#[derive(Debug, Clone)]
pub struct RefreshedTokens {
    pub access_token: String,
    /// X rotates refresh tokens; when present, the old one is no longer valid
    pub refresh_token: Option<String>,
}

/// Exchanges a refresh token for a new access token.
///
/// # Parameters
///
/// - `http`: The HTTP client to use
/// - `api_base`: Base URL of the X API (the token endpoint is `/2/oauth2/token`)
/// - `client_id` / `client_secret`: OAuth 2.0 app credentials (sent as basic auth)
/// - `refresh_token`: The refresh token to exchange
///
/// # Returns
///
/// - `Ok(RefreshedTokens)`: The new access token and, if rotated, the new refresh token
/// - `Err(ClientError::Auth)`: If X rejects the refresh token or credentials
/// - `Err(ClientError::RateLimited | Api)`: If the token endpoint is unavailable; the
///   refresh token is still good and can be retried
pub async fn refresh_access_token(
    http: &Client,
    api_base: &str,
    client_id: &str,
    client_secret: &str,
    refresh_token: &str,
) -> Result<RefreshedTokens, ClientError> {
    info!("Refreshing access token");
    debug!("Refresh token (masked): {}", mask_secret(refresh_token));

    let params = [
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
        ("client_id", client_id),
    ];

    let response = http
        .post(format!("{}/2/oauth2/token", api_base))
        .basic_auth(client_id, Some(client_secret))
        .form(&params)
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        error!("Token refresh failed - Status: {}", status);
        debug!("Token refresh error body: {}", sanitize_for_logging(&body, 200));
        return Err(refresh_error(status, &body));
    }

    let json: serde_json::Value = serde_json::from_str(&body)?;
    let access_token = json
        .get("access_token")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ClientError::InvalidResponse("no access_token in refresh response".into()))?
        .to_string();
    let refresh_token = json
        .get("refresh_token")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    info!(
        "Access token refreshed successfully (new refresh token: {})",
        refresh_token.is_some()
    );
    Ok(RefreshedTokens {
        access_token,
        refresh_token,
    })
}

/// Classifies a failed refresh grant.
///
/// Only 400 (`invalid_grant`, `invalid_request`) and 401 (`invalid_client`)
/// mean the refresh token or app credentials were refused. Other statuses are
/// upstream failures.
fn refresh_error(status: StatusCode, body: &str) -> ClientError {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => ClientError::Auth(format!(
            "token refresh rejected ({}): {}",
            status,
            error_message(body)
        )),
        StatusCode::FORBIDDEN => ClientError::Api {
            status: status.as_u16(),
            message: error_message(body),
        },
        _ => error_for_status(status, body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_error_only_treats_rejections_as_auth() {
        let err = refresh_error(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_request","error_description":"Value passed for the token was invalid."}"#,
        );
        assert!(err.is_auth_error());
        assert!(err.to_string().contains("Value passed for the token was invalid."));

        assert!(refresh_error(StatusCode::UNAUTHORIZED, r#"{"error":"invalid_client"}"#).is_auth_error());

        let err = refresh_error(StatusCode::SERVICE_UNAVAILABLE, "upstream unavailable");
        assert!(matches!(err, ClientError::Api { status: 503, .. }));

        let err = refresh_error(StatusCode::TOO_MANY_REQUESTS, "Too Many Requests");
        assert!(matches!(err, ClientError::RateLimited(_)));

        assert!(!refresh_error(StatusCode::FORBIDDEN, "{}").is_auth_error());
    }
}
