//! HTTP route handlers for the tweetgate service.
//!
//! Handlers validate input, call into the publisher or the account client and
//! wrap results in the JSON envelopes from [`crate::error`].

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use log::{error, info, warn};
use serde_json::{json, Value};

use crate::app::AppState;
use crate::db;
use crate::error::{success_body, ApiError};
use crate::models::{
    is_valid_tweet_id, HealthResponse, LogStatus, LogsQuery, TweetRequest, TweetResponse,
};
use crate::publisher::publish_tweet;

/// Default number of rows returned by `GET /api/logs`.
pub const DEFAULT_LOGS_LIMIT: i64 = 50;
/// Upper bound for the `limit` query parameter.
pub const MAX_LOGS_LIMIT: i64 = 500;

/// Handles GET requests to the root `/` endpoint.
///
/// # Example Response
///
/// ```json
/// {
///   "service": "tweetgate",
///   "version": "0.1.0",
///   "status": "running",
///   "timestamp": "2024-01-01T00:00:00Z"
/// }
/// ```
pub async fn handle_root() -> Json<Value> {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "timestamp": Utc::now(),
    }))
}

/// Handles GET requests to the `/health` endpoint.
///
/// Pings the database and checks the X account. The service reports
/// `healthy` as long as the database answers; the account connection is
/// reported separately in `twitter_status` so a flaky upstream does not take
/// the instance out of a load balancer.
///
/// # Returns
///
/// - `200 OK` with status `healthy`
/// - `503 Service Unavailable` with status `unhealthy` if the database ping fails
pub async fn handle_health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database_status = match db::ping(&state.pool).await {
        Ok(()) => "connected".to_string(),
        Err(e) => {
            error!("Health check: database ping failed: {}", e);
            "disconnected".to_string()
        }
    };
    let twitter = state.client.health_check().await;

    let healthy = database_status == "connected";
    let response = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        timestamp: Utc::now(),
        twitter_status: twitter.status.as_str().to_string(),
        twitter_message: twitter.message,
        database_status,
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

/// Handles POST requests to the `/api/tweet` endpoint.
///
/// # Request Body
///
/// ```json
/// {
///   "text": "Hello from tweetgate",
///   "media": ["data:image/png;base64,..."],
///   "reply_to": "1234567890"
/// }
/// ```
///
/// # Returns
///
/// - `200 OK`: [`TweetResponse`] with the new tweet id and the log row id
/// - `422 Unprocessable Entity`: Malformed body or failed validation (nothing is logged)
/// - `400 Bad Request`: The account client failed after all retries
/// - `500 Internal Server Error`: The log store is unavailable
pub async fn handle_create_tweet(
    State(state): State<AppState>,
    payload: Result<Json<TweetRequest>, JsonRejection>,
) -> Result<Json<TweetResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        warn!("Rejected tweet request body: {}", rejection.body_text());
        ApiError::Validation(rejection.body_text())
    })?;

    let tweet = request.validate().map_err(ApiError::Validation)?;

    let outcome = publish_tweet(
        &state.pool,
        state.client.as_ref(),
        &state.retry_policy,
        tweet,
    )
    .await?;

    Ok(Json(TweetResponse {
        success: true,
        tweet_id: Some(outcome.tweet.tweet_id),
        message: "Tweet published successfully".to_string(),
        created_at: Some(outcome.tweet.created_at.unwrap_or_else(Utc::now)),
        log_id: outcome.log_id,
    }))
}

/// Handles GET requests to the `/api/logs` endpoint.
///
/// # Query Parameters
///
/// - `limit`: Number of rows to return (default 50, clamped to 1..=500)
/// - `status`: Only return rows in this state (`processing`, `success`, `failed`, `pending`)
pub async fn handle_get_logs(
    State(state): State<AppState>,
    query: Result<Query<LogsQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query.map_err(|rejection| ApiError::Validation(rejection.body_text()))?;

    let limit = query
        .limit
        .unwrap_or(DEFAULT_LOGS_LIMIT)
        .clamp(1, MAX_LOGS_LIMIT);
    let status = match query.status.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(raw.parse::<LogStatus>().map_err(ApiError::Validation)?),
    };

    let logs = db::get_recent_logs(&state.pool, limit, status)
        .await
        .map_err(ApiError::database)?;

    info!("Returning {} tweet logs", logs.len());
    let total = logs.len();
    Ok(Json(success_body(
        json!({ "logs": logs, "total": total }),
        &format!("Retrieved {} logs", total),
    )))
}

/// Handles GET requests to the `/api/tweet/:id` endpoint.
///
/// Looks the tweet up through the account client.
///
/// # Returns
///
/// - `200 OK`: The tweet with its public metrics
/// - `422 Unprocessable Entity`: The id is not a numeric tweet id
/// - `404 Not Found`: X has no such tweet
pub async fn handle_get_tweet(
    State(state): State<AppState>,
    Path(tweet_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !is_valid_tweet_id(&tweet_id) {
        return Err(ApiError::Validation(format!(
            "'{}' is not a valid tweet id",
            tweet_id
        )));
    }

    match state.client.get_tweet(&tweet_id).await? {
        Some(tweet) => Ok(Json(success_body(json!(tweet), "Tweet retrieved"))),
        None => Err(ApiError::NotFound(format!("tweet {} not found", tweet_id))),
    }
}
