//! Router construction and shared application state.

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue},
    routing::{get, post},
    Router,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer};

use crate::handlers::{
    handle_create_tweet, handle_get_logs, handle_get_tweet, handle_health, handle_root,
};
use crate::retry::RetryPolicy;
use crate::twitter::AccountClient;

/// Largest accepted request body. Base64 media inflates payloads by a third,
/// so this leaves room for four full-size images.
pub const MAX_BODY_BYTES: usize = 28 * 1024 * 1024;

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub client: Arc<dyn AccountClient>,
    pub retry_policy: RetryPolicy,
}

impl AppState {
    pub fn new(pool: SqlitePool, client: Arc<dyn AccountClient>, retry_policy: RetryPolicy) -> Self {
        Self {
            pool,
            client,
            retry_policy,
        }
    }
}

/// Builds the application router with all routes and middleware.
///
/// # Routes
///
/// - `GET /`: Service info
/// - `GET /health`: Database and account health
/// - `POST /api/tweet`: Publish a tweet
/// - `GET /api/tweet/:id`: Look up a tweet
/// - `GET /api/logs`: Recent publish attempts
///
/// Per-IP rate limiting is added on top of this router in `main`, since it
/// needs the peer address from the listener.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/api/tweet", post(handle_create_tweet))
        .route("/api/tweet/:id", get(handle_get_tweet))
        .route("/api/logs", get(handle_get_logs))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(SetResponseHeaderLayer::overriding(
                    header::X_CONTENT_TYPE_OPTIONS,
                    HeaderValue::from_static("nosniff"),
                )),
        )
        .with_state(state)
}
