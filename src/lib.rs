//! # Tweetgate Library
//!
//! A small HTTP service that publishes tweets from a single X account and keeps
//! an audit log of every attempt in SQLite.
//!
//! ## Features
//!
//! - JSON API for publishing tweets with optional media and replies
//! - Bounded retries with exponential backoff around every X call
//! - Session caching, persisted (optionally encrypted) in SQLite
//! - Publish log with `processing` / `success` / `failed` states
//! - Health check covering the database and the X account
//!
//! ## Configuration
//!
//! Configuration is read from environment variables, see [`config::Settings`]:
//! - `TWITTER_USERNAME`: The posting account (required)
//! - `TWITTER_ACCESS_TOKEN` and/or `TWITTER_REFRESH_TOKEN` with `TWITTER_CLIENT_ID` / `TWITTER_CLIENT_SECRET`
//! - `DATABASE_URL`: SQLite URL (defaults to `sqlite://data/app.db`)
//! - `HOST` / `PORT`: Bind address (defaults to `0.0.0.0:8000`)
//!
//! ## API Endpoints
//!
//! - `GET /`: Service info
//! - `GET /health`: Health status
//! - `POST /api/tweet`: Publish a tweet
//! - `GET /api/tweet/:id`: Look up a tweet
//! - `GET /api/logs`: Recent publish attempts

pub mod app;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod oauth;
pub mod publisher;
pub mod retry;
pub mod twitter;

// Re-export commonly used types and functions
pub use app::{create_app, AppState};
pub use config::Settings;
pub use error::ApiError;
pub use oauth::build_oauth2_user_context_header;
pub use publisher::publish_tweet;
pub use twitter::{AccountClient, ClientError, XApiClient};
