//! Database module for the publish-attempt log.
//!
//! This module manages a SQLite database with two tables: `tweet_logs`, one row
//! per publish attempt with its status transitions, and `app_config`, a small
//! key/value table that holds the persisted session cache.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::str::FromStr;

use crate::models::{LogStatus, TweetLog, TweetLogUpdate};

const LOG_COLUMNS: &str =
    "id, tweet_id, text, status, retry_count, error_message, created_at, updated_at";

/// Opens a connection pool for `database_url`, creating the database file and
/// its parent directory when missing.
///
/// In-memory URLs get a single connection so every query sees the same database.
///
/// # Returns
///
/// - `Ok(SqlitePool)`: A connection pool to the database
/// - `Err(Box<dyn std::error::Error + Send + Sync>)`: If the URL is invalid or the connection fails
pub async fn init_pool(
    database_url: &str,
) -> Result<SqlitePool, Box<dyn std::error::Error + Send + Sync>> {
    info!("Connecting to SQLite database");
    debug!("Database URL: {}", database_url);

    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

    if !in_memory {
        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                info!("Creating database directory {}", parent.display());
                std::fs::create_dir_all(parent)?;
            }
        }
    }

    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    };
    let pool = pool_options.connect_with(options).await?;

    info!("Successfully connected to SQLite database");
    Ok(pool)
}

/// Creates the tables used by the service if they do not exist yet.
pub async fn init_database(pool: &SqlitePool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Initializing database schema");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tweet_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tweet_id TEXT,
            text TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            retry_count INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tweet_logs_status ON tweet_logs(status)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS app_config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    info!("Database schema ready");
    Ok(())
}

/// Checks that the database answers a trivial query.
pub async fn ping(pool: &SqlitePool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Inserts a new publish attempt and returns its id.
///
/// # Parameters
///
/// - `pool`: A reference to the SQLite connection pool
/// - `text`: The tweet text being published
/// - `status`: The initial status, normally [`LogStatus::Processing`]
pub async fn log_tweet(
    pool: &SqlitePool,
    text: &str,
    status: LogStatus,
) -> Result<i64, Box<dyn std::error::Error + Send + Sync>> {
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO tweet_logs (text, status, retry_count, created_at, updated_at)
        VALUES (?, ?, 0, ?, ?)
        "#,
    )
    .bind(text)
    .bind(status.as_str())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    let id = result.last_insert_rowid();
    info!("Created tweet log {} with status {}", id, status);
    Ok(id)
}

/// Applies a partial update to a log row. `updated_at` is always refreshed.
///
/// # Returns
///
/// - `Ok(())`: If the row was updated
/// - `Err(...)`: If the query fails or no row has this id
pub async fn update_tweet_log(
    pool: &SqlitePool,
    log_id: i64,
    update: TweetLogUpdate,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut query = QueryBuilder::<Sqlite>::new("UPDATE tweet_logs SET updated_at = ");
    query.push_bind(Utc::now());

    if let Some(tweet_id) = update.tweet_id {
        query.push(", tweet_id = ").push_bind(tweet_id);
    }
    if let Some(status) = update.status {
        query.push(", status = ").push_bind(status.as_str());
    }
    if let Some(retry_count) = update.retry_count {
        query.push(", retry_count = ").push_bind(retry_count);
    }
    if let Some(error_message) = update.error_message {
        query.push(", error_message = ").push_bind(error_message);
    }
    query.push(" WHERE id = ").push_bind(log_id);

    let result = query.build().execute(pool).await?;
    if result.rows_affected() == 0 {
        warn!("Tweet log {} not found for update", log_id);
        return Err(format!("Tweet log {} not found", log_id).into());
    }

    debug!("Updated tweet log {}", log_id);
    Ok(())
}

/// Returns the most recent log rows, newest first, optionally filtered by status.
pub async fn get_recent_logs(
    pool: &SqlitePool,
    limit: i64,
    status: Option<LogStatus>,
) -> Result<Vec<TweetLog>, Box<dyn std::error::Error + Send + Sync>> {
    info!(
        "Querying {} most recent tweet logs (status filter: {:?})",
        limit, status
    );

    let rows = match status {
        Some(status) => {
            let sql = format!(
                "SELECT {} FROM tweet_logs WHERE status = ? ORDER BY id DESC LIMIT ?",
                LOG_COLUMNS
            );
            sqlx::query(&sql)
                .bind(status.as_str())
                .bind(limit)
                .fetch_all(pool)
                .await?
        }
        None => {
            let sql = format!("SELECT {} FROM tweet_logs ORDER BY id DESC LIMIT ?", LOG_COLUMNS);
            sqlx::query(&sql).bind(limit).fetch_all(pool).await?
        }
    };

    let logs = rows
        .iter()
        .map(tweet_log_from_row)
        .collect::<Result<Vec<_>, _>>()?;

    debug!("Found {} tweet logs", logs.len());
    Ok(logs)
}

/// Fetches a single log row by id.
pub async fn get_tweet_log(
    pool: &SqlitePool,
    log_id: i64,
) -> Result<Option<TweetLog>, Box<dyn std::error::Error + Send + Sync>> {
    let sql = format!("SELECT {} FROM tweet_logs WHERE id = ?", LOG_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(log_id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => Ok(Some(tweet_log_from_row(&row)?)),
        None => Ok(None),
    }
}

fn tweet_log_from_row(row: &SqliteRow) -> Result<TweetLog, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<LogStatus>()
        .map_err(|e| sqlx::Error::Decode(e.into()))?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

    Ok(TweetLog {
        id: row.try_get("id")?,
        tweet_id: row.try_get("tweet_id")?,
        text: row.try_get("text")?,
        status,
        retry_count: row.try_get("retry_count")?,
        error_message: row.try_get("error_message")?,
        created_at,
        updated_at,
    })
}

/// Stores a configuration value, replacing any previous value for `key`.
pub async fn save_config(
    pool: &SqlitePool,
    key: &str,
    value: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    sqlx::query(
        r#"
        INSERT INTO app_config (key, value, updated_at)
        VALUES (?, ?, ?)
        ON CONFLICT (key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(value)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    debug!("Saved config value for key '{}'", key);
    Ok(())
}

/// Reads a configuration value.
pub async fn get_config(
    pool: &SqlitePool,
    key: &str,
) -> Result<Option<String>, Box<dyn std::error::Error + Send + Sync>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM app_config WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

/// Removes a configuration value if present.
pub async fn delete_config(
    pool: &SqlitePool,
    key: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    sqlx::query("DELETE FROM app_config WHERE key = ?")
        .bind(key)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> SqlitePool {
        let pool = init_pool("sqlite::memory:").await.unwrap();
        init_database(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_log_lifecycle() {
        let pool = test_pool().await;

        let id = log_tweet(&pool, "hello", LogStatus::Processing).await.unwrap();
        let log = get_tweet_log(&pool, id).await.unwrap().unwrap();
        assert_eq!(log.status, LogStatus::Processing);
        assert_eq!(log.retry_count, 0);
        assert!(log.tweet_id.is_none());

        update_tweet_log(
            &pool,
            id,
            TweetLogUpdate {
                tweet_id: Some("1234".to_string()),
                status: Some(LogStatus::Success),
                retry_count: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let log = get_tweet_log(&pool, id).await.unwrap().unwrap();
        assert_eq!(log.status, LogStatus::Success);
        assert_eq!(log.tweet_id.as_deref(), Some("1234"));
        assert_eq!(log.retry_count, 2);
        assert!(log.error_message.is_none());
        assert!(log.updated_at >= log.created_at);
    }

    #[tokio::test]
    async fn test_partial_update_keeps_other_fields() {
        let pool = test_pool().await;
        let id = log_tweet(&pool, "hello", LogStatus::Processing).await.unwrap();

        update_tweet_log(
            &pool,
            id,
            TweetLogUpdate {
                retry_count: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let log = get_tweet_log(&pool, id).await.unwrap().unwrap();
        assert_eq!(log.status, LogStatus::Processing);
        assert_eq!(log.retry_count, 1);
    }

    #[tokio::test]
    async fn test_update_missing_row_fails() {
        let pool = test_pool().await;
        assert!(update_tweet_log(&pool, 42, TweetLogUpdate::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_recent_logs_order_limit_and_filter() {
        let pool = test_pool().await;

        for i in 0..5 {
            let id = log_tweet(&pool, &format!("tweet {}", i), LogStatus::Processing)
                .await
                .unwrap();
            let status = if i % 2 == 0 {
                LogStatus::Success
            } else {
                LogStatus::Failed
            };
            update_tweet_log(
                &pool,
                id,
                TweetLogUpdate {
                    status: Some(status),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        }

        let logs = get_recent_logs(&pool, 3, None).await.unwrap();
        let texts: Vec<&str> = logs.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["tweet 4", "tweet 3", "tweet 2"]);

        let failed = get_recent_logs(&pool, 10, Some(LogStatus::Failed)).await.unwrap();
        assert_eq!(failed.len(), 2);
        assert!(failed.iter().all(|l| l.status == LogStatus::Failed));
    }

    #[tokio::test]
    async fn test_config_upsert() {
        let pool = test_pool().await;

        assert_eq!(get_config(&pool, "k").await.unwrap(), None);
        save_config(&pool, "k", "v1").await.unwrap();
        save_config(&pool, "k", "v2").await.unwrap();
        assert_eq!(get_config(&pool, "k").await.unwrap().as_deref(), Some("v2"));

        delete_config(&pool, "k").await.unwrap();
        assert_eq!(get_config(&pool, "k").await.unwrap(), None);
        ping(&pool).await.unwrap();
    }
}
