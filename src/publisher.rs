//! The publish flow: log the attempt, call the account client with retries,
//! record the outcome.

use log::{error, info, warn};
use sqlx::SqlitePool;

use crate::db;
use crate::error::ApiError;
use crate::models::{LogStatus, TweetLogUpdate, ValidatedTweet};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::twitter::{
    sanitize_for_logging, AccountClient, ClientError, NewTweet, PublishedTweet,
};

/// A tweet that was published and logged.
#[derive(Debug)]
pub struct PublishOutcome {
    pub log_id: i64,
    pub tweet: PublishedTweet,
    pub retries: u32,
}

/// Drops cached authentication when `result` is an auth failure, so the next
/// attempt re-authenticates.
async fn reset_on_auth_error<T>(
    client: &dyn AccountClient,
    result: Result<T, ClientError>,
) -> Result<T, ClientError> {
    if let Err(e) = &result {
        if e.is_auth_error() {
            client.invalidate_session().await;
        }
    }
    result
}

/// Uploads media (if any) and posts the tweet, retrying each step under `policy`.
///
/// Returns the published tweet or the last error, together with the total
/// number of retries spent across both steps.
async fn send_with_retries(
    client: &dyn AccountClient,
    policy: &RetryPolicy,
    tweet: &ValidatedTweet,
) -> Result<(PublishedTweet, u32), (ClientError, u32)> {
    let mut retries = 0;

    let media_ids = if tweet.media.is_empty() {
        Vec::new()
    } else {
        let media = tweet.media.as_slice();
        match retry_with_backoff(policy, "upload_media", |_| async move {
            reset_on_auth_error(client, client.upload_media(media).await).await
        })
        .await
        {
            Ok(uploaded) => {
                retries += uploaded.retries();
                uploaded.value
            }
            Err(failed) => {
                let failed_retries = failed.retries();
                return Err((failed.value, retries + failed_retries));
            }
        }
    };

    let new_tweet = NewTweet {
        text: tweet.text.clone(),
        media_ids,
        reply_to: tweet.reply_to.clone(),
    };
    let new_tweet = &new_tweet;

    match retry_with_backoff(policy, "create_tweet", |_| async move {
        reset_on_auth_error(client, client.create_tweet(new_tweet).await).await
    })
    .await
    {
        Ok(created) => {
            let created_retries = created.retries();
            Ok((created.value, retries + created_retries))
        }
        Err(failed) => {
            let failed_retries = failed.retries();
            Err((failed.value, retries + failed_retries))
        }
    }
}

/// Publishes a validated tweet and records the attempt in the log store.
///
/// The log row is created as `processing` and ends as `success` (with the tweet
/// id) or `failed` (with the error message). Both carry the retry count.
///
/// # Errors
///
/// - `ApiError::Database`: If the log row cannot be created
/// - `ApiError::Client`: If the account client still fails after all retries
pub async fn publish_tweet(
    pool: &SqlitePool,
    client: &dyn AccountClient,
    policy: &RetryPolicy,
    tweet: ValidatedTweet,
) -> Result<PublishOutcome, ApiError> {
    info!(
        "Received publish request: '{}' ({} media, reply_to: {:?})",
        sanitize_for_logging(&tweet.text, 50),
        tweet.media.len(),
        tweet.reply_to
    );

    let log_id = db::log_tweet(pool, &tweet.text, LogStatus::Processing)
        .await
        .map_err(ApiError::database)?;

    match send_with_retries(client, policy, &tweet).await {
        Ok((published, retries)) => {
            let update = TweetLogUpdate {
                tweet_id: Some(published.tweet_id.clone()),
                status: Some(LogStatus::Success),
                retry_count: Some(i64::from(retries)),
                error_message: None,
            };
            // The tweet is live at this point, so a bookkeeping failure is not reported as a publish failure.
            if let Err(e) = db::update_tweet_log(pool, log_id, update).await {
                error!("Tweet {} posted but log {} could not be updated: {}", published.tweet_id, log_id, e);
            }

            info!(
                "Tweet published: {} (log {}, {} retries)",
                published.tweet_id, log_id, retries
            );
            Ok(PublishOutcome {
                log_id,
                tweet: published,
                retries,
            })
        }
        Err((client_error, retries)) => {
            warn!("Tweet publish failed (log {}): {}", log_id, client_error);

            let update = TweetLogUpdate {
                status: Some(LogStatus::Failed),
                retry_count: Some(i64::from(retries)),
                error_message: Some(client_error.to_string()),
                ..Default::default()
            };
            if let Err(e) = db::update_tweet_log(pool, log_id, update).await {
                error!("Failed to mark log {} as failed: {}", log_id, e);
            }

            Err(ApiError::Client(client_error))
        }
    }
}
