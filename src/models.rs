//! Request, response and record types shared by the HTTP layer, the log store
//! and the account client.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::twitter::media::{parse_media, MediaAttachment};

/// Maximum tweet length, counted in characters.
pub const MAX_TWEET_CHARS: usize = 280;
/// Maximum number of media attachments on one tweet.
pub const MAX_MEDIA_ITEMS: usize = 4;

/// Returns true if `id` looks like a tweet id (1 to 19 digits).
pub fn is_valid_tweet_id(id: &str) -> bool {
    Regex::new(r"^\d{1,19}$")
        .map(|re| re.is_match(id))
        .unwrap_or(false)
}

/// Body of `POST /api/tweet`.
#[derive(Debug, Clone, Deserialize)]
pub struct TweetRequest {
    pub text: String,
    /// Base64 payloads, either raw or as `data:` URLs
    #[serde(default)]
    pub media: Option<Vec<String>>,
    /// Id of the tweet this one replies to
    #[serde(default)]
    pub reply_to: Option<String>,
}

/// A request that passed validation, with media already decoded.
#[derive(Debug, Clone)]
pub struct ValidatedTweet {
    pub text: String,
    pub media: Vec<MediaAttachment>,
    pub reply_to: Option<String>,
}

impl TweetRequest {
    /// Validates the request and decodes its media.
    ///
    /// # Returns
    ///
    /// - `Ok(ValidatedTweet)`: If every field is acceptable
    /// - `Err(String)`: A human-readable description of the first problem found
    pub fn validate(self) -> Result<ValidatedTweet, String> {
        if self.text.trim().is_empty() {
            return Err("text must not be empty".to_string());
        }

        let chars = self.text.chars().count();
        if chars > MAX_TWEET_CHARS {
            return Err(format!(
                "text must be at most {} characters, got {}",
                MAX_TWEET_CHARS, chars
            ));
        }

        let reply_to = match self.reply_to.map(|r| r.trim().to_string()) {
            Some(r) if r.is_empty() => None,
            Some(r) if !is_valid_tweet_id(&r) => {
                return Err(format!("reply_to '{}' is not a valid tweet id", r));
            }
            other => other,
        };

        let raw_media = self.media.unwrap_or_default();
        if raw_media.len() > MAX_MEDIA_ITEMS {
            return Err(format!(
                "at most {} media items are allowed, got {}",
                MAX_MEDIA_ITEMS,
                raw_media.len()
            ));
        }

        let media = raw_media
            .iter()
            .enumerate()
            .map(|(i, m)| parse_media(m).map_err(|e| format!("media[{}]: {}", i, e)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ValidatedTweet {
            text: self.text,
            media,
            reply_to,
        })
    }
}

/// Successful response of `POST /api/tweet`.
#[derive(Debug, Serialize)]
pub struct TweetResponse {
    pub success: bool,
    pub tweet_id: Option<String>,
    pub message: String,
    pub created_at: Option<DateTime<Utc>>,
    pub log_id: i64,
}

/// Lifecycle of a publish attempt in the log store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Pending => "pending",
            LogStatus::Processing => "processing",
            LogStatus::Success => "success",
            LogStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(LogStatus::Pending),
            "processing" => Ok(LogStatus::Processing),
            "success" => Ok(LogStatus::Success),
            "failed" => Ok(LogStatus::Failed),
            other => Err(format!("unknown log status '{}'", other)),
        }
    }
}

/// One row of the `tweet_logs` table.
#[derive(Debug, Clone, Serialize)]
pub struct TweetLog {
    pub id: i64,
    pub tweet_id: Option<String>,
    pub text: String,
    pub status: LogStatus,
    pub retry_count: i64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update of a log row; `None` fields are left untouched.
#[derive(Debug, Default, Clone)]
pub struct TweetLogUpdate {
    pub tweet_id: Option<String>,
    pub status: Option<LogStatus>,
    pub retry_count: Option<i64>,
    pub error_message: Option<String>,
}

/// Query string of `GET /api/logs`.
#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<i64>,
    pub status: Option<String>,
}

/// Response of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub twitter_status: String,
    pub twitter_message: String,
    pub database_status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(text: &str) -> TweetRequest {
        TweetRequest {
            text: text.to_string(),
            media: None,
            reply_to: None,
        }
    }

    #[test]
    fn test_validate_accepts_280_chars() {
        let text = "é".repeat(MAX_TWEET_CHARS);
        let tweet = request(&text).validate().unwrap();
        assert_eq!(tweet.text, text);
        assert!(tweet.media.is_empty());

        assert!(request(&"é".repeat(MAX_TWEET_CHARS + 1)).validate().is_err());
    }

    #[test]
    fn test_validate_reply_to() {
        let mut req = request("hi");
        req.reply_to = Some(" ".to_string());
        assert_eq!(req.validate().unwrap().reply_to, None);

        let mut req = request("hi");
        req.reply_to = Some("1800000000000000000".to_string());
        assert_eq!(
            req.validate().unwrap().reply_to.as_deref(),
            Some("1800000000000000000")
        );

        let mut req = request("hi");
        req.reply_to = Some("12345678901234567890".to_string());
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_validate_reports_bad_media_index() {
        let mut req = request("hi");
        req.media = Some(vec!["/9j/4AAQSkZJRg==".to_string(), "!!".to_string()]);
        let err = req.validate().unwrap_err();
        assert!(err.starts_with("media[1]"), "{}", err);
    }

    #[test]
    fn test_log_status_round_trip() {
        for status in [
            LogStatus::Pending,
            LogStatus::Processing,
            LogStatus::Success,
            LogStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<LogStatus>().unwrap(), status);
        }
        assert_eq!("FAILED".parse::<LogStatus>().unwrap(), LogStatus::Failed);
        assert!("done".parse::<LogStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&LogStatus::Processing).unwrap(),
            "\"processing\""
        );
    }
}
