//! Session cache for the X account client.
//!
//! The live session is kept in memory. The last good session is also written to
//! the `app_config` table so a restart can reuse it without refreshing tokens.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio::sync::RwLock;

use super::{AccountIdentity, ClientError};
use crate::config::mask_secret;
use crate::crypto::SessionCipher;
use crate::db;

const ENCRYPTED_PREFIX: &str = "enc:";

/// An authenticated session: the tokens in use and the account they belong to.
#[derive(Clone, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub user_id: String,
    pub username: String,
    pub name: Option<String>,
    pub authenticated_at: DateTime<Utc>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &mask_secret(&self.access_token))
            .field("refresh_token", &self.refresh_token.as_deref().map(mask_secret))
            .field("user_id", &self.user_id)
            .field("username", &self.username)
            .field("authenticated_at", &self.authenticated_at)
            .finish()
    }
}

impl Session {
    pub fn new(access_token: String, refresh_token: Option<String>, identity: AccountIdentity) -> Self {
        Self {
            access_token,
            refresh_token,
            user_id: identity.user_id,
            username: identity.username,
            name: identity.name,
            authenticated_at: Utc::now(),
        }
    }

    pub fn identity(&self) -> AccountIdentity {
        AccountIdentity {
            user_id: self.user_id.clone(),
            username: self.username.clone(),
            name: self.name.clone(),
        }
    }
}

/// In-memory session plus its persisted copy.
pub struct SessionCache {
    pool: SqlitePool,
    cipher: Option<SessionCipher>,
    current: RwLock<Option<Session>>,
}

impl SessionCache {
    /// `app_config` key the session is stored under.
    pub const STORAGE_KEY: &'static str = "twitter_session";

    pub fn new(pool: SqlitePool, cipher: Option<SessionCipher>) -> Self {
        Self {
            pool,
            cipher,
            current: RwLock::new(None),
        }
    }

    /// The live session, if authenticated.
    pub async fn current(&self) -> Option<Session> {
        self.current.read().await.clone()
    }

    pub async fn set(&self, session: Session) {
        debug!("Caching session for @{}", session.username);
        *self.current.write().await = Some(session);
    }

    /// Drops the live session. The persisted copy is kept; it is re-verified on next use.
    pub async fn clear(&self) {
        if self.current.write().await.take().is_some() {
            info!("Cleared cached X session");
        }
    }

    /// Reads the persisted session.
    ///
    /// A value that cannot be decrypted or parsed is logged and treated as absent.
    pub async fn load_persisted(&self) -> Result<Option<Session>, ClientError> {
        let stored = db::get_config(&self.pool, Self::STORAGE_KEY)
            .await
            .map_err(|e| ClientError::Session(e.to_string()))?;

        let Some(stored) = stored else {
            return Ok(None);
        };

        let json = match (stored.strip_prefix(ENCRYPTED_PREFIX), &self.cipher) {
            (Some(encrypted), Some(cipher)) => match cipher.decrypt(encrypted) {
                Ok(json) => json,
                Err(e) => {
                    warn!("Could not decrypt saved session, ignoring it: {}", e);
                    return Ok(None);
                }
            },
            (Some(_), None) => {
                warn!("Saved session is encrypted but SESSION_ENCRYPTION_KEY is not set, ignoring it");
                return Ok(None);
            }
            (None, _) => stored,
        };

        match serde_json::from_str::<Session>(&json) {
            Ok(session) => {
                info!(
                    "Loaded saved session for @{} from {}",
                    session.username, session.authenticated_at
                );
                Ok(Some(session))
            }
            Err(e) => {
                warn!("Saved session is malformed, ignoring it: {}", e);
                Ok(None)
            }
        }
    }

    /// Writes `session` to the database, encrypted when a key is configured.
    pub async fn persist(&self, session: &Session) -> Result<(), ClientError> {
        let json = serde_json::to_string(session)?;
        let value = match &self.cipher {
            Some(cipher) => {
                let encrypted = cipher
                    .encrypt(&json)
                    .map_err(|e| ClientError::Session(e.to_string()))?;
                format!("{}{}", ENCRYPTED_PREFIX, encrypted)
            }
            None => json,
        };

        db::save_config(&self.pool, Self::STORAGE_KEY, &value)
            .await
            .map_err(|e| ClientError::Session(e.to_string()))?;
        info!("Saved session for @{}", session.username);
        Ok(())
    }

    /// Removes the persisted session, e.g. after X rejected its token.
    pub async fn forget_persisted(&self) -> Result<(), ClientError> {
        db::delete_config(&self.pool, Self::STORAGE_KEY)
            .await
            .map_err(|e| ClientError::Session(e.to_string()))?;
        info!("Removed saved X session");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    async fn test_pool() -> SqlitePool {
        let pool = db::init_pool("sqlite::memory:").await.unwrap();
        db::init_database(&pool).await.unwrap();
        pool
    }

    fn sample_session() -> Session {
        Session::new(
            "access-token-value-123456".to_string(),
            Some("refresh-token-value".to_string()),
            AccountIdentity {
                user_id: "42".to_string(),
                username: "gatebot".to_string(),
                name: Some("Gate Bot".to_string()),
            },
        )
    }

    #[tokio::test]
    async fn test_encrypted_session_is_persisted_and_restored() {
        let pool = test_pool().await;
        let cipher = SessionCipher::from_hex(TEST_KEY).unwrap();
        let cache = SessionCache::new(pool.clone(), Some(cipher.clone()));

        cache.persist(&sample_session()).await.unwrap();

        let raw = db::get_config(&pool, SessionCache::STORAGE_KEY)
            .await
            .unwrap()
            .unwrap();
        assert!(raw.starts_with(ENCRYPTED_PREFIX));
        assert!(!raw.contains("access-token-value"));

        let restored = SessionCache::new(pool, Some(cipher))
            .load_persisted()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(restored.access_token, "access-token-value-123456");
        assert_eq!(restored.identity().username, "gatebot");
    }

    #[tokio::test]
    async fn test_encrypted_session_without_key_is_ignored() {
        let pool = test_pool().await;
        let cipher = SessionCipher::from_hex(TEST_KEY).unwrap();
        SessionCache::new(pool.clone(), Some(cipher))
            .persist(&sample_session())
            .await
            .unwrap();

        let cache = SessionCache::new(pool, None);
        assert!(cache.load_persisted().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_only_drops_memory() {
        let pool = test_pool().await;
        let cache = SessionCache::new(pool, None);

        cache.set(sample_session()).await;
        cache.persist(&sample_session()).await.unwrap();
        assert!(cache.current().await.is_some());

        cache.clear().await;
        assert!(cache.current().await.is_none());
        assert!(cache.load_persisted().await.unwrap().is_some());

        cache.forget_persisted().await.unwrap();
        assert!(cache.load_persisted().await.unwrap().is_none());
    }
}
