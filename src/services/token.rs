//! Opaque bearer tokens backed by the `sessions` table.

use crate::db::Repository;
use crate::domain::{TimeMs, User};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

/// A freshly issued token. The plain value is only ever returned here.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: TimeMs,
}

#[derive(Clone)]
pub struct TokenService {
    repo: Arc<Repository>,
    ttl_secs: i64,
}

/// SHA-256 hex digest stored in place of the token.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

impl TokenService {
    pub fn new(repo: Arc<Repository>, ttl_secs: i64) -> Self {
        Self { repo, ttl_secs }
    }

    pub async fn issue(&self, user_id: i64) -> Result<IssuedToken, sqlx::Error> {
        let token = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
        let now = TimeMs::now();
        let expires_at = now.plus_secs(self.ttl_secs);
        self.repo
            .insert_session(&hash_token(&token), user_id, now, expires_at)
            .await?;
        Ok(IssuedToken { token, expires_at })
    }

    /// The active user owning `token`, or `None` if unknown or expired.
    pub async fn authenticate(&self, token: &str) -> Result<Option<User>, sqlx::Error> {
        self.repo
            .find_session_user(&hash_token(token), TimeMs::now())
            .await
    }

    pub async fn revoke(&self, token: &str) -> Result<bool, sqlx::Error> {
        self.repo.delete_session(&hash_token(token)).await
    }

    /// Revoke every session of `user_id` except the one for `keep`.
    pub async fn revoke_others(&self, user_id: i64, keep: &str) -> Result<u64, sqlx::Error> {
        let keep_hash = hash_token(keep);
        let removed = self
            .repo
            .delete_sessions_for_user(user_id, Some(&keep_hash))
            .await?;
        self.repo.purge_expired_sessions(TimeMs::now()).await?;
        Ok(removed)
    }
}
