use crate::db::repo::NewAuditEntry;
use crate::db::Repository;
use std::sync::Arc;
use tracing::{info, warn};

/// Security log event names.
pub mod events {
    pub const LOGIN_SUCCESS: &str = "login_success";
    pub const LOGIN_FAILED: &str = "login_failed";
    pub const ACCOUNT_LOCKED: &str = "account_locked";
    pub const LOGOUT: &str = "logout";
    pub const PASSWORD_CHANGED: &str = "password_changed";
}

#[derive(Clone)]
pub struct AuditLogger {
    repo: Arc<Repository>,
}

impl AuditLogger {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    /// Build an entry for writes that carry their audit row inside their
    /// own transaction.
    pub fn entry(
        actor_id: i64,
        action: &str,
        entity_type: &str,
        entity_id: impl ToString,
        details: serde_json::Value,
    ) -> NewAuditEntry {
        NewAuditEntry::new(
            Some(actor_id),
            action,
            entity_type,
            Some(entity_id.to_string()),
            details,
        )
    }

    pub async fn record(
        &self,
        actor_id: i64,
        action: &str,
        entity_type: &str,
        entity_id: impl ToString,
        details: serde_json::Value,
    ) -> Result<i64, sqlx::Error> {
        let entry = Self::entry(actor_id, action, entity_type, entity_id, details);
        let id = self.repo.insert_audit(&entry).await?;
        info!(
            actor_id,
            action,
            entity_type,
            entity_id = ?entry.entity_id,
            "audit"
        );
        Ok(id)
    }

    /// Security events never fail the request that raised them.
    pub async fn security(
        &self,
        user_id: Option<i64>,
        email: Option<&str>,
        event: &str,
        detail: Option<&str>,
    ) {
        if let Err(e) = self
            .repo
            .insert_security_event(user_id, email, event, detail)
            .await
        {
            warn!(error = %e, event, "Failed to write security log");
        }
    }
}
