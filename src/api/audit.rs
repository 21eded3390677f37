//! Audit trail and security log endpoints.

use axum::extract::{Query, State};
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{csv_attachment, optional_text, AppState, AuthUser};
use crate::db::repo::{AuditFilter, SecurityFilter};
use crate::domain::{AuditEntry, Page, Paged, SecurityEvent, TimeMs};
use crate::error::AppError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditDto {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<i64>,
    pub action: String,
    pub entity_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    pub details: serde_json::Value,
    pub created_at: i64,
}

impl From<&AuditEntry> for AuditDto {
    fn from(e: &AuditEntry) -> Self {
        AuditDto {
            id: e.id,
            actor_id: e.actor_id,
            action: e.action.clone(),
            entity_type: e.entity_type.clone(),
            entity_id: e.entity_id.clone(),
            details: e.details.clone(),
            created_at: e.created_at.as_ms(),
        }
    }
}

/// Flat row for the CSV export; details stay as compact JSON text.
#[derive(Debug, Serialize)]
struct AuditCsvRow {
    id: i64,
    timestamp: String,
    actor_id: Option<i64>,
    action: String,
    entity_type: String,
    entity_id: Option<String>,
    details: String,
}

impl From<&AuditEntry> for AuditCsvRow {
    fn from(e: &AuditEntry) -> Self {
        AuditCsvRow {
            id: e.id,
            timestamp: e.created_at.to_rfc3339(),
            actor_id: e.actor_id,
            action: e.action.clone(),
            entity_type: e.entity_type.clone(),
            entity_id: e.entity_id.clone(),
            details: e.details.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEventDto {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub created_at: i64,
}

impl From<&SecurityEvent> for SecurityEventDto {
    fn from(e: &SecurityEvent) -> Self {
        SecurityEventDto {
            id: e.id,
            user_id: e.user_id,
            email: e.email.clone(),
            event: e.event.clone(),
            detail: e.detail.clone(),
            created_at: e.created_at.as_ms(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQuery {
    pub actor_id: Option<i64>,
    pub action: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub from: Option<i64>,
    pub to: Option<i64>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl AuditQuery {
    fn filter(&self) -> Result<AuditFilter, AppError> {
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                return Err(AppError::BadRequest(
                    "from must not be after to".to_string(),
                ));
            }
        }
        Ok(AuditFilter {
            actor_id: self.actor_id,
            action: optional_text(self.action.clone()),
            entity_type: optional_text(self.entity_type.clone()),
            entity_id: optional_text(self.entity_id.clone()),
            from_ms: self.from,
            to_ms: self.to,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityQuery {
    pub event: Option<String>,
    pub email: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

pub async fn list_audit_logs(
    Query(params): Query<AuditQuery>,
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Paged<AuditDto>>, AppError> {
    auth.require_approver()?;
    let filter = params.filter()?;
    let page = Page::new(params.page, params.page_size);
    let entries = state.repo.list_audit(&filter, page).await?;
    Ok(Json(entries.map(|e| AuditDto::from(&e))))
}

pub async fn export_audit_logs(
    Query(params): Query<AuditQuery>,
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Response, AppError> {
    auth.require_admin()?;
    let filter = params.filter()?;
    let entries = state.repo.all_audit(&filter).await?;
    let rows: Vec<AuditCsvRow> = entries.iter().map(AuditCsvRow::from).collect();

    state
        .audit
        .record(
            auth.id(),
            "audit.export",
            "audit_log",
            "export",
            json!({ "rows": rows.len() }),
        )
        .await?;

    let filename = format!("audit-logs-{}.csv", TimeMs::now().as_ms());
    csv_attachment(&filename, &rows)
}

pub async fn list_security_logs(
    Query(params): Query<SecurityQuery>,
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Paged<SecurityEventDto>>, AppError> {
    auth.require_admin()?;
    let filter = SecurityFilter {
        event: optional_text(params.event),
        email: optional_text(params.email).map(|e| e.to_ascii_lowercase()),
    };
    let page = Page::new(params.page, params.page_size);
    let events = state.repo.list_security_events(&filter, page).await?;
    Ok(Json(events.map(|e| SecurityEventDto::from(&e))))
}
