use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{optional_text, parse_opt, require_text, AppState, AuthUser};
use crate::domain::{Broadcast, NewBroadcast, Page, Role, TimeMs};
use crate::error::AppError;

const PRIORITIES: [&str; 3] = ["low", "normal", "high"];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastDto {
    pub id: i64,
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_role: Option<Role>,
    pub priority: String,
    pub created_by: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read: Option<bool>,
}

impl BroadcastDto {
    fn new(b: &Broadcast, read: Option<bool>) -> Self {
        BroadcastDto {
            id: b.id,
            title: b.title.clone(),
            body: b.body.clone(),
            target_role: b.target_role,
            priority: b.priority.clone(),
            created_by: b.created_by,
            expires_at: b.expires_at.map(|t| t.as_ms()),
            created_at: b.created_at.as_ms(),
            read,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastsQuery {
    /// Admins and supervisors may list every broadcast, including expired ones.
    pub all: Option<bool>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBroadcastRequest {
    pub title: String,
    pub body: String,
    pub target_role: Option<String>,
    pub priority: Option<String>,
    pub expires_at: Option<i64>,
}

pub async fn list_broadcasts(
    Query(params): Query<BroadcastsQuery>,
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<serde_json::Value>, AppError> {
    if params.all.unwrap_or(false) {
        auth.require_approver()?;
        let page = Page::new(params.page, params.page_size);
        let all = state.repo.list_all_broadcasts(page).await?;
        let all = all.map(|b| BroadcastDto::new(&b, None));
        return Ok(Json(json!(all)));
    }

    let live = state
        .repo
        .list_active_broadcasts(auth.id(), auth.role(), TimeMs::now())
        .await?;
    let items: Vec<BroadcastDto> = live
        .iter()
        .map(|(b, read)| BroadcastDto::new(b, Some(*read)))
        .collect();
    let unread = live.iter().filter(|(_, read)| !read).count();
    Ok(Json(json!({ "items": items, "unread": unread })))
}

pub async fn create_broadcast(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateBroadcastRequest>,
) -> Result<(StatusCode, Json<BroadcastDto>), AppError> {
    auth.require_approver()?;
    let title = require_text(&body.title, "title")?;
    let text = require_text(&body.body, "body")?;
    let target_role: Option<Role> = parse_opt(body.target_role.as_deref(), "targetRole")?;
    let priority = optional_text(body.priority)
        .map(|p| p.to_ascii_lowercase())
        .unwrap_or_else(|| "normal".to_string());
    if !PRIORITIES.contains(&priority.as_str()) {
        return Err(AppError::BadRequest(format!(
            "priority must be one of {}",
            PRIORITIES.join(", ")
        )));
    }
    let expires_at = body.expires_at.map(TimeMs::new);
    if expires_at.is_some_and(|t| t <= TimeMs::now()) {
        return Err(AppError::BadRequest(
            "expiresAt must be in the future".to_string(),
        ));
    }

    let broadcast = state
        .repo
        .insert_broadcast(&NewBroadcast {
            title,
            body: text,
            target_role,
            priority,
            created_by: auth.id(),
            expires_at,
        })
        .await?;
    state
        .audit
        .record(
            auth.id(),
            "broadcast.create",
            "broadcast",
            broadcast.id,
            json!({ "title": broadcast.title, "targetRole": broadcast.target_role }),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(BroadcastDto::new(&broadcast, None))))
}

pub async fn mark_read(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<StatusCode, AppError> {
    let broadcast = state
        .repo
        .get_broadcast(id)
        .await?
        .filter(|b| b.is_visible_to(auth.role(), TimeMs::now()))
        .ok_or_else(|| AppError::NotFound(format!("broadcast {} not found", id)))?;
    if state.repo.mark_broadcast_read(broadcast.id, auth.id()).await? {
        state
            .audit
            .record(auth.id(), "broadcast.read", "broadcast", broadcast.id, json!({}))
            .await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_broadcast(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<StatusCode, AppError> {
    auth.require_approver()?;
    if !state.repo.soft_delete_broadcast(id).await? {
        return Err(AppError::NotFound(format!("broadcast {} not found", id)));
    }
    state
        .audit
        .record(auth.id(), "broadcast.delete", "broadcast", id, json!({}))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
