use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{require_text, AppState, AuthUser};
use crate::domain::{Conversation, Message, Page, Paged};
use crate::error::AppError;

const MAX_MESSAGE_CHARS: usize = 5_000;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    pub id: i64,
    pub sender_id: i64,
    pub recipient_id: i64,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<i64>,
    pub created_at: i64,
}

impl From<&Message> for MessageDto {
    fn from(m: &Message) -> Self {
        MessageDto {
            id: m.id,
            sender_id: m.sender_id,
            recipient_id: m.recipient_id,
            body: m.body.clone(),
            read_at: m.read_at.map(|t| t.as_ms()),
            created_at: m.created_at.as_ms(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDto {
    pub partner_id: i64,
    pub partner_name: String,
    pub last_message: MessageDto,
    pub unread: i64,
}

impl From<&Conversation> for ConversationDto {
    fn from(c: &Conversation) -> Self {
        ConversationDto {
            partner_id: c.partner_id,
            partner_name: c.partner_name.clone(),
            last_message: MessageDto::from(&c.last_message),
            unread: c.unread,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub recipient_id: i64,
    pub body: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

pub async fn send_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<MessageDto>), AppError> {
    if body.recipient_id == auth.id() {
        return Err(AppError::BadRequest(
            "you cannot message yourself".to_string(),
        ));
    }
    let text = require_text(&body.body, "body")?;
    if text.chars().count() > MAX_MESSAGE_CHARS {
        return Err(AppError::BadRequest(format!(
            "message is longer than {} characters",
            MAX_MESSAGE_CHARS
        )));
    }
    match state.repo.get_user(body.recipient_id).await? {
        Some(u) if u.is_active => {}
        _ => {
            return Err(AppError::NotFound(format!(
                "user {} not found",
                body.recipient_id
            )))
        }
    }

    let message = state
        .repo
        .insert_message(auth.id(), body.recipient_id, &text)
        .await?;
    state
        .audit
        .record(
            auth.id(),
            "message.send",
            "message",
            message.id,
            json!({ "recipientId": body.recipient_id }),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(MessageDto::from(&message))))
}

pub async fn conversations(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<ConversationDto>>, AppError> {
    let convs = state.repo.list_conversations(auth.id()).await?;
    Ok(Json(convs.iter().map(ConversationDto::from).collect()))
}

/// Thread with one partner, newest first. Opening it marks incoming
/// messages read.
pub async fn thread(
    Path(partner_id): Path<i64>,
    Query(params): Query<ThreadQuery>,
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Paged<MessageDto>>, AppError> {
    let page = Page::new(params.page, params.page_size);
    state.repo.mark_thread_read(auth.id(), partner_id).await?;
    let messages = state.repo.list_thread(auth.id(), partner_id, page).await?;
    Ok(Json(messages.map(|m| MessageDto::from(&m))))
}

pub async fn unread_count(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let count = state.repo.unread_message_count(auth.id()).await?;
    Ok(Json(json!({ "count": count })))
}

pub async fn delete_message(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<StatusCode, AppError> {
    let message = state
        .repo
        .get_message(id)
        .await?
        .filter(|m| m.sender_id == auth.id() || m.recipient_id == auth.id())
        .ok_or_else(|| AppError::NotFound(format!("message {} not found", id)))?;
    if message.sender_id != auth.id() {
        return Err(AppError::Forbidden(
            "only the sender can delete a message".to_string(),
        ));
    }
    state.repo.soft_delete_message(id, auth.id()).await?;
    state
        .audit
        .record(auth.id(), "message.delete", "message", id, json!({}))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
