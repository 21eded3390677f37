use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::str::FromStr;

use super::{optional_text, parse_opt, require_text, AppState, AuthUser};
use crate::db::repo::TicketFilter;
use crate::domain::{
    Decimal, DepositDetail, NewTicket, Page, Paged, RiskFlagKind, TechnicalDetail, Ticket,
    TicketComment, TicketDetail, TicketKind, TicketPriority, TicketStatus, WithdrawalDetail,
};
use crate::error::AppError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketDto {
    pub id: i64,
    pub reference: String,
    pub kind: TicketKind,
    pub subject: String,
    pub description: String,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    pub created_by: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_note: Option<String>,
    pub flagged: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&Ticket> for TicketDto {
    fn from(t: &Ticket) -> Self {
        TicketDto {
            id: t.id,
            reference: t.reference.clone(),
            kind: t.kind,
            subject: t.subject.clone(),
            description: t.description.clone(),
            priority: t.priority,
            status: t.status,
            created_by: t.created_by,
            assigned_to: t.assigned_to,
            resolution_note: t.resolution_note.clone(),
            flagged: t.flagged,
            created_at: t.created_at.as_ms(),
            updated_at: t.updated_at.as_ms(),
        }
    }
}

/// Per-kind detail, tagged by `type`.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TicketDetailDto {
    #[serde(rename_all = "camelCase")]
    Technical {
        category: String,
        device_info: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Withdrawal {
        amount: String,
        bank_name: String,
        account_number: String,
        account_name: String,
        approved_amount: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Deposit {
        amount: String,
        payment_method: String,
        payment_reference: Option<String>,
        proof_url: Option<String>,
        approved_amount: Option<String>,
    },
}

impl From<&TicketDetail> for TicketDetailDto {
    fn from(detail: &TicketDetail) -> Self {
        match detail {
            TicketDetail::Technical(t) => TicketDetailDto::Technical {
                category: t.category.clone(),
                device_info: t.device_info.clone(),
            },
            TicketDetail::Withdrawal(w) => TicketDetailDto::Withdrawal {
                amount: w.amount.to_canonical_string(),
                bank_name: w.bank_name.clone(),
                account_number: w.account_number.clone(),
                account_name: w.account_name.clone(),
                approved_amount: w.approved_amount.map(|a| a.to_canonical_string()),
            },
            TicketDetail::Deposit(d) => TicketDetailDto::Deposit {
                amount: d.amount.to_canonical_string(),
                payment_method: d.payment_method.clone(),
                payment_reference: d.payment_reference.clone(),
                proof_url: d.proof_url.clone(),
                approved_amount: d.approved_amount.map(|a| a.to_canonical_string()),
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentDto {
    pub id: i64,
    pub author_id: i64,
    pub author_name: String,
    pub body: String,
    pub created_at: i64,
}

impl From<&TicketComment> for CommentDto {
    fn from(c: &TicketComment) -> Self {
        CommentDto {
            id: c.id,
            author_id: c.author_id,
            author_name: c.author_name.clone(),
            body: c.body.clone(),
            created_at: c.created_at.as_ms(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketResponse {
    pub ticket: TicketDto,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<TicketDetailDto>,
    pub comments: Vec<CommentDto>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub risk_flags: Vec<RiskFlagKind>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketsQuery {
    pub kind: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub assigned_to: Option<i64>,
    pub created_by: Option<i64>,
    pub flagged: Option<bool>,
    pub search: Option<String>,
    pub from_ms: Option<i64>,
    pub to_ms: Option<i64>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// Flat create body; which detail fields are required depends on `kind`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTicketRequest {
    pub kind: String,
    pub subject: String,
    #[serde(default)]
    pub description: String,
    pub priority: Option<String>,
    // technical
    pub category: Option<String>,
    pub device_info: Option<String>,
    // financial
    pub amount: Option<Decimal>,
    // withdrawal
    pub bank_name: Option<String>,
    pub account_number: Option<String>,
    pub account_name: Option<String>,
    // deposit
    pub payment_method: Option<String>,
    pub payment_reference: Option<String>,
    pub proof_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    pub status: String,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    pub assignee_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    pub body: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketStatsResponse {
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
    pub by_kind: BTreeMap<String, i64>,
    pub flagged: i64,
    pub pending_withdrawal_total: String,
    pub pending_deposit_total: String,
}

fn required(value: Option<String>, field: &str) -> Result<String, AppError> {
    require_text(value.as_deref().unwrap_or(""), field)
}

fn build_detail(body: &CreateTicketRequest, kind: TicketKind) -> Result<TicketDetail, AppError> {
    let amount = || -> Result<Decimal, AppError> {
        let amount = body
            .amount
            .ok_or_else(|| AppError::BadRequest("amount is required".to_string()))?;
        if !amount.is_positive() {
            return Err(AppError::BadRequest(
                "amount must be greater than zero".to_string(),
            ));
        }
        if amount.round_money() != amount {
            return Err(AppError::BadRequest(
                "amount may have at most two decimal places".to_string(),
            ));
        }
        Ok(amount)
    };

    Ok(match kind {
        TicketKind::Technical => TicketDetail::Technical(TechnicalDetail {
            category: required(body.category.clone(), "category")?,
            device_info: optional_text(body.device_info.clone()),
        }),
        TicketKind::Withdrawal => TicketDetail::Withdrawal(WithdrawalDetail {
            amount: amount()?,
            bank_name: required(body.bank_name.clone(), "bankName")?,
            account_number: required(body.account_number.clone(), "accountNumber")?,
            account_name: required(body.account_name.clone(), "accountName")?,
            approved_amount: None,
        }),
        TicketKind::Deposit => TicketDetail::Deposit(DepositDetail {
            amount: amount()?,
            payment_method: required(body.payment_method.clone(), "paymentMethod")?,
            payment_reference: optional_text(body.payment_reference.clone()),
            proof_url: optional_text(body.proof_url.clone()),
            approved_amount: None,
        }),
    })
}

/// Load a live ticket the caller is allowed to see.
async fn load_visible(state: &AppState, auth: &AuthUser, id: i64) -> Result<Ticket, AppError> {
    let ticket = state
        .repo
        .get_ticket(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("ticket {} not found", id)))?;
    // Other agents' tickets read as missing.
    if !auth.role().is_back_office() && ticket.created_by != auth.id() {
        return Err(AppError::NotFound(format!("ticket {} not found", id)));
    }
    Ok(ticket)
}

async fn full_response(
    state: &AppState,
    ticket: Ticket,
    risk_flags: Vec<RiskFlagKind>,
) -> Result<TicketResponse, AppError> {
    let detail = state.repo.get_ticket_detail(ticket.id, ticket.kind).await?;
    let comments = state.repo.list_comments(ticket.id).await?;
    Ok(TicketResponse {
        ticket: TicketDto::from(&ticket),
        detail: detail.as_ref().map(TicketDetailDto::from),
        comments: comments.iter().map(CommentDto::from).collect(),
        risk_flags,
    })
}

pub async fn list_tickets(
    Query(params): Query<TicketsQuery>,
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Paged<TicketDto>>, AppError> {
    let created_by = if auth.role().is_back_office() {
        params.created_by
    } else {
        Some(auth.id())
    };
    let filter = TicketFilter {
        kind: parse_opt(params.kind.as_deref(), "kind")?,
        status: parse_opt(params.status.as_deref(), "status")?,
        priority: parse_opt(params.priority.as_deref(), "priority")?,
        assigned_to: params.assigned_to,
        created_by,
        flagged: params.flagged,
        search: optional_text(params.search),
        from_ms: params.from_ms,
        to_ms: params.to_ms,
    };
    let page = Page::new(params.page, params.page_size);
    let tickets = state.repo.list_tickets(&filter, page).await?;
    Ok(Json(tickets.map(|t| TicketDto::from(&t))))
}

pub async fn create_ticket(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateTicketRequest>,
) -> Result<(StatusCode, Json<TicketResponse>), AppError> {
    let kind = TicketKind::from_str(body.kind.trim()).map_err(AppError::BadRequest)?;
    let subject = require_text(&body.subject, "subject")?;
    let priority = parse_opt(body.priority.as_deref(), "priority")?.unwrap_or(TicketPriority::Medium);
    let detail = build_detail(&body, kind)?;

    if let Some(amount) = detail.amount() {
        state.risk.check_new_request(amount).await?;
    }

    let id = state
        .repo
        .insert_ticket(&NewTicket {
            subject,
            description: body.description.trim().to_string(),
            priority,
            created_by: auth.id(),
            detail: detail.clone(),
        })
        .await?;
    let risk_flags = state.risk.flag_new_request(auth.id(), id, &detail).await?;

    state
        .audit
        .record(
            auth.id(),
            "ticket.create",
            "ticket",
            id,
            json!({
                "kind": kind,
                "amount": detail.amount().map(|a| a.to_canonical_string()),
                "riskFlags": risk_flags,
            }),
        )
        .await?;

    let ticket = state
        .repo
        .get_ticket(id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("ticket {} vanished after insert", id)))?;
    let response = full_response(&state, ticket, risk_flags).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn get_ticket(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<TicketResponse>, AppError> {
    let ticket = load_visible(&state, &auth, id).await?;
    Ok(Json(full_response(&state, ticket, Vec::new()).await?))
}

pub async fn update_status(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<StatusRequest>,
) -> Result<Json<TicketDto>, AppError> {
    auth.require_back_office()?;
    let to = TicketStatus::from_str(body.status.trim()).map_err(AppError::BadRequest)?;
    let note = optional_text(body.note);

    if to == TicketStatus::Approved {
        return Err(AppError::BadRequest(
            "financial tickets are approved through /api/wallets/approve".to_string(),
        ));
    }

    let ticket = state
        .repo
        .get_ticket(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("ticket {} not found", id)))?;

    if to == TicketStatus::Rejected && ticket.kind.is_financial() {
        auth.require_approver()?;
        let reason = note.ok_or_else(|| {
            AppError::BadRequest("a note is required when rejecting".to_string())
        })?;
        state.wallets.reject(id, auth.id(), &reason).await?;
    } else {
        if !TicketStatus::can_transition(ticket.kind, ticket.status, to) {
            return Err(AppError::Conflict(format!(
                "{} ticket cannot move from {} to {}",
                ticket.kind, ticket.status, to
            )));
        }
        if !state
            .repo
            .update_ticket_status(id, ticket.status, to, note.as_deref())
            .await?
        {
            return Err(AppError::Conflict(format!(
                "ticket {} was changed by another request",
                id
            )));
        }
        state
            .audit
            .record(
                auth.id(),
                "ticket.status",
                "ticket",
                id,
                json!({ "from": ticket.status, "to": to, "note": note }),
            )
            .await?;
    }

    let ticket = state
        .repo
        .get_ticket(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("ticket {} not found", id)))?;
    Ok(Json(TicketDto::from(&ticket)))
}

pub async fn assign_ticket(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<AssignRequest>,
) -> Result<Json<TicketDto>, AppError> {
    auth.require_approver()?;

    if let Some(assignee_id) = body.assignee_id {
        let assignee = state
            .repo
            .get_user(assignee_id)
            .await?
            .ok_or_else(|| AppError::BadRequest(format!("user {} not found", assignee_id)))?;
        if !assignee.role.is_back_office() || !assignee.is_active {
            return Err(AppError::BadRequest(
                "tickets can only be assigned to active back-office users".to_string(),
            ));
        }
    }

    if !state.repo.assign_ticket(id, body.assignee_id).await? {
        return Err(AppError::NotFound(format!("ticket {} not found", id)));
    }
    state
        .audit
        .record(
            auth.id(),
            "ticket.assign",
            "ticket",
            id,
            json!({ "assigneeId": body.assignee_id }),
        )
        .await?;

    let ticket = state
        .repo
        .get_ticket(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("ticket {} not found", id)))?;
    Ok(Json(TicketDto::from(&ticket)))
}

pub async fn add_comment(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CommentRequest>,
) -> Result<(StatusCode, Json<CommentDto>), AppError> {
    let ticket = load_visible(&state, &auth, id).await?;
    let text = require_text(&body.body, "body")?;

    let comment_id = state.repo.insert_comment(ticket.id, auth.id(), &text).await?;
    state
        .audit
        .record(
            auth.id(),
            "ticket.comment",
            "ticket",
            ticket.id,
            json!({ "commentId": comment_id }),
        )
        .await?;

    let comment = state
        .repo
        .list_comments(ticket.id)
        .await?
        .into_iter()
        .find(|c| c.id == comment_id)
        .ok_or_else(|| AppError::Internal(format!("comment {} vanished after insert", comment_id)))?;
    Ok((StatusCode::CREATED, Json(CommentDto::from(&comment))))
}

pub async fn delete_ticket(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<StatusCode, AppError> {
    auth.require_admin()?;
    if !state.repo.soft_delete_ticket(id).await? {
        return Err(AppError::NotFound(format!("ticket {} not found", id)));
    }
    state
        .audit
        .record(auth.id(), "ticket.delete", "ticket", id, json!({}))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn ticket_stats(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<TicketStatsResponse>, AppError> {
    auth.require_back_office()?;
    let stats = state.repo.ticket_stats().await?;
    Ok(Json(TicketStatsResponse {
        total: stats.total,
        by_status: stats.by_status,
        by_kind: stats.by_kind,
        flagged: stats.flagged,
        pending_withdrawal_total: stats.pending_withdrawal_total.to_canonical_string(),
        pending_deposit_total: stats.pending_deposit_total.to_canonical_string(),
    }))
}
