use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::{csv_attachment, parse_opt, require_text, AppState, AuthUser};
use crate::db::repo::TransactionFilter;
use crate::domain::{
    Adjustment, Decimal, Page, Paged, Role, Transaction, TransactionKind, TransactionSource,
    Wallet,
};
use crate::error::AppError;

const MAX_BULK_TICKETS: usize = 100;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletDto {
    pub id: i64,
    pub user_id: i64,
    pub balance: String,
    pub currency: String,
    pub is_frozen: bool,
    pub updated_at: i64,
}

impl From<&Wallet> for WalletDto {
    fn from(w: &Wallet) -> Self {
        WalletDto {
            id: w.id,
            user_id: w.user_id,
            balance: w.balance.to_canonical_string(),
            currency: w.currency.clone(),
            is_frozen: w.is_frozen,
            updated_at: w.updated_at.as_ms(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDto {
    pub id: i64,
    pub reference: String,
    pub kind: TransactionKind,
    pub source: TransactionSource,
    pub amount: String,
    pub balance_before: String,
    pub balance_after: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<i64>,
    pub created_at: i64,
}

impl From<&Transaction> for TransactionDto {
    fn from(t: &Transaction) -> Self {
        TransactionDto {
            id: t.id,
            reference: t.reference.clone(),
            kind: t.kind,
            source: t.source,
            amount: t.amount.to_canonical_string(),
            balance_before: t.balance_before.to_canonical_string(),
            balance_after: t.balance_after.to_canonical_string(),
            description: t.description.clone(),
            ticket_id: t.ticket_id,
            created_by: t.created_by,
            created_at: t.created_at.as_ms(),
        }
    }
}

/// One exported ledger line. Field order is the CSV column order.
#[derive(Debug, Serialize)]
struct TransactionCsvRow {
    reference: String,
    created_at: String,
    kind: &'static str,
    source: &'static str,
    amount: String,
    balance_before: String,
    balance_after: String,
    ticket_id: Option<i64>,
    description: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionsQuery {
    pub kind: Option<String>,
    pub source: Option<String>,
    pub from_ms: Option<i64>,
    pub to_ms: Option<i64>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl TransactionsQuery {
    fn filter(&self) -> Result<TransactionFilter, AppError> {
        Ok(TransactionFilter {
            kind: parse_opt(self.kind.as_deref(), "kind")?,
            source: parse_opt(self.source.as_deref(), "source")?,
            from_ms: self.from_ms,
            to_ms: self.to_ms,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustRequest {
    pub kind: String,
    pub amount: Decimal,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct FreezeRequest {
    pub frozen: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveRequest {
    pub adjustment: Option<Adjustment>,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkApproveRequest {
    pub ticket_ids: Vec<i64>,
    pub adjustment: Option<Adjustment>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkResultDto {
    pub ticket_id: i64,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkApproveResponse {
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<BulkResultDto>,
}

async fn require_user(state: &AppState, user_id: i64) -> Result<(), AppError> {
    match state.repo.get_user(user_id).await? {
        Some(_) => Ok(()),
        None => Err(AppError::NotFound(format!("user {} not found", user_id))),
    }
}

pub async fn my_wallet(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<WalletDto>, AppError> {
    let wallet = match state.repo.get_wallet_by_user(auth.id()).await? {
        Some(w) => w,
        None if auth.role() == Role::Csp => {
            state
                .repo
                .ensure_wallet(auth.id(), &state.config.currency)
                .await?
        }
        None => return Err(AppError::NotFound("you have no wallet".to_string())),
    };
    Ok(Json(WalletDto::from(&wallet)))
}

pub async fn get_wallet(
    Path(user_id): Path<i64>,
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<WalletDto>, AppError> {
    auth.require_self_or_back_office(user_id)?;
    let wallet = state
        .repo
        .get_wallet_by_user(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no wallet for user {}", user_id)))?;
    Ok(Json(WalletDto::from(&wallet)))
}

pub async fn list_transactions(
    Path(user_id): Path<i64>,
    Query(params): Query<TransactionsQuery>,
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Paged<TransactionDto>>, AppError> {
    auth.require_self_or_back_office(user_id)?;
    let filter = params.filter()?;
    let page = Page::new(params.page, params.page_size);

    let Some(wallet) = state.repo.get_wallet_by_user(user_id).await? else {
        return Ok(Json(Paged::new(Vec::new(), 0, page)));
    };
    let txs = state.repo.list_transactions(wallet.id, &filter, page).await?;
    Ok(Json(txs.map(|t| TransactionDto::from(&t))))
}

pub async fn export_transactions(
    Path(user_id): Path<i64>,
    Query(params): Query<TransactionsQuery>,
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Response, AppError> {
    auth.require_approver()?;
    let filter = params.filter()?;
    let wallet = state
        .repo
        .get_wallet_by_user(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no wallet for user {}", user_id)))?;

    let rows: Vec<TransactionCsvRow> = state
        .repo
        .all_transactions(wallet.id, &filter)
        .await?
        .into_iter()
        .map(|t| TransactionCsvRow {
            reference: t.reference,
            created_at: t.created_at.to_rfc3339(),
            kind: t.kind.as_str(),
            source: t.source.as_str(),
            amount: t.amount.to_canonical_string(),
            balance_before: t.balance_before.to_canonical_string(),
            balance_after: t.balance_after.to_canonical_string(),
            ticket_id: t.ticket_id,
            description: t.description,
        })
        .collect();

    state
        .audit
        .record(
            auth.id(),
            "wallet.export",
            "wallet",
            user_id,
            serde_json::json!({ "rows": rows.len() }),
        )
        .await?;
    csv_attachment(&format!("wallet-{}-transactions.csv", user_id), &rows)
}

pub async fn adjust(
    Path(user_id): Path<i64>,
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<AdjustRequest>,
) -> Result<(StatusCode, Json<TransactionDto>), AppError> {
    auth.require_admin()?;
    let kind = TransactionKind::from_str(body.kind.trim()).map_err(AppError::BadRequest)?;
    let reason = require_text(&body.reason, "reason")?;
    require_user(&state, user_id).await?;

    let tx = state
        .wallets
        .adjust(user_id, kind, body.amount, &reason, auth.id())
        .await?;
    Ok((StatusCode::CREATED, Json(TransactionDto::from(&tx))))
}

pub async fn set_frozen(
    Path(user_id): Path<i64>,
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<FreezeRequest>,
) -> Result<Json<WalletDto>, AppError> {
    auth.require_approver()?;
    require_user(&state, user_id).await?;
    let wallet = state
        .wallets
        .set_frozen(user_id, body.frozen, auth.id())
        .await?;
    Ok(Json(WalletDto::from(&wallet)))
}

pub async fn approve(
    Path(ticket_id): Path<i64>,
    State(state): State<AppState>,
    auth: AuthUser,
    body: Option<Json<ApproveRequest>>,
) -> Result<Json<TransactionDto>, AppError> {
    auth.require_approver()?;
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let tx = state
        .wallets
        .approve(
            ticket_id,
            auth.id(),
            body.adjustment,
            super::optional_text(body.note),
        )
        .await?;
    Ok(Json(TransactionDto::from(&tx)))
}

pub async fn reject(
    Path(ticket_id): Path<i64>,
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<RejectRequest>,
) -> Result<StatusCode, AppError> {
    auth.require_approver()?;
    let reason = require_text(&body.reason, "reason")?;
    state.wallets.reject(ticket_id, auth.id(), &reason).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn bulk_approve(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<BulkApproveRequest>,
) -> Result<Json<BulkApproveResponse>, AppError> {
    auth.require_approver()?;
    if body.ticket_ids.is_empty() {
        return Err(AppError::BadRequest("ticketIds must not be empty".to_string()));
    }
    if body.ticket_ids.len() > MAX_BULK_TICKETS {
        return Err(AppError::BadRequest(format!(
            "at most {} tickets per bulk approval",
            MAX_BULK_TICKETS
        )));
    }

    let outcomes = state
        .wallets
        .bulk_approve(&body.ticket_ids, auth.id(), body.adjustment)
        .await;

    let results: Vec<BulkResultDto> = outcomes
        .into_iter()
        .map(|o| match o.result {
            Ok(tx) => BulkResultDto {
                ticket_id: o.ticket_id,
                ok: true,
                transaction: Some(TransactionDto::from(&tx)),
                error: None,
            },
            Err(e) => BulkResultDto {
                ticket_id: o.ticket_id,
                ok: false,
                transaction: None,
                error: Some(e.to_string()),
            },
        })
        .collect();
    let succeeded = results.iter().filter(|r| r.ok).count();

    Ok(Json(BulkApproveResponse {
        succeeded,
        failed: results.len() - succeeded,
        results,
    }))
}
