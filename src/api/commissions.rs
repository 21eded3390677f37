use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::str::FromStr;

use super::wallets::TransactionDto;
use super::{parse_opt, AppState, AuthUser};
use crate::db::repo::CommissionFilter;
use crate::domain::{
    Commission, CommissionRate, CommissionStatus, Decimal, Page, Paged, TicketKind, TimeMs,
};
use crate::error::AppError;
use crate::services::AuditLogger;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionDto {
    pub id: i64,
    pub user_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<i64>,
    pub kind: TicketKind,
    pub base_amount: String,
    pub rate_percent: String,
    pub amount: String,
    pub status: CommissionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<i64>,
    pub created_at: i64,
}

impl From<&Commission> for CommissionDto {
    fn from(c: &Commission) -> Self {
        CommissionDto {
            id: c.id,
            user_id: c.user_id,
            ticket_id: c.ticket_id,
            kind: c.kind,
            base_amount: c.base_amount.to_canonical_string(),
            rate_percent: c.rate_percent.to_canonical_string(),
            amount: c.amount.to_canonical_string(),
            status: c.status,
            paid_at: c.paid_at.map(|t| t.as_ms()),
            created_at: c.created_at.as_ms(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateDto {
    pub kind: TicketKind,
    pub rate_percent: String,
    pub min_amount: Option<String>,
    pub max_amount: Option<String>,
    pub updated_at: i64,
}

impl From<&CommissionRate> for RateDto {
    fn from(r: &CommissionRate) -> Self {
        RateDto {
            kind: r.kind,
            rate_percent: r.rate_percent.to_canonical_string(),
            min_amount: r.min_amount.map(|d| d.to_canonical_string()),
            max_amount: r.max_amount.map(|d| d.to_canonical_string()),
            updated_at: r.updated_at.as_ms(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryDto {
    pub pending: String,
    pub paid: String,
    pub cancelled: String,
    pub count: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionsQuery {
    pub user_id: Option<i64>,
    pub status: Option<String>,
    pub from_ms: Option<i64>,
    pub to_ms: Option<i64>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateRequest {
    pub rate_percent: Decimal,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
}

fn scoped_filter(auth: &AuthUser, params: &CommissionsQuery) -> Result<CommissionFilter, AppError> {
    let user_id = if auth.role().is_back_office() {
        params.user_id
    } else {
        Some(auth.id())
    };
    Ok(CommissionFilter {
        user_id,
        status: parse_opt(params.status.as_deref(), "status")?,
        from_ms: params.from_ms,
        to_ms: params.to_ms,
    })
}

pub async fn list_commissions(
    Query(params): Query<CommissionsQuery>,
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Paged<CommissionDto>>, AppError> {
    let filter = scoped_filter(&auth, &params)?;
    let page = Page::new(params.page, params.page_size);
    let commissions = state.repo.list_commissions(&filter, page).await?;
    Ok(Json(commissions.map(|c| CommissionDto::from(&c))))
}

pub async fn summary(
    Query(params): Query<CommissionsQuery>,
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<SummaryDto>, AppError> {
    let mut filter = scoped_filter(&auth, &params)?;
    // Totals span every status.
    filter.status = None;
    let s = state.repo.commission_summary(&filter).await?;
    Ok(Json(SummaryDto {
        pending: s.pending.to_canonical_string(),
        paid: s.paid.to_canonical_string(),
        cancelled: s.cancelled.to_canonical_string(),
        count: s.count,
    }))
}

pub async fn list_rates(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<RateDto>>, AppError> {
    auth.require_back_office()?;
    let rates = state.repo.list_commission_rates().await?;
    Ok(Json(rates.iter().map(RateDto::from).collect()))
}

pub async fn upsert_rate(
    Path(kind): Path<String>,
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<RateRequest>,
) -> Result<Json<RateDto>, AppError> {
    auth.require_admin()?;
    let kind = TicketKind::from_str(&kind).map_err(AppError::BadRequest)?;
    if !kind.is_financial() {
        return Err(AppError::BadRequest(
            "commission rates apply to withdrawal and deposit only".to_string(),
        ));
    }
    if body.rate_percent.is_negative() || body.rate_percent > Decimal::hundred() {
        return Err(AppError::BadRequest(
            "ratePercent must be between 0 and 100".to_string(),
        ));
    }
    if body.min_amount.is_some_and(|m| m.is_negative())
        || body.max_amount.is_some_and(|m| m.is_negative())
    {
        return Err(AppError::BadRequest(
            "bounds must not be negative".to_string(),
        ));
    }
    if let (Some(min), Some(max)) = (body.min_amount, body.max_amount) {
        if min > max {
            return Err(AppError::BadRequest(
                "minAmount must not exceed maxAmount".to_string(),
            ));
        }
    }

    let rate = CommissionRate {
        kind,
        rate_percent: body.rate_percent,
        min_amount: body.min_amount,
        max_amount: body.max_amount,
        updated_at: TimeMs::now(),
    };
    state.repo.upsert_commission_rate(&rate).await?;
    state
        .audit
        .record(
            auth.id(),
            "commission_rate.update",
            "commission_rate",
            kind.as_str(),
            json!({
                "ratePercent": rate.rate_percent.to_canonical_string(),
                "minAmount": rate.min_amount.map(|d| d.to_canonical_string()),
                "maxAmount": rate.max_amount.map(|d| d.to_canonical_string()),
            }),
        )
        .await?;
    Ok(Json(RateDto::from(&rate)))
}

pub async fn pay(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<TransactionDto>, AppError> {
    auth.require_approver()?;
    if state.repo.get_commission(id).await?.is_none() {
        return Err(AppError::NotFound(format!("commission {} not found", id)));
    }
    let audit = AuditLogger::entry(auth.id(), "commission.pay", "commission", id, json!({}));
    let tx = state
        .repo
        .pay_commission(id, auth.id(), &state.config.currency, &audit)
        .await?;
    Ok(Json(TransactionDto::from(&tx)))
}

pub async fn cancel(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<CommissionDto>, AppError> {
    auth.require_approver()?;
    let audit = AuditLogger::entry(auth.id(), "commission.cancel", "commission", id, json!({}));
    if !state.repo.cancel_commission(id, &audit).await? {
        return match state.repo.get_commission(id).await? {
            Some(_) => Err(AppError::Conflict(format!(
                "commission {} is not pending",
                id
            ))),
            None => Err(AppError::NotFound(format!("commission {} not found", id))),
        };
    }
    let commission = state
        .repo
        .get_commission(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("commission {} not found", id)))?;
    Ok(Json(CommissionDto::from(&commission)))
}
