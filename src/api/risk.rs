use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{AppState, AuthUser};
use crate::db::repo::RiskFlagFilter;
use crate::domain::{Decimal, Page, Paged, RiskFlag, RiskFlagKind, RiskLimits};
use crate::error::AppError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitsDto {
    pub single_transaction_limit: String,
    pub daily_withdrawal_limit: String,
    pub min_transaction_amount: String,
    pub velocity_max_requests_per_hour: i64,
}

impl From<&RiskLimits> for LimitsDto {
    fn from(l: &RiskLimits) -> Self {
        LimitsDto {
            single_transaction_limit: l.single_transaction_limit.to_canonical_string(),
            daily_withdrawal_limit: l.daily_withdrawal_limit.to_canonical_string(),
            min_transaction_amount: l.min_transaction_amount.to_canonical_string(),
            velocity_max_requests_per_hour: l.velocity_max_requests_per_hour,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLimitsRequest {
    pub single_transaction_limit: Option<Decimal>,
    pub daily_withdrawal_limit: Option<Decimal>,
    pub min_transaction_amount: Option<Decimal>,
    pub velocity_max_requests_per_hour: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskFlagDto {
    pub id: i64,
    pub user_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<i64>,
    pub kind: RiskFlagKind,
    pub detail: String,
    pub resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<i64>,
    pub created_at: i64,
}

impl From<&RiskFlag> for RiskFlagDto {
    fn from(f: &RiskFlag) -> Self {
        RiskFlagDto {
            id: f.id,
            user_id: f.user_id,
            ticket_id: f.ticket_id,
            kind: f.kind,
            detail: f.detail.clone(),
            resolved: f.resolved,
            resolved_by: f.resolved_by,
            created_at: f.created_at.as_ms(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagsQuery {
    pub resolved: Option<bool>,
    pub user_id: Option<i64>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

pub async fn get_limits(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<LimitsDto>, AppError> {
    auth.require_approver()?;
    let limits = state.risk.limits().await?;
    Ok(Json(LimitsDto::from(&limits)))
}

pub async fn update_limits(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<UpdateLimitsRequest>,
) -> Result<Json<LimitsDto>, AppError> {
    auth.require_admin()?;

    let mut limits = state.risk.limits().await?;
    if let Some(v) = body.single_transaction_limit {
        limits.single_transaction_limit = v;
    }
    if let Some(v) = body.daily_withdrawal_limit {
        limits.daily_withdrawal_limit = v;
    }
    if let Some(v) = body.min_transaction_amount {
        limits.min_transaction_amount = v;
    }
    if let Some(v) = body.velocity_max_requests_per_hour {
        limits.velocity_max_requests_per_hour = v;
    }

    if !limits.single_transaction_limit.is_positive()
        || !limits.daily_withdrawal_limit.is_positive()
        || limits.min_transaction_amount.is_negative()
        || limits.velocity_max_requests_per_hour < 1
    {
        return Err(AppError::BadRequest(
            "limits must be positive".to_string(),
        ));
    }
    if limits.min_transaction_amount > limits.single_transaction_limit {
        return Err(AppError::BadRequest(
            "minTransactionAmount must not exceed singleTransactionLimit".to_string(),
        ));
    }

    state.risk.update_limits(&limits).await?;
    let dto = LimitsDto::from(&limits);
    state
        .audit
        .record(
            auth.id(),
            "risk_limits.update",
            "risk_limits",
            "global",
            serde_json::to_value(&dto).unwrap_or_default(),
        )
        .await?;
    Ok(Json(dto))
}

pub async fn list_flags(
    Query(params): Query<FlagsQuery>,
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Paged<RiskFlagDto>>, AppError> {
    auth.require_approver()?;
    let filter = RiskFlagFilter {
        resolved: params.resolved,
        user_id: params.user_id,
    };
    let page = Page::new(params.page, params.page_size);
    let flags = state.repo.list_risk_flags(&filter, page).await?;
    Ok(Json(flags.map(|f| RiskFlagDto::from(&f))))
}

pub async fn resolve_flag(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<serde_json::Value>, AppError> {
    auth.require_approver()?;
    if !state.repo.resolve_risk_flag(id, auth.id()).await? {
        return Err(AppError::NotFound(format!(
            "risk flag {} not found or already resolved",
            id
        )));
    }
    state
        .audit
        .record(auth.id(), "risk_flag.resolve", "risk_flag", id, json!({}))
        .await?;
    Ok(Json(json!({ "id": id, "resolved": true })))
}
