pub mod audit;
pub mod auth;
pub mod broadcasts;
pub mod commissions;
pub mod health;
pub mod messages;
pub mod resources;
pub mod risk;
pub mod tickets;
pub mod users;
pub mod wallets;

use crate::config::Config;
use crate::db::Repository;
use crate::error::AppError;
use crate::services::{
    AuditLogger, CommissionCalculator, RiskChecker, TokenService, WalletService,
};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::{
    routing::{delete, get, patch, post, put},
    Router,
};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use auth::AuthUser;

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub config: Config,
    pub tokens: TokenService,
    pub audit: AuditLogger,
    pub risk: RiskChecker,
    pub wallets: WalletService,
}

impl AppState {
    pub fn new(repo: Arc<Repository>, config: Config) -> Self {
        let risk = RiskChecker::new(repo.clone(), config.default_limits.clone());
        let wallets = WalletService::new(
            repo.clone(),
            risk.clone(),
            CommissionCalculator::new(repo.clone()),
            config.currency.clone(),
        );
        Self {
            tokens: TokenService::new(repo.clone(), config.session_ttl_secs),
            audit: AuditLogger::new(repo.clone()),
            risk,
            wallets,
            repo,
            config,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        // auth
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/change-password", post(auth::change_password))
        // users
        .route("/api/users", get(users::list_users).post(users::create_user))
        .route(
            "/api/users/:id",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        // tickets
        .route(
            "/api/tickets",
            get(tickets::list_tickets).post(tickets::create_ticket),
        )
        .route("/api/tickets/stats", get(tickets::ticket_stats))
        .route(
            "/api/tickets/:id",
            get(tickets::get_ticket).delete(tickets::delete_ticket),
        )
        .route("/api/tickets/:id/status", patch(tickets::update_status))
        .route("/api/tickets/:id/assign", patch(tickets::assign_ticket))
        .route("/api/tickets/:id/comments", post(tickets::add_comment))
        // wallets
        .route("/api/wallets/me", get(wallets::my_wallet))
        .route("/api/wallets/bulk-approve", post(wallets::bulk_approve))
        .route("/api/wallets/approve/:ticket_id", post(wallets::approve))
        .route("/api/wallets/reject/:ticket_id", post(wallets::reject))
        .route("/api/wallets/:user_id", get(wallets::get_wallet))
        .route(
            "/api/wallets/:user_id/transactions",
            get(wallets::list_transactions),
        )
        .route(
            "/api/wallets/:user_id/transactions/export",
            get(wallets::export_transactions),
        )
        .route("/api/wallets/:user_id/adjust", post(wallets::adjust))
        .route("/api/wallets/:user_id/freeze", post(wallets::set_frozen))
        // commissions
        .route("/api/commissions", get(commissions::list_commissions))
        .route("/api/commissions/summary", get(commissions::summary))
        .route("/api/commissions/rates", get(commissions::list_rates))
        .route("/api/commissions/rates/:kind", put(commissions::upsert_rate))
        .route("/api/commissions/:id/pay", post(commissions::pay))
        .route("/api/commissions/:id/cancel", post(commissions::cancel))
        // risk
        .route(
            "/api/risk/limits",
            get(risk::get_limits).put(risk::update_limits),
        )
        .route("/api/risk/flags", get(risk::list_flags))
        .route("/api/risk/flags/:id/resolve", post(risk::resolve_flag))
        // messages
        .route("/api/messages", post(messages::send_message))
        .route("/api/messages/conversations", get(messages::conversations))
        .route("/api/messages/unread-count", get(messages::unread_count))
        .route("/api/messages/with/:user_id", get(messages::thread))
        .route("/api/messages/:id", delete(messages::delete_message))
        // broadcasts
        .route(
            "/api/broadcasts",
            get(broadcasts::list_broadcasts).post(broadcasts::create_broadcast),
        )
        .route("/api/broadcasts/:id", delete(broadcasts::delete_broadcast))
        .route("/api/broadcasts/:id/read", post(broadcasts::mark_read))
        // resources
        .route(
            "/api/resources",
            get(resources::list_resources).post(resources::create_resource),
        )
        .route("/api/resources/:id", delete(resources::delete_resource))
        // audit
        .route("/api/audit-logs", get(audit::list_audit_logs))
        .route("/api/audit-logs/export", get(audit::export_audit_logs))
        .route("/api/security-logs", get(audit::list_security_logs))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Parse an optional enum-valued query parameter.
pub(crate) fn parse_opt<T>(value: Option<&str>, field: &str) -> Result<Option<T>, AppError>
where
    T: FromStr<Err = String>,
{
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => T::from_str(raw)
            .map(Some)
            .map_err(|e| AppError::BadRequest(format!("{}: {}", field, e))),
    }
}

/// Trimmed required text field.
pub(crate) fn require_text(value: &str, field: &str) -> Result<String, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest(format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}

/// Trimmed optional text; blank becomes `None`.
pub(crate) fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Serialize `rows` as a CSV download with a header row.
pub(crate) fn csv_attachment<T: Serialize>(filename: &str, rows: &[T]) -> Result<Response, AppError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(true)
        .from_writer(Vec::new());
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| AppError::Internal(format!("csv encode error: {}", e)))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::Internal(format!("csv flush error: {}", e)))?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        bytes,
    )
        .into_response())
}
