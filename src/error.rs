use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::db::repo::LedgerError;
use crate::services::password::PasswordError;
use crate::services::risk::RiskError;
use crate::services::wallet::WalletError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Internal server error: {0}")]
    Internal(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("record not found".to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<WalletError> for AppError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::TicketNotFound(_) | WalletError::WalletNotFound(_) => {
                AppError::NotFound(err.to_string())
            }
            WalletError::NotFinancial(_)
            | WalletError::InvalidAmount(_)
            | WalletError::Adjustment(_)
            | WalletError::LimitExceeded(_) => AppError::BadRequest(err.to_string()),
            WalletError::NotSettleable { .. }
            | WalletError::InsufficientFunds { .. }
            | WalletError::Frozen(_)
            | WalletError::AlreadySettled(_) => AppError::Conflict(err.to_string()),
            WalletError::Db(e) => AppError::from(e),
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Db(e) => AppError::from(e),
            LedgerError::WalletNotFound(_) => AppError::NotFound(err.to_string()),
            LedgerError::OutOfRange { .. } | LedgerError::DailyLimit { .. } => {
                AppError::BadRequest(err.to_string())
            }
            other => AppError::Conflict(other.to_string()),
        }
    }
}

impl From<PasswordError> for AppError {
    fn from(err: PasswordError) -> Self {
        match err {
            PasswordError::Policy(_) => AppError::BadRequest(err.to_string()),
            PasswordError::Hashing(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl From<RiskError> for AppError {
    fn from(err: RiskError) -> Self {
        match err {
            RiskError::Db(e) => AppError::from(e),
            RiskError::Frozen(_) => AppError::Conflict(err.to_string()),
            other => AppError::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = [
            (AppError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (AppError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (AppError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (AppError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (AppError::Conflict("x".into()), StatusCode::CONFLICT),
            (
                AppError::Internal("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn test_row_not_found_maps_to_404() {
        let err = AppError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
