//! Bearer-token authentication: the `AuthUser` extractor and the
//! login/logout/password endpoints.

use async_trait::async_trait;
use axum::extract::{FromRequestParts, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use super::users::UserDto;
use super::AppState;
use crate::domain::user::normalize_email;
use crate::domain::{Role, TimeMs, User};
use crate::error::AppError;
use crate::services::audit::events;
use crate::services::password::{hash_password, verify_password};

/// The caller behind a valid `Authorization: Bearer` header.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub token: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))?;

        let user = state
            .tokens
            .authenticate(token)
            .await?
            .ok_or_else(|| AppError::Unauthorized("invalid or expired token".to_string()))?;

        Ok(AuthUser {
            user,
            token: token.to_string(),
        })
    }
}

impl AuthUser {
    pub fn id(&self) -> i64 {
        self.user.id
    }

    pub fn role(&self) -> Role {
        self.user.role
    }

    pub fn require_back_office(&self) -> Result<(), AppError> {
        if self.role().is_back_office() {
            Ok(())
        } else {
            Err(forbidden())
        }
    }

    /// Admin or supervisor.
    pub fn require_approver(&self) -> Result<(), AppError> {
        if self.role().can_approve() {
            Ok(())
        } else {
            Err(forbidden())
        }
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.role() == Role::Admin {
            Ok(())
        } else {
            Err(forbidden())
        }
    }

    /// Back office, or the user identified by `user_id`.
    pub fn require_self_or_back_office(&self, user_id: i64) -> Result<(), AppError> {
        if self.id() == user_id || self.role().is_back_office() {
            Ok(())
        } else {
            Err(forbidden())
        }
    }
}

fn forbidden() -> AppError {
    AppError::Forbidden("insufficient role".to_string())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: i64,
    pub user: UserDto,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

const BAD_CREDENTIALS: &str = "invalid email or password";

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let email = normalize_email(&body.email);
    let now = TimeMs::now();

    let Some(creds) = state.repo.find_credentials_by_email(&email).await? else {
        state
            .audit
            .security(None, Some(&email), events::LOGIN_FAILED, Some("unknown email"))
            .await;
        return Err(AppError::Unauthorized(BAD_CREDENTIALS.to_string()));
    };
    let user = creds.user;

    if user.is_locked(now) {
        state
            .audit
            .security(Some(user.id), Some(&email), events::LOGIN_FAILED, Some("account locked"))
            .await;
        return Err(AppError::Forbidden(
            "account is temporarily locked".to_string(),
        ));
    }

    if !verify_password(&body.password, &creds.password_hash) {
        let failures = state
            .repo
            .record_login_failure(
                user.id,
                state.config.max_failed_logins,
                now.plus_secs(state.config.lockout_secs),
            )
            .await?;
        warn!(user_id = user.id, failures, "Rejected login");
        state
            .audit
            .security(Some(user.id), Some(&email), events::LOGIN_FAILED, Some("wrong password"))
            .await;
        if failures >= state.config.max_failed_logins {
            state
                .audit
                .security(
                    Some(user.id),
                    Some(&email),
                    events::ACCOUNT_LOCKED,
                    Some(&format!("{} failed attempts", failures)),
                )
                .await;
        }
        return Err(AppError::Unauthorized(BAD_CREDENTIALS.to_string()));
    }

    if !user.is_active {
        state
            .audit
            .security(Some(user.id), Some(&email), events::LOGIN_FAILED, Some("account disabled"))
            .await;
        return Err(AppError::Forbidden("account is disabled".to_string()));
    }

    state.repo.record_login_success(user.id, now).await?;
    let issued = state.tokens.issue(user.id).await?;
    state
        .audit
        .security(Some(user.id), Some(&email), events::LOGIN_SUCCESS, None)
        .await;

    let user = state.repo.get_user(user.id).await?.unwrap_or(user);
    Ok(Json(LoginResponse {
        token: issued.token,
        expires_at: issued.expires_at.as_ms(),
        user: UserDto::from(&user),
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<StatusCode, AppError> {
    state.tokens.revoke(&auth.token).await?;
    state
        .audit
        .security(Some(auth.id()), Some(&auth.user.email), events::LOGOUT, None)
        .await;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn me(auth: AuthUser) -> Json<UserDto> {
    Json(UserDto::from(&auth.user))
}

pub async fn change_password(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let current_hash = state
        .repo
        .get_password_hash(auth.id())
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".to_string()))?;
    if !verify_password(&body.current_password, &current_hash) {
        return Err(AppError::BadRequest(
            "current password is incorrect".to_string(),
        ));
    }
    if body.current_password == body.new_password {
        return Err(AppError::BadRequest(
            "new password must differ from the current one".to_string(),
        ));
    }

    let new_hash = hash_password(&body.new_password)?;
    state.repo.update_password(auth.id(), &new_hash).await?;
    let revoked = state.tokens.revoke_others(auth.id(), &auth.token).await?;

    state
        .audit
        .security(
            Some(auth.id()),
            Some(&auth.user.email),
            events::PASSWORD_CHANGED,
            None,
        )
        .await;
    state
        .audit
        .record(
            auth.id(),
            "user.change_password",
            "user",
            auth.id(),
            json!({ "revokedSessions": revoked }),
        )
        .await?;

    Ok(Json(json!({ "revokedSessions": revoked })))
}
