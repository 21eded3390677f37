use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::str::FromStr;

use super::{optional_text, parse_opt, require_text, AppState, AuthUser};
use crate::db::repo::UserFilter;
use crate::domain::user::{is_plausible_email, normalize_email};
use crate::domain::{NewUser, Page, Paged, Role, User, UserUpdate};
use crate::error::AppError;
use crate::services::password::hash_password;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    pub id: i64,
    pub email: String,
    pub full_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub role: Role,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<i64>,
    pub created_at: i64,
}

impl From<&User> for UserDto {
    fn from(u: &User) -> Self {
        UserDto {
            id: u.id,
            email: u.email.clone(),
            full_name: u.full_name.clone(),
            phone: u.phone.clone(),
            role: u.role,
            is_active: u.is_active,
            last_login_at: u.last_login_at.map(|t| t.as_ms()),
            created_at: u.created_at.as_ms(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsersQuery {
    pub search: Option<String>,
    pub role: Option<String>,
    pub is_active: Option<bool>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub role: Option<String>,
    pub is_active: Option<bool>,
}

pub async fn list_users(
    Query(params): Query<UsersQuery>,
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Paged<UserDto>>, AppError> {
    auth.require_back_office()?;
    let filter = UserFilter {
        search: optional_text(params.search),
        role: parse_opt(params.role.as_deref(), "role")?,
        is_active: params.is_active,
    };
    let page = Page::new(params.page, params.page_size);
    let users = state.repo.list_users(&filter, page).await?;
    Ok(Json(users.map(|u| UserDto::from(&u))))
}

pub async fn create_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserDto>), AppError> {
    auth.require_admin()?;

    let email = normalize_email(&body.email);
    if !is_plausible_email(&email) {
        return Err(AppError::BadRequest("email is not valid".to_string()));
    }
    let full_name = require_text(&body.full_name, "fullName")?;
    let role = Role::from_str(&body.role).map_err(AppError::BadRequest)?;
    let password_hash = hash_password(&body.password)?;

    if state.repo.email_exists(&email).await? {
        return Err(AppError::Conflict(format!("email {} is already registered", email)));
    }

    let user = state
        .repo
        .insert_user(&NewUser {
            email: email.clone(),
            full_name,
            phone: optional_text(body.phone),
            role,
            password_hash,
        })
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db) if db.is_unique_violation() => {
                AppError::Conflict(format!("email {} is already registered", email))
            }
            _ => AppError::from(e),
        })?;

    if role == Role::Csp {
        state
            .repo
            .ensure_wallet(user.id, &state.config.currency)
            .await?;
    }

    state
        .audit
        .record(
            auth.id(),
            "user.create",
            "user",
            user.id,
            json!({ "email": user.email, "role": user.role }),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(UserDto::from(&user))))
}

pub async fn get_user(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<UserDto>, AppError> {
    auth.require_self_or_back_office(id)?;
    let user = state
        .repo
        .get_user(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user {} not found", id)))?;
    Ok(Json(UserDto::from(&user)))
}

pub async fn update_user(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<UpdateUserRequest>,
) -> Result<Json<UserDto>, AppError> {
    auth.require_admin()?;

    let role: Option<Role> = parse_opt(body.role.as_deref(), "role")?;
    if id == auth.id() && (role.is_some_and(|r| r != Role::Admin) || body.is_active == Some(false))
    {
        return Err(AppError::BadRequest(
            "admins cannot demote or deactivate themselves".to_string(),
        ));
    }
    let full_name = match body.full_name.as_deref() {
        Some(name) => Some(require_text(name, "fullName")?),
        None => None,
    };

    let update = UserUpdate {
        full_name,
        phone: optional_text(body.phone),
        role,
        is_active: body.is_active,
    };
    let user = state
        .repo
        .update_user(id, &update)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user {} not found", id)))?;

    if body.is_active == Some(false) {
        state.repo.delete_sessions_for_user(id, None).await?;
    }
    if user.role == Role::Csp {
        state
            .repo
            .ensure_wallet(user.id, &state.config.currency)
            .await?;
    }

    state
        .audit
        .record(
            auth.id(),
            "user.update",
            "user",
            id,
            json!({
                "fullName": update.full_name,
                "phone": update.phone,
                "role": update.role,
                "isActive": update.is_active,
            }),
        )
        .await?;

    Ok(Json(UserDto::from(&user)))
}

pub async fn delete_user(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<StatusCode, AppError> {
    auth.require_admin()?;
    if id == auth.id() {
        return Err(AppError::BadRequest(
            "you cannot delete your own account".to_string(),
        ));
    }
    if !state.repo.soft_delete_user(id).await? {
        return Err(AppError::NotFound(format!("user {} not found", id)));
    }
    state
        .audit
        .record(auth.id(), "user.delete", "user", id, json!({}))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
