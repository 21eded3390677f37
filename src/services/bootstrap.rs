//! First-run admin account.

use crate::config::BootstrapAdmin;
use crate::db::Repository;
use crate::domain::user::normalize_email;
use crate::domain::{NewUser, Role, User};
use crate::services::password::{hash_password, PasswordError};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("bootstrap admin password rejected: {0}")]
    Password(#[from] PasswordError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Create the configured admin when the database has no users yet.
///
/// Returns the new account, or `None` when users already exist.
pub async fn ensure_admin(
    repo: &Repository,
    admin: &BootstrapAdmin,
) -> Result<Option<User>, BootstrapError> {
    if repo.count_users().await? > 0 {
        return Ok(None);
    }
    let password_hash = hash_password(&admin.password)?;
    let user = repo
        .insert_user(&NewUser {
            email: normalize_email(&admin.email),
            full_name: "Administrator".to_string(),
            phone: None,
            role: Role::Admin,
            password_hash,
        })
        .await?;
    info!(user_id = user.id, email = %user.email, "Created bootstrap admin");
    Ok(Some(user))
}
