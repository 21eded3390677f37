//! Portal users and sessions.

use crate::domain::{Role, TimeMs};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub is_active: bool,
    pub failed_logins: i64,
    pub locked_until: Option<TimeMs>,
    pub last_login_at: Option<TimeMs>,
    pub created_at: TimeMs,
}

impl User {
    pub fn is_locked(&self, now: TimeMs) -> bool {
        self.locked_until.map(|t| t > now).unwrap_or(false)
    }
}

/// A user row together with its stored password hash.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user: User,
    pub password_hash: String,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub password_hash: String,
}

/// Partial update of a user profile. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

/// Normalize an email for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Shallow shape check: one `@` with non-empty local part and a dotted domain.
pub fn is_plausible_email(email: &str) -> bool {
    let mut parts = email.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        _ => false,
    }
}
