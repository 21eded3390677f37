//! User and session persistence.

use super::{enum_col, like_pattern, Repository};
use crate::domain::{NewUser, Page, Paged, Role, TimeMs, User, UserCredentials, UserUpdate};
use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::{QueryBuilder, Row};

const USER_COLUMNS: &str = "id, email, full_name, phone, role, is_active, failed_logins, \
     locked_until, last_login_at, created_at";

fn user_from_row(row: &SqliteRow) -> User {
    User {
        id: row.get("id"),
        email: row.get("email"),
        full_name: row.get("full_name"),
        phone: row.get("phone"),
        role: enum_col(row, "role", Role::Csp),
        is_active: row.get::<i64, _>("is_active") != 0,
        failed_logins: row.get("failed_logins"),
        locked_until: row.get::<Option<i64>, _>("locked_until").map(TimeMs::new),
        last_login_at: row.get::<Option<i64>, _>("last_login_at").map(TimeMs::new),
        created_at: TimeMs::new(row.get("created_at")),
    }
}

/// Filters for the user directory.
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub search: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

impl Repository {
    // =========================================================================
    // Users
    // =========================================================================

    /// Insert a user. Fails with a unique violation if the email is taken.
    pub async fn insert_user(&self, new: &NewUser) -> Result<User, sqlx::Error> {
        let now = TimeMs::now().as_ms();
        let id = sqlx::query(
            r#"
            INSERT INTO users (email, full_name, phone, role, password_hash, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new.email)
        .bind(&new.full_name)
        .bind(new.phone.as_deref())
        .bind(new.role.as_str())
        .bind(&new.password_hash)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        self.get_user(id).await?.ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn get_user(&self, id: i64) -> Result<Option<User>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM users WHERE id = ? AND deleted_at IS NULL",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(user_from_row))
    }

    pub async fn find_credentials_by_email(
        &self,
        email: &str,
    ) -> Result<Option<UserCredentials>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {}, password_hash FROM users WHERE email = ? AND deleted_at IS NULL",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| UserCredentials {
            user: user_from_row(&r),
            password_hash: r.get("password_hash"),
        }))
    }

    pub async fn get_password_hash(&self, id: i64) -> Result<Option<String>, sqlx::Error> {
        let row = sqlx::query("SELECT password_hash FROM users WHERE id = ? AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("password_hash")))
    }

    pub async fn email_exists(&self, email: &str) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM users WHERE email = ?")
            .bind(email)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") > 0)
    }

    pub async fn count_users(&self) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM users WHERE deleted_at IS NULL")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    pub async fn list_users(
        &self,
        filter: &UserFilter,
        page: Page,
    ) -> Result<Paged<User>, sqlx::Error> {
        fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &UserFilter) {
            qb.push(" WHERE deleted_at IS NULL");
            if let Some(search) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
                let pattern = like_pattern(search);
                qb.push(" AND (full_name LIKE ")
                    .push_bind(pattern.clone())
                    .push(" ESCAPE '\\' OR email LIKE ")
                    .push_bind(pattern)
                    .push(" ESCAPE '\\')");
            }
            if let Some(role) = filter.role {
                qb.push(" AND role = ").push_bind(role.as_str());
            }
            if let Some(active) = filter.is_active {
                qb.push(" AND is_active = ").push_bind(active as i64);
            }
        }

        let mut count_qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS n FROM users");
        push_filters(&mut count_qb, filter);
        let total: i64 = count_qb.build().fetch_one(&self.pool).await?.get("n");

        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM users", USER_COLUMNS));
        push_filters(&mut qb, filter);
        qb.push(" ORDER BY full_name ASC, id ASC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = qb.build().fetch_all(&self.pool).await?;

        Ok(Paged::new(rows.iter().map(user_from_row).collect(), total, page))
    }

    /// Apply a partial update. Returns the updated user, or None if missing.
    pub async fn update_user(
        &self,
        id: i64,
        update: &UserUpdate,
    ) -> Result<Option<User>, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE users SET
                full_name = COALESCE(?, full_name),
                phone = COALESCE(?, phone),
                role = COALESCE(?, role),
                is_active = COALESCE(?, is_active),
                updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(update.full_name.as_deref())
        .bind(update.phone.as_deref())
        .bind(update.role.map(|r| r.as_str()))
        .bind(update.is_active.map(|a| a as i64))
        .bind(TimeMs::now().as_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_user(id).await
    }

    pub async fn update_password(&self, id: i64, password_hash: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
            .bind(password_hash)
            .bind(TimeMs::now().as_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Soft-delete a user and drop their sessions.
    pub async fn soft_delete_user(&self, id: i64) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE users SET deleted_at = ?, is_active = 0 WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(TimeMs::now().as_ms())
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM sessions WHERE user_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Count a failed login; lock the account once `max_failures` is reached.
    ///
    /// Returns the new failure count.
    pub async fn record_login_failure(
        &self,
        id: i64,
        max_failures: i64,
        lock_until: TimeMs,
    ) -> Result<i64, sqlx::Error> {
        let row = sqlx::query(
            r#"
            UPDATE users SET
                failed_logins = failed_logins + 1,
                locked_until = CASE WHEN failed_logins + 1 >= ? THEN ? ELSE locked_until END
            WHERE id = ?
            RETURNING failed_logins
            "#,
        )
        .bind(max_failures)
        .bind(lock_until.as_ms())
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("failed_logins"))
    }

    pub async fn record_login_success(&self, id: i64, at: TimeMs) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE users SET failed_logins = 0, locked_until = NULL, last_login_at = ? WHERE id = ?",
        )
        .bind(at.as_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    pub async fn insert_session(
        &self,
        token_hash: &str,
        user_id: i64,
        created_at: TimeMs,
        expires_at: TimeMs,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO sessions (token_hash, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(token_hash)
        .bind(user_id)
        .bind(created_at.as_ms())
        .bind(expires_at.as_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Resolve an unexpired session to its active, non-deleted user.
    pub async fn find_session_user(
        &self,
        token_hash: &str,
        now: TimeMs,
    ) -> Result<Option<User>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT u.id, u.email, u.full_name, u.phone, u.role, u.is_active, u.failed_logins,
                   u.locked_until, u.last_login_at, u.created_at
            FROM sessions s
            JOIN users u ON u.id = s.user_id
            WHERE s.token_hash = ? AND s.expires_at > ?
              AND u.deleted_at IS NULL AND u.is_active = 1
            "#,
        )
        .bind(token_hash)
        .bind(now.as_ms())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(user_from_row))
    }

    pub async fn delete_session(&self, token_hash: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Drop every session of `user_id` except the one hashed as `keep`.
    pub async fn delete_sessions_for_user(
        &self,
        user_id: i64,
        keep: Option<&str>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM sessions WHERE user_id = ? AND (? IS NULL OR token_hash != ?)",
        )
        .bind(user_id)
        .bind(keep)
        .bind(keep)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn purge_expired_sessions(&self, now: TimeMs) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(now.as_ms())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
