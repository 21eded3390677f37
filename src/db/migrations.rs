//! Pool construction and schema setup for the portal database.

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const SCHEMA: &str = include_str!("schema.sql");

/// Stored in `PRAGMA user_version`. Bump when `schema.sql` changes.
const SCHEMA_VERSION: i64 = 1;

const POOL_SIZE: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Open (creating if needed) the database at `db_path` and bring its schema
/// up to date.
pub async fn init_db(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = Path::new(db_path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
    {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(POOL_SIZE)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_with(options)
        .await?;

    apply_schema(&pool).await?;
    info!(path = db_path, "Portal database ready");
    Ok(pool)
}

async fn apply_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    let current: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(&mut *tx)
        .await?;
    if current >= SCHEMA_VERSION {
        debug!(version = current, "Schema already current");
        return Ok(());
    }

    for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    // PRAGMA takes no bind parameters.
    sqlx::query(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!(from = current, to = SCHEMA_VERSION, "Schema applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn temp_pool() -> (SqlitePool, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (pool, temp_dir)
    }

    async fn user_version(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_portal_tables_exist() {
        let (pool, _temp) = temp_pool().await;

        for table in [
            "users",
            "sessions",
            "tickets",
            "wallets",
            "transactions",
            "commissions",
            "risk_flags",
            "broadcast_reads",
            "audit_logs",
        ] {
            let found: Option<String> =
                sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
                    .bind(table)
                    .fetch_optional(&pool)
                    .await
                    .unwrap();
            assert_eq!(found.as_deref(), Some(table));
        }
        assert_eq!(user_version(&pool).await, SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_reapplying_schema_keeps_rows() {
        let (pool, _temp) = temp_pool().await;
        sqlx::query(
            "INSERT INTO users (email, full_name, role, password_hash, created_at, updated_at)
             VALUES ('a@example.com', 'A', 'csp', 'x', 0, 0)",
        )
        .execute(&pool)
        .await
        .unwrap();

        apply_schema(&pool).await.unwrap();
        // Force a full replay of every statement.
        sqlx::query("PRAGMA user_version = 0").execute(&pool).await.unwrap();
        apply_schema(&pool).await.unwrap();

        let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(users, 1);
        assert_eq!(user_version(&pool).await, SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_foreign_keys_enforced() {
        let (pool, _temp) = temp_pool().await;

        let enabled: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(enabled, 1);

        let orphan = sqlx::query(
            "INSERT INTO sessions (token_hash, user_id, created_at, expires_at) VALUES ('h', 42, 0, 1)",
        )
        .execute(&pool)
        .await;
        assert!(orphan.is_err());
    }

    #[tokio::test]
    async fn test_creates_missing_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("data").join("portal").join("portal.db");

        let pool = init_db(&db_path.to_string_lossy()).await.unwrap();
        assert!(db_path.exists());

        let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(mode, "wal");
    }
}
