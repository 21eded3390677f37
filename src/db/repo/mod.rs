//! Repository layer for database operations.
//!
//! This module provides the `Repository` struct for all database operations.
//! Methods are organized across submodules by domain:
//! - `users.rs` - Users and bearer sessions
//! - `tickets.rs` - Tickets, detail rows, comments and statistics
//! - `wallets.rs` - Wallets, ledger rows and atomic settlement
//! - `commissions.rs` - Commission rates and earned commissions
//! - `messaging.rs` - Direct messages, broadcasts and resources
//! - `audit.rs` - Audit trail, security log, risk flags and limits

mod audit;
mod commissions;
mod messaging;
mod tickets;
mod users;
mod wallets;

pub use audit::{AuditFilter, NewAuditEntry, RiskFlagFilter, SecurityFilter};
pub use commissions::CommissionFilter;
pub use tickets::{TicketFilter, TicketStats};
pub use users::UserFilter;
pub use wallets::{DailyLimit, LedgerError, TicketSettlement, TransactionFilter};

use crate::domain::Decimal;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::warn;

/// Repository for database operations.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Round-trips a trivial query; used by `/ready`.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Read a TEXT decimal column, logging and defaulting to zero on bad data.
pub(crate) fn decimal_col(row: &SqliteRow, col: &str) -> Decimal {
    let raw: String = row.get(col);
    Decimal::from_str(&raw).unwrap_or_else(|e| {
        warn!(column = col, value = %raw, error = %e, "Failed to parse stored decimal, using default");
        Decimal::default()
    })
}

pub(crate) fn opt_decimal_col(row: &SqliteRow, col: &str) -> Option<Decimal> {
    let raw: Option<String> = row.get(col);
    raw.and_then(|s| match Decimal::from_str(&s) {
        Ok(d) => Some(d),
        Err(e) => {
            warn!(column = col, value = %s, error = %e, "Failed to parse stored decimal, ignoring");
            None
        }
    })
}

/// Parse an enum stored as TEXT, falling back to `default` on unknown values.
pub(crate) fn enum_col<T: FromStr>(row: &SqliteRow, col: &str, default: T) -> T {
    let raw: String = row.get(col);
    T::from_str(&raw).unwrap_or_else(|_| {
        warn!(column = col, value = %raw, "Unknown stored enum value, using default");
        default
    })
}

/// Escape `%`/`_` for a LIKE pattern and wrap it in wildcards.
pub(crate) fn like_pattern(term: &str) -> String {
    let escaped = term
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}
