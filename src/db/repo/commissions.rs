//! Commission rates and earned commissions.

use super::audit::{insert_audit_conn, NewAuditEntry};
use super::wallets::{apply_ledger_entry, ensure_wallet_conn, LedgerError};
use super::{decimal_col, enum_col, opt_decimal_col, Repository};
use crate::domain::{
    Commission, CommissionRate, CommissionStatus, CommissionSummary, LedgerEntry, Page, Paged,
    TicketKind, TimeMs, Transaction, TransactionKind, TransactionSource,
};
use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::{QueryBuilder, Row};

const COMMISSION_COLUMNS: &str =
    "id, user_id, ticket_id, kind, base_amount, rate_percent, amount, status, paid_at, created_at";

fn commission_from_row(row: &SqliteRow) -> Commission {
    Commission {
        id: row.get("id"),
        user_id: row.get("user_id"),
        ticket_id: row.get("ticket_id"),
        kind: enum_col(row, "kind", TicketKind::Deposit),
        base_amount: decimal_col(row, "base_amount"),
        rate_percent: decimal_col(row, "rate_percent"),
        amount: decimal_col(row, "amount"),
        status: enum_col(row, "status", CommissionStatus::Pending),
        paid_at: row.get::<Option<i64>, _>("paid_at").map(TimeMs::new),
        created_at: TimeMs::new(row.get("created_at")),
    }
}

fn rate_from_row(row: &SqliteRow) -> CommissionRate {
    CommissionRate {
        kind: enum_col(row, "kind", TicketKind::Deposit),
        rate_percent: decimal_col(row, "rate_percent"),
        min_amount: opt_decimal_col(row, "min_amount"),
        max_amount: opt_decimal_col(row, "max_amount"),
        updated_at: TimeMs::new(row.get("updated_at")),
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommissionFilter {
    pub user_id: Option<i64>,
    pub status: Option<CommissionStatus>,
    pub from_ms: Option<i64>,
    pub to_ms: Option<i64>,
}

impl CommissionFilter {
    fn push_where(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        qb.push(" WHERE 1 = 1");
        if let Some(user_id) = self.user_id {
            qb.push(" AND user_id = ").push_bind(user_id);
        }
        if let Some(status) = self.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(from_ms) = self.from_ms {
            qb.push(" AND created_at >= ").push_bind(from_ms);
        }
        if let Some(to_ms) = self.to_ms {
            qb.push(" AND created_at <= ").push_bind(to_ms);
        }
    }
}

impl Repository {
    // =========================================================================
    // Rates
    // =========================================================================

    pub async fn get_commission_rate(
        &self,
        kind: TicketKind,
    ) -> Result<Option<CommissionRate>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT kind, rate_percent, min_amount, max_amount, updated_at FROM commission_rates WHERE kind = ?",
        )
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(rate_from_row))
    }

    pub async fn list_commission_rates(&self) -> Result<Vec<CommissionRate>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT kind, rate_percent, min_amount, max_amount, updated_at FROM commission_rates ORDER BY kind",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(rate_from_row).collect())
    }

    pub async fn upsert_commission_rate(&self, rate: &CommissionRate) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO commission_rates (kind, rate_percent, min_amount, max_amount, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(kind) DO UPDATE SET
                rate_percent = excluded.rate_percent,
                min_amount = excluded.min_amount,
                max_amount = excluded.max_amount,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(rate.kind.as_str())
        .bind(rate.rate_percent.to_canonical_string())
        .bind(rate.min_amount.map(|d| d.to_canonical_string()))
        .bind(rate.max_amount.map(|d| d.to_canonical_string()))
        .bind(rate.updated_at.as_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // =========================================================================
    // Commissions
    // =========================================================================

    pub async fn get_commission(&self, id: i64) -> Result<Option<Commission>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM commissions WHERE id = ?",
            COMMISSION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(commission_from_row))
    }

    pub async fn list_commissions(
        &self,
        filter: &CommissionFilter,
        page: Page,
    ) -> Result<Paged<Commission>, sqlx::Error> {
        let mut count_qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS n FROM commissions");
        filter.push_where(&mut count_qb);
        let total: i64 = count_qb.build().fetch_one(&self.pool).await?.get("n");

        let mut qb =
            QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM commissions", COMMISSION_COLUMNS));
        filter.push_where(&mut qb);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = qb.build().fetch_all(&self.pool).await?;

        Ok(Paged::new(
            rows.iter().map(commission_from_row).collect(),
            total,
            page,
        ))
    }

    /// Totals per status. Summed in Rust to keep decimal precision.
    pub async fn commission_summary(
        &self,
        filter: &CommissionFilter,
    ) -> Result<CommissionSummary, sqlx::Error> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT status, amount FROM commissions");
        filter.push_where(&mut qb);
        let rows = qb.build().fetch_all(&self.pool).await?;

        let mut summary = CommissionSummary::default();
        for row in &rows {
            summary.add(
                enum_col(row, "status", CommissionStatus::Pending),
                decimal_col(row, "amount"),
            );
        }
        Ok(summary)
    }

    /// Mark a pending commission paid and credit the agent's wallet.
    pub async fn pay_commission(
        &self,
        id: i64,
        actor_id: i64,
        currency: &str,
        audit: &NewAuditEntry,
    ) -> Result<Transaction, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let now = TimeMs::now();

        let updated = sqlx::query(
            "UPDATE commissions SET status = 'paid', paid_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(now.as_ms())
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(LedgerError::CommissionNotPending(id));
        }

        let row = sqlx::query(&format!(
            "SELECT {} FROM commissions WHERE id = ?",
            COMMISSION_COLUMNS
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        let commission = commission_from_row(&row);

        ensure_wallet_conn(&mut tx, commission.user_id, currency).await?;
        let entry = LedgerEntry {
            kind: TransactionKind::Credit,
            source: TransactionSource::Commission,
            amount: commission.amount,
            description: format!("Commission #{} payout", commission.id),
            ticket_id: commission.ticket_id,
            created_by: Some(actor_id),
        };
        let transaction = apply_ledger_entry(&mut tx, commission.user_id, &entry).await?;

        insert_audit_conn(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(transaction)
    }

    /// Cancel a pending commission. Returns false if it was not pending.
    pub async fn cancel_commission(
        &self,
        id: i64,
        audit: &NewAuditEntry,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE commissions SET status = 'cancelled' WHERE id = ? AND status = 'pending'",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Ok(false);
        }
        insert_audit_conn(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{create_user, setup_test_db};
    use super::*;
    use crate::domain::{Decimal, Role};
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    async fn insert_pending(repo: &Repository, user_id: i64, amount: &str) -> i64 {
        sqlx::query(
            r#"
            INSERT INTO commissions (user_id, kind, base_amount, rate_percent, amount, status, created_at)
            VALUES (?, 'deposit', '1000', '1', ?, 'pending', ?)
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .bind(TimeMs::now().as_ms())
        .execute(repo.pool())
        .await
        .unwrap()
        .last_insert_rowid()
    }

    fn audit() -> NewAuditEntry {
        NewAuditEntry::new(None, "commission.pay", "commission", None, serde_json::json!({}))
    }

    #[tokio::test]
    async fn test_rate_upsert() {
        let (repo, _temp) = setup_test_db().await;
        let mut rate = CommissionRate {
            kind: TicketKind::Deposit,
            rate_percent: d("0.5"),
            min_amount: None,
            max_amount: Some(d("1000")),
            updated_at: TimeMs::new(1),
        };
        repo.upsert_commission_rate(&rate).await.unwrap();
        rate.rate_percent = d("0.75");
        repo.upsert_commission_rate(&rate).await.unwrap();

        let stored = repo
            .get_commission_rate(TicketKind::Deposit)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, rate);
        assert!(repo
            .get_commission_rate(TicketKind::Withdrawal)
            .await
            .unwrap()
            .is_none());
        assert_eq!(repo.list_commission_rates().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pay_commission_credits_wallet_once() {
        let (repo, _temp) = setup_test_db().await;
        let user = create_user(&repo, "csp@example.com", Role::Csp).await;
        let admin = create_user(&repo, "admin@example.com", Role::Admin).await;
        let id = insert_pending(&repo, user, "12.5").await;

        let txn = repo.pay_commission(id, admin, "NGN", &audit()).await.unwrap();
        assert_eq!(txn.source, TransactionSource::Commission);
        assert_eq!(txn.balance_after, d("12.5"));

        assert!(matches!(
            repo.pay_commission(id, admin, "NGN", &audit()).await,
            Err(LedgerError::CommissionNotPending(_))
        ));
        let commission = repo.get_commission(id).await.unwrap().unwrap();
        assert_eq!(commission.status, CommissionStatus::Paid);
        assert!(commission.paid_at.is_some());
    }

    #[tokio::test]
    async fn test_summary_and_cancel() {
        let (repo, _temp) = setup_test_db().await;
        let user = create_user(&repo, "csp@example.com", Role::Csp).await;
        let a = insert_pending(&repo, user, "10").await;
        insert_pending(&repo, user, "2.25").await;

        assert!(repo.cancel_commission(a, &audit()).await.unwrap());
        assert!(!repo.cancel_commission(a, &audit()).await.unwrap());

        let summary = repo
            .commission_summary(&CommissionFilter {
                user_id: Some(user),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(summary.pending, d("2.25"));
        assert_eq!(summary.cancelled, d("10"));
        assert_eq!(summary.count, 2);

        let page = repo
            .list_commissions(
                &CommissionFilter {
                    status: Some(CommissionStatus::Pending),
                    ..Default::default()
                },
                Page::default(),
            )
            .await
            .unwrap();
        assert_eq!(page.total, 1);
    }
}
