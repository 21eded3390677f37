//! Wallets, ledger rows and the atomic settlement of financial tickets.

use super::audit::{insert_audit_conn, NewAuditEntry};
use super::{decimal_col, enum_col, Repository};
use crate::domain::{
    Decimal, LedgerEntry, Page, Paged, TicketKind, TimeMs, Transaction, TransactionKind,
    TransactionSource, Wallet,
};
use sqlx::sqlite::{Sqlite, SqliteConnection, SqliteRow};
use sqlx::{QueryBuilder, Row};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("no wallet for user {0}")]
    WalletNotFound(i64),
    #[error("wallet of user {0} is frozen")]
    Frozen(i64),
    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: Decimal, requested: Decimal },
    #[error("ticket {0} is no longer awaiting a decision")]
    AlreadySettled(i64),
    #[error("commission {0} is not pending")]
    CommissionNotPending(i64),
    #[error("daily withdrawal limit {limit} exceeded: {used} already withdrawn today, {requested} requested")]
    DailyLimit {
        used: Decimal,
        requested: Decimal,
        limit: Decimal,
    },
    #[error("amount {amount} would take the balance out of range")]
    OutOfRange { amount: Decimal },
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Everything written when a financial ticket is approved.
#[derive(Debug, Clone)]
pub struct TicketSettlement {
    pub ticket_id: i64,
    pub kind: TicketKind,
    /// Wallet owner, i.e. the ticket creator.
    pub user_id: i64,
    pub currency: String,
    pub entry: LedgerEntry,
    pub note: Option<String>,
    /// `(rate_percent, amount)` of the commission earned, if any.
    pub commission: Option<(Decimal, Decimal)>,
    /// Re-checked under the write lock for debits.
    pub daily_limit: Option<DailyLimit>,
    pub audit: NewAuditEntry,
}

/// Cap on withdrawal debits since a point in time (the start of the UTC day).
#[derive(Debug, Clone, Copy)]
pub struct DailyLimit {
    pub limit: Decimal,
    pub since: TimeMs,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub kind: Option<TransactionKind>,
    pub source: Option<TransactionSource>,
    pub from_ms: Option<i64>,
    pub to_ms: Option<i64>,
}

impl TransactionFilter {
    fn push_where(&self, qb: &mut QueryBuilder<'_, Sqlite>, wallet_id: i64) {
        qb.push(" WHERE wallet_id = ").push_bind(wallet_id);
        if let Some(kind) = self.kind {
            qb.push(" AND kind = ").push_bind(kind.as_str());
        }
        if let Some(source) = self.source {
            qb.push(" AND source = ").push_bind(source.as_str());
        }
        if let Some(from_ms) = self.from_ms {
            qb.push(" AND created_at >= ").push_bind(from_ms);
        }
        if let Some(to_ms) = self.to_ms {
            qb.push(" AND created_at <= ").push_bind(to_ms);
        }
    }
}

const TRANSACTION_COLUMNS: &str = "id, wallet_id, kind, source, amount, balance_before, \
     balance_after, reference, description, ticket_id, created_by, created_at";

fn wallet_from_row(row: &SqliteRow) -> Wallet {
    Wallet {
        id: row.get("id"),
        user_id: row.get("user_id"),
        balance: decimal_col(row, "balance"),
        currency: row.get("currency"),
        is_frozen: row.get::<i64, _>("is_frozen") != 0,
        updated_at: TimeMs::new(row.get("updated_at")),
    }
}

fn transaction_from_row(row: &SqliteRow) -> Transaction {
    Transaction {
        id: row.get("id"),
        wallet_id: row.get("wallet_id"),
        kind: enum_col(row, "kind", TransactionKind::Credit),
        source: enum_col(row, "source", TransactionSource::Manual),
        amount: decimal_col(row, "amount"),
        balance_before: decimal_col(row, "balance_before"),
        balance_after: decimal_col(row, "balance_after"),
        reference: row.get("reference"),
        description: row.get("description"),
        ticket_id: row.get("ticket_id"),
        created_by: row.get("created_by"),
        created_at: TimeMs::new(row.get("created_at")),
    }
}

/// Create the wallet for `user_id` if it does not exist.
///
/// This is a write, so calling it first in a transaction takes the SQLite
/// write lock before any balance is read.
pub(super) async fn ensure_wallet_conn(
    conn: &mut SqliteConnection,
    user_id: i64,
    currency: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO wallets (user_id, balance, currency, is_frozen, updated_at)
        VALUES (?, '0', ?, 0, ?)
        ON CONFLICT(user_id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(currency)
    .bind(TimeMs::now().as_ms())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn sum_withdrawals_conn(
    conn: &mut SqliteConnection,
    wallet_id: i64,
    since: TimeMs,
) -> Result<Decimal, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT amount FROM transactions
        WHERE wallet_id = ? AND kind = 'debit' AND source = 'withdrawal' AND created_at >= ?
        "#,
    )
    .bind(wallet_id)
    .bind(since.as_ms())
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.iter().map(|r| decimal_col(r, "amount")).sum())
}

/// Apply one ledger movement to the wallet of `user_id` and record it.
///
/// Debits are refused on frozen wallets and when the balance would go
/// negative.
pub(super) async fn apply_ledger_entry(
    conn: &mut SqliteConnection,
    user_id: i64,
    entry: &LedgerEntry,
) -> Result<Transaction, LedgerError> {
    let row = sqlx::query(
        "SELECT id, user_id, balance, currency, is_frozen, updated_at FROM wallets WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(LedgerError::WalletNotFound(user_id))?;
    let wallet = wallet_from_row(&row);

    if entry.kind == TransactionKind::Debit && wallet.is_frozen {
        return Err(LedgerError::Frozen(user_id));
    }

    let balance_after = entry
        .kind
        .apply(wallet.balance, entry.amount)
        .ok_or(LedgerError::OutOfRange {
            amount: entry.amount,
        })?;
    if balance_after.is_negative() {
        return Err(LedgerError::InsufficientFunds {
            balance: wallet.balance,
            requested: entry.amount,
        });
    }

    let now = TimeMs::now();
    sqlx::query("UPDATE wallets SET balance = ?, updated_at = ? WHERE id = ?")
        .bind(balance_after.to_canonical_string())
        .bind(now.as_ms())
        .bind(wallet.id)
        .execute(&mut *conn)
        .await?;

    let reference = Transaction::new_reference();
    let id = sqlx::query(
        r#"
        INSERT INTO transactions (wallet_id, kind, source, amount, balance_before, balance_after,
                                  reference, description, ticket_id, created_by, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(wallet.id)
    .bind(entry.kind.as_str())
    .bind(entry.source.as_str())
    .bind(entry.amount.to_canonical_string())
    .bind(wallet.balance.to_canonical_string())
    .bind(balance_after.to_canonical_string())
    .bind(&reference)
    .bind(&entry.description)
    .bind(entry.ticket_id)
    .bind(entry.created_by)
    .bind(now.as_ms())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(Transaction {
        id,
        wallet_id: wallet.id,
        kind: entry.kind,
        source: entry.source,
        amount: entry.amount,
        balance_before: wallet.balance,
        balance_after,
        reference,
        description: entry.description.clone(),
        ticket_id: entry.ticket_id,
        created_by: entry.created_by,
        created_at: now,
    })
}

impl Repository {
    pub async fn get_wallet_by_user(&self, user_id: i64) -> Result<Option<Wallet>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT id, user_id, balance, currency, is_frozen, updated_at FROM wallets WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(wallet_from_row))
    }

    /// Return the wallet of `user_id`, creating an empty one if needed.
    pub async fn ensure_wallet(&self, user_id: i64, currency: &str) -> Result<Wallet, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        ensure_wallet_conn(&mut conn, user_id, currency).await?;
        drop(conn);
        self.get_wallet_by_user(user_id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn set_wallet_frozen(
        &self,
        user_id: i64,
        currency: &str,
        frozen: bool,
        audit: &NewAuditEntry,
    ) -> Result<Wallet, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        ensure_wallet_conn(&mut tx, user_id, currency).await?;
        sqlx::query("UPDATE wallets SET is_frozen = ?, updated_at = ? WHERE user_id = ?")
            .bind(frozen as i64)
            .bind(TimeMs::now().as_ms())
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        insert_audit_conn(&mut tx, audit).await?;
        tx.commit().await?;

        self.get_wallet_by_user(user_id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    /// Approve a financial ticket and move the money in one transaction.
    ///
    /// The ticket status update runs first and only matches tickets that are
    /// still open or in progress, so a ticket can be settled at most once.
    pub async fn settle_ticket(
        &self,
        settlement: &TicketSettlement,
    ) -> Result<Transaction, LedgerError> {
        let detail_table = match settlement.kind {
            TicketKind::Withdrawal => "withdrawal_details",
            TicketKind::Deposit => "deposit_details",
            TicketKind::Technical => return Err(LedgerError::AlreadySettled(settlement.ticket_id)),
        };

        let mut tx = self.pool.begin().await?;
        let now = TimeMs::now().as_ms();

        let updated = sqlx::query(
            r#"
            UPDATE tickets
            SET status = 'approved', resolution_note = COALESCE(?, resolution_note), updated_at = ?
            WHERE id = ? AND status IN ('open', 'in_progress') AND deleted_at IS NULL
            "#,
        )
        .bind(settlement.note.as_deref())
        .bind(now)
        .bind(settlement.ticket_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(LedgerError::AlreadySettled(settlement.ticket_id));
        }

        sqlx::query(&format!(
            "UPDATE {} SET approved_amount = ? WHERE ticket_id = ?",
            detail_table
        ))
        .bind(settlement.entry.amount.to_canonical_string())
        .bind(settlement.ticket_id)
        .execute(&mut *tx)
        .await?;

        ensure_wallet_conn(&mut tx, settlement.user_id, &settlement.currency).await?;
        if let (TransactionKind::Debit, Some(daily)) =
            (settlement.entry.kind, settlement.daily_limit)
        {
            let wallet_id: i64 = sqlx::query("SELECT id FROM wallets WHERE user_id = ?")
                .bind(settlement.user_id)
                .fetch_one(&mut *tx)
                .await?
                .get("id");
            let used = sum_withdrawals_conn(&mut tx, wallet_id, daily.since).await?;
            let requested = settlement.entry.amount;
            if !used
                .checked_add(requested)
                .is_some_and(|total| total <= daily.limit)
            {
                return Err(LedgerError::DailyLimit {
                    used,
                    requested,
                    limit: daily.limit,
                });
            }
        }
        let transaction = apply_ledger_entry(&mut tx, settlement.user_id, &settlement.entry).await?;

        if let Some((rate_percent, amount)) = settlement.commission {
            if amount.is_positive() {
                sqlx::query(
                    r#"
                    INSERT INTO commissions (user_id, ticket_id, kind, base_amount, rate_percent,
                                             amount, status, created_at)
                    VALUES (?, ?, ?, ?, ?, ?, 'pending', ?)
                    "#,
                )
                .bind(settlement.user_id)
                .bind(settlement.ticket_id)
                .bind(settlement.kind.as_str())
                .bind(settlement.entry.amount.to_canonical_string())
                .bind(rate_percent.to_canonical_string())
                .bind(amount.to_canonical_string())
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
        }

        insert_audit_conn(&mut tx, &settlement.audit).await?;
        tx.commit().await?;
        Ok(transaction)
    }

    /// Reject a financial ticket that is still awaiting a decision.
    pub async fn reject_ticket(
        &self,
        ticket_id: i64,
        reason: &str,
        audit: &NewAuditEntry,
    ) -> Result<(), LedgerError> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            r#"
            UPDATE tickets SET status = 'rejected', resolution_note = ?, updated_at = ?
            WHERE id = ? AND status IN ('open', 'in_progress') AND deleted_at IS NULL
              AND kind IN ('withdrawal', 'deposit')
            "#,
        )
        .bind(reason)
        .bind(TimeMs::now().as_ms())
        .bind(ticket_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(LedgerError::AlreadySettled(ticket_id));
        }
        insert_audit_conn(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Manual credit or debit by an administrator.
    pub async fn apply_manual_entry(
        &self,
        user_id: i64,
        currency: &str,
        entry: &LedgerEntry,
        audit: &NewAuditEntry,
    ) -> Result<Transaction, LedgerError> {
        let mut tx = self.pool.begin().await?;
        ensure_wallet_conn(&mut tx, user_id, currency).await?;
        let transaction = apply_ledger_entry(&mut tx, user_id, entry).await?;
        insert_audit_conn(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(transaction)
    }

    pub async fn list_transactions(
        &self,
        wallet_id: i64,
        filter: &TransactionFilter,
        page: Page,
    ) -> Result<Paged<Transaction>, sqlx::Error> {
        let mut count_qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS n FROM transactions");
        filter.push_where(&mut count_qb, wallet_id);
        let total: i64 = count_qb.build().fetch_one(&self.pool).await?.get("n");

        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM transactions",
            TRANSACTION_COLUMNS
        ));
        filter.push_where(&mut qb, wallet_id);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = qb.build().fetch_all(&self.pool).await?;

        Ok(Paged::new(
            rows.iter().map(transaction_from_row).collect(),
            total,
            page,
        ))
    }

    /// Every matching ledger row, oldest first, for export.
    pub async fn all_transactions(
        &self,
        wallet_id: i64,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, sqlx::Error> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM transactions",
            TRANSACTION_COLUMNS
        ));
        filter.push_where(&mut qb, wallet_id);
        qb.push(" ORDER BY created_at ASC, id ASC");
        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(transaction_from_row).collect())
    }

    /// Sum of withdrawal debits on a wallet at or after `since`.
    ///
    /// Summed in Rust: SQLite's SUM returns REAL and would lose precision.
    pub async fn sum_withdrawals_since(
        &self,
        wallet_id: i64,
        since: TimeMs,
    ) -> Result<Decimal, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        sum_withdrawals_conn(&mut conn, wallet_id, since).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{create_user, setup_test_db};
    use super::*;
    use crate::domain::{
        NewTicket, Role, TicketDetail, TicketPriority, TicketStatus, WithdrawalDetail,
    };
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn audit(action: &str) -> NewAuditEntry {
        NewAuditEntry::new(Some(1), action, "wallet", None, serde_json::json!({}))
    }

    fn entry(kind: TransactionKind, amount: &str) -> LedgerEntry {
        LedgerEntry {
            kind,
            source: TransactionSource::Manual,
            amount: d(amount),
            description: "test".into(),
            ticket_id: None,
            created_by: None,
        }
    }

    #[tokio::test]
    async fn test_manual_entries_track_balance() {
        let (repo, _temp) = setup_test_db().await;
        let user = create_user(&repo, "csp@example.com", Role::Csp).await;

        let t1 = repo
            .apply_manual_entry(user, "NGN", &entry(TransactionKind::Credit, "500"), &audit("credit"))
            .await
            .unwrap();
        assert_eq!(t1.balance_before, Decimal::zero());
        assert_eq!(t1.balance_after, d("500"));

        let t2 = repo
            .apply_manual_entry(user, "NGN", &entry(TransactionKind::Debit, "120.25"), &audit("debit"))
            .await
            .unwrap();
        assert_eq!(t2.balance_after, d("379.75"));

        let wallet = repo.get_wallet_by_user(user).await.unwrap().unwrap();
        assert_eq!(wallet.balance, d("379.75"));
        assert_ne!(t1.reference, t2.reference);
    }

    #[tokio::test]
    async fn test_overdraft_rolls_back() {
        let (repo, _temp) = setup_test_db().await;
        let user = create_user(&repo, "csp@example.com", Role::Csp).await;

        let err = repo
            .apply_manual_entry(user, "NGN", &entry(TransactionKind::Debit, "1"), &audit("debit"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));

        let wallet = repo.ensure_wallet(user, "NGN").await.unwrap();
        let page = repo
            .list_transactions(wallet.id, &TransactionFilter::default(), Page::default())
            .await
            .unwrap();
        assert_eq!(page.total, 0);
        assert_eq!(wallet.balance, Decimal::zero());
    }

    #[tokio::test]
    async fn test_credit_past_decimal_range_is_refused() {
        let (repo, _temp) = setup_test_db().await;
        let user = create_user(&repo, "csp@example.com", Role::Csp).await;
        let max = "79228162514264337593543950335";

        repo.apply_manual_entry(user, "NGN", &entry(TransactionKind::Credit, max), &audit("c"))
            .await
            .unwrap();
        let err = repo
            .apply_manual_entry(user, "NGN", &entry(TransactionKind::Credit, max), &audit("c"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::OutOfRange { .. }));

        let wallet = repo.get_wallet_by_user(user).await.unwrap().unwrap();
        assert_eq!(wallet.balance, d(max));
    }

    #[tokio::test]
    async fn test_frozen_wallet_refuses_debit_only() {
        let (repo, _temp) = setup_test_db().await;
        let user = create_user(&repo, "csp@example.com", Role::Csp).await;
        let wallet = repo
            .set_wallet_frozen(user, "NGN", true, &audit("freeze"))
            .await
            .unwrap();
        assert!(wallet.is_frozen);

        repo.apply_manual_entry(user, "NGN", &entry(TransactionKind::Credit, "10"), &audit("c"))
            .await
            .unwrap();
        let err = repo
            .apply_manual_entry(user, "NGN", &entry(TransactionKind::Debit, "5"), &audit("d"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Frozen(_)));
    }

    #[tokio::test]
    async fn test_settle_ticket_once() {
        let (repo, _temp) = setup_test_db().await;
        let user = create_user(&repo, "csp@example.com", Role::Csp).await;
        repo.apply_manual_entry(user, "NGN", &entry(TransactionKind::Credit, "1000"), &audit("c"))
            .await
            .unwrap();
        let ticket_id = repo
            .insert_ticket(&NewTicket {
                subject: "Withdraw".into(),
                description: "".into(),
                priority: TicketPriority::Medium,
                created_by: user,
                detail: TicketDetail::Withdrawal(WithdrawalDetail {
                    amount: d("400"),
                    bank_name: "B".into(),
                    account_number: "1".into(),
                    account_name: "A".into(),
                    approved_amount: None,
                }),
            })
            .await
            .unwrap();

        let settlement = TicketSettlement {
            ticket_id,
            kind: TicketKind::Withdrawal,
            user_id: user,
            currency: "NGN".into(),
            entry: LedgerEntry {
                kind: TransactionKind::Debit,
                source: TransactionSource::Withdrawal,
                amount: d("390"),
                description: "withdrawal".into(),
                ticket_id: Some(ticket_id),
                created_by: None,
            },
            note: Some("ok".into()),
            commission: Some((d("1"), d("3.9"))),
            daily_limit: Some(DailyLimit {
                limit: d("1000"),
                since: TimeMs::new(0),
            }),
            audit: audit("ticket.approve"),
        };

        let txn = repo.settle_ticket(&settlement).await.unwrap();
        assert_eq!(txn.balance_after, d("610"));
        assert!(matches!(
            repo.settle_ticket(&settlement).await,
            Err(LedgerError::AlreadySettled(_))
        ));

        let wallet = repo.get_wallet_by_user(user).await.unwrap().unwrap();
        assert_eq!(wallet.balance, d("610"));
        assert_eq!(
            repo.sum_withdrawals_since(wallet.id, TimeMs::new(0))
                .await
                .unwrap(),
            d("390")
        );
        match repo
            .get_ticket_detail(ticket_id, TicketKind::Withdrawal)
            .await
            .unwrap()
        {
            Some(TicketDetail::Withdrawal(w)) => assert_eq!(w.approved_amount, Some(d("390"))),
            other => panic!("unexpected detail: {:?}", other),
        }
    }

    async fn withdrawal_ticket(repo: &Repository, user: i64, amount: &str) -> i64 {
        repo.insert_ticket(&NewTicket {
            subject: "Withdraw".into(),
            description: "".into(),
            priority: TicketPriority::Medium,
            created_by: user,
            detail: TicketDetail::Withdrawal(WithdrawalDetail {
                amount: d(amount),
                bank_name: "B".into(),
                account_number: "1".into(),
                account_name: "A".into(),
                approved_amount: None,
            }),
        })
        .await
        .unwrap()
    }

    fn withdrawal_settlement(ticket_id: i64, user: i64, amount: &str) -> TicketSettlement {
        TicketSettlement {
            ticket_id,
            kind: TicketKind::Withdrawal,
            user_id: user,
            currency: "NGN".into(),
            entry: LedgerEntry {
                kind: TransactionKind::Debit,
                source: TransactionSource::Withdrawal,
                amount: d(amount),
                description: "withdrawal".into(),
                ticket_id: Some(ticket_id),
                created_by: None,
            },
            note: None,
            commission: None,
            daily_limit: Some(DailyLimit {
                limit: d("500"),
                since: TimeMs::now().start_of_utc_day(),
            }),
            audit: audit("ticket.approve"),
        }
    }

    #[tokio::test]
    async fn test_daily_limit_rechecked_inside_settlement() {
        let (repo, _temp) = setup_test_db().await;
        let user = create_user(&repo, "csp@example.com", Role::Csp).await;
        repo.apply_manual_entry(user, "NGN", &entry(TransactionKind::Credit, "1000"), &audit("c"))
            .await
            .unwrap();

        // Both requests passed a pre-check that saw nothing withdrawn yet.
        let first = withdrawal_ticket(&repo, user, "300").await;
        let second = withdrawal_ticket(&repo, user, "300").await;
        repo.settle_ticket(&withdrawal_settlement(first, user, "300"))
            .await
            .unwrap();
        let err = repo
            .settle_ticket(&withdrawal_settlement(second, user, "300"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::DailyLimit { .. }));

        let ticket = repo.get_ticket(second).await.unwrap().unwrap();
        assert_eq!(ticket.status, TicketStatus::Open);
        let wallet = repo.get_wallet_by_user(user).await.unwrap().unwrap();
        assert_eq!(wallet.balance, d("700"));
    }
}
