//! Ticket persistence: header rows, per-kind details, comments and stats.

use super::{decimal_col, enum_col, like_pattern, opt_decimal_col, Repository};
use crate::domain::{
    Decimal, DepositDetail, NewTicket, Page, Paged, TechnicalDetail, Ticket, TicketComment,
    TicketDetail, TicketKind, TicketPriority, TicketStatus, TimeMs, WithdrawalDetail,
};
use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::{QueryBuilder, Row};
use std::collections::BTreeMap;

const TICKET_COLUMNS: &str = "id, reference, kind, subject, description, priority, status, \
     created_by, assigned_to, resolution_note, flagged, created_at, updated_at";

fn ticket_from_row(row: &SqliteRow) -> Ticket {
    let id: i64 = row.get("id");
    let reference: Option<String> = row.get("reference");
    Ticket {
        id,
        reference: reference.unwrap_or_else(|| Ticket::reference_for(id)),
        kind: enum_col(row, "kind", TicketKind::Technical),
        subject: row.get("subject"),
        description: row.get("description"),
        priority: enum_col(row, "priority", TicketPriority::Medium),
        status: enum_col(row, "status", TicketStatus::Open),
        created_by: row.get("created_by"),
        assigned_to: row.get("assigned_to"),
        resolution_note: row.get("resolution_note"),
        flagged: row.get::<i64, _>("flagged") != 0,
        created_at: TimeMs::new(row.get("created_at")),
        updated_at: TimeMs::new(row.get("updated_at")),
    }
}

/// Ticket list filters. All fields are optional and combined with AND.
#[derive(Debug, Clone, Default)]
pub struct TicketFilter {
    pub kind: Option<TicketKind>,
    pub status: Option<TicketStatus>,
    pub priority: Option<TicketPriority>,
    pub assigned_to: Option<i64>,
    pub created_by: Option<i64>,
    pub flagged: Option<bool>,
    pub search: Option<String>,
    pub from_ms: Option<i64>,
    pub to_ms: Option<i64>,
}

impl TicketFilter {
    fn push_where(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        qb.push(" WHERE deleted_at IS NULL");
        if let Some(kind) = self.kind {
            qb.push(" AND kind = ").push_bind(kind.as_str());
        }
        if let Some(status) = self.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(priority) = self.priority {
            qb.push(" AND priority = ").push_bind(priority.as_str());
        }
        if let Some(assigned_to) = self.assigned_to {
            qb.push(" AND assigned_to = ").push_bind(assigned_to);
        }
        if let Some(created_by) = self.created_by {
            qb.push(" AND created_by = ").push_bind(created_by);
        }
        if let Some(flagged) = self.flagged {
            qb.push(" AND flagged = ").push_bind(flagged as i64);
        }
        if let Some(search) = self.search.as_deref().filter(|s| !s.trim().is_empty()) {
            let pattern = like_pattern(search);
            qb.push(" AND (subject LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR description LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR reference LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '\\')");
        }
        if let Some(from_ms) = self.from_ms {
            qb.push(" AND created_at >= ").push_bind(from_ms);
        }
        if let Some(to_ms) = self.to_ms {
            qb.push(" AND created_at <= ").push_bind(to_ms);
        }
    }
}

/// Dashboard counters over live tickets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TicketStats {
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
    pub by_kind: BTreeMap<String, i64>,
    pub flagged: i64,
    pub pending_withdrawal_total: Decimal,
    pub pending_deposit_total: Decimal,
}

impl Repository {
    /// Insert a ticket header and its detail row in one transaction.
    ///
    /// Returns the new ticket id.
    pub async fn insert_ticket(&self, new: &NewTicket) -> Result<i64, sqlx::Error> {
        let now = TimeMs::now().as_ms();
        let kind = new.detail.kind();
        let mut tx = self.pool.begin().await?;

        let id = sqlx::query(
            r#"
            INSERT INTO tickets (kind, subject, description, priority, status, created_by,
                                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(kind.as_str())
        .bind(&new.subject)
        .bind(&new.description)
        .bind(new.priority.as_str())
        .bind(TicketStatus::Open.as_str())
        .bind(new.created_by)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        sqlx::query("UPDATE tickets SET reference = ? WHERE id = ?")
            .bind(Ticket::reference_for(id))
            .bind(id)
            .execute(&mut *tx)
            .await?;

        match &new.detail {
            TicketDetail::Technical(t) => {
                sqlx::query(
                    "INSERT INTO technical_details (ticket_id, category, device_info) VALUES (?, ?, ?)",
                )
                .bind(id)
                .bind(&t.category)
                .bind(t.device_info.as_deref())
                .execute(&mut *tx)
                .await?;
            }
            TicketDetail::Withdrawal(w) => {
                sqlx::query(
                    r#"
                    INSERT INTO withdrawal_details
                        (ticket_id, amount, bank_name, account_number, account_name)
                    VALUES (?, ?, ?, ?, ?)
                    "#,
                )
                .bind(id)
                .bind(w.amount.to_canonical_string())
                .bind(&w.bank_name)
                .bind(&w.account_number)
                .bind(&w.account_name)
                .execute(&mut *tx)
                .await?;
            }
            TicketDetail::Deposit(d) => {
                sqlx::query(
                    r#"
                    INSERT INTO deposit_details
                        (ticket_id, amount, payment_method, payment_reference, proof_url)
                    VALUES (?, ?, ?, ?, ?)
                    "#,
                )
                .bind(id)
                .bind(d.amount.to_canonical_string())
                .bind(&d.payment_method)
                .bind(d.payment_reference.as_deref())
                .bind(d.proof_url.as_deref())
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(id)
    }

    pub async fn get_ticket(&self, id: i64) -> Result<Option<Ticket>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM tickets WHERE id = ? AND deleted_at IS NULL",
            TICKET_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(ticket_from_row))
    }

    pub async fn get_ticket_detail(
        &self,
        id: i64,
        kind: TicketKind,
    ) -> Result<Option<TicketDetail>, sqlx::Error> {
        let detail = match kind {
            TicketKind::Technical => sqlx::query(
                "SELECT category, device_info FROM technical_details WHERE ticket_id = ?",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|r| {
                TicketDetail::Technical(TechnicalDetail {
                    category: r.get("category"),
                    device_info: r.get("device_info"),
                })
            }),
            TicketKind::Withdrawal => sqlx::query(
                r#"
                SELECT amount, bank_name, account_number, account_name, approved_amount
                FROM withdrawal_details WHERE ticket_id = ?
                "#,
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|r| {
                TicketDetail::Withdrawal(WithdrawalDetail {
                    amount: decimal_col(&r, "amount"),
                    bank_name: r.get("bank_name"),
                    account_number: r.get("account_number"),
                    account_name: r.get("account_name"),
                    approved_amount: opt_decimal_col(&r, "approved_amount"),
                })
            }),
            TicketKind::Deposit => sqlx::query(
                r#"
                SELECT amount, payment_method, payment_reference, proof_url, approved_amount
                FROM deposit_details WHERE ticket_id = ?
                "#,
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|r| {
                TicketDetail::Deposit(DepositDetail {
                    amount: decimal_col(&r, "amount"),
                    payment_method: r.get("payment_method"),
                    payment_reference: r.get("payment_reference"),
                    proof_url: r.get("proof_url"),
                    approved_amount: opt_decimal_col(&r, "approved_amount"),
                })
            }),
        };
        Ok(detail)
    }

    pub async fn list_tickets(
        &self,
        filter: &TicketFilter,
        page: Page,
    ) -> Result<Paged<Ticket>, sqlx::Error> {
        let mut count_qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS n FROM tickets");
        filter.push_where(&mut count_qb);
        let total: i64 = count_qb.build().fetch_one(&self.pool).await?.get("n");

        let mut qb =
            QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM tickets", TICKET_COLUMNS));
        filter.push_where(&mut qb);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = qb.build().fetch_all(&self.pool).await?;

        Ok(Paged::new(
            rows.iter().map(ticket_from_row).collect(),
            total,
            page,
        ))
    }

    /// Move a ticket from `from` to `to`. The update only applies if the
    /// ticket is still in `from`; returns false otherwise.
    pub async fn update_ticket_status(
        &self,
        id: i64,
        from: TicketStatus,
        to: TicketStatus,
        note: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE tickets
            SET status = ?, resolution_note = COALESCE(?, resolution_note), updated_at = ?
            WHERE id = ? AND status = ? AND deleted_at IS NULL
            "#,
        )
        .bind(to.as_str())
        .bind(note)
        .bind(TimeMs::now().as_ms())
        .bind(id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn assign_ticket(&self, id: i64, assignee: Option<i64>) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE tickets SET assigned_to = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(assignee)
        .bind(TimeMs::now().as_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_ticket_flagged(&self, id: i64, flagged: bool) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE tickets SET flagged = ? WHERE id = ?")
            .bind(flagged as i64)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn soft_delete_ticket(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE tickets SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
                .bind(TimeMs::now().as_ms())
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Comments
    // =========================================================================

    pub async fn insert_comment(
        &self,
        ticket_id: i64,
        author_id: i64,
        body: &str,
    ) -> Result<i64, sqlx::Error> {
        let now = TimeMs::now().as_ms();
        let id = sqlx::query(
            "INSERT INTO ticket_comments (ticket_id, author_id, body, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(ticket_id)
        .bind(author_id)
        .bind(body)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        sqlx::query("UPDATE tickets SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(ticket_id)
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn list_comments(&self, ticket_id: i64) -> Result<Vec<TicketComment>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.ticket_id, c.author_id, u.full_name AS author_name, c.body, c.created_at
            FROM ticket_comments c
            JOIN users u ON u.id = c.author_id
            WHERE c.ticket_id = ?
            ORDER BY c.created_at ASC, c.id ASC
            "#,
        )
        .bind(ticket_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| TicketComment {
                id: r.get("id"),
                ticket_id: r.get("ticket_id"),
                author_id: r.get("author_id"),
                author_name: r.get("author_name"),
                body: r.get("body"),
                created_at: TimeMs::new(r.get("created_at")),
            })
            .collect())
    }

    // =========================================================================
    // Statistics and risk lookups
    // =========================================================================

    pub async fn ticket_stats(&self) -> Result<TicketStats, sqlx::Error> {
        let mut stats = TicketStats::default();

        let rows = sqlx::query(
            r#"
            SELECT kind, status, flagged, COUNT(*) AS n
            FROM tickets WHERE deleted_at IS NULL
            GROUP BY kind, status, flagged
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        for row in rows {
            let kind: String = row.get("kind");
            let status: String = row.get("status");
            let flagged: i64 = row.get("flagged");
            let n: i64 = row.get("n");
            stats.total += n;
            *stats.by_kind.entry(kind).or_insert(0) += n;
            *stats.by_status.entry(status).or_insert(0) += n;
            if flagged != 0 {
                stats.flagged += n;
            }
        }

        // Summed in Rust to keep decimal precision.
        stats.pending_withdrawal_total = self.sum_pending_amounts("withdrawal_details").await?;
        stats.pending_deposit_total = self.sum_pending_amounts("deposit_details").await?;
        Ok(stats)
    }

    async fn sum_pending_amounts(&self, detail_table: &str) -> Result<Decimal, sqlx::Error> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT d.amount
            FROM {} d
            JOIN tickets t ON t.id = d.ticket_id
            WHERE t.deleted_at IS NULL AND t.status IN ('open', 'in_progress')
            "#,
            detail_table
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| decimal_col(r, "amount")).sum())
    }

    /// Financial tickets opened by `user_id` at or after `since`.
    pub async fn count_financial_tickets_since(
        &self,
        user_id: i64,
        since: TimeMs,
    ) -> Result<i64, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM tickets
            WHERE created_by = ? AND created_at >= ? AND kind IN ('withdrawal', 'deposit')
              AND deleted_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(since.as_ms())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("n"))
    }

    /// Ids of earlier tickets with the same kind, amount and (for
    /// withdrawals) destination account, opened at or after `since`.
    pub async fn find_duplicate_requests(
        &self,
        user_id: i64,
        detail: &TicketDetail,
        since: TimeMs,
        exclude_ticket: i64,
    ) -> Result<Vec<i64>, sqlx::Error> {
        let rows = match detail {
            TicketDetail::Technical(_) => return Ok(Vec::new()),
            TicketDetail::Withdrawal(w) => {
                sqlx::query(
                    r#"
                    SELECT t.id FROM tickets t
                    JOIN withdrawal_details d ON d.ticket_id = t.id
                    WHERE t.created_by = ? AND t.created_at >= ? AND t.id != ?
                      AND t.deleted_at IS NULL AND d.amount = ? AND d.account_number = ?
                    ORDER BY t.id
                    "#,
                )
                .bind(user_id)
                .bind(since.as_ms())
                .bind(exclude_ticket)
                .bind(w.amount.to_canonical_string())
                .bind(&w.account_number)
                .fetch_all(&self.pool)
                .await?
            }
            TicketDetail::Deposit(d) => {
                sqlx::query(
                    r#"
                    SELECT t.id FROM tickets t
                    JOIN deposit_details d ON d.ticket_id = t.id
                    WHERE t.created_by = ? AND t.created_at >= ? AND t.id != ?
                      AND t.deleted_at IS NULL AND d.amount = ?
                    ORDER BY t.id
                    "#,
                )
                .bind(user_id)
                .bind(since.as_ms())
                .bind(exclude_ticket)
                .bind(d.amount.to_canonical_string())
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }
}
