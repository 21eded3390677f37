//! Audit trail, security log, risk flags and risk limits.

use super::{enum_col, Repository};
use crate::domain::{
    AuditEntry, Page, Paged, RiskFlag, RiskFlagKind, RiskLimits, SecurityEvent, TimeMs,
};
use sqlx::sqlite::{Sqlite, SqliteConnection, SqliteRow};
use sqlx::{QueryBuilder, Row};
use tracing::warn;

/// An audit row to be written.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub actor_id: Option<i64>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub details: serde_json::Value,
}

impl NewAuditEntry {
    pub fn new(
        actor_id: Option<i64>,
        action: &str,
        entity_type: &str,
        entity_id: Option<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            actor_id,
            action: action.to_string(),
            entity_type: entity_type.to_string(),
            entity_id,
            details,
        }
    }
}

pub(super) async fn insert_audit_conn(
    conn: &mut SqliteConnection,
    entry: &NewAuditEntry,
) -> Result<i64, sqlx::Error> {
    let id = sqlx::query(
        r#"
        INSERT INTO audit_logs (actor_id, action, entity_type, entity_id, details, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.actor_id)
    .bind(&entry.action)
    .bind(&entry.entity_type)
    .bind(entry.entity_id.as_deref())
    .bind(entry.details.to_string())
    .bind(TimeMs::now().as_ms())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();
    Ok(id)
}

fn audit_from_row(row: &SqliteRow) -> AuditEntry {
    let raw: String = row.get("details");
    let details = serde_json::from_str(&raw).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to parse audit details, keeping raw text");
        serde_json::Value::String(raw)
    });
    AuditEntry {
        id: row.get("id"),
        actor_id: row.get("actor_id"),
        action: row.get("action"),
        entity_type: row.get("entity_type"),
        entity_id: row.get("entity_id"),
        details,
        created_at: TimeMs::new(row.get("created_at")),
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub actor_id: Option<i64>,
    pub action: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub from_ms: Option<i64>,
    pub to_ms: Option<i64>,
}

impl AuditFilter {
    fn push_where(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        qb.push(" WHERE 1 = 1");
        if let Some(actor_id) = self.actor_id {
            qb.push(" AND actor_id = ").push_bind(actor_id);
        }
        if let Some(action) = &self.action {
            qb.push(" AND action = ").push_bind(action.clone());
        }
        if let Some(entity_type) = &self.entity_type {
            qb.push(" AND entity_type = ").push_bind(entity_type.clone());
        }
        if let Some(entity_id) = &self.entity_id {
            qb.push(" AND entity_id = ").push_bind(entity_id.clone());
        }
        if let Some(from_ms) = self.from_ms {
            qb.push(" AND created_at >= ").push_bind(from_ms);
        }
        if let Some(to_ms) = self.to_ms {
            qb.push(" AND created_at <= ").push_bind(to_ms);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SecurityFilter {
    pub event: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RiskFlagFilter {
    pub resolved: Option<bool>,
    pub user_id: Option<i64>,
}

impl Repository {
    // =========================================================================
    // Audit trail
    // =========================================================================

    pub async fn insert_audit(&self, entry: &NewAuditEntry) -> Result<i64, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        insert_audit_conn(&mut conn, entry).await
    }

    pub async fn list_audit(
        &self,
        filter: &AuditFilter,
        page: Page,
    ) -> Result<Paged<AuditEntry>, sqlx::Error> {
        let mut count_qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS n FROM audit_logs");
        filter.push_where(&mut count_qb);
        let total: i64 = count_qb.build().fetch_one(&self.pool).await?.get("n");

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT id, actor_id, action, entity_type, entity_id, details, created_at FROM audit_logs",
        );
        filter.push_where(&mut qb);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = qb.build().fetch_all(&self.pool).await?;

        Ok(Paged::new(
            rows.iter().map(audit_from_row).collect(),
            total,
            page,
        ))
    }

    /// Every matching audit row, oldest first, for export.
    pub async fn all_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, sqlx::Error> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT id, actor_id, action, entity_type, entity_id, details, created_at FROM audit_logs",
        );
        filter.push_where(&mut qb);
        qb.push(" ORDER BY created_at ASC, id ASC");
        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(audit_from_row).collect())
    }

    // =========================================================================
    // Security log
    // =========================================================================

    pub async fn insert_security_event(
        &self,
        user_id: Option<i64>,
        email: Option<&str>,
        event: &str,
        detail: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO security_logs (user_id, email, event, detail, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(email)
        .bind(event)
        .bind(detail)
        .bind(TimeMs::now().as_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_security_events(
        &self,
        filter: &SecurityFilter,
        page: Page,
    ) -> Result<Paged<SecurityEvent>, sqlx::Error> {
        fn push_where(qb: &mut QueryBuilder<'_, Sqlite>, filter: &SecurityFilter) {
            qb.push(" WHERE 1 = 1");
            if let Some(event) = &filter.event {
                qb.push(" AND event = ").push_bind(event.clone());
            }
            if let Some(email) = &filter.email {
                qb.push(" AND email = ").push_bind(email.clone());
            }
        }

        let mut count_qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS n FROM security_logs");
        push_where(&mut count_qb, filter);
        let total: i64 = count_qb.build().fetch_one(&self.pool).await?.get("n");

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT id, user_id, email, event, detail, created_at FROM security_logs",
        );
        push_where(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = qb.build().fetch_all(&self.pool).await?;

        let items = rows
            .iter()
            .map(|r| SecurityEvent {
                id: r.get("id"),
                user_id: r.get("user_id"),
                email: r.get("email"),
                event: r.get("event"),
                detail: r.get("detail"),
                created_at: TimeMs::new(r.get("created_at")),
            })
            .collect();
        Ok(Paged::new(items, total, page))
    }

    // =========================================================================
    // Risk flags
    // =========================================================================

    pub async fn insert_risk_flag(
        &self,
        user_id: i64,
        ticket_id: Option<i64>,
        kind: RiskFlagKind,
        detail: &str,
    ) -> Result<i64, sqlx::Error> {
        let id = sqlx::query(
            r#"
            INSERT INTO risk_flags (user_id, ticket_id, kind, detail, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(ticket_id)
        .bind(kind.as_str())
        .bind(detail)
        .bind(TimeMs::now().as_ms())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    pub async fn list_risk_flags(
        &self,
        filter: &RiskFlagFilter,
        page: Page,
    ) -> Result<Paged<RiskFlag>, sqlx::Error> {
        fn push_where(qb: &mut QueryBuilder<'_, Sqlite>, filter: &RiskFlagFilter) {
            qb.push(" WHERE 1 = 1");
            if let Some(resolved) = filter.resolved {
                qb.push(" AND resolved = ").push_bind(resolved as i64);
            }
            if let Some(user_id) = filter.user_id {
                qb.push(" AND user_id = ").push_bind(user_id);
            }
        }

        let mut count_qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS n FROM risk_flags");
        push_where(&mut count_qb, filter);
        let total: i64 = count_qb.build().fetch_one(&self.pool).await?.get("n");

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT id, user_id, ticket_id, kind, detail, resolved, resolved_by, created_at FROM risk_flags",
        );
        push_where(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = qb.build().fetch_all(&self.pool).await?;

        let items = rows
            .iter()
            .map(|r| RiskFlag {
                id: r.get("id"),
                user_id: r.get("user_id"),
                ticket_id: r.get("ticket_id"),
                kind: enum_col(r, "kind", RiskFlagKind::Velocity),
                detail: r.get("detail"),
                resolved: r.get::<i64, _>("resolved") != 0,
                resolved_by: r.get("resolved_by"),
                created_at: TimeMs::new(r.get("created_at")),
            })
            .collect();
        Ok(Paged::new(items, total, page))
    }

    /// Mark an open flag resolved. Returns false if missing or already resolved.
    pub async fn resolve_risk_flag(&self, id: i64, resolved_by: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE risk_flags SET resolved = 1, resolved_by = ? WHERE id = ? AND resolved = 0",
        )
        .bind(resolved_by)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Risk limits
    // =========================================================================

    /// Write `defaults` for every limit key not yet stored.
    pub async fn seed_risk_limits(&self, defaults: &RiskLimits) -> Result<(), sqlx::Error> {
        let now = TimeMs::now().as_ms();
        for (key, value) in defaults.to_pairs() {
            sqlx::query(
                "INSERT INTO risk_limits (key, value, updated_at) VALUES (?, ?, ?) ON CONFLICT(key) DO NOTHING",
            )
            .bind(key)
            .bind(value)
            .bind(now)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn load_risk_limit_pairs(&self) -> Result<Vec<(String, String)>, sqlx::Error> {
        let rows = sqlx::query("SELECT key, value FROM risk_limits ORDER BY key")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| (r.get("key"), r.get("value"))).collect())
    }

    pub async fn store_risk_limits(&self, limits: &RiskLimits) -> Result<(), sqlx::Error> {
        let now = TimeMs::now().as_ms();
        let mut tx = self.pool.begin().await?;
        for (key, value) in limits.to_pairs() {
            sqlx::query(
                r#"
                INSERT INTO risk_limits (key, value, updated_at) VALUES (?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
                "#,
            )
            .bind(key)
            .bind(value)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{create_user, setup_test_db};
    use super::*;
    use crate::domain::{Decimal, Role};

    #[tokio::test]
    async fn test_audit_insert_and_filter() {
        let (repo, _temp) = setup_test_db().await;
        repo.insert_audit(&NewAuditEntry::new(
            Some(1),
            "user.create",
            "user",
            Some("7".into()),
            serde_json::json!({"role": "csp"}),
        ))
        .await
        .unwrap();
        repo.insert_audit(&NewAuditEntry::new(
            Some(1),
            "ticket.approve",
            "ticket",
            Some("3".into()),
            serde_json::json!({}),
        ))
        .await
        .unwrap();

        let page = repo
            .list_audit(
                &AuditFilter {
                    entity_type: Some("user".into()),
                    ..Default::default()
                },
                Page::default(),
            )
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].details["role"], "csp");

        let all = repo.all_audit(&AuditFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].action, "user.create");
    }

    #[tokio::test]
    async fn test_risk_flags_resolve_once() {
        let (repo, _temp) = setup_test_db().await;
        let user = create_user(&repo, "csp@example.com", Role::Csp).await;
        let admin = create_user(&repo, "admin@example.com", Role::Admin).await;
        let id = repo
            .insert_risk_flag(user, None, RiskFlagKind::Velocity, "6 requests in 1h")
            .await
            .unwrap();

        assert!(repo.resolve_risk_flag(id, admin).await.unwrap());
        assert!(!repo.resolve_risk_flag(id, admin).await.unwrap());

        let open = repo
            .list_risk_flags(
                &RiskFlagFilter {
                    resolved: Some(false),
                    ..Default::default()
                },
                Page::default(),
            )
            .await
            .unwrap();
        assert_eq!(open.total, 0);
    }

    #[tokio::test]
    async fn test_risk_limits_seed_does_not_overwrite() {
        let (repo, _temp) = setup_test_db().await;
        let mut limits = RiskLimits {
            single_transaction_limit: Decimal::from(100),
            daily_withdrawal_limit: Decimal::from(500),
            min_transaction_amount: Decimal::from(1),
            velocity_max_requests_per_hour: 3,
        };
        repo.seed_risk_limits(&limits).await.unwrap();

        limits.daily_withdrawal_limit = Decimal::from(900);
        repo.store_risk_limits(&limits).await.unwrap();

        let mut defaults = limits.clone();
        defaults.daily_withdrawal_limit = Decimal::from(1);
        repo.seed_risk_limits(&defaults).await.unwrap();

        let pairs = repo.load_risk_limit_pairs().await.unwrap();
        assert_eq!(defaults.overlay(&pairs), limits);
    }
}
