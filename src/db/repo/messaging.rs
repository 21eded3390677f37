//! Direct messages, broadcasts and shared resources.

use super::{like_pattern, Repository};
use crate::domain::{
    Broadcast, Conversation, Message, NewBroadcast, NewResource, Page, Paged, Resource, Role,
    TimeMs,
};
use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::{QueryBuilder, Row};
use std::str::FromStr;

fn message_from_row(row: &SqliteRow) -> Message {
    Message {
        id: row.get("id"),
        sender_id: row.get("sender_id"),
        recipient_id: row.get("recipient_id"),
        body: row.get("body"),
        read_at: row.get::<Option<i64>, _>("read_at").map(TimeMs::new),
        created_at: TimeMs::new(row.get("created_at")),
    }
}

fn broadcast_from_row(row: &SqliteRow) -> Broadcast {
    let target_role: Option<String> = row.get("target_role");
    Broadcast {
        id: row.get("id"),
        title: row.get("title"),
        body: row.get("body"),
        target_role: target_role.and_then(|r| Role::from_str(&r).ok()),
        priority: row.get("priority"),
        created_by: row.get("created_by"),
        expires_at: row.get::<Option<i64>, _>("expires_at").map(TimeMs::new),
        created_at: TimeMs::new(row.get("created_at")),
    }
}

fn resource_from_row(row: &SqliteRow) -> Resource {
    Resource {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        category: row.get("category"),
        url: row.get("url"),
        uploaded_by: row.get("uploaded_by"),
        created_at: TimeMs::new(row.get("created_at")),
    }
}

const MESSAGE_COLUMNS: &str = "id, sender_id, recipient_id, body, read_at, created_at";
const BROADCAST_COLUMNS: &str =
    "id, title, body, target_role, priority, created_by, expires_at, created_at";

impl Repository {
    // =========================================================================
    // Direct messages
    // =========================================================================

    pub async fn insert_message(
        &self,
        sender_id: i64,
        recipient_id: i64,
        body: &str,
    ) -> Result<Message, sqlx::Error> {
        let now = TimeMs::now();
        let id = sqlx::query(
            "INSERT INTO messages (sender_id, recipient_id, body, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(sender_id)
        .bind(recipient_id)
        .bind(body)
        .bind(now.as_ms())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(Message {
            id,
            sender_id,
            recipient_id,
            body: body.to_string(),
            read_at: None,
            created_at: now,
        })
    }

    pub async fn get_message(&self, id: i64) -> Result<Option<Message>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM messages WHERE id = ? AND deleted_at IS NULL",
            MESSAGE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(message_from_row))
    }

    /// Messages exchanged between two users, newest first.
    pub async fn list_thread(
        &self,
        user_id: i64,
        partner_id: i64,
        page: Page,
    ) -> Result<Paged<Message>, sqlx::Error> {
        let pair_clause = "((sender_id = ? AND recipient_id = ?) OR (sender_id = ? AND recipient_id = ?)) \
             AND deleted_at IS NULL";

        let total: i64 = sqlx::query(&format!(
            "SELECT COUNT(*) AS n FROM messages WHERE {}",
            pair_clause
        ))
        .bind(user_id)
        .bind(partner_id)
        .bind(partner_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?
        .get("n");

        let rows = sqlx::query(&format!(
            "SELECT {} FROM messages WHERE {} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            MESSAGE_COLUMNS, pair_clause
        ))
        .bind(user_id)
        .bind(partner_id)
        .bind(partner_id)
        .bind(user_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(Paged::new(
            rows.iter().map(message_from_row).collect(),
            total,
            page,
        ))
    }

    /// Mark everything `partner_id` sent to `user_id` as read.
    pub async fn mark_thread_read(&self, user_id: i64, partner_id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE messages SET read_at = ?
            WHERE recipient_id = ? AND sender_id = ? AND read_at IS NULL AND deleted_at IS NULL
            "#,
        )
        .bind(TimeMs::now().as_ms())
        .bind(user_id)
        .bind(partner_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn unread_message_count(&self, user_id: i64) -> Result<i64, sqlx::Error> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM messages WHERE recipient_id = ? AND read_at IS NULL AND deleted_at IS NULL",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("n"))
    }

    /// One entry per conversation partner, most recent conversation first.
    pub async fn list_conversations(&self, user_id: i64) -> Result<Vec<Conversation>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT m.id, m.sender_id, m.recipient_id, m.body, m.read_at, m.created_at,
                   m.partner_id, u.full_name AS partner_name,
                   (SELECT COUNT(*) FROM messages x
                    WHERE x.sender_id = m.partner_id AND x.recipient_id = ?
                      AND x.read_at IS NULL AND x.deleted_at IS NULL) AS unread
            FROM (
                SELECT msg.*, p.partner_id,
                       ROW_NUMBER() OVER (
                           PARTITION BY p.partner_id ORDER BY msg.created_at DESC, msg.id DESC
                       ) AS rn
                FROM messages msg
                JOIN (SELECT id,
                             CASE WHEN sender_id = ? THEN recipient_id ELSE sender_id END AS partner_id
                      FROM messages) p ON p.id = msg.id
                WHERE (msg.sender_id = ? OR msg.recipient_id = ?) AND msg.deleted_at IS NULL
            ) m
            JOIN users u ON u.id = m.partner_id
            WHERE m.rn = 1
            ORDER BY m.created_at DESC, m.id DESC
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| Conversation {
                partner_id: r.get("partner_id"),
                partner_name: r.get("partner_name"),
                last_message: message_from_row(r),
                unread: r.get("unread"),
            })
            .collect())
    }

    /// Soft-delete a message; only its sender may do so.
    pub async fn soft_delete_message(&self, id: i64, sender_id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE messages SET deleted_at = ? WHERE id = ? AND sender_id = ? AND deleted_at IS NULL",
        )
        .bind(TimeMs::now().as_ms())
        .bind(id)
        .bind(sender_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Broadcasts
    // =========================================================================

    pub async fn insert_broadcast(&self, new: &NewBroadcast) -> Result<Broadcast, sqlx::Error> {
        let now = TimeMs::now();
        let id = sqlx::query(
            r#"
            INSERT INTO broadcasts (title, body, target_role, priority, created_by, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new.title)
        .bind(&new.body)
        .bind(new.target_role.map(|r| r.as_str()))
        .bind(&new.priority)
        .bind(new.created_by)
        .bind(new.expires_at.map(|t| t.as_ms()))
        .bind(now.as_ms())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(Broadcast {
            id,
            title: new.title.clone(),
            body: new.body.clone(),
            target_role: new.target_role,
            priority: new.priority.clone(),
            created_by: new.created_by,
            expires_at: new.expires_at,
            created_at: now,
        })
    }

    pub async fn get_broadcast(&self, id: i64) -> Result<Option<Broadcast>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM broadcasts WHERE id = ? AND deleted_at IS NULL",
            BROADCAST_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(broadcast_from_row))
    }

    /// Live broadcasts visible to `role`, newest first, with the caller's read flag.
    pub async fn list_active_broadcasts(
        &self,
        user_id: i64,
        role: Role,
        now: TimeMs,
    ) -> Result<Vec<(Broadcast, bool)>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT b.id, b.title, b.body, b.target_role, b.priority, b.created_by, b.expires_at,
                   b.created_at, r.read_at AS read_at
            FROM broadcasts b
            LEFT JOIN broadcast_reads r ON r.broadcast_id = b.id AND r.user_id = ?
            WHERE b.deleted_at IS NULL
              AND (b.target_role IS NULL OR b.target_role = ?)
              AND (b.expires_at IS NULL OR b.expires_at > ?)
            ORDER BY b.created_at DESC, b.id DESC
            "#,
        )
        .bind(user_id)
        .bind(role.as_str())
        .bind(now.as_ms())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| {
                let read_at: Option<i64> = r.get("read_at");
                (broadcast_from_row(r), read_at.is_some())
            })
            .collect())
    }

    /// Every live broadcast regardless of audience or expiry.
    pub async fn list_all_broadcasts(&self, page: Page) -> Result<Paged<Broadcast>, sqlx::Error> {
        let total: i64 =
            sqlx::query("SELECT COUNT(*) AS n FROM broadcasts WHERE deleted_at IS NULL")
                .fetch_one(&self.pool)
                .await?
                .get("n");
        let rows = sqlx::query(&format!(
            "SELECT {} FROM broadcasts WHERE deleted_at IS NULL ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            BROADCAST_COLUMNS
        ))
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;
        Ok(Paged::new(
            rows.iter().map(broadcast_from_row).collect(),
            total,
            page,
        ))
    }

    /// Idempotent read receipt. Returns `true` only for the first read.
    pub async fn mark_broadcast_read(&self, id: i64, user_id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO broadcast_reads (broadcast_id, user_id, read_at) VALUES (?, ?, ?)
            ON CONFLICT(broadcast_id, user_id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(TimeMs::now().as_ms())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn soft_delete_broadcast(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE broadcasts SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
                .bind(TimeMs::now().as_ms())
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Resources
    // =========================================================================

    pub async fn insert_resource(&self, new: &NewResource) -> Result<Resource, sqlx::Error> {
        let now = TimeMs::now();
        let id = sqlx::query(
            r#"
            INSERT INTO resources (title, description, category, url, uploaded_by, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new.title)
        .bind(new.description.as_deref())
        .bind(&new.category)
        .bind(&new.url)
        .bind(new.uploaded_by)
        .bind(now.as_ms())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(Resource {
            id,
            title: new.title.clone(),
            description: new.description.clone(),
            category: new.category.clone(),
            url: new.url.clone(),
            uploaded_by: new.uploaded_by,
            created_at: now,
        })
    }

    pub async fn list_resources(
        &self,
        search: Option<&str>,
        category: Option<&str>,
        page: Page,
    ) -> Result<Paged<Resource>, sqlx::Error> {
        fn push_where(
            qb: &mut QueryBuilder<'_, Sqlite>,
            search: Option<&str>,
            category: Option<&str>,
        ) {
            qb.push(" WHERE deleted_at IS NULL");
            if let Some(search) = search.filter(|s| !s.trim().is_empty()) {
                let pattern = like_pattern(search);
                qb.push(" AND (title LIKE ")
                    .push_bind(pattern.clone())
                    .push(" ESCAPE '\\' OR description LIKE ")
                    .push_bind(pattern)
                    .push(" ESCAPE '\\')");
            }
            if let Some(category) = category {
                qb.push(" AND category = ").push_bind(category.to_string());
            }
        }

        let mut count_qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS n FROM resources");
        push_where(&mut count_qb, search, category);
        let total: i64 = count_qb.build().fetch_one(&self.pool).await?.get("n");

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT id, title, description, category, url, uploaded_by, created_at FROM resources",
        );
        push_where(&mut qb, search, category);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = qb.build().fetch_all(&self.pool).await?;

        Ok(Paged::new(
            rows.iter().map(resource_from_row).collect(),
            total,
            page,
        ))
    }

    pub async fn soft_delete_resource(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE resources SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
                .bind(TimeMs::now().as_ms())
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{create_user, setup_test_db};
    use super::*;

    #[tokio::test]
    async fn test_threads_and_unread() {
        let (repo, _temp) = setup_test_db().await;
        let a = create_user(&repo, "a@example.com", Role::Csp).await;
        let b = create_user(&repo, "b@example.com", Role::Staff).await;
        let c = create_user(&repo, "c@example.com", Role::Staff).await;

        repo.insert_message(a, b, "hello").await.unwrap();
        repo.insert_message(b, a, "hi").await.unwrap();
        repo.insert_message(b, a, "how can I help?").await.unwrap();
        repo.insert_message(c, a, "ping").await.unwrap();

        assert_eq!(repo.unread_message_count(a).await.unwrap(), 3);

        let convs = repo.list_conversations(a).await.unwrap();
        assert_eq!(convs.len(), 2);
        let with_b = convs.iter().find(|c| c.partner_id == b).unwrap();
        assert_eq!(with_b.last_message.body, "how can I help?");
        assert_eq!(with_b.unread, 2);
        assert_eq!(with_b.partner_name, "b");

        let thread = repo.list_thread(a, b, Page::default()).await.unwrap();
        assert_eq!(thread.total, 3);
        assert_eq!(repo.mark_thread_read(a, b).await.unwrap(), 2);
        assert_eq!(repo.unread_message_count(a).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_only_sender_deletes_message() {
        let (repo, _temp) = setup_test_db().await;
        let a = create_user(&repo, "a@example.com", Role::Csp).await;
        let b = create_user(&repo, "b@example.com", Role::Staff).await;
        let m = repo.insert_message(a, b, "oops").await.unwrap();

        assert!(!repo.soft_delete_message(m.id, b).await.unwrap());
        assert!(repo.soft_delete_message(m.id, a).await.unwrap());
        assert!(repo.get_message(m.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_broadcast_targeting_and_reads() {
        let (repo, _temp) = setup_test_db().await;
        let admin = create_user(&repo, "admin@example.com", Role::Admin).await;
        let csp = create_user(&repo, "csp@example.com", Role::Csp).await;
        let now = TimeMs::now();

        let all = repo
            .insert_broadcast(&NewBroadcast {
                title: "Maintenance".into(),
                body: "Tonight".into(),
                target_role: None,
                priority: "high".into(),
                created_by: admin,
                expires_at: None,
            })
            .await
            .unwrap();
        repo.insert_broadcast(&NewBroadcast {
            title: "Staff only".into(),
            body: "Meeting".into(),
            target_role: Some(Role::Staff),
            priority: "normal".into(),
            created_by: admin,
            expires_at: None,
        })
        .await
        .unwrap();
        repo.insert_broadcast(&NewBroadcast {
            title: "Expired".into(),
            body: "Old".into(),
            target_role: None,
            priority: "normal".into(),
            created_by: admin,
            expires_at: Some(now.minus_secs(60)),
        })
        .await
        .unwrap();

        let visible = repo.list_active_broadcasts(csp, Role::Csp, now).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert!(!visible[0].1);

        assert!(repo.mark_broadcast_read(all.id, csp).await.unwrap());
        assert!(!repo.mark_broadcast_read(all.id, csp).await.unwrap());
        let visible = repo.list_active_broadcasts(csp, Role::Csp, now).await.unwrap();
        assert!(visible[0].1);

        assert_eq!(repo.list_all_broadcasts(Page::default()).await.unwrap().total, 3);
    }

    #[tokio::test]
    async fn test_resources_search() {
        let (repo, _temp) = setup_test_db().await;
        let admin = create_user(&repo, "admin@example.com", Role::Admin).await;
        for (title, category) in [
            ("POS setup guide", "guides"),
            ("KYC policy", "policies"),
            ("Agent onboarding", "guides"),
        ] {
            repo.insert_resource(&NewResource {
                title: title.into(),
                description: None,
                category: category.into(),
                url: format!("https://files.example.com/{}", title.replace(' ', "-")),
                uploaded_by: admin,
            })
            .await
            .unwrap();
        }

        let guides = repo
            .list_resources(None, Some("guides"), Page::default())
            .await
            .unwrap();
        assert_eq!(guides.total, 2);

        let pos = repo
            .list_resources(Some("pos"), None, Page::default())
            .await
            .unwrap();
        assert_eq!(pos.total, 1);
        assert!(repo.soft_delete_resource(pos.items[0].id).await.unwrap());
        assert_eq!(
            repo.list_resources(None, None, Page::default())
                .await
                .unwrap()
                .total,
            2
        );
    }
}
