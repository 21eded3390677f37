//! Direct messages and staff broadcasts.

use crate::domain::{Role, TimeMs};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: i64,
    pub sender_id: i64,
    pub recipient_id: i64,
    pub body: String,
    pub read_at: Option<TimeMs>,
    pub created_at: TimeMs,
}

/// Latest message with one partner plus the unread count from them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub partner_id: i64,
    pub partner_name: String,
    pub last_message: Message,
    pub unread: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broadcast {
    pub id: i64,
    pub title: String,
    pub body: String,
    /// `None` targets every role.
    pub target_role: Option<Role>,
    pub priority: String,
    pub created_by: i64,
    pub expires_at: Option<TimeMs>,
    pub created_at: TimeMs,
}

impl Broadcast {
    pub fn is_visible_to(&self, role: Role, now: TimeMs) -> bool {
        let role_ok = self.target_role.map(|r| r == role).unwrap_or(true);
        let live = self.expires_at.map(|t| t > now).unwrap_or(true);
        role_ok && live
    }
}

#[derive(Debug, Clone)]
pub struct NewBroadcast {
    pub title: String,
    pub body: String,
    pub target_role: Option<Role>,
    pub priority: String,
    pub created_by: i64,
    pub expires_at: Option<TimeMs>,
}

/// Shared document or link published to agents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub url: String,
    pub uploaded_by: i64,
    pub created_at: TimeMs,
}

#[derive(Debug, Clone)]
pub struct NewResource {
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub url: String,
    pub uploaded_by: i64,
}
