//! Domain primitives: TimeMs, Role, pagination.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Time in milliseconds since Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeMs(pub i64);

impl TimeMs {
    pub fn new(ms: i64) -> Self {
        TimeMs(ms)
    }

    pub fn now() -> Self {
        TimeMs(Utc::now().timestamp_millis())
    }

    pub fn as_ms(&self) -> i64 {
        self.0
    }

    pub fn plus_secs(&self, secs: i64) -> Self {
        TimeMs(self.0 + secs * 1000)
    }

    pub fn minus_secs(&self, secs: i64) -> Self {
        TimeMs(self.0 - secs * 1000)
    }

    /// Midnight UTC of the day containing this instant.
    pub fn start_of_utc_day(&self) -> Self {
        let day_ms = 86_400_000;
        TimeMs(self.0.div_euclid(day_ms) * day_ms)
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.0).single()
    }

    /// RFC 3339 rendering used by CSV exports.
    pub fn to_rfc3339(&self) -> String {
        self.to_datetime()
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| self.0.to_string())
    }
}

/// Access role of a portal user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Supervisor,
    Staff,
    /// Field agent (customer service point).
    Csp,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Supervisor => "supervisor",
            Role::Staff => "staff",
            Role::Csp => "csp",
        }
    }

    /// Internal staff as opposed to field agents.
    pub fn is_back_office(&self) -> bool {
        !matches!(self, Role::Csp)
    }

    /// May approve or reject financial requests.
    pub fn can_approve(&self) -> bool {
        matches!(self, Role::Admin | Role::Supervisor)
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "supervisor" => Ok(Role::Supervisor),
            "staff" => Ok(Role::Staff),
            "csp" => Ok(Role::Csp),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Page request, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: i64,
    pub page_size: i64,
}

impl Page {
    /// Clamp raw query values into a valid page.
    pub fn new(page: Option<i64>, page_size: Option<i64>) -> Self {
        let page = page.unwrap_or(1).max(1);
        let page_size = page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        Page { page, page_size }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }

    pub fn limit(&self) -> i64 {
        self.page_size
    }
}

impl Default for Page {
    fn default() -> Self {
        Page::new(None, None)
    }
}

/// One page of results plus the unpaged total.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

impl<T> Paged<T> {
    pub fn new(items: Vec<T>, total: i64, page: Page) -> Self {
        Paged {
            items,
            total,
            page: page.page,
            page_size: page.page_size,
        }
    }

    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Paged<U> {
        Paged {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            page_size: self.page_size,
        }
    }
}
