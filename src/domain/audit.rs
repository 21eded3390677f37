//! Audit trail, security log and risk records.

use crate::domain::{Decimal, TimeMs};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub id: i64,
    pub actor_id: Option<i64>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub details: serde_json::Value,
    pub created_at: TimeMs,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityEvent {
    pub id: i64,
    pub user_id: Option<i64>,
    pub email: Option<String>,
    pub event: String,
    pub detail: Option<String>,
    pub created_at: TimeMs,
}

/// Why a request was flagged for review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFlagKind {
    /// Too many financial requests in a short window.
    Velocity,
    /// Same request repeated within a day.
    Duplicate,
}

impl RiskFlagKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskFlagKind::Velocity => "velocity",
            RiskFlagKind::Duplicate => "duplicate",
        }
    }
}

impl FromStr for RiskFlagKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "velocity" => Ok(RiskFlagKind::Velocity),
            "duplicate" => Ok(RiskFlagKind::Duplicate),
            other => Err(format!("unknown risk flag: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskFlag {
    pub id: i64,
    pub user_id: i64,
    pub ticket_id: Option<i64>,
    pub kind: RiskFlagKind,
    pub detail: String,
    pub resolved: bool,
    pub resolved_by: Option<i64>,
    pub created_at: TimeMs,
}

/// Runtime-tunable limits checked before money moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskLimits {
    pub single_transaction_limit: Decimal,
    pub daily_withdrawal_limit: Decimal,
    pub min_transaction_amount: Decimal,
    pub velocity_max_requests_per_hour: i64,
}

impl RiskLimits {
    pub const SINGLE_TRANSACTION_LIMIT: &'static str = "single_transaction_limit";
    pub const DAILY_WITHDRAWAL_LIMIT: &'static str = "daily_withdrawal_limit";
    pub const MIN_TRANSACTION_AMOUNT: &'static str = "min_transaction_amount";
    pub const VELOCITY_MAX_REQUESTS_PER_HOUR: &'static str = "velocity_max_requests_per_hour";

    /// Key/value pairs as stored in `risk_limits`.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            (
                Self::SINGLE_TRANSACTION_LIMIT,
                self.single_transaction_limit.to_canonical_string(),
            ),
            (
                Self::DAILY_WITHDRAWAL_LIMIT,
                self.daily_withdrawal_limit.to_canonical_string(),
            ),
            (
                Self::MIN_TRANSACTION_AMOUNT,
                self.min_transaction_amount.to_canonical_string(),
            ),
            (
                Self::VELOCITY_MAX_REQUESTS_PER_HOUR,
                self.velocity_max_requests_per_hour.to_string(),
            ),
        ]
    }

    /// Overlay stored values on top of `self`. Unknown keys and unparsable
    /// values are ignored.
    pub fn overlay(mut self, pairs: &[(String, String)]) -> Self {
        for (key, value) in pairs {
            match key.as_str() {
                Self::SINGLE_TRANSACTION_LIMIT => {
                    if let Ok(v) = Decimal::from_str(value) {
                        self.single_transaction_limit = v;
                    }
                }
                Self::DAILY_WITHDRAWAL_LIMIT => {
                    if let Ok(v) = Decimal::from_str(value) {
                        self.daily_withdrawal_limit = v;
                    }
                }
                Self::MIN_TRANSACTION_AMOUNT => {
                    if let Ok(v) = Decimal::from_str(value) {
                        self.min_transaction_amount = v;
                    }
                }
                Self::VELOCITY_MAX_REQUESTS_PER_HOUR => {
                    if let Ok(v) = value.parse::<i64>() {
                        self.velocity_max_requests_per_hour = v;
                    }
                }
                _ => {}
            }
        }
        self
    }
}
