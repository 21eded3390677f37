//! Support tickets and their per-kind detail records.

use crate::domain::{Decimal, TimeMs};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketKind {
    Technical,
    Withdrawal,
    Deposit,
}

impl TicketKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketKind::Technical => "technical",
            TicketKind::Withdrawal => "withdrawal",
            TicketKind::Deposit => "deposit",
        }
    }

    /// Withdrawal and deposit requests move money on approval.
    pub fn is_financial(&self) -> bool {
        !matches!(self, TicketKind::Technical)
    }
}

impl FromStr for TicketKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "technical" => Ok(TicketKind::Technical),
            "withdrawal" => Ok(TicketKind::Withdrawal),
            "deposit" => Ok(TicketKind::Deposit),
            other => Err(format!("unknown ticket kind: {}", other)),
        }
    }
}

impl std::fmt::Display for TicketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    Resolved,
    Closed,
    Approved,
    Rejected,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Resolved => "resolved",
            TicketStatus::Closed => "closed",
            TicketStatus::Approved => "approved",
            TicketStatus::Rejected => "rejected",
        }
    }

    /// Statuses from which a financial ticket can still be settled.
    pub fn is_settleable(&self) -> bool {
        matches!(self, TicketStatus::Open | TicketStatus::InProgress)
    }

    /// Whether a ticket of `kind` may move from `from` to `to`.
    ///
    /// `Approved` is accepted here for financial tickets, but callers outside
    /// the wallet approval flow must not use it.
    pub fn can_transition(kind: TicketKind, from: TicketStatus, to: TicketStatus) -> bool {
        use TicketStatus::*;
        if from == to {
            return false;
        }
        if kind.is_financial() {
            match from {
                Open => matches!(to, InProgress | Rejected | Approved),
                InProgress => matches!(to, Open | Rejected | Approved),
                Resolved | Closed | Approved | Rejected => false,
            }
        } else {
            match from {
                Open => matches!(to, InProgress | Resolved | Closed),
                InProgress => matches!(to, Open | Resolved | Closed),
                Resolved => matches!(to, Closed | Open),
                Closed | Approved | Rejected => false,
            }
        }
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(TicketStatus::Open),
            "in_progress" => Ok(TicketStatus::InProgress),
            "resolved" => Ok(TicketStatus::Resolved),
            "closed" => Ok(TicketStatus::Closed),
            "approved" => Ok(TicketStatus::Approved),
            "rejected" => Ok(TicketStatus::Rejected),
            other => Err(format!("unknown ticket status: {}", other)),
        }
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl TicketPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketPriority::Low => "low",
            TicketPriority::Medium => "medium",
            TicketPriority::High => "high",
            TicketPriority::Urgent => "urgent",
        }
    }
}

impl FromStr for TicketPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(TicketPriority::Low),
            "medium" => Ok(TicketPriority::Medium),
            "high" => Ok(TicketPriority::High),
            "urgent" => Ok(TicketPriority::Urgent),
            other => Err(format!("unknown ticket priority: {}", other)),
        }
    }
}

/// Ticket header row shared by all kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub id: i64,
    pub reference: String,
    pub kind: TicketKind,
    pub subject: String,
    pub description: String,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    pub created_by: i64,
    pub assigned_to: Option<i64>,
    pub resolution_note: Option<String>,
    pub flagged: bool,
    pub created_at: TimeMs,
    pub updated_at: TimeMs,
}

impl Ticket {
    /// Human-facing reference derived from the row id.
    pub fn reference_for(id: i64) -> String {
        format!("TKT-{:06}", id)
    }
}

/// Per-kind detail record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketDetail {
    Technical(TechnicalDetail),
    Withdrawal(WithdrawalDetail),
    Deposit(DepositDetail),
}

impl TicketDetail {
    pub fn kind(&self) -> TicketKind {
        match self {
            TicketDetail::Technical(_) => TicketKind::Technical,
            TicketDetail::Withdrawal(_) => TicketKind::Withdrawal,
            TicketDetail::Deposit(_) => TicketKind::Deposit,
        }
    }

    /// Requested amount for financial tickets.
    pub fn amount(&self) -> Option<Decimal> {
        match self {
            TicketDetail::Technical(_) => None,
            TicketDetail::Withdrawal(w) => Some(w.amount),
            TicketDetail::Deposit(d) => Some(d.amount),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TechnicalDetail {
    pub category: String,
    pub device_info: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalDetail {
    pub amount: Decimal,
    pub bank_name: String,
    pub account_number: String,
    pub account_name: String,
    pub approved_amount: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositDetail {
    pub amount: Decimal,
    pub payment_method: String,
    pub payment_reference: Option<String>,
    pub proof_url: Option<String>,
    pub approved_amount: Option<Decimal>,
}

/// Input for a new ticket.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub subject: String,
    pub description: String,
    pub priority: TicketPriority,
    pub created_by: i64,
    pub detail: TicketDetail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketComment {
    pub id: i64,
    pub ticket_id: i64,
    pub author_id: i64,
    pub author_name: String,
    pub body: String,
    pub created_at: TimeMs,
}

#[cfg(test)]
mod tests {
    use super::*;
    use TicketStatus::*;

    #[test]
    fn test_technical_transitions() {
        let k = TicketKind::Technical;
        assert!(TicketStatus::can_transition(k, Open, InProgress));
        assert!(TicketStatus::can_transition(k, Resolved, Open));
        assert!(TicketStatus::can_transition(k, Resolved, Closed));
        assert!(!TicketStatus::can_transition(k, Open, Approved));
        assert!(!TicketStatus::can_transition(k, Closed, Open));
        assert!(!TicketStatus::can_transition(k, Open, Open));
    }

    #[test]
    fn test_financial_transitions() {
        for k in [TicketKind::Withdrawal, TicketKind::Deposit] {
            assert!(TicketStatus::can_transition(k, Open, Approved));
            assert!(TicketStatus::can_transition(k, InProgress, Rejected));
            assert!(!TicketStatus::can_transition(k, Open, Resolved));
            assert!(!TicketStatus::can_transition(k, Approved, Open));
            assert!(!TicketStatus::can_transition(k, Rejected, Approved));
        }
    }

    #[test]
    fn test_status_string_round_trip() {
        for s in [Open, InProgress, Resolved, Closed, Approved, Rejected] {
            assert_eq!(TicketStatus::from_str(s.as_str()).unwrap(), s);
        }
    }

    #[test]
    fn test_reference_is_padded() {
        assert_eq!(Ticket::reference_for(42), "TKT-000042");
    }
}
