//! Domain types for the eConnectOne back office.
//!
//! This module provides:
//! - Lossless money handling via the Decimal wrapper
//! - Primitives: TimeMs, Role, pagination
//! - Tickets with per-kind detail, and their status rules
//! - Wallet ledger, commission, messaging and audit records

pub mod audit;
pub mod commission;
pub mod decimal;
pub mod messaging;
pub mod primitives;
pub mod ticket;
pub mod user;
pub mod wallet;

pub use audit::{AuditEntry, RiskFlag, RiskFlagKind, RiskLimits, SecurityEvent};
pub use commission::{Commission, CommissionRate, CommissionStatus, CommissionSummary};
pub use decimal::Decimal;
pub use messaging::{Broadcast, Conversation, Message, NewBroadcast, NewResource, Resource};
pub use primitives::{Page, Paged, Role, TimeMs};
pub use ticket::{
    DepositDetail, NewTicket, TechnicalDetail, Ticket, TicketComment, TicketDetail, TicketKind,
    TicketPriority, TicketStatus, WithdrawalDetail,
};
pub use user::{NewUser, User, UserCredentials, UserUpdate};
pub use wallet::{
    Adjustment, AdjustmentError, LedgerEntry, Transaction, TransactionKind, TransactionSource,
    Wallet,
};
