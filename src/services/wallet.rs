//! Balance mutation driven by ticket approval and admin actions.
//!
//! Validation that needs no lock (ticket kind and status, adjustment,
//! limits) runs first. The money then moves through
//! `Repository::settle_ticket`, whose guarded status update makes a second
//! concurrent approval of the same ticket fail with `AlreadySettled`.

use crate::db::repo::{DailyLimit, LedgerError, TicketSettlement};
use crate::db::Repository;
use crate::domain::{
    Adjustment, AdjustmentError, Decimal, LedgerEntry, TicketKind, TicketStatus, TimeMs,
    Transaction, TransactionKind, TransactionSource, Wallet,
};
use crate::services::audit::AuditLogger;
use crate::services::commission::CommissionCalculator;
use crate::services::risk::{RiskChecker, RiskError};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("ticket {0} not found")]
    TicketNotFound(i64),
    #[error("no wallet for user {0}")]
    WalletNotFound(i64),
    #[error("ticket {0} is not a withdrawal or deposit request")]
    NotFinancial(i64),
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error(transparent)]
    Adjustment(#[from] AdjustmentError),
    #[error("{0}")]
    LimitExceeded(String),
    #[error("ticket {ticket_id} is {status} and cannot be settled")]
    NotSettleable {
        ticket_id: i64,
        status: TicketStatus,
    },
    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: Decimal, requested: Decimal },
    #[error("wallet of user {0} is frozen")]
    Frozen(i64),
    #[error("ticket {0} was settled by another request")]
    AlreadySettled(i64),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl From<LedgerError> for WalletError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::WalletNotFound(user_id) => WalletError::WalletNotFound(user_id),
            LedgerError::Frozen(user_id) => WalletError::Frozen(user_id),
            LedgerError::InsufficientFunds { balance, requested } => {
                WalletError::InsufficientFunds { balance, requested }
            }
            LedgerError::AlreadySettled(id) | LedgerError::CommissionNotPending(id) => {
                WalletError::AlreadySettled(id)
            }
            LedgerError::OutOfRange { .. } => WalletError::InvalidAmount(err.to_string()),
            LedgerError::DailyLimit { .. } => WalletError::LimitExceeded(err.to_string()),
            LedgerError::Db(e) => WalletError::Db(e),
        }
    }
}

impl From<RiskError> for WalletError {
    fn from(err: RiskError) -> Self {
        match err {
            RiskError::Frozen(user_id) => WalletError::Frozen(user_id),
            RiskError::Db(e) => WalletError::Db(e),
            other => WalletError::LimitExceeded(other.to_string()),
        }
    }
}

/// Result of one ticket in a bulk approval.
#[derive(Debug)]
pub struct BulkOutcome {
    pub ticket_id: i64,
    pub result: Result<Transaction, WalletError>,
}

#[derive(Clone)]
pub struct WalletService {
    repo: Arc<Repository>,
    risk: RiskChecker,
    commissions: CommissionCalculator,
    currency: String,
}

impl WalletService {
    pub fn new(
        repo: Arc<Repository>,
        risk: RiskChecker,
        commissions: CommissionCalculator,
        currency: String,
    ) -> Self {
        Self {
            repo,
            risk,
            commissions,
            currency,
        }
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Approve a withdrawal or deposit ticket and move the money.
    pub async fn approve(
        &self,
        ticket_id: i64,
        actor_id: i64,
        adjustment: Option<Adjustment>,
        note: Option<String>,
    ) -> Result<Transaction, WalletError> {
        let ticket = self
            .repo
            .get_ticket(ticket_id)
            .await?
            .ok_or(WalletError::TicketNotFound(ticket_id))?;
        if !ticket.kind.is_financial() {
            return Err(WalletError::NotFinancial(ticket_id));
        }
        if !ticket.status.is_settleable() {
            return Err(WalletError::NotSettleable {
                ticket_id,
                status: ticket.status,
            });
        }

        let requested = self
            .repo
            .get_ticket_detail(ticket_id, ticket.kind)
            .await?
            .and_then(|d| d.amount())
            .ok_or_else(|| WalletError::InvalidAmount(format!("ticket {} has no amount", ticket_id)))?;
        let amount = match adjustment {
            Some(adj) => adj.apply(requested)?,
            None => requested,
        };

        self.risk
            .check_settlement(ticket.created_by, ticket.kind, amount)
            .await?;

        let (kind, source, verb) = match ticket.kind {
            TicketKind::Withdrawal => (
                TransactionKind::Debit,
                TransactionSource::Withdrawal,
                "Withdrawal",
            ),
            _ => (TransactionKind::Credit, TransactionSource::Deposit, "Deposit"),
        };
        let commission = self.commissions.calculate(ticket.kind, amount).await?;
        let daily_limit = match ticket.kind {
            TicketKind::Withdrawal => Some(DailyLimit {
                limit: self.risk.limits().await?.daily_withdrawal_limit,
                since: TimeMs::now().start_of_utc_day(),
            }),
            _ => None,
        };

        let settlement = TicketSettlement {
            ticket_id,
            kind: ticket.kind,
            user_id: ticket.created_by,
            currency: self.currency.clone(),
            entry: LedgerEntry {
                kind,
                source,
                amount,
                description: format!("{} {} approved", verb, ticket.reference),
                ticket_id: Some(ticket_id),
                created_by: Some(actor_id),
            },
            note,
            commission,
            daily_limit,
            audit: AuditLogger::entry(
                actor_id,
                "ticket.approve",
                "ticket",
                ticket_id,
                json!({
                    "reference": ticket.reference,
                    "requested": requested.to_canonical_string(),
                    "approved": amount.to_canonical_string(),
                    "adjustment": adjustment,
                }),
            ),
        };

        let transaction = self.repo.settle_ticket(&settlement).await?;
        info!(
            ticket_id,
            actor_id,
            amount = %amount,
            reference = %transaction.reference,
            "Ticket approved"
        );
        Ok(transaction)
    }

    pub async fn reject(
        &self,
        ticket_id: i64,
        actor_id: i64,
        reason: &str,
    ) -> Result<(), WalletError> {
        let ticket = self
            .repo
            .get_ticket(ticket_id)
            .await?
            .ok_or(WalletError::TicketNotFound(ticket_id))?;
        if !ticket.kind.is_financial() {
            return Err(WalletError::NotFinancial(ticket_id));
        }
        if !ticket.status.is_settleable() {
            return Err(WalletError::NotSettleable {
                ticket_id,
                status: ticket.status,
            });
        }

        let audit = AuditLogger::entry(
            actor_id,
            "ticket.reject",
            "ticket",
            ticket_id,
            json!({ "reference": ticket.reference, "reason": reason }),
        );
        self.repo.reject_ticket(ticket_id, reason, &audit).await?;
        info!(ticket_id, actor_id, "Ticket rejected");
        Ok(())
    }

    /// Approve each ticket independently. A failure on one id does not roll
    /// back the others. Repeated ids are processed once.
    pub async fn bulk_approve(
        &self,
        ticket_ids: &[i64],
        actor_id: i64,
        adjustment: Option<Adjustment>,
    ) -> Vec<BulkOutcome> {
        let mut seen = std::collections::HashSet::new();
        let mut outcomes = Vec::with_capacity(ticket_ids.len());
        for &ticket_id in ticket_ids {
            if !seen.insert(ticket_id) {
                continue;
            }
            let result = self.approve(ticket_id, actor_id, adjustment, None).await;
            outcomes.push(BulkOutcome { ticket_id, result });
        }
        outcomes
    }

    /// Manual credit or debit.
    pub async fn adjust(
        &self,
        user_id: i64,
        kind: TransactionKind,
        amount: Decimal,
        reason: &str,
        actor_id: i64,
    ) -> Result<Transaction, WalletError> {
        if !amount.is_positive() {
            return Err(WalletError::InvalidAmount(
                "amount must be greater than zero".to_string(),
            ));
        }
        let limits = self.risk.limits().await?;
        if amount > limits.single_transaction_limit {
            return Err(WalletError::LimitExceeded(format!(
                "amount {} exceeds the single transaction limit {}",
                amount, limits.single_transaction_limit
            )));
        }
        let entry = LedgerEntry {
            kind,
            source: TransactionSource::Manual,
            amount,
            description: reason.to_string(),
            ticket_id: None,
            created_by: Some(actor_id),
        };
        let audit = AuditLogger::entry(
            actor_id,
            "wallet.adjust",
            "wallet",
            user_id,
            json!({
                "kind": kind,
                "amount": amount.to_canonical_string(),
                "reason": reason,
            }),
        );
        let transaction = self
            .repo
            .apply_manual_entry(user_id, &self.currency, &entry, &audit)
            .await?;
        info!(user_id, actor_id, kind = kind.as_str(), amount = %amount, "Manual wallet adjustment");
        Ok(transaction)
    }

    pub async fn set_frozen(
        &self,
        user_id: i64,
        frozen: bool,
        actor_id: i64,
    ) -> Result<Wallet, WalletError> {
        let action = if frozen { "wallet.freeze" } else { "wallet.unfreeze" };
        let audit = AuditLogger::entry(actor_id, action, "wallet", user_id, json!({}));
        let wallet = self
            .repo
            .set_wallet_frozen(user_id, &self.currency, frozen, &audit)
            .await?;
        info!(user_id, actor_id, frozen, "Wallet freeze state changed");
        Ok(wallet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::test_support::{create_user, setup_test_db};
    use crate::db::repo::CommissionFilter;
    use crate::domain::{
        CommissionRate, DepositDetail, NewTicket, Page, RiskLimits, Role, TicketDetail,
        TicketPriority, TimeMs, WithdrawalDetail,
    };
    use std::str::FromStr;
    use tempfile::TempDir;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn limits() -> RiskLimits {
        RiskLimits {
            single_transaction_limit: d("100000"),
            daily_withdrawal_limit: d("150000"),
            min_transaction_amount: d("1"),
            velocity_max_requests_per_hour: 100,
        }
    }

    async fn setup() -> (Arc<Repository>, WalletService, TempDir) {
        let (repo, temp) = setup_test_db().await;
        let repo = Arc::new(repo);
        let service = WalletService::new(
            repo.clone(),
            RiskChecker::new(repo.clone(), limits()),
            CommissionCalculator::new(repo.clone()),
            "NGN".to_string(),
        );
        (repo, service, temp)
    }

    async fn deposit(repo: &Repository, user_id: i64, amount: &str) -> i64 {
        repo.insert_ticket(&NewTicket {
            subject: "Top up".into(),
            description: String::new(),
            priority: TicketPriority::Medium,
            created_by: user_id,
            detail: TicketDetail::Deposit(DepositDetail {
                amount: d(amount),
                payment_method: "transfer".into(),
                payment_reference: None,
                proof_url: None,
                approved_amount: None,
            }),
        })
        .await
        .unwrap()
    }

    async fn withdrawal(repo: &Repository, user_id: i64, amount: &str) -> i64 {
        repo.insert_ticket(&NewTicket {
            subject: "Cash out".into(),
            description: String::new(),
            priority: TicketPriority::High,
            created_by: user_id,
            detail: TicketDetail::Withdrawal(WithdrawalDetail {
                amount: d(amount),
                bank_name: "First Bank".into(),
                account_number: "0123456789".into(),
                account_name: "Ada".into(),
                approved_amount: None,
            }),
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_approve_deposit_with_adjustment_and_commission() {
        let (repo, service, _temp) = setup().await;
        let admin = create_user(&repo, "admin@example.com", Role::Admin).await;
        let csp = create_user(&repo, "csp@example.com", Role::Csp).await;
        repo.upsert_commission_rate(&CommissionRate {
            kind: TicketKind::Deposit,
            rate_percent: d("1"),
            min_amount: None,
            max_amount: None,
            updated_at: TimeMs::now(),
        })
        .await
        .unwrap();

        let ticket_id = deposit(&repo, csp, "1000").await;
        let tx = service
            .approve(ticket_id, admin, Some(Adjustment::Percentage(d("-2"))), None)
            .await
            .unwrap();

        assert_eq!(tx.amount, d("980"));
        assert_eq!(tx.balance_before, d("0"));
        assert_eq!(tx.balance_after, d("980"));
        assert!(tx.reference.starts_with("TXN-"));

        let ticket = repo.get_ticket(ticket_id).await.unwrap().unwrap();
        assert_eq!(ticket.status, TicketStatus::Approved);
        match repo
            .get_ticket_detail(ticket_id, TicketKind::Deposit)
            .await
            .unwrap()
        {
            Some(TicketDetail::Deposit(detail)) => {
                assert_eq!(detail.approved_amount, Some(d("980")))
            }
            other => panic!("unexpected detail: {:?}", other),
        }

        let commissions = repo
            .list_commissions(&CommissionFilter::default(), Page::default())
            .await
            .unwrap();
        assert_eq!(commissions.total, 1);
        assert_eq!(commissions.items[0].amount, d("9.8"));
        assert_eq!(commissions.items[0].user_id, csp);
    }

    #[tokio::test]
    async fn test_out_of_range_adjustment_leaves_ticket_open() {
        let (repo, service, _temp) = setup().await;
        let admin = create_user(&repo, "admin@example.com", Role::Admin).await;
        let csp = create_user(&repo, "csp@example.com", Role::Csp).await;
        let ticket_id = deposit(&repo, csp, "1000").await;

        let huge = d("79228162514264337593543950335");
        let err = service
            .approve(ticket_id, admin, Some(Adjustment::Fixed(huge)), None)
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::Adjustment(AdjustmentError::Overflow)));

        // Representable, but above the single transaction limit.
        let err = service
            .approve(ticket_id, admin, Some(Adjustment::Percentage(d("20000"))), None)
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::LimitExceeded(_)));

        let ticket = repo.get_ticket(ticket_id).await.unwrap().unwrap();
        assert_eq!(ticket.status, TicketStatus::Open);
    }

    #[tokio::test]
    async fn test_manual_adjust_is_capped_by_single_limit() {
        let (repo, service, _temp) = setup().await;
        let admin = create_user(&repo, "admin@example.com", Role::Admin).await;
        let csp = create_user(&repo, "csp@example.com", Role::Csp).await;

        let err = service
            .adjust(csp, TransactionKind::Credit, d("100000.01"), "bonus", admin)
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::LimitExceeded(_)));

        let tx = service
            .adjust(csp, TransactionKind::Credit, d("100000"), "bonus", admin)
            .await
            .unwrap();
        assert_eq!(tx.balance_after, d("100000"));
    }

    #[tokio::test]
    async fn test_second_approval_is_rejected() {
        let (repo, service, _temp) = setup().await;
        let admin = create_user(&repo, "admin@example.com", Role::Admin).await;
        let csp = create_user(&repo, "csp@example.com", Role::Csp).await;
        let ticket_id = deposit(&repo, csp, "500").await;

        service.approve(ticket_id, admin, None, None).await.unwrap();
        let err = service
            .approve(ticket_id, admin, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::NotSettleable { .. }));
        let wallet = repo.get_wallet_by_user(csp).await.unwrap().unwrap();
        assert_eq!(wallet.balance, d("500"));
    }

    #[tokio::test]
    async fn test_withdrawal_insufficient_funds_leaves_ticket_open() {
        let (repo, service, _temp) = setup().await;
        let admin = create_user(&repo, "admin@example.com", Role::Admin).await;
        let csp = create_user(&repo, "csp@example.com", Role::Csp).await;
        let ticket_id = withdrawal(&repo, csp, "250").await;

        let err = service
            .approve(ticket_id, admin, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::InsufficientFunds { .. }));
        let ticket = repo.get_ticket(ticket_id).await.unwrap().unwrap();
        assert_eq!(ticket.status, TicketStatus::Open);
    }

    #[tokio::test]
    async fn test_bulk_approve_reports_each_ticket() {
        let (repo, service, _temp) = setup().await;
        let admin = create_user(&repo, "admin@example.com", Role::Admin).await;
        let csp = create_user(&repo, "csp@example.com", Role::Csp).await;
        let dep = deposit(&repo, csp, "300").await;
        let wd = withdrawal(&repo, csp, "200").await;
        let too_big = withdrawal(&repo, csp, "5000").await;

        let outcomes = service
            .bulk_approve(&[dep, wd, too_big, dep, 9999], admin, None)
            .await;
        assert_eq!(outcomes.len(), 4);
        assert!(outcomes[0].result.is_ok());
        assert!(outcomes[1].result.is_ok());
        assert!(matches!(
            outcomes[2].result,
            Err(WalletError::InsufficientFunds { .. })
        ));
        assert!(matches!(
            outcomes[3].result,
            Err(WalletError::TicketNotFound(9999))
        ));

        let wallet = repo.get_wallet_by_user(csp).await.unwrap().unwrap();
        assert_eq!(wallet.balance, d("100"));
    }

    #[tokio::test]
    async fn test_reject_and_technical_tickets() {
        let (repo, service, _temp) = setup().await;
        let admin = create_user(&repo, "admin@example.com", Role::Admin).await;
        let csp = create_user(&repo, "csp@example.com", Role::Csp).await;
        let ticket_id = withdrawal(&repo, csp, "100").await;

        service
            .reject(ticket_id, admin, "account name mismatch")
            .await
            .unwrap();
        let ticket = repo.get_ticket(ticket_id).await.unwrap().unwrap();
        assert_eq!(ticket.status, TicketStatus::Rejected);
        assert_eq!(
            ticket.resolution_note.as_deref(),
            Some("account name mismatch")
        );
        assert!(matches!(
            service.reject(ticket_id, admin, "again").await,
            Err(WalletError::NotSettleable { .. })
        ));
    }

    #[tokio::test]
    async fn test_manual_adjust_and_freeze() {
        let (repo, service, _temp) = setup().await;
        let admin = create_user(&repo, "admin@example.com", Role::Admin).await;
        let csp = create_user(&repo, "csp@example.com", Role::Csp).await;

        service
            .adjust(csp, TransactionKind::Credit, d("750"), "opening float", admin)
            .await
            .unwrap();
        assert!(matches!(
            service
                .adjust(csp, TransactionKind::Debit, d("0"), "noop", admin)
                .await,
            Err(WalletError::InvalidAmount(_))
        ));

        let wallet = service.set_frozen(csp, true, admin).await.unwrap();
        assert!(wallet.is_frozen);
        assert!(matches!(
            service
                .adjust(csp, TransactionKind::Debit, d("50"), "fee", admin)
                .await,
            Err(WalletError::Frozen(_))
        ));

        let ticket_id = withdrawal(&repo, csp, "100").await;
        assert!(matches!(
            service.approve(ticket_id, admin, None, None).await,
            Err(WalletError::Frozen(_))
        ));
    }
}
