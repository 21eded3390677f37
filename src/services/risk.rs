//! Transaction limits and fraud heuristics.
//!
//! Limits are read from `risk_limits` on every check, layered over the
//! configured defaults, so an admin update applies to the next request.
//! Fraud heuristics only flag a ticket for review; they never block it.

use crate::db::Repository;
use crate::domain::{
    Decimal, RiskFlagKind, RiskLimits, TicketDetail, TicketKind, TimeMs,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

const VELOCITY_WINDOW_SECS: i64 = 3_600;
const DUPLICATE_WINDOW_SECS: i64 = 86_400;

#[derive(Debug, Error)]
pub enum RiskError {
    #[error("amount {amount} is below the minimum of {min}")]
    BelowMinimum { amount: Decimal, min: Decimal },
    #[error("amount {amount} exceeds the single transaction limit of {limit}")]
    AboveSingleLimit { amount: Decimal, limit: Decimal },
    #[error("withdrawal of {requested} would exceed the daily limit of {limit} ({used} already withdrawn today)")]
    DailyLimit {
        used: Decimal,
        requested: Decimal,
        limit: Decimal,
    },
    #[error("wallet of user {0} is frozen")]
    Frozen(i64),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[derive(Clone)]
pub struct RiskChecker {
    repo: Arc<Repository>,
    defaults: RiskLimits,
}

impl RiskChecker {
    pub fn new(repo: Arc<Repository>, defaults: RiskLimits) -> Self {
        Self { repo, defaults }
    }

    pub async fn limits(&self) -> Result<RiskLimits, sqlx::Error> {
        let pairs = self.repo.load_risk_limit_pairs().await?;
        Ok(self.defaults.clone().overlay(&pairs))
    }

    pub async fn update_limits(&self, limits: &RiskLimits) -> Result<(), sqlx::Error> {
        self.repo.store_risk_limits(limits).await
    }

    /// Amount bounds enforced when a financial request is opened.
    pub async fn check_new_request(&self, amount: Decimal) -> Result<(), RiskError> {
        let limits = self.limits().await?;
        if amount < limits.min_transaction_amount {
            return Err(RiskError::BelowMinimum {
                amount,
                min: limits.min_transaction_amount,
            });
        }
        if amount > limits.single_transaction_limit {
            return Err(RiskError::AboveSingleLimit {
                amount,
                limit: limits.single_transaction_limit,
            });
        }
        Ok(())
    }

    /// Run the fraud heuristics against a ticket that was just opened,
    /// recording a risk flag per hit and marking the ticket flagged.
    pub async fn flag_new_request(
        &self,
        user_id: i64,
        ticket_id: i64,
        detail: &TicketDetail,
    ) -> Result<Vec<RiskFlagKind>, sqlx::Error> {
        if !detail.kind().is_financial() {
            return Ok(Vec::new());
        }
        let limits = self.limits().await?;
        let now = TimeMs::now();
        let mut hits = Vec::new();

        let recent = self
            .repo
            .count_financial_tickets_since(user_id, now.minus_secs(VELOCITY_WINDOW_SECS))
            .await?;
        if recent > limits.velocity_max_requests_per_hour {
            let note = format!(
                "{} financial requests in the last hour (max {})",
                recent, limits.velocity_max_requests_per_hour
            );
            self.repo
                .insert_risk_flag(user_id, Some(ticket_id), RiskFlagKind::Velocity, &note)
                .await?;
            hits.push(RiskFlagKind::Velocity);
        }

        let duplicates = self
            .repo
            .find_duplicate_requests(
                user_id,
                detail,
                now.minus_secs(DUPLICATE_WINDOW_SECS),
                ticket_id,
            )
            .await?;
        if !duplicates.is_empty() {
            let ids: Vec<String> = duplicates.iter().map(|id| id.to_string()).collect();
            let note = format!("matches earlier request(s) {}", ids.join(", "));
            self.repo
                .insert_risk_flag(user_id, Some(ticket_id), RiskFlagKind::Duplicate, &note)
                .await?;
            hits.push(RiskFlagKind::Duplicate);
        }

        if !hits.is_empty() {
            warn!(user_id, ticket_id, flags = ?hits, "Financial request flagged for review");
            self.repo.set_ticket_flagged(ticket_id, true).await?;
        }
        Ok(hits)
    }

    /// Checks that must pass before a settlement moves money.
    pub async fn check_settlement(
        &self,
        user_id: i64,
        kind: TicketKind,
        amount: Decimal,
    ) -> Result<(), RiskError> {
        let limits = self.limits().await?;
        if amount > limits.single_transaction_limit {
            return Err(RiskError::AboveSingleLimit {
                amount,
                limit: limits.single_transaction_limit,
            });
        }
        if kind != TicketKind::Withdrawal {
            return Ok(());
        }

        let Some(wallet) = self.repo.get_wallet_by_user(user_id).await? else {
            return Ok(());
        };
        if wallet.is_frozen {
            return Err(RiskError::Frozen(user_id));
        }
        let used = self
            .repo
            .sum_withdrawals_since(wallet.id, TimeMs::now().start_of_utc_day())
            .await?;
        let within = used
            .checked_add(amount)
            .is_some_and(|total| total <= limits.daily_withdrawal_limit);
        if !within {
            return Err(RiskError::DailyLimit {
                used,
                requested: amount,
                limit: limits.daily_withdrawal_limit,
            });
        }
        Ok(())
    }
}
