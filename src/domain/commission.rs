//! Agent commissions earned on settled financial requests.

use crate::domain::{Decimal, TicketKind, TimeMs};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionStatus {
    Pending,
    Paid,
    Cancelled,
}

impl CommissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionStatus::Pending => "pending",
            CommissionStatus::Paid => "paid",
            CommissionStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for CommissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CommissionStatus::Pending),
            "paid" => Ok(CommissionStatus::Paid),
            "cancelled" => Ok(CommissionStatus::Cancelled),
            other => Err(format!("unknown commission status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commission {
    pub id: i64,
    pub user_id: i64,
    pub ticket_id: Option<i64>,
    pub kind: TicketKind,
    pub base_amount: Decimal,
    pub rate_percent: Decimal,
    pub amount: Decimal,
    pub status: CommissionStatus,
    pub paid_at: Option<TimeMs>,
    pub created_at: TimeMs,
}

/// Commission rate for one ticket kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommissionRate {
    pub kind: TicketKind,
    pub rate_percent: Decimal,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub updated_at: TimeMs,
}

impl CommissionRate {
    /// `base * rate / 100`, clamped to the optional bounds and rounded to cents.
    pub fn commission_for(&self, base: Decimal) -> Decimal {
        // Dividing first keeps the product within range for rates up to 100.
        let mut amount = base
            .checked_div(Decimal::hundred())
            .and_then(|b| b.checked_mul(self.rate_percent))
            .unwrap_or(base);
        if let Some(min) = self.min_amount {
            if amount < min {
                amount = min;
            }
        }
        if let Some(max) = self.max_amount {
            if amount > max {
                amount = max;
            }
        }
        amount.round_money()
    }
}

/// Totals per status for one agent (or everyone).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommissionSummary {
    pub pending: Decimal,
    pub paid: Decimal,
    pub cancelled: Decimal,
    pub count: i64,
}

impl CommissionSummary {
    pub fn add(&mut self, status: CommissionStatus, amount: Decimal) {
        match status {
            CommissionStatus::Pending => self.pending = self.pending.saturating_add(amount),
            CommissionStatus::Paid => self.paid = self.paid.saturating_add(amount),
            CommissionStatus::Cancelled => {
                self.cancelled = self.cancelled.saturating_add(amount)
            }
        }
        self.count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn rate(pct: &str, min: Option<&str>, max: Option<&str>) -> CommissionRate {
        CommissionRate {
            kind: TicketKind::Deposit,
            rate_percent: d(pct),
            min_amount: min.map(d),
            max_amount: max.map(d),
            updated_at: TimeMs::new(0),
        }
    }

    #[test]
    fn test_commission_plain_rate() {
        assert_eq!(rate("0.5", None, None).commission_for(d("20000")), d("100"));
    }

    #[test]
    fn test_commission_clamped() {
        let r = rate("1", Some("50"), Some("500"));
        assert_eq!(r.commission_for(d("1000")), d("50"));
        assert_eq!(r.commission_for(d("10000")), d("100"));
        assert_eq!(r.commission_for(d("100000")), d("500"));
    }

    #[test]
    fn test_summary_accumulates() {
        let mut s = CommissionSummary::default();
        s.add(CommissionStatus::Pending, d("10"));
        s.add(CommissionStatus::Pending, d("5.5"));
        s.add(CommissionStatus::Paid, d("1"));
        assert_eq!(s.pending, d("15.5"));
        assert_eq!(s.paid, d("1"));
        assert_eq!(s.count, 3);
    }
}
