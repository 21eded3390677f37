//! Wallets, ledger transactions and approval adjustments.

use crate::domain::{Decimal, TimeMs};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wallet {
    pub id: i64,
    pub user_id: i64,
    pub balance: Decimal,
    pub currency: String,
    pub is_frozen: bool,
    pub updated_at: TimeMs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Credit,
    Debit,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Credit => "credit",
            TransactionKind::Debit => "debit",
        }
    }

    /// Balance after applying `amount` in this direction, or `None` when
    /// the result is out of range.
    pub fn apply(&self, balance: Decimal, amount: Decimal) -> Option<Decimal> {
        match self {
            TransactionKind::Credit => balance.checked_add(amount),
            TransactionKind::Debit => balance.checked_sub(amount),
        }
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credit" => Ok(TransactionKind::Credit),
            "debit" => Ok(TransactionKind::Debit),
            other => Err(format!("unknown transaction kind: {}", other)),
        }
    }
}

/// What caused a ledger movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionSource {
    Deposit,
    Withdrawal,
    Commission,
    Manual,
}

impl TransactionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionSource::Deposit => "deposit",
            TransactionSource::Withdrawal => "withdrawal",
            TransactionSource::Commission => "commission",
            TransactionSource::Manual => "manual",
        }
    }
}

impl FromStr for TransactionSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionSource::Deposit),
            "withdrawal" => Ok(TransactionSource::Withdrawal),
            "commission" => Ok(TransactionSource::Commission),
            "manual" => Ok(TransactionSource::Manual),
            other => Err(format!("unknown transaction source: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub id: i64,
    pub wallet_id: i64,
    pub kind: TransactionKind,
    pub source: TransactionSource,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub reference: String,
    pub description: String,
    pub ticket_id: Option<i64>,
    pub created_by: Option<i64>,
    pub created_at: TimeMs,
}

impl Transaction {
    pub fn new_reference() -> String {
        format!("TXN-{}", uuid::Uuid::new_v4().simple())
    }
}

/// A ledger movement that has not been written yet.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub kind: TransactionKind,
    pub source: TransactionSource,
    pub amount: Decimal,
    pub description: String,
    pub ticket_id: Option<i64>,
    pub created_by: Option<i64>,
}

/// Change applied to a requested amount at approval time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Adjustment {
    /// Adds `amount * p / 100`; negative `p` deducts.
    Percentage(Decimal),
    /// Adds a fixed amount; negative deducts.
    Fixed(Decimal),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdjustmentError {
    #[error("adjusted amount {0} must be positive")]
    NonPositive(Decimal),
    #[error("adjustment is out of range")]
    Overflow,
}

impl Adjustment {
    /// Apply the adjustment, rounding the result to two decimal places.
    ///
    /// # Errors
    /// Returns an error if the adjusted amount is zero, negative or not
    /// representable.
    pub fn apply(&self, amount: Decimal) -> Result<Decimal, AdjustmentError> {
        let adjusted = match self {
            Adjustment::Percentage(p) => amount
                .checked_mul(*p)
                .and_then(|v| v.checked_div(Decimal::hundred()))
                .and_then(|delta| amount.checked_add(delta)),
            Adjustment::Fixed(x) => amount.checked_add(*x),
        }
        .ok_or(AdjustmentError::Overflow)?
        .round_money();
        if adjusted.is_positive() {
            Ok(adjusted)
        } else {
            Err(AdjustmentError::NonPositive(adjusted))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_percentage_adjustment() {
        let adj = Adjustment::Percentage(d("-1.5"));
        assert_eq!(adj.apply(d("1000")).unwrap(), d("985"));

        let adj = Adjustment::Percentage(d("10"));
        assert_eq!(adj.apply(d("250")).unwrap(), d("275"));
    }

    #[test]
    fn test_fixed_adjustment() {
        let adj = Adjustment::Fixed(d("-50"));
        assert_eq!(adj.apply(d("1000")).unwrap(), d("950"));
    }

    #[test]
    fn test_adjustment_rejects_non_positive_result() {
        let adj = Adjustment::Fixed(d("-1000"));
        assert!(matches!(
            adj.apply(d("1000")),
            Err(AdjustmentError::NonPositive(_))
        ));
        let adj = Adjustment::Percentage(d("-150"));
        assert!(adj.apply(d("10")).is_err());
    }

    #[test]
    fn test_adjustment_out_of_range_is_an_error() {
        let huge = d("79228162514264337593543950335");
        assert_eq!(
            Adjustment::Fixed(huge).apply(d("1000")),
            Err(AdjustmentError::Overflow)
        );
        assert_eq!(
            Adjustment::Percentage(huge).apply(d("1000")),
            Err(AdjustmentError::Overflow)
        );
    }

    #[test]
    fn test_adjustment_json_shape() {
        let adj: Adjustment =
            serde_json::from_str(r#"{"type":"percentage","value":"2.5"}"#).unwrap();
        assert_eq!(adj, Adjustment::Percentage(d("2.5")));
        let adj: Adjustment = serde_json::from_str(r#"{"type":"fixed","value":-20}"#).unwrap();
        assert_eq!(adj, Adjustment::Fixed(d("-20")));
    }

    #[test]
    fn test_transaction_kind_apply() {
        assert_eq!(TransactionKind::Credit.apply(d("10"), d("5")), Some(d("15")));
        assert_eq!(TransactionKind::Debit.apply(d("10"), d("5")), Some(d("5")));
        let max = d("79228162514264337593543950335");
        assert_eq!(TransactionKind::Credit.apply(max, d("1")), None);
    }

    #[test]
    fn test_transaction_reference_format() {
        let r = Transaction::new_reference();
        assert!(r.starts_with("TXN-"));
        assert_eq!(r.len(), 4 + 32);
    }
}
