use crate::db::Repository;
use crate::domain::{Decimal, TicketKind};
use std::sync::Arc;

#[derive(Clone)]
pub struct CommissionCalculator {
    repo: Arc<Repository>,
}

impl CommissionCalculator {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    /// `(rate_percent, amount)` earned on `base` for a ticket of `kind`.
    ///
    /// Returns `None` when no rate is configured for the kind.
    pub async fn calculate(
        &self,
        kind: TicketKind,
        base: Decimal,
    ) -> Result<Option<(Decimal, Decimal)>, sqlx::Error> {
        let rate = self.repo.get_commission_rate(kind).await?;
        Ok(rate.map(|r| (r.rate_percent, r.commission_for(base))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::test_support::setup_test_db;
    use crate::domain::{CommissionRate, TimeMs};
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[tokio::test]
    async fn test_calculate_with_and_without_rate() {
        let (repo, _temp) = setup_test_db().await;
        let repo = Arc::new(repo);
        let calc = CommissionCalculator::new(repo.clone());

        assert!(calc
            .calculate(TicketKind::Deposit, d("1000"))
            .await
            .unwrap()
            .is_none());

        repo.upsert_commission_rate(&CommissionRate {
            kind: TicketKind::Deposit,
            rate_percent: d("1.5"),
            min_amount: Some(d("20")),
            max_amount: Some(d("500")),
            updated_at: TimeMs::now(),
        })
        .await
        .unwrap();

        let (rate, amount) = calc
            .calculate(TicketKind::Deposit, d("10000"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rate, d("1.5"));
        assert_eq!(amount, d("150"));

        let (_, floor) = calc
            .calculate(TicketKind::Deposit, d("100"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(floor, d("20"));
    }
}
