use crate::database::error::DatabaseError;
use crate::database::models::Referral;
use crate::database::repository::ReferralStore;
use bigdecimal::{BigDecimal, Zero};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ReferralError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Invalid investment amount: {0}")]
    InvalidAmount(String),
}

/// Credits a referrer once, on the referred user's first completed
/// investment.
pub struct ReferralBonusCalculator {
    referrals: Arc<dyn ReferralStore>,
    bonus_percent: BigDecimal,
}

impl ReferralBonusCalculator {
    pub fn new(referrals: Arc<dyn ReferralStore>, bonus_percent: BigDecimal) -> Self {
        Self {
            referrals,
            bonus_percent,
        }
    }

    pub fn bonus_for(&self, amount_usd: &BigDecimal) -> BigDecimal {
        amount_usd * &self.bonus_percent / BigDecimal::from(100)
    }

    /// Returns the paid referral, or `None` when the user has no referrer or
    /// the bonus was already paid.
    pub async fn on_first_investment(
        &self,
        user_id: Uuid,
        amount_usd: &BigDecimal,
    ) -> Result<Option<Referral>, ReferralError> {
        if *amount_usd <= BigDecimal::zero() {
            return Err(ReferralError::InvalidAmount(amount_usd.to_string()));
        }

        match self.referrals.find_by_referred(user_id).await? {
            Some(referral) if !referral.first_investment => {}
            _ => {
                debug!(user_id = %user_id, "no unpaid referral for user");
                return Ok(None);
            }
        }

        let bonus = self.bonus_for(amount_usd);
        let paid = self
            .referrals
            .claim_first_investment_bonus(user_id, bonus.clone())
            .await?;

        if let Some(referral) = &paid {
            info!(
                referrer_id = %referral.referrer_id,
                referred_id = %user_id,
                bonus = %bonus,
                "referral bonus credited"
            );
        }
        Ok(paid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemoryReferralStore;
    use crate::database::models::ReferralStatus;
    use chrono::Utc;

    #[tokio::test]
    async fn bonus_paid_once_per_referral() {
        let store = Arc::new(InMemoryReferralStore::new());
        let referrer = Uuid::new_v4();
        let referred = Uuid::new_v4();
        store
            .insert(&Referral {
                id: Uuid::new_v4(),
                referrer_id: referrer,
                referred_id: referred,
                bonus_amount: None,
                currency: "USD".to_string(),
                status: ReferralStatus::Pending,
                first_investment: false,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        let calculator = ReferralBonusCalculator::new(store.clone(), BigDecimal::from(5));

        let paid = calculator
            .on_first_investment(referred, &BigDecimal::from(200))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(paid.bonus_amount, Some(BigDecimal::from(10)));
        assert_eq!(paid.status, ReferralStatus::Paid);

        for _ in 0..3 {
            assert!(calculator
                .on_first_investment(referred, &BigDecimal::from(500))
                .await
                .unwrap()
                .is_none());
        }
        assert_eq!(store.balance(referrer).await.unwrap(), BigDecimal::from(10));
    }

    #[tokio::test]
    async fn user_without_referrer_is_a_no_op() {
        let calculator = ReferralBonusCalculator::new(
            Arc::new(InMemoryReferralStore::new()),
            BigDecimal::from(5),
        );
        assert!(calculator
            .on_first_investment(Uuid::new_v4(), &BigDecimal::from(100))
            .await
            .unwrap()
            .is_none());
    }
}
