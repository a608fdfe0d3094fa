use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::models::{Referral, ReferralStatus};
use crate::database::repository::{DbResult, ReferralStore};
use async_trait::async_trait;
use bigdecimal::Zero;
use chrono::{DateTime, Utc};
use sqlx::{types::BigDecimal, FromRow, PgPool};
use uuid::Uuid;

const REFERRAL_COLUMNS: &str = "id, referrer_id, referred_id, bonus_amount, currency, status, \
     first_investment, created_at, updated_at";

#[derive(Debug, Clone, FromRow)]
struct ReferralRow {
    id: Uuid,
    referrer_id: Uuid,
    referred_id: Uuid,
    bonus_amount: Option<BigDecimal>,
    currency: String,
    status: String,
    first_investment: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ReferralRow> for Referral {
    type Error = DatabaseError;

    fn try_from(row: ReferralRow) -> Result<Self, Self::Error> {
        let status = ReferralStatus::parse(&row.status).ok_or_else(|| {
            DatabaseError::new(DatabaseErrorKind::Unknown {
                message: format!("unexpected referral status '{}'", row.status),
            })
        })?;
        Ok(Referral {
            id: row.id,
            referrer_id: row.referrer_id,
            referred_id: row.referred_id,
            bonus_amount: row.bonus_amount,
            currency: row.currency,
            status,
            first_investment: row.first_investment,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub struct ReferralRepository {
    pool: PgPool,
}

impl ReferralRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReferralStore for ReferralRepository {
    async fn insert(&self, referral: &Referral) -> DbResult<Referral> {
        let sql = format!(
            "INSERT INTO referrals (id, referrer_id, referred_id, bonus_amount, currency, status, \
             first_investment) VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {}",
            REFERRAL_COLUMNS
        );
        sqlx::query_as::<_, ReferralRow>(&sql)
            .bind(referral.id)
            .bind(referral.referrer_id)
            .bind(referral.referred_id)
            .bind(&referral.bonus_amount)
            .bind(&referral.currency)
            .bind(referral.status.as_str())
            .bind(referral.first_investment)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .try_into()
    }

    async fn find_by_referred(&self, referred_id: Uuid) -> DbResult<Option<Referral>> {
        let sql = format!(
            "SELECT {} FROM referrals WHERE referred_id = $1",
            REFERRAL_COLUMNS
        );
        sqlx::query_as::<_, ReferralRow>(&sql)
            .bind(referred_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Referral::try_from)
            .transpose()
    }

    async fn claim_first_investment_bonus(
        &self,
        referred_id: Uuid,
        bonus: BigDecimal,
    ) -> DbResult<Option<Referral>> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let sql = format!(
            "UPDATE referrals SET first_investment = TRUE, status = 'paid', bonus_amount = $2, \
             updated_at = NOW() \
             WHERE referred_id = $1 AND first_investment = FALSE \
             RETURNING {}",
            REFERRAL_COLUMNS
        );
        let claimed = sqlx::query_as::<_, ReferralRow>(&sql)
            .bind(referred_id)
            .bind(&bonus)
            .fetch_optional(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let Some(row) = claimed else {
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            return Ok(None);
        };

        sqlx::query(
            "INSERT INTO user_balances (user_id, balance) VALUES ($1, $2) \
             ON CONFLICT (user_id) DO UPDATE \
             SET balance = user_balances.balance + EXCLUDED.balance, updated_at = NOW()",
        )
        .bind(row.referrer_id)
        .bind(&bonus)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(Some(row.try_into()?))
    }

    async fn balance(&self, user_id: Uuid) -> DbResult<BigDecimal> {
        let balance: Option<BigDecimal> =
            sqlx::query_scalar("SELECT balance FROM user_balances WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;
        Ok(balance.unwrap_or_else(BigDecimal::zero))
    }
}
