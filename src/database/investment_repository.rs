use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::models::{Investment, InvestmentStatus, NewInvestment};
use crate::database::repository::{DbResult, InvestmentStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::BigDecimal, FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

const INVESTMENT_COLUMNS: &str = "id, user_id, plan_id, shares, amount, profit_percent, \
     start_date, end_date, status, refund_amount, payment_id, auto_reinvested, reinvested_from, \
     withdrawal_payment_id, refund_payment_id, refund_attempts, refunded_at, created_at, \
     updated_at";

#[derive(Debug, Clone, FromRow)]
struct InvestmentRow {
    id: Uuid,
    user_id: Uuid,
    plan_id: Uuid,
    shares: i32,
    amount: BigDecimal,
    profit_percent: BigDecimal,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    status: String,
    refund_amount: Option<BigDecimal>,
    payment_id: Uuid,
    auto_reinvested: bool,
    reinvested_from: Option<Uuid>,
    withdrawal_payment_id: Option<Uuid>,
    refund_payment_id: Option<Uuid>,
    refund_attempts: i32,
    refunded_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<InvestmentRow> for Investment {
    type Error = DatabaseError;

    fn try_from(row: InvestmentRow) -> Result<Self, Self::Error> {
        let status = InvestmentStatus::parse(&row.status).ok_or_else(|| {
            DatabaseError::new(DatabaseErrorKind::Unknown {
                message: format!("unexpected investment status '{}'", row.status),
            })
        })?;
        Ok(Investment {
            id: row.id,
            user_id: row.user_id,
            plan_id: row.plan_id,
            shares: row.shares,
            amount: row.amount,
            profit_percent: row.profit_percent,
            start_date: row.start_date,
            end_date: row.end_date,
            status,
            refund_amount: row.refund_amount,
            payment_id: row.payment_id,
            auto_reinvested: row.auto_reinvested,
            reinvested_from: row.reinvested_from,
            withdrawal_payment_id: row.withdrawal_payment_id,
            refund_payment_id: row.refund_payment_id,
            refund_attempts: row.refund_attempts,
            refunded_at: row.refunded_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn convert_all(rows: Vec<InvestmentRow>) -> DbResult<Vec<Investment>> {
    rows.into_iter().map(Investment::try_from).collect()
}

pub struct InvestmentRepository {
    pool: PgPool,
}

impl InvestmentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_in(
        tx: &mut Transaction<'_, Postgres>,
        investment: &NewInvestment,
    ) -> DbResult<Option<Investment>> {
        let sql = format!(
            "INSERT INTO investments (id, user_id, plan_id, shares, amount, profit_percent, \
             start_date, end_date, status, payment_id, reinvested_from) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'active', $9, $10) \
             ON CONFLICT (id) DO NOTHING \
             RETURNING {}",
            INVESTMENT_COLUMNS
        );
        sqlx::query_as::<_, InvestmentRow>(&sql)
            .bind(investment.id)
            .bind(investment.user_id)
            .bind(investment.plan_id)
            .bind(investment.shares)
            .bind(&investment.amount)
            .bind(&investment.profit_percent)
            .bind(investment.start_date)
            .bind(investment.end_date)
            .bind(investment.payment_id)
            .bind(investment.reinvested_from)
            .fetch_optional(&mut **tx)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Investment::try_from)
            .transpose()
    }
}

#[async_trait]
impl InvestmentStore for InvestmentRepository {
    async fn insert_if_absent(&self, investment: &NewInvestment) -> DbResult<(Investment, bool)> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;
        let created = Self::insert_in(&mut tx, investment).await?;
        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        match created {
            Some(row) => Ok((row, true)),
            None => self
                .find_by_id(investment.id)
                .await?
                .map(|row| (row, false))
                .ok_or_else(|| DatabaseError::not_found("Investment", investment.id)),
        }
    }

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<Investment>> {
        let sql = format!("SELECT {} FROM investments WHERE id = $1", INVESTMENT_COLUMNS);
        sqlx::query_as::<_, InvestmentRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Investment::try_from)
            .transpose()
    }

    async fn transition(
        &self,
        id: Uuid,
        from: InvestmentStatus,
        to: InvestmentStatus,
        refund_amount: Option<BigDecimal>,
    ) -> DbResult<Option<Investment>> {
        let sql = format!(
            "UPDATE investments SET status = $3, \
             refund_amount = COALESCE($4, refund_amount), updated_at = NOW() \
             WHERE id = $1 AND status = $2 AND withdrawal_payment_id IS NULL \
             RETURNING {}",
            INVESTMENT_COLUMNS
        );
        sqlx::query_as::<_, InvestmentRow>(&sql)
            .bind(id)
            .bind(from.as_str())
            .bind(to.as_str())
            .bind(refund_amount)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Investment::try_from)
            .transpose()
    }

    async fn claim_withdrawal(&self, id: Uuid, payment_id: Uuid) -> DbResult<Option<Investment>> {
        let sql = format!(
            "UPDATE investments SET withdrawal_payment_id = $2, updated_at = NOW() \
             WHERE id = $1 AND status = 'matured' AND withdrawal_payment_id IS NULL \
               AND auto_reinvested = FALSE \
             RETURNING {}",
            INVESTMENT_COLUMNS
        );
        sqlx::query_as::<_, InvestmentRow>(&sql)
            .bind(id)
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Investment::try_from)
            .transpose()
    }

    async fn release_withdrawal(&self, id: Uuid, payment_id: Uuid) -> DbResult<bool> {
        let updated = sqlx::query(
            "UPDATE investments SET withdrawal_payment_id = NULL, updated_at = NOW() \
             WHERE id = $1 AND status = 'matured' AND withdrawal_payment_id = $2",
        )
        .bind(id)
        .bind(payment_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .rows_affected();
        Ok(updated == 1)
    }

    async fn complete_withdrawal(
        &self,
        id: Uuid,
        payment_id: Uuid,
    ) -> DbResult<Option<Investment>> {
        let sql = format!(
            "UPDATE investments SET status = 'withdrawn', updated_at = NOW() \
             WHERE id = $1 AND status = 'matured' AND withdrawal_payment_id = $2 \
             RETURNING {}",
            INVESTMENT_COLUMNS
        );
        sqlx::query_as::<_, InvestmentRow>(&sql)
            .bind(id)
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Investment::try_from)
            .transpose()
    }

    async fn mature_due(&self, now: DateTime<Utc>, limit: i64) -> DbResult<Vec<Investment>> {
        // SKIP LOCKED lets two sweeps run side by side without double work.
        let sql = format!(
            "UPDATE investments SET status = 'matured', updated_at = NOW() \
             WHERE id IN ( \
                 SELECT id FROM investments \
                 WHERE status = 'active' AND end_date < $1 \
                 ORDER BY end_date ASC LIMIT $2 \
                 FOR UPDATE SKIP LOCKED) \
             RETURNING {}",
            INVESTMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, InvestmentRow>(&sql)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        convert_all(rows)
    }

    async fn list_reinvest_due(
        &self,
        ended_before: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<Investment>> {
        let sql = format!(
            "SELECT {} FROM investments \
             WHERE status = 'matured' AND auto_reinvested = FALSE \
               AND withdrawal_payment_id IS NULL AND end_date < $1 \
             ORDER BY end_date ASC LIMIT $2",
            INVESTMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, InvestmentRow>(&sql)
            .bind(ended_before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        convert_all(rows)
    }

    async fn reinvest(
        &self,
        original_id: Uuid,
        clone: &NewInvestment,
    ) -> DbResult<Option<Investment>> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let flagged = sqlx::query(
            "UPDATE investments SET auto_reinvested = TRUE, updated_at = NOW() \
             WHERE id = $1 AND status = 'matured' AND auto_reinvested = FALSE \
               AND withdrawal_payment_id IS NULL",
        )
        .bind(original_id)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .rows_affected();

        if flagged == 0 {
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            return Ok(None);
        }

        let created = Self::insert_in(&mut tx, clone)
            .await?
            .ok_or_else(|| DatabaseError::unique_violation("investments_pkey"))?;
        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(Some(created))
    }

    async fn claim_refund(&self, id: Uuid, payment_id: Uuid) -> DbResult<Option<Investment>> {
        let sql = format!(
            "UPDATE investments SET refund_payment_id = $2, \
             refund_attempts = refund_attempts + 1, updated_at = NOW() \
             WHERE id = $1 AND status = 'cancelled' AND refund_payment_id IS NULL \
               AND refunded_at IS NULL AND refund_amount > 0 \
             RETURNING {}",
            INVESTMENT_COLUMNS
        );
        sqlx::query_as::<_, InvestmentRow>(&sql)
            .bind(id)
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Investment::try_from)
            .transpose()
    }

    async fn release_refund(&self, id: Uuid, payment_id: Uuid) -> DbResult<bool> {
        let updated = sqlx::query(
            "UPDATE investments SET refund_payment_id = NULL, updated_at = NOW() \
             WHERE id = $1 AND refund_payment_id = $2 AND refunded_at IS NULL",
        )
        .bind(id)
        .bind(payment_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .rows_affected();
        Ok(updated == 1)
    }

    async fn complete_refund(&self, id: Uuid, payment_id: Uuid) -> DbResult<Option<Investment>> {
        let sql = format!(
            "UPDATE investments SET refunded_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND refund_payment_id = $2 AND refunded_at IS NULL \
             RETURNING {}",
            INVESTMENT_COLUMNS
        );
        sqlx::query_as::<_, InvestmentRow>(&sql)
            .bind(id)
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Investment::try_from)
            .transpose()
    }

    async fn list_refunds_owed(
        &self,
        max_attempts: i32,
        limit: i64,
    ) -> DbResult<Vec<Investment>> {
        let sql = format!(
            "SELECT {} FROM investments \
             WHERE status = 'cancelled' AND refund_payment_id IS NULL \
               AND refunded_at IS NULL AND refund_amount > 0 AND refund_attempts < $1 \
             ORDER BY updated_at ASC LIMIT $2",
            INVESTMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, InvestmentRow>(&sql)
            .bind(max_attempts)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        convert_all(rows)
    }
}
