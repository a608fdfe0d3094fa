use crate::database::error::DatabaseError;
use crate::database::models::Plan;
use crate::database::repository::{DbResult, PlanStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::BigDecimal, FromRow, PgPool};
use uuid::Uuid;

const PLAN_COLUMNS: &str = "id, name, duration_days, profit_percent, min_shares, max_shares, \
     daily_limit, daily_sold, sales_window, created_at, updated_at";

#[derive(Debug, Clone, FromRow)]
struct PlanRow {
    id: Uuid,
    name: String,
    duration_days: i32,
    profit_percent: BigDecimal,
    min_shares: i32,
    max_shares: i32,
    daily_limit: i32,
    daily_sold: i32,
    sales_window: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PlanRow> for Plan {
    fn from(row: PlanRow) -> Self {
        Plan {
            id: row.id,
            name: row.name,
            duration_days: row.duration_days,
            profit_percent: row.profit_percent,
            min_shares: row.min_shares,
            max_shares: row.max_shares,
            daily_limit: row.daily_limit,
            daily_sold: row.daily_sold,
            sales_window: row.sales_window,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

pub struct PlanRepository {
    pool: PgPool,
}

impl PlanRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PlanStore for PlanRepository {
    async fn insert(&self, plan: &Plan) -> DbResult<Plan> {
        let sql = format!(
            "INSERT INTO plans (id, name, duration_days, profit_percent, min_shares, max_shares, \
             daily_limit, daily_sold, sales_window) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {}",
            PLAN_COLUMNS
        );
        sqlx::query_as::<_, PlanRow>(&sql)
            .bind(plan.id)
            .bind(&plan.name)
            .bind(plan.duration_days)
            .bind(&plan.profit_percent)
            .bind(plan.min_shares)
            .bind(plan.max_shares)
            .bind(plan.daily_limit)
            .bind(plan.daily_sold)
            .bind(plan.sales_window)
            .fetch_one(&self.pool)
            .await
            .map(Plan::from)
            .map_err(DatabaseError::from_sqlx)
    }

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<Plan>> {
        let sql = format!("SELECT {} FROM plans WHERE id = $1", PLAN_COLUMNS);
        sqlx::query_as::<_, PlanRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map(|row| row.map(Plan::from))
            .map_err(DatabaseError::from_sqlx)
    }

    async fn reserve_shares(&self, id: Uuid, shares: i32) -> DbResult<Option<i64>> {
        let window: Option<i64> = sqlx::query_scalar(
            "UPDATE plans SET daily_sold = daily_sold + $2, updated_at = NOW() \
             WHERE id = $1 AND daily_sold + $2 <= daily_limit RETURNING sales_window",
        )
        .bind(id)
        .bind(shares)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if window.is_some() {
            return Ok(window);
        }
        match self.find_by_id(id).await? {
            Some(_) => Ok(None),
            None => Err(DatabaseError::not_found("Plan", id)),
        }
    }

    async fn release_shares(&self, id: Uuid, shares: i32, window: i64) -> DbResult<bool> {
        let updated = sqlx::query(
            "UPDATE plans SET daily_sold = GREATEST(daily_sold - $2, 0), updated_at = NOW() \
             WHERE id = $1 AND sales_window = $3",
        )
        .bind(id)
        .bind(shares)
        .bind(window)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .rows_affected();
        Ok(updated == 1)
    }

    async fn reset_daily_sold(&self) -> DbResult<u64> {
        sqlx::query(
            "UPDATE plans SET daily_sold = 0, sales_window = sales_window + 1, updated_at = NOW() \
             WHERE daily_sold <> 0",
        )
            .execute(&self.pool)
            .await
            .map(|result| result.rows_affected())
            .map_err(DatabaseError::from_sqlx)
    }

    async fn update_terms(
        &self,
        id: Uuid,
        duration_days: i32,
        profit_percent: BigDecimal,
    ) -> DbResult<Option<Plan>> {
        let sql = format!(
            "UPDATE plans SET duration_days = $2, profit_percent = $3, updated_at = NOW() \
             WHERE id = $1 RETURNING {}",
            PLAN_COLUMNS
        );
        sqlx::query_as::<_, PlanRow>(&sql)
            .bind(id)
            .bind(duration_days)
            .bind(profit_percent)
            .fetch_optional(&self.pool)
            .await
            .map(|row| row.map(Plan::from))
            .map_err(DatabaseError::from_sqlx)
    }
}
