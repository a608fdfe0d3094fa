use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::models::{NewPayment, PaymentRecord};
use crate::database::repository::{DbResult, PaymentLedger};
use crate::payments::types::{GatewayName, PaymentKind, PaymentStatus};
use async_trait::async_trait;
use sqlx::{types::BigDecimal, FromRow, PgPool};
use uuid::Uuid;

const PAYMENT_COLUMNS: &str = "id, user_id, kind, status, gateway, amount_usd, local_amount, \
     local_currency, provider_tx_id, provider_details, plan_id, shares, share_window, \
     investment_id, original_payment_id, failure_reason, reconciled_at, created_at, updated_at";

#[derive(Debug, Clone, FromRow)]
struct PaymentRow {
    id: Uuid,
    user_id: Uuid,
    kind: String,
    status: String,
    gateway: String,
    amount_usd: BigDecimal,
    local_amount: BigDecimal,
    local_currency: String,
    provider_tx_id: Option<String>,
    provider_details: serde_json::Value,
    plan_id: Option<Uuid>,
    shares: Option<i32>,
    share_window: Option<i64>,
    investment_id: Option<Uuid>,
    original_payment_id: Option<Uuid>,
    failure_reason: Option<String>,
    reconciled_at: Option<chrono::DateTime<chrono::Utc>>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

fn corrupt(column: &str, value: &str) -> DatabaseError {
    DatabaseError::new(DatabaseErrorKind::Unknown {
        message: format!("unexpected {} '{}' in payments", column, value),
    })
}

impl TryFrom<PaymentRow> for PaymentRecord {
    type Error = DatabaseError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let kind = PaymentKind::parse(&row.kind).ok_or_else(|| corrupt("kind", &row.kind))?;
        let status =
            PaymentStatus::parse(&row.status).ok_or_else(|| corrupt("status", &row.status))?;
        let gateway: GatewayName = row
            .gateway
            .parse()
            .map_err(|_| corrupt("gateway", &row.gateway))?;
        Ok(PaymentRecord {
            id: row.id,
            user_id: row.user_id,
            kind,
            status,
            gateway,
            amount_usd: row.amount_usd,
            local_amount: row.local_amount,
            local_currency: row.local_currency,
            provider_tx_id: row.provider_tx_id,
            provider_details: row.provider_details,
            plan_id: row.plan_id,
            shares: row.shares,
            share_window: row.share_window,
            investment_id: row.investment_id,
            original_payment_id: row.original_payment_id,
            failure_reason: row.failure_reason,
            reconciled_at: row.reconciled_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Postgres-backed payment ledger.
pub struct PaymentRepository {
    pool: PgPool,
}

impl PaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentLedger for PaymentRepository {
    async fn insert(&self, payment: &NewPayment) -> DbResult<PaymentRecord> {
        let sql = format!(
            "INSERT INTO payments (id, user_id, kind, status, gateway, amount_usd, local_amount, \
             local_currency, provider_details, plan_id, shares, share_window, investment_id, \
             original_payment_id) \
             VALUES ($1, $2, $3, 'pending', $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             RETURNING {}",
            PAYMENT_COLUMNS
        );
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(payment.id)
            .bind(payment.user_id)
            .bind(payment.kind.as_str())
            .bind(payment.gateway.as_str())
            .bind(&payment.amount_usd)
            .bind(&payment.local_amount)
            .bind(&payment.local_currency)
            .bind(&payment.provider_details)
            .bind(payment.plan_id)
            .bind(payment.shares)
            .bind(payment.share_window)
            .bind(payment.investment_id)
            .bind(payment.original_payment_id)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .try_into()
    }

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<PaymentRecord>> {
        let sql = format!("SELECT {} FROM payments WHERE id = $1", PAYMENT_COLUMNS);
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(PaymentRecord::try_from)
            .transpose()
    }

    async fn find_by_provider_tx_id(
        &self,
        gateway: GatewayName,
        provider_tx_id: &str,
    ) -> DbResult<Option<PaymentRecord>> {
        let sql = format!(
            "SELECT {} FROM payments WHERE gateway = $1 AND provider_tx_id = $2",
            PAYMENT_COLUMNS
        );
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(gateway.as_str())
            .bind(provider_tx_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(PaymentRecord::try_from)
            .transpose()
    }

    async fn assign_provider_tx_id(&self, id: Uuid, provider_tx_id: &str) -> DbResult<()> {
        // The unique index on provider_tx_id rejects ids owned elsewhere.
        let updated = sqlx::query(
            "UPDATE payments SET provider_tx_id = $2, updated_at = NOW() \
             WHERE id = $1 AND (provider_tx_id IS NULL OR provider_tx_id = $2)",
        )
        .bind(id)
        .bind(provider_tx_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .rows_affected();

        if updated == 1 {
            return Ok(());
        }
        match self.find_by_id(id).await? {
            None => Err(DatabaseError::not_found("Payment", id)),
            Some(_) => Err(DatabaseError::unique_violation(
                "payments_provider_tx_id_immutable",
            )),
        }
    }

    async fn mark_terminal(
        &self,
        id: Uuid,
        status: PaymentStatus,
        failure_reason: Option<&str>,
        provider_data: Option<serde_json::Value>,
    ) -> DbResult<Option<PaymentRecord>> {
        if !status.is_terminal() {
            return Ok(None);
        }
        let sql = format!(
            "UPDATE payments SET status = $2, failure_reason = $3, \
             provider_details = provider_details || COALESCE($4, '{{}}'::jsonb), \
             updated_at = NOW() \
             WHERE id = $1 AND status = 'pending' \
             RETURNING {}",
            PAYMENT_COLUMNS
        );
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(id)
            .bind(status.as_str())
            .bind(failure_reason)
            .bind(provider_data)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        match row {
            Some(row) => Ok(Some(row.try_into()?)),
            None if self.find_by_id(id).await?.is_none() => {
                Err(DatabaseError::not_found("Payment", id))
            }
            None => Ok(None),
        }
    }

    async fn record_reconciliation(&self, id: Uuid, payload: serde_json::Value) -> DbResult<bool> {
        let updated = sqlx::query(
            "UPDATE payments \
             SET provider_details = provider_details || jsonb_build_object('reconciliation', $2::jsonb), \
                 reconciled_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status <> 'pending' AND reconciled_at IS NULL",
        )
        .bind(id)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .rows_affected();
        Ok(updated == 1)
    }

    async fn list_pending_tracked(
        &self,
        gateways: &[GatewayName],
        limit: i64,
    ) -> DbResult<Vec<PaymentRecord>> {
        let names: Vec<&str> = gateways.iter().map(GatewayName::as_str).collect();
        let sql = format!(
            "SELECT {} FROM payments \
             WHERE status = 'pending' AND provider_tx_id IS NOT NULL \
               AND gateway = ANY($1) \
             ORDER BY created_at ASC LIMIT $2",
            PAYMENT_COLUMNS
        );
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(&names)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .into_iter()
            .map(PaymentRecord::try_from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(kind: &str, gateway: &str) -> PaymentRow {
        let now = chrono::Utc::now();
        PaymentRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            kind: kind.to_string(),
            status: "pending".to_string(),
            gateway: gateway.to_string(),
            amount_usd: BigDecimal::from(10),
            local_amount: BigDecimal::from(10),
            local_currency: "USD".to_string(),
            provider_tx_id: None,
            provider_details: serde_json::json!({}),
            plan_id: None,
            shares: None,
            share_window: None,
            investment_id: None,
            original_payment_id: None,
            failure_reason: None,
            reconciled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn row_conversion_parses_enums() {
        let record = PaymentRecord::try_from(row("investment", "mpesa")).unwrap();
        assert_eq!(record.kind, PaymentKind::Investment);
        assert_eq!(record.gateway, GatewayName::Mpesa);
        assert_eq!(record.status, PaymentStatus::Pending);
    }

    #[test]
    fn row_conversion_rejects_unknown_gateway() {
        assert!(PaymentRecord::try_from(row("investment", "bitpay")).is_err());
    }
}
