//! Storage contracts. Every method that guards an invariant (terminal
//! status, daily share limit, referral bonus, auto-reinvest flag) is a
//! single atomic compare-and-set in each backend.

use crate::database::error::DatabaseError;
use crate::database::models::{
    Investment, InvestmentStatus, NewInvestment, NewPayment, PaymentRecord, Plan, Referral,
};
use crate::payments::types::{GatewayName, PaymentStatus};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

pub type DbResult<T> = Result<T, DatabaseError>;

#[async_trait]
pub trait PaymentLedger: Send + Sync {
    async fn insert(&self, payment: &NewPayment) -> DbResult<PaymentRecord>;

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<PaymentRecord>>;

    async fn find_by_provider_tx_id(
        &self,
        gateway: GatewayName,
        provider_tx_id: &str,
    ) -> DbResult<Option<PaymentRecord>>;

    /// Sets the provider transaction id once. Re-assigning the same value is
    /// a no-op; a different value, or one owned by another payment, is a
    /// `UniqueViolation`.
    async fn assign_provider_tx_id(&self, id: Uuid, provider_tx_id: &str) -> DbResult<()>;

    /// `pending → status`. Returns `None` when the payment was already
    /// terminal, so exactly one caller ever wins.
    async fn mark_terminal(
        &self,
        id: Uuid,
        status: PaymentStatus,
        failure_reason: Option<&str>,
        provider_data: Option<JsonValue>,
    ) -> DbResult<Option<PaymentRecord>>;

    /// The single post-terminal write: stores the provider's callback
    /// payload if no reconciliation was recorded yet.
    async fn record_reconciliation(&self, id: Uuid, payload: JsonValue) -> DbResult<bool>;

    /// Pending payments of any kind on the given rails that already carry a
    /// provider transaction id, oldest first.
    async fn list_pending_tracked(
        &self,
        gateways: &[GatewayName],
        limit: i64,
    ) -> DbResult<Vec<PaymentRecord>>;
}

#[async_trait]
pub trait InvestmentStore: Send + Sync {
    /// Inserts unless an investment with the same id exists. The flag is
    /// true when this call created the row.
    async fn insert_if_absent(&self, investment: &NewInvestment) -> DbResult<(Investment, bool)>;

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<Investment>>;

    /// Compare-and-set on status; `None` if the row was not in `from`.
    async fn transition(
        &self,
        id: Uuid,
        from: InvestmentStatus,
        to: InvestmentStatus,
        refund_amount: Option<BigDecimal>,
    ) -> DbResult<Option<Investment>>;

    /// Reserves a matured, not yet reinvested investment for one payout.
    async fn claim_withdrawal(&self, id: Uuid, payment_id: Uuid) -> DbResult<Option<Investment>>;

    async fn release_withdrawal(&self, id: Uuid, payment_id: Uuid) -> DbResult<bool>;

    /// `matured → withdrawn`, only for the payout holding the claim.
    async fn complete_withdrawal(&self, id: Uuid, payment_id: Uuid)
        -> DbResult<Option<Investment>>;

    /// Moves active investments whose `end_date` is before `now` to matured
    /// and returns them.
    async fn mature_due(&self, now: DateTime<Utc>, limit: i64) -> DbResult<Vec<Investment>>;

    /// Matured, unclaimed, not yet reinvested investments that ended before
    /// `ended_before`.
    async fn list_reinvest_due(
        &self,
        ended_before: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<Investment>>;

    /// Flags `original_id` as reinvested and inserts `clone` in one step.
    /// `None` if another sweep already reinvested it or it was claimed.
    async fn reinvest(&self, original_id: Uuid, clone: &NewInvestment)
        -> DbResult<Option<Investment>>;

    /// Reserves a cancelled investment's owed refund for one refund payment
    /// and counts the attempt. `None` if a refund is in flight or done.
    async fn claim_refund(&self, id: Uuid, payment_id: Uuid) -> DbResult<Option<Investment>>;

    /// Frees the claim after `payment_id` failed, making the refund owed again.
    async fn release_refund(&self, id: Uuid, payment_id: Uuid) -> DbResult<bool>;

    /// Stamps `refunded_at`, only for the refund holding the claim.
    async fn complete_refund(&self, id: Uuid, payment_id: Uuid) -> DbResult<Option<Investment>>;

    /// Cancelled investments still owed a refund after fewer than
    /// `max_attempts` tries, least recently touched first.
    async fn list_refunds_owed(&self, max_attempts: i32, limit: i64)
        -> DbResult<Vec<Investment>>;
}

#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn insert(&self, plan: &Plan) -> DbResult<Plan>;

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<Plan>>;

    /// Atomic check-and-increment of `daily_sold`. Returns the sales window
    /// the shares were counted in, or `None` when they would exceed
    /// `daily_limit`.
    async fn reserve_shares(&self, id: Uuid, shares: i32) -> DbResult<Option<i64>>;

    /// Gives back a reservation taken in `window`. A no-op (false) once the
    /// counter has been reset since.
    async fn release_shares(&self, id: Uuid, shares: i32, window: i64) -> DbResult<bool>;

    /// Zeroes `daily_sold` and opens a new sales window on every plan that
    /// sold something.
    async fn reset_daily_sold(&self) -> DbResult<u64>;

    async fn update_terms(
        &self,
        id: Uuid,
        duration_days: i32,
        profit_percent: BigDecimal,
    ) -> DbResult<Option<Plan>>;
}

#[async_trait]
pub trait ReferralStore: Send + Sync {
    async fn insert(&self, referral: &Referral) -> DbResult<Referral>;

    async fn find_by_referred(&self, referred_id: Uuid) -> DbResult<Option<Referral>>;

    /// Flips `first_investment` and credits the referrer in one step.
    /// `None` when there is no referral or the bonus was already paid.
    async fn claim_first_investment_bonus(
        &self,
        referred_id: Uuid,
        bonus: BigDecimal,
    ) -> DbResult<Option<Referral>>;

    async fn balance(&self, user_id: Uuid) -> DbResult<BigDecimal>;
}
