//! Ledger and investment entities shared by the storage backends.

use crate::payments::types::{GatewayName, PaymentKind, PaymentStatus};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// One attempted money movement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: PaymentKind,
    pub status: PaymentStatus,
    pub gateway: GatewayName,
    /// Canonical USD amount.
    pub amount_usd: BigDecimal,
    /// Amount quoted to the user in `local_currency`.
    pub local_amount: BigDecimal,
    pub local_currency: String,
    pub provider_tx_id: Option<String>,
    pub provider_details: JsonValue,
    pub plan_id: Option<Uuid>,
    pub shares: Option<i32>,
    /// Plan sales window `shares` were reserved in.
    pub share_window: Option<i64>,
    /// Investment this payment funds, pays out or refunds.
    pub investment_id: Option<Uuid>,
    /// Ledger payment this refund reverses.
    pub original_payment_id: Option<Uuid>,
    pub failure_reason: Option<String>,
    pub reconciled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: PaymentKind,
    pub gateway: GatewayName,
    pub amount_usd: BigDecimal,
    pub local_amount: BigDecimal,
    pub local_currency: String,
    pub provider_details: JsonValue,
    pub plan_id: Option<Uuid>,
    pub shares: Option<i32>,
    pub share_window: Option<i64>,
    pub investment_id: Option<Uuid>,
    pub original_payment_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InvestmentStatus {
    Active,
    Matured,
    Cancelled,
    Withdrawn,
}

impl InvestmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvestmentStatus::Active => "active",
            InvestmentStatus::Matured => "matured",
            InvestmentStatus::Cancelled => "cancelled",
            InvestmentStatus::Withdrawn => "withdrawn",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(InvestmentStatus::Active),
            "matured" => Some(InvestmentStatus::Matured),
            "cancelled" => Some(InvestmentStatus::Cancelled),
            "withdrawn" => Some(InvestmentStatus::Withdrawn),
            _ => None,
        }
    }

    /// The only legal edges: active→matured, active→cancelled,
    /// matured→withdrawn.
    pub fn can_transition_to(&self, next: InvestmentStatus) -> bool {
        matches!(
            (self, next),
            (InvestmentStatus::Active, InvestmentStatus::Matured)
                | (InvestmentStatus::Active, InvestmentStatus::Cancelled)
                | (InvestmentStatus::Matured, InvestmentStatus::Withdrawn)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InvestmentStatus::Cancelled | InvestmentStatus::Withdrawn)
    }
}

impl std::fmt::Display for InvestmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Investment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub shares: i32,
    /// USD principal.
    pub amount: BigDecimal,
    /// Copied from the plan when the investment opened; never re-read.
    pub profit_percent: BigDecimal,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: InvestmentStatus,
    pub refund_amount: Option<BigDecimal>,
    /// Funding payment. Auto-reinvested positions keep the original's.
    pub payment_id: Uuid,
    pub auto_reinvested: bool,
    pub reinvested_from: Option<Uuid>,
    /// Payout in flight for a matured investment.
    pub withdrawal_payment_id: Option<Uuid>,
    /// Cancellation refund in flight, or the one that completed.
    pub refund_payment_id: Option<Uuid>,
    pub refund_attempts: i32,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Investment {
    pub fn duration(&self) -> chrono::Duration {
        self.end_date - self.start_date
    }

    /// Cancelled with a positive refund that is neither in flight nor done.
    pub fn refund_owed(&self) -> bool {
        self.status == InvestmentStatus::Cancelled
            && self.refund_payment_id.is_none()
            && self.refunded_at.is_none()
            && self
                .refund_amount
                .as_ref()
                .map(|amount| *amount > BigDecimal::from(0))
                .unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct NewInvestment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub shares: i32,
    pub amount: BigDecimal,
    pub profit_percent: BigDecimal,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub payment_id: Uuid,
    pub reinvested_from: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    pub duration_days: i32,
    pub profit_percent: BigDecimal,
    pub min_shares: i32,
    pub max_shares: i32,
    pub daily_limit: i32,
    pub daily_sold: i32,
    /// Advances on every daily reset. Reservations are released only into
    /// the window they were taken from.
    pub sales_window: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReferralStatus {
    Pending,
    Paid,
}

impl ReferralStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferralStatus::Pending => "pending",
            ReferralStatus::Paid => "paid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(ReferralStatus::Pending),
            "paid" => Some(ReferralStatus::Paid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Referral {
    pub id: Uuid,
    pub referrer_id: Uuid,
    pub referred_id: Uuid,
    pub bonus_amount: Option<BigDecimal>,
    pub currency: String,
    pub status: ReferralStatus,
    /// Set once the referred user's first investment paid the bonus.
    pub first_investment: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn investment_state_machine_edges() {
        use InvestmentStatus::*;
        assert!(Active.can_transition_to(Matured));
        assert!(Active.can_transition_to(Cancelled));
        assert!(Matured.can_transition_to(Withdrawn));

        assert!(!Active.can_transition_to(Withdrawn));
        assert!(!Matured.can_transition_to(Cancelled));
        assert!(!Withdrawn.can_transition_to(Active));
        assert!(!Cancelled.can_transition_to(Active));
        assert!(!Matured.can_transition_to(Active));
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            InvestmentStatus::Active,
            InvestmentStatus::Matured,
            InvestmentStatus::Cancelled,
            InvestmentStatus::Withdrawn,
        ] {
            assert_eq!(InvestmentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(InvestmentStatus::parse("paused"), None);
    }
}
