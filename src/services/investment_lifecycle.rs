//! Investment state machine: `active -> matured -> withdrawn` and
//! `active -> cancelled`.
//!
//! Money moves through the [`PaymentOrchestrator`]; the investment side of
//! a payment's terminal status is applied by [`InvestmentSettlementHook`],
//! which the settler invokes exactly once per payment.

use crate::clock::Clock;
use crate::database::error::DatabaseError;
use crate::database::models::{Investment, InvestmentStatus, NewInvestment, PaymentRecord};
use crate::database::repository::{InvestmentStore, PlanStore};
use crate::error::{AppError, AppErrorKind, DomainError, ErrorCode};
use crate::payments::types::{GatewayName, PaymentDetails, PaymentKind, PaymentStatus};
use crate::services::payment_orchestrator::{
    OrchestratorError, PaymentOrchestrator, ProcessOutcome, ProcessRequest, RefundOrder,
};
use crate::services::referral_bonus::{ReferralBonusCalculator, ReferralError};
use crate::services::settlement::SettlementHook;
use async_trait::async_trait;
use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Investment not found: {0}")]
    InvestmentNotFound(Uuid),

    #[error("Plan not found: {0}")]
    PlanNotFound(Uuid),

    #[error("Investment {0} belongs to another user")]
    NotOwner(Uuid),

    #[error("Investment {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: String,
        to: InvestmentStatus,
    },

    #[error("Requested {requested} shares, plan allows {min}..={max}")]
    SharesOutOfRange { requested: i32, min: i32, max: i32 },

    #[error("Plan {plan_id} daily limit reached: requested {requested}, remaining {remaining}")]
    DailyLimitExceeded {
        plan_id: Uuid,
        requested: i32,
        remaining: i32,
    },

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Referral(#[from] ReferralError),
}

impl From<LifecycleError> for AppError {
    fn from(err: LifecycleError) -> Self {
        let kind = match err {
            LifecycleError::InvestmentNotFound(id) => AppErrorKind::Domain(DomainError::NotFound {
                entity: "Investment".to_string(),
                id: id.to_string(),
            }),
            LifecycleError::PlanNotFound(id) => AppErrorKind::Domain(DomainError::NotFound {
                entity: "Plan".to_string(),
                id: id.to_string(),
            }),
            LifecycleError::NotOwner(id) => AppErrorKind::Domain(DomainError::Forbidden {
                entity: "Investment".to_string(),
                id: id.to_string(),
            }),
            LifecycleError::InvalidTransition { id, from, to } => {
                AppErrorKind::Domain(DomainError::InvalidStateTransition {
                    entity: "Investment".to_string(),
                    id: id.to_string(),
                    from,
                    to: to.to_string(),
                })
            }
            LifecycleError::SharesOutOfRange {
                requested,
                min,
                max,
            } => AppErrorKind::Domain(DomainError::SharesOutOfRange {
                requested,
                min,
                max,
            }),
            LifecycleError::DailyLimitExceeded {
                plan_id,
                requested,
                remaining,
            } => AppErrorKind::Domain(DomainError::DailyLimitExceeded {
                plan_id: plan_id.to_string(),
                requested,
                remaining,
            }),
            LifecycleError::Orchestrator(e) => return e.into(),
            LifecycleError::Database(e) => return e.into(),
            LifecycleError::Referral(ReferralError::Database(e)) => return e.into(),
            LifecycleError::Referral(e) => return AppError::invalid_field("amount", e.to_string()),
        };
        AppError::new(kind)
    }
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub share_price_usd: BigDecimal,
    pub cancellation_penalty_percent: BigDecimal,
    /// How long a matured investment waits for withdrawal before it is
    /// reinvested.
    pub reinvest_grace: chrono::Duration,
    pub refund_max_attempts: i32,
    pub sweep_batch_size: i64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            share_price_usd: BigDecimal::from(10),
            cancellation_penalty_percent: BigDecimal::from(10),
            reinvest_grace: chrono::Duration::hours(48),
            refund_max_attempts: 5,
            sweep_batch_size: 500,
        }
    }
}

/// `(penalty, refund)` for cancelling `amount` at `penalty_percent`.
pub fn cancellation_split(
    amount: &BigDecimal,
    penalty_percent: &BigDecimal,
) -> (BigDecimal, BigDecimal) {
    let penalty = amount * penalty_percent / BigDecimal::from(100);
    let refund = amount - &penalty;
    (penalty, refund)
}

fn receipt(
    investment_id: Uuid,
    penalty: BigDecimal,
    refund: BigDecimal,
    attempt: RefundAttempt,
) -> CancelReceipt {
    let refund_message = match attempt.state {
        RefundState::Queued => Some(REFUND_QUEUED_MESSAGE.to_string()),
        _ => None,
    };
    CancelReceipt {
        investment_id,
        penalty,
        refund,
        refund_state: attempt.state,
        refund_payment: attempt.payment,
        refund_error_code: attempt.error_code,
        refund_message,
    }
}

/// Principal plus profit.
pub fn maturity_payout(amount: &BigDecimal, profit_percent: &BigDecimal) -> BigDecimal {
    amount + amount * profit_percent / BigDecimal::from(100)
}

#[derive(Debug, Clone)]
pub struct InvestRequest {
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub shares: i32,
    pub gateway: GatewayName,
    pub currency: String,
    pub details: PaymentDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestReceipt {
    /// Id the investment has, or will have once the payment succeeds.
    pub investment_id: Uuid,
    pub amount_usd: BigDecimal,
    pub payment: ProcessOutcome,
}

/// Where a cancellation refund stands when the receipt is written.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefundState {
    /// Nothing to refund after the penalty.
    NotOwed,
    Completed,
    /// Sent and awaiting the provider.
    Processing,
    /// Not sent yet. The refund sweep reissues it, and cancelling again
    /// retries it immediately.
    Queued,
}

const REFUND_QUEUED_MESSAGE: &str =
    "The refund could not be sent yet. It is queued and will be retried automatically.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelReceipt {
    pub investment_id: Uuid,
    pub penalty: BigDecimal,
    pub refund: BigDecimal,
    pub refund_state: RefundState,
    pub refund_payment: Option<ProcessOutcome>,
    /// Why a queued refund did not go out.
    pub refund_error_code: Option<ErrorCode>,
    pub refund_message: Option<String>,
}

struct RefundAttempt {
    state: RefundState,
    payment: Option<ProcessOutcome>,
    error_code: Option<ErrorCode>,
}

#[derive(Debug, Clone)]
pub struct WithdrawRequest {
    pub user_id: Uuid,
    pub investment_id: Uuid,
    pub gateway: GatewayName,
    pub currency: String,
    pub details: PaymentDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawReceipt {
    pub investment_id: Uuid,
    pub amount: BigDecimal,
    pub payment: ProcessOutcome,
}

/// Applies terminal payments to investments and plans.
pub struct InvestmentSettlementHook {
    investments: Arc<dyn InvestmentStore>,
    plans: Arc<dyn PlanStore>,
    referrals: Arc<ReferralBonusCalculator>,
    clock: Arc<dyn Clock>,
}

impl InvestmentSettlementHook {
    pub fn new(
        investments: Arc<dyn InvestmentStore>,
        plans: Arc<dyn PlanStore>,
        referrals: Arc<ReferralBonusCalculator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            investments,
            plans,
            referrals,
            clock,
        }
    }

    async fn open_investment(&self, payment: &PaymentRecord) -> LifecycleResult<()> {
        let (Some(plan_id), Some(shares)) = (payment.plan_id, payment.shares) else {
            error!(payment_id = %payment.id, "investment payment without plan or shares");
            return Ok(());
        };
        let plan = self
            .plans
            .find_by_id(plan_id)
            .await?
            .ok_or(LifecycleError::PlanNotFound(plan_id))?;

        let start_date = self.clock.now();
        let (investment, created) = self
            .investments
            .insert_if_absent(&NewInvestment {
                id: payment.investment_id.unwrap_or(payment.id),
                user_id: payment.user_id,
                plan_id,
                shares,
                amount: payment.amount_usd.clone(),
                profit_percent: plan.profit_percent.clone(),
                start_date,
                end_date: start_date + chrono::Duration::days(i64::from(plan.duration_days)),
                payment_id: payment.id,
                reinvested_from: None,
            })
            .await?;

        if !created {
            debug!(investment_id = %investment.id, "investment already open");
            return Ok(());
        }
        info!(
            investment_id = %investment.id,
            user_id = %investment.user_id,
            plan_id = %plan_id,
            amount = %investment.amount,
            end_date = %investment.end_date,
            "investment opened"
        );
        self.referrals
            .on_first_investment(investment.user_id, &investment.amount)
            .await?;
        Ok(())
    }

    async fn apply(&self, payment: &PaymentRecord) -> LifecycleResult<()> {
        match (payment.kind, payment.status) {
            (PaymentKind::Investment, PaymentStatus::Success) => self.open_investment(payment).await,
            (PaymentKind::Investment, PaymentStatus::Failed) => {
                let (Some(plan_id), Some(shares), Some(window)) =
                    (payment.plan_id, payment.shares, payment.share_window)
                else {
                    return Ok(());
                };
                if self.plans.release_shares(plan_id, shares, window).await? {
                    info!(payment_id = %payment.id, plan_id = %plan_id, shares, "reserved shares released");
                } else {
                    debug!(
                        payment_id = %payment.id,
                        plan_id = %plan_id,
                        window,
                        "reservation belongs to a reset sales day, nothing released"
                    );
                }
                Ok(())
            }
            (PaymentKind::Refund, status) => {
                // Refunds outside a cancellation carry no claim to settle.
                let Some(investment_id) = payment.investment_id else {
                    return Ok(());
                };
                if status == PaymentStatus::Success {
                    if self
                        .investments
                        .complete_refund(investment_id, payment.id)
                        .await?
                        .is_some()
                    {
                        info!(investment_id = %investment_id, "cancellation refund completed");
                    }
                } else if self
                    .investments
                    .release_refund(investment_id, payment.id)
                    .await?
                {
                    warn!(
                        investment_id = %investment_id,
                        payment_id = %payment.id,
                        reason = payment.failure_reason.as_deref().unwrap_or("unknown"),
                        "cancellation refund failed, queued for reissue"
                    );
                }
                Ok(())
            }
            (PaymentKind::Withdrawal, status) => {
                let Some(investment_id) = payment.investment_id else {
                    error!(payment_id = %payment.id, "withdrawal payment without investment");
                    return Ok(());
                };
                if status == PaymentStatus::Success {
                    match self
                        .investments
                        .complete_withdrawal(investment_id, payment.id)
                        .await?
                    {
                        Some(_) => info!(investment_id = %investment_id, "investment withdrawn"),
                        None => error!(
                            investment_id = %investment_id,
                            payment_id = %payment.id,
                            "payout succeeded but withdrawal claim is gone"
                        ),
                    }
                } else if self
                    .investments
                    .release_withdrawal(investment_id, payment.id)
                    .await?
                {
                    info!(investment_id = %investment_id, "withdrawal claim released");
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl SettlementHook for InvestmentSettlementHook {
    async fn on_settled(&self, payment: &PaymentRecord) {
        if let Err(e) = self.apply(payment).await {
            error!(
                payment_id = %payment.id,
                kind = payment.kind.as_str(),
                status = %payment.status,
                error = %e,
                "failed to apply settled payment to investment"
            );
        }
    }
}

pub struct InvestmentLifecycleManager {
    investments: Arc<dyn InvestmentStore>,
    plans: Arc<dyn PlanStore>,
    orchestrator: Arc<PaymentOrchestrator>,
    clock: Arc<dyn Clock>,
    config: LifecycleConfig,
}

impl InvestmentLifecycleManager {
    pub fn new(
        investments: Arc<dyn InvestmentStore>,
        plans: Arc<dyn PlanStore>,
        orchestrator: Arc<PaymentOrchestrator>,
        clock: Arc<dyn Clock>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            investments,
            plans,
            orchestrator,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Reserves shares against the plan's daily limit and collects the
    /// investment payment. The investment row is created when the payment
    /// succeeds, which may be immediately or after a callback.
    pub async fn invest(&self, request: InvestRequest) -> LifecycleResult<InvestReceipt> {
        let plan = self
            .plans
            .find_by_id(request.plan_id)
            .await?
            .ok_or(LifecycleError::PlanNotFound(request.plan_id))?;
        if request.shares < plan.min_shares || request.shares > plan.max_shares {
            return Err(LifecycleError::SharesOutOfRange {
                requested: request.shares,
                min: plan.min_shares,
                max: plan.max_shares,
            });
        }

        let Some(window) = self.plans.reserve_shares(plan.id, request.shares).await? else {
            let remaining = match self.plans.find_by_id(plan.id).await? {
                Some(current) => current.daily_limit - current.daily_sold,
                None => plan.daily_limit - plan.daily_sold,
            };
            warn!(plan_id = %plan.id, requested = request.shares, remaining, "daily share limit reached");
            return Err(LifecycleError::DailyLimitExceeded {
                plan_id: plan.id,
                requested: request.shares,
                remaining: remaining.max(0),
            });
        };

        let payment_id = Uuid::new_v4();
        let investment_id = Uuid::new_v4();
        let amount_usd = &self.config.share_price_usd * BigDecimal::from(request.shares);

        let processed = self
            .orchestrator
            .process(ProcessRequest {
                payment_id: Some(payment_id),
                kind: PaymentKind::Investment,
                user_id: request.user_id,
                amount_usd: amount_usd.clone(),
                currency: request.currency,
                gateway: request.gateway,
                details: request.details,
                plan_id: Some(plan.id),
                shares: Some(request.shares),
                investment_id: Some(investment_id),
                share_window: Some(window),
            })
            .await;

        match processed {
            Ok(payment) => Ok(InvestReceipt {
                investment_id,
                amount_usd,
                payment,
            }),
            Err(e) => {
                // Once a ledger row exists its failure releases the shares.
                if self.orchestrator.ledger().find_by_id(payment_id).await?.is_none() {
                    self.plans
                        .release_shares(plan.id, request.shares, window)
                        .await?;
                    info!(plan_id = %plan.id, shares = request.shares, "reserved shares released");
                }
                Err(e.into())
            }
        }
    }

    /// `active -> cancelled`, refunding the amount less the penalty.
    ///
    /// The refund route is checked before the row changes, so a rail that
    /// cannot refund leaves the investment active. A refund that fails after
    /// the cancellation stays owed on the row: the sweep reissues it, and
    /// cancelling the same investment again retries it at once.
    pub async fn cancel(&self, user_id: Uuid, investment_id: Uuid) -> LifecycleResult<CancelReceipt> {
        let investment = self.owned(user_id, investment_id).await?;
        if investment.status == InvestmentStatus::Cancelled {
            return self.retry_refund(investment).await;
        }

        let (penalty, refund) =
            cancellation_split(&investment.amount, &self.config.cancellation_penalty_percent);
        if refund > BigDecimal::zero() {
            self.orchestrator
                .check_refund(investment.payment_id, &refund)
                .await?;
        }

        let Some(cancelled) = self
            .investments
            .transition(
                investment.id,
                InvestmentStatus::Active,
                InvestmentStatus::Cancelled,
                Some(refund.clone()),
            )
            .await?
        else {
            return Err(self
                .invalid_transition(investment.id, InvestmentStatus::Cancelled)
                .await);
        };
        info!(investment_id = %investment.id, penalty = %penalty, refund = %refund, "investment cancelled");

        let attempt = self.issue_refund(&cancelled).await?;
        Ok(receipt(cancelled.id, penalty, refund, attempt))
    }

    async fn retry_refund(&self, investment: Investment) -> LifecycleResult<CancelReceipt> {
        if !investment.refund_owed() {
            return Err(self
                .invalid_transition(investment.id, InvestmentStatus::Cancelled)
                .await);
        }
        let refund = investment.refund_amount.clone().unwrap_or_else(BigDecimal::zero);
        let penalty = &investment.amount - &refund;
        let attempt = self.issue_refund(&investment).await?;
        Ok(receipt(investment.id, penalty, refund, attempt))
    }

    /// Claims the row for a fresh refund payment and sends it. A send that
    /// fails before reaching the ledger gives the claim back here; once a
    /// ledger row exists its failure releases the claim through the hook.
    async fn issue_refund(&self, investment: &Investment) -> LifecycleResult<RefundAttempt> {
        let Some(amount) = investment
            .refund_amount
            .clone()
            .filter(|amount| *amount > BigDecimal::zero())
        else {
            return Ok(RefundAttempt {
                state: RefundState::NotOwed,
                payment: None,
                error_code: None,
            });
        };

        let payment_id = Uuid::new_v4();
        if self
            .investments
            .claim_refund(investment.id, payment_id)
            .await?
            .is_none()
        {
            return Err(self
                .invalid_transition(investment.id, InvestmentStatus::Cancelled)
                .await);
        }

        let refunded = self
            .orchestrator
            .refund(RefundOrder {
                payment_id: Some(payment_id),
                original_payment_id: investment.payment_id,
                amount_usd: amount,
                reason: Some("investment cancelled".to_string()),
                investment_id: Some(investment.id),
            })
            .await;

        match refunded {
            Ok(payment) => {
                let state = match payment.status {
                    PaymentStatus::Success => RefundState::Completed,
                    _ => RefundState::Processing,
                };
                Ok(RefundAttempt {
                    state,
                    payment: Some(payment),
                    error_code: None,
                })
            }
            Err(e) => {
                if self.orchestrator.ledger().find_by_id(payment_id).await?.is_none() {
                    self.investments
                        .release_refund(investment.id, payment_id)
                        .await?;
                }
                error!(
                    investment_id = %investment.id,
                    attempts = investment.refund_attempts + 1,
                    error = %e,
                    "cancellation refund not sent, queued"
                );
                Ok(RefundAttempt {
                    state: RefundState::Queued,
                    payment: None,
                    error_code: Some(AppError::from(e).error_code()),
                })
            }
        }
    }

    /// Pays out principal plus profit for a matured investment. The row is
    /// claimed for this payout; success moves it to `withdrawn`, failure
    /// releases the claim.
    pub async fn withdraw(&self, request: WithdrawRequest) -> LifecycleResult<WithdrawReceipt> {
        let investment = self.owned(request.user_id, request.investment_id).await?;
        let payment_id = Uuid::new_v4();

        if self
            .investments
            .claim_withdrawal(investment.id, payment_id)
            .await?
            .is_none()
        {
            return Err(self
                .invalid_transition(investment.id, InvestmentStatus::Withdrawn)
                .await);
        }

        let amount = maturity_payout(&investment.amount, &investment.profit_percent);
        let processed = self
            .orchestrator
            .process(ProcessRequest {
                payment_id: Some(payment_id),
                kind: PaymentKind::Withdrawal,
                user_id: request.user_id,
                amount_usd: amount.clone(),
                currency: request.currency,
                gateway: request.gateway,
                details: request.details,
                plan_id: Some(investment.plan_id),
                shares: Some(investment.shares),
                investment_id: Some(investment.id),
                share_window: None,
            })
            .await;

        match processed {
            Ok(payment) => Ok(WithdrawReceipt {
                investment_id: investment.id,
                amount,
                payment,
            }),
            Err(e) => {
                if self.orchestrator.ledger().find_by_id(payment_id).await?.is_none() {
                    self.investments
                        .release_withdrawal(investment.id, payment_id)
                        .await?;
                }
                Err(e.into())
            }
        }
    }

    pub async fn find(&self, user_id: Uuid, investment_id: Uuid) -> LifecycleResult<Investment> {
        self.owned(user_id, investment_id).await
    }

    /// `active -> matured` for every investment past its end date.
    pub async fn mature_due(&self) -> LifecycleResult<usize> {
        let matured = self
            .investments
            .mature_due(self.clock.now(), self.config.sweep_batch_size)
            .await?;
        for investment in &matured {
            info!(investment_id = %investment.id, user_id = %investment.user_id, "investment matured");
        }
        Ok(matured.len())
    }

    /// Reopens matured investments left unwithdrawn past the grace window.
    /// The new position keeps shares, amount, profit and duration; the plan's
    /// daily limit is not consumed.
    pub async fn auto_reinvest_due(&self) -> LifecycleResult<usize> {
        let now = self.clock.now();
        let due = self
            .investments
            .list_reinvest_due(now - self.config.reinvest_grace, self.config.sweep_batch_size)
            .await?;

        let mut reinvested = 0;
        for original in due {
            let clone = NewInvestment {
                id: Uuid::new_v4(),
                user_id: original.user_id,
                plan_id: original.plan_id,
                shares: original.shares,
                amount: original.amount.clone(),
                profit_percent: original.profit_percent.clone(),
                start_date: now,
                end_date: now + original.duration(),
                payment_id: original.payment_id,
                reinvested_from: Some(original.id),
            };
            match self.investments.reinvest(original.id, &clone).await {
                Ok(Some(opened)) => {
                    reinvested += 1;
                    info!(
                        investment_id = %opened.id,
                        reinvested_from = %original.id,
                        "investment auto-reinvested"
                    );
                }
                Ok(None) => debug!(investment_id = %original.id, "already reinvested or claimed"),
                Err(e) => error!(investment_id = %original.id, error = %e, "auto-reinvest failed"),
            }
        }
        Ok(reinvested)
    }

    /// Reissues refunds owed by cancelled investments. Rows that used up
    /// `refund_max_attempts` are left for an operator.
    pub async fn reissue_owed_refunds(&self) -> LifecycleResult<usize> {
        let owed = self
            .investments
            .list_refunds_owed(self.config.refund_max_attempts, self.config.sweep_batch_size)
            .await?;

        let mut sent = 0;
        for investment in owed {
            match self.issue_refund(&investment).await {
                Ok(RefundAttempt {
                    state: RefundState::Completed | RefundState::Processing,
                    ..
                }) => sent += 1,
                Ok(_) => {}
                Err(LifecycleError::InvalidTransition { .. }) => {
                    debug!(investment_id = %investment.id, "refund already claimed")
                }
                Err(e) => error!(investment_id = %investment.id, error = %e, "refund reissue failed"),
            }
        }
        Ok(sent)
    }

    pub async fn reset_daily_limits(&self) -> LifecycleResult<u64> {
        let reset = self.plans.reset_daily_sold().await?;
        info!(plans = reset, "daily share counters reset");
        Ok(reset)
    }

    async fn owned(&self, user_id: Uuid, investment_id: Uuid) -> LifecycleResult<Investment> {
        let investment = self
            .investments
            .find_by_id(investment_id)
            .await?
            .ok_or(LifecycleError::InvestmentNotFound(investment_id))?;
        if investment.user_id != user_id {
            return Err(LifecycleError::NotOwner(investment_id));
        }
        Ok(investment)
    }

    async fn invalid_transition(&self, id: Uuid, to: InvestmentStatus) -> LifecycleError {
        let from = match self.investments.find_by_id(id).await {
            Ok(Some(current)) if current.auto_reinvested => "reinvested".to_string(),
            Ok(Some(current)) if current.withdrawal_payment_id.is_some() => {
                "withdrawal in progress".to_string()
            }
            Ok(Some(current)) if current.refund_payment_id.is_some() => {
                "refund in progress".to_string()
            }
            Ok(Some(current)) if current.refunded_at.is_some() => "refunded".to_string(),
            Ok(Some(current)) => current.status.to_string(),
            _ => "unknown".to_string(),
        };
        LifecycleError::InvalidTransition { id, from, to }
    }
}
