//! Payment Orchestrator Service
//!
//! Drives one money movement from request to ledger: resolves the adapter,
//! quotes the local amount, persists a pending payment, calls the provider
//! under the retry policy and then settles synchronously, captures, hands
//! the payment to the poll supervisor, or leaves it for a callback.

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::models::{NewPayment, PaymentRecord};
use crate::database::repository::PaymentLedger;
use crate::error::{
    AppError, AppErrorKind, DomainError, ExternalError, InfrastructureError, ValidationError,
};
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::factory::GatewayRegistry;
use crate::payments::poller::PollSupervisor;
use crate::payments::provider::PaymentGateway;
use crate::payments::retry::RetryPolicy;
use crate::payments::types::{
    GatewayName, InitiateRequest, Money, PaymentDetails, PaymentKind, PaymentStatus,
    PayoutRequest, ProviderOutcome, RefundRequest, SettlementMode,
};
use crate::payments::validation;
use crate::services::exchange_rate::{ExchangeRateError, ExchangeRateService};
use crate::services::notification::{NotificationType, Notifier};
use crate::services::settlement::PaymentSettler;
use bigdecimal::{BigDecimal, RoundingMode, Zero};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub retry: RetryPolicy,
    /// Bound on every single adapter call attempt.
    pub gateway_timeout: Duration,
    /// Public base URL; callbacks land on `{base}/payments/callback/{gateway}`.
    pub callback_base_url: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            gateway_timeout: Duration::from_secs(30),
            callback_base_url: "http://localhost:8000".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    ExchangeRate(#[from] ExchangeRateError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Payment {payment_id} declined: {reason}")]
    Declined { payment_id: Uuid, reason: String },

    #[error("Payment not found: {payment_id}")]
    PaymentNotFound { payment_id: Uuid },

    #[error("Payment {payment_id} is {status}, cannot {operation}")]
    InvalidPaymentState {
        payment_id: Uuid,
        status: PaymentStatus,
        operation: &'static str,
    },

    #[error("Payment {payment_id} has no provider transaction id")]
    MissingProviderTxId { payment_id: Uuid },

    #[error("Provider transaction id {provider_tx_id} already belongs to another payment")]
    ProviderTxIdConflict { provider_tx_id: String },

    #[error("Refund of {requested} exceeds original amount {original}")]
    RefundExceedsOriginal {
        requested: BigDecimal,
        original: BigDecimal,
    },

    #[error("Payment kind {0:?} cannot be processed directly")]
    UnsupportedKind(PaymentKind),

    #[error("{gateway} does not support {operation}")]
    OperationUnsupported {
        gateway: GatewayName,
        operation: &'static str,
    },
}

impl From<OrchestratorError> for AppError {
    fn from(err: OrchestratorError) -> Self {
        let kind = match err {
            OrchestratorError::Payment(e) => return e.into(),
            OrchestratorError::ExchangeRate(e) => return e.into(),
            OrchestratorError::Database(e) => return e.into(),
            OrchestratorError::Declined { reason, .. } => {
                AppErrorKind::Domain(DomainError::PaymentDeclined { reason })
            }
            OrchestratorError::PaymentNotFound { payment_id } => {
                AppErrorKind::Domain(DomainError::NotFound {
                    entity: "Payment".to_string(),
                    id: payment_id.to_string(),
                })
            }
            OrchestratorError::InvalidPaymentState {
                payment_id,
                status,
                operation,
            } => AppErrorKind::Domain(DomainError::InvalidStateTransition {
                entity: "Payment".to_string(),
                id: payment_id.to_string(),
                from: status.to_string(),
                to: operation.to_string(),
            }),
            OrchestratorError::MissingProviderTxId { payment_id } => {
                AppErrorKind::External(ExternalError::PaymentProvider {
                    provider: "orchestrator".to_string(),
                    message: format!("payment {} has no provider transaction id", payment_id),
                    is_retryable: false,
                })
            }
            OrchestratorError::ProviderTxIdConflict { provider_tx_id } => {
                AppErrorKind::Infrastructure(InfrastructureError::Integrity {
                    message: format!("provider transaction id {} reused", provider_tx_id),
                })
            }
            OrchestratorError::RefundExceedsOriginal {
                requested,
                original,
            } => AppErrorKind::Validation(ValidationError::InvalidAmount {
                amount: requested.to_string(),
                reason: format!("must not exceed {}", original),
            }),
            OrchestratorError::UnsupportedKind(kind) => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: "type".to_string(),
                    reason: format!("{} payments are not accepted here", kind.as_str()),
                })
            }
            OrchestratorError::OperationUnsupported { gateway, operation } => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: "gateway".to_string(),
                    reason: format!(
                        "{} does not support {}; choose another payment method",
                        gateway, operation
                    ),
                })
            }
        };
        AppError::new(kind)
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[derive(Debug, Clone)]
pub struct ProcessRequest {
    /// Pre-allocated ledger id; generated when absent.
    pub payment_id: Option<Uuid>,
    pub kind: PaymentKind,
    pub user_id: Uuid,
    pub amount_usd: BigDecimal,
    pub currency: String,
    pub gateway: GatewayName,
    pub details: PaymentDetails,
    pub plan_id: Option<Uuid>,
    pub shares: Option<i32>,
    /// Plan sales window the shares were reserved in.
    pub share_window: Option<i64>,
    pub investment_id: Option<Uuid>,
}

/// Partial or full return of a successful collection.
#[derive(Debug, Clone)]
pub struct RefundOrder {
    /// Pre-allocated ledger id; generated when absent.
    pub payment_id: Option<Uuid>,
    pub original_payment_id: Uuid,
    pub amount_usd: BigDecimal,
    pub reason: Option<String>,
    pub investment_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOutcome {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    pub local_amount: BigDecimal,
    pub local_currency: String,
    pub provider_tx_id: Option<String>,
    pub redirect_url: Option<String>,
}

impl ProcessOutcome {
    fn from_record(record: &PaymentRecord, redirect_url: Option<String>) -> Self {
        Self {
            payment_id: record.id,
            status: record.status,
            local_amount: record.local_amount.clone(),
            local_currency: record.local_currency.clone(),
            provider_tx_id: record.provider_tx_id.clone(),
            redirect_url,
        }
    }

    pub fn success(&self) -> bool {
        self.status == PaymentStatus::Success
    }
}

pub struct PaymentOrchestrator {
    registry: GatewayRegistry,
    rates: Arc<ExchangeRateService>,
    ledger: Arc<dyn PaymentLedger>,
    settler: Arc<PaymentSettler>,
    notifier: Arc<dyn Notifier>,
    poller: Arc<PollSupervisor>,
    config: OrchestratorConfig,
}

impl PaymentOrchestrator {
    pub fn new(
        registry: GatewayRegistry,
        rates: Arc<ExchangeRateService>,
        settler: Arc<PaymentSettler>,
        notifier: Arc<dyn Notifier>,
        poller: Arc<PollSupervisor>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            rates,
            ledger: settler.ledger().clone(),
            settler,
            notifier,
            poller,
            config,
        }
    }

    pub fn registry(&self) -> &GatewayRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &Arc<dyn PaymentLedger> {
        &self.ledger
    }

    /// Collects (verification, investment) or pays out (withdrawal).
    pub async fn process(&self, request: ProcessRequest) -> OrchestratorResult<ProcessOutcome> {
        if request.kind == PaymentKind::Refund {
            return Err(OrchestratorError::UnsupportedKind(request.kind));
        }

        let gateway = self.registry.get(request.gateway)?;
        if request.kind == PaymentKind::Withdrawal && !gateway.supports_payouts() {
            return Err(OrchestratorError::OperationUnsupported {
                gateway: gateway.name(),
                operation: "payouts",
            });
        }
        Money::new(request.amount_usd.clone(), "USD").validate_positive("amount")?;
        validation::ensure_currency(
            gateway.name(),
            gateway.supported_currencies(),
            &request.currency,
        )?;
        let local = self
            .rates
            .convert_from_usd(&request.amount_usd, &request.currency)
            .await?;

        let payment = self
            .ledger
            .insert(&NewPayment {
                id: request.payment_id.unwrap_or_else(Uuid::new_v4),
                user_id: request.user_id,
                kind: request.kind,
                gateway: gateway.name(),
                amount_usd: request.amount_usd.clone(),
                local_amount: local.amount.clone(),
                local_currency: local.currency.clone(),
                provider_details: serde_json::json!({}),
                plan_id: request.plan_id,
                shares: request.shares,
                share_window: request.share_window,
                investment_id: request.investment_id,
                original_payment_id: None,
            })
            .await?;

        info!(
            payment_id = %payment.id,
            gateway = %payment.gateway,
            kind = payment.kind.as_str(),
            amount_usd = %payment.amount_usd,
            local_amount = %payment.local_amount,
            currency = %payment.local_currency,
            "payment initiated"
        );
        self.notifier
            .notify(&payment, NotificationType::PaymentInitiated, "payment started")
            .await;

        match request.kind {
            PaymentKind::Withdrawal => self.pay_out(gateway, payment, local, request.details).await,
            _ => self.collect(gateway, payment, local, request.details).await,
        }
    }

    async fn collect(
        &self,
        gateway: Arc<dyn PaymentGateway>,
        payment: PaymentRecord,
        amount: Money,
        details: PaymentDetails,
    ) -> OrchestratorResult<ProcessOutcome> {
        let initiate = InitiateRequest {
            payment_id: payment.id,
            amount,
            details,
            callback_url: self.callback_url(gateway.name()),
        };
        let response = match self
            .call("initiate", gateway.name(), || gateway.initiate(initiate.clone()))
            .await
        {
            Ok(response) => response,
            Err(err) => return Err(self.fail(payment.id, err).await),
        };

        if let Some(tx_id) = &response.provider_tx_id {
            self.assign_tx_id(payment.id, tx_id).await?;
        }

        if !response.accepted {
            let reason = response
                .failure_reason
                .clone()
                .unwrap_or_else(|| "declined by provider".to_string());
            return Err(self.decline(payment.id, reason).await);
        }

        if response.capture_required {
            let tx_id = self.require_tx_id(payment.id, response.provider_tx_id.clone()).await?;
            return self.capture_with(gateway, payment.id, tx_id).await;
        }

        if response.pending {
            let tx_id = self.require_tx_id(payment.id, response.provider_tx_id.clone()).await?;
            if gateway.settlement_mode() == SettlementMode::Poll {
                self.poller
                    .spawn(gateway.clone(), payment.id, payment.kind, tx_id)
                    .await;
            }
            return self.outcome(payment.id, response.redirect_url).await;
        }

        self.settler
            .settle(payment.id, PaymentStatus::Success, None, response.provider_data)
            .await?;
        self.outcome(payment.id, response.redirect_url).await
    }

    async fn pay_out(
        &self,
        gateway: Arc<dyn PaymentGateway>,
        payment: PaymentRecord,
        amount: Money,
        details: PaymentDetails,
    ) -> OrchestratorResult<ProcessOutcome> {
        let payout = PayoutRequest {
            payment_id: payment.id,
            amount,
            details,
            callback_url: self.callback_url(gateway.name()),
            narration: Some("Investment withdrawal".to_string()),
        };
        let response = match self
            .call("payout", gateway.name(), || gateway.payout(payout.clone()))
            .await
        {
            Ok(response) => response,
            Err(err) => return Err(self.fail(payment.id, err).await),
        };

        if let Some(tx_id) = &response.provider_tx_id {
            self.assign_tx_id(payment.id, tx_id).await?;
        }
        if !response.success {
            let reason = response
                .failure_reason
                .unwrap_or_else(|| "payout rejected by provider".to_string());
            return Err(self.decline(payment.id, reason).await);
        }
        if response.pending {
            self.track_transfer(gateway, &payment, response.provider_tx_id)
                .await?;
        } else {
            self.settler
                .settle(payment.id, PaymentStatus::Success, None, None)
                .await?;
        }
        self.outcome(payment.id, None).await
    }

    /// Hands a pending payout or refund to the poll supervisor on rails that
    /// can be queried for it; the rest settle by callback.
    async fn track_transfer(
        &self,
        gateway: Arc<dyn PaymentGateway>,
        payment: &PaymentRecord,
        tx_id: Option<String>,
    ) -> OrchestratorResult<()> {
        if !gateway.polls_transfers() {
            return Ok(());
        }
        let tx_id = self.require_tx_id(payment.id, tx_id).await?;
        self.poller
            .spawn(gateway, payment.id, payment.kind, tx_id)
            .await;
        Ok(())
    }

    /// Captures an authorized or buyer-approved payment. Calling it on an
    /// already settled payment returns the settled state.
    pub async fn capture(&self, payment_id: Uuid) -> OrchestratorResult<ProcessOutcome> {
        let payment = self
            .ledger
            .find_by_id(payment_id)
            .await?
            .ok_or(OrchestratorError::PaymentNotFound { payment_id })?;
        if payment.status.is_terminal() {
            return Ok(ProcessOutcome::from_record(&payment, None));
        }
        if !matches!(payment.kind, PaymentKind::Investment | PaymentKind::Verification) {
            return Err(OrchestratorError::UnsupportedKind(payment.kind));
        }
        let tx_id = payment
            .provider_tx_id
            .clone()
            .ok_or(OrchestratorError::MissingProviderTxId { payment_id })?;
        let gateway = self.registry.get(payment.gateway)?;
        self.capture_with(gateway, payment_id, tx_id).await
    }

    async fn capture_with(
        &self,
        gateway: Arc<dyn PaymentGateway>,
        payment_id: Uuid,
        tx_id: String,
    ) -> OrchestratorResult<ProcessOutcome> {
        let captured = self
            .call("capture", gateway.name(), || gateway.capture(&tx_id))
            .await;

        match captured {
            Ok(response) => match &response.outcome {
                ProviderOutcome::Pending => {
                    if gateway.settlement_mode() == SettlementMode::Poll {
                        self.poller
                            .spawn(gateway.clone(), payment_id, PaymentKind::Investment, tx_id)
                            .await;
                    }
                }
                ProviderOutcome::Failed { reason } => {
                    self.settler
                        .settle_outcome(payment_id, &response.outcome, response.provider_data.clone())
                        .await?;
                    return Err(OrchestratorError::Declined {
                        payment_id,
                        reason: reason.clone(),
                    });
                }
                ProviderOutcome::Succeeded => {
                    self.settler
                        .settle_outcome(payment_id, &response.outcome, response.provider_data)
                        .await?;
                }
            },
            // Still authorized on the provider side; the caller may retry.
            Err(err) if err.is_retryable() => {
                warn!(payment_id = %payment_id, error = %err, "capture failed, payment left pending");
                return Err(err.into());
            }
            Err(err) => return Err(self.fail(payment_id, err).await),
        }
        self.outcome(payment_id, None).await
    }

    /// Checks that `amount_usd` of `original_payment_id` could be refunded
    /// right now, without touching the ledger.
    pub async fn check_refund(
        &self,
        original_payment_id: Uuid,
        amount_usd: &BigDecimal,
    ) -> OrchestratorResult<()> {
        self.refund_target(original_payment_id, amount_usd)
            .await
            .map(|_| ())
    }

    async fn refund_target(
        &self,
        original_payment_id: Uuid,
        amount_usd: &BigDecimal,
    ) -> OrchestratorResult<(PaymentRecord, Arc<dyn PaymentGateway>, String)> {
        let original = self
            .ledger
            .find_by_id(original_payment_id)
            .await?
            .ok_or(OrchestratorError::PaymentNotFound {
                payment_id: original_payment_id,
            })?;
        if original.status != PaymentStatus::Success {
            return Err(OrchestratorError::InvalidPaymentState {
                payment_id: original.id,
                status: original.status,
                operation: "refund",
            });
        }
        if *amount_usd <= BigDecimal::zero() || *amount_usd > original.amount_usd {
            return Err(OrchestratorError::RefundExceedsOriginal {
                requested: amount_usd.clone(),
                original: original.amount_usd.clone(),
            });
        }
        let original_tx_id =
            original
                .provider_tx_id
                .clone()
                .ok_or(OrchestratorError::MissingProviderTxId {
                    payment_id: original.id,
                })?;
        let gateway = self.registry.get(original.gateway)?;
        if !gateway.supports_refunds() {
            return Err(OrchestratorError::OperationUnsupported {
                gateway: gateway.name(),
                operation: "refunds",
            });
        }
        Ok((original, gateway, original_tx_id))
    }

    /// Refunds part or all of a successful collection through the rail that
    /// collected it. The local amount follows the original quote's ratio.
    pub async fn refund(&self, order: RefundOrder) -> OrchestratorResult<ProcessOutcome> {
        let (original, gateway, original_tx_id) = self
            .refund_target(order.original_payment_id, &order.amount_usd)
            .await?;
        let amount_usd = &order.amount_usd;

        let mut local = Money::new(
            amount_usd * &original.local_amount / &original.amount_usd,
            original.local_currency.clone(),
        );
        let scale = if local.is_zero_decimal() { 0 } else { 2 };
        local.amount = local.amount.with_scale_round(scale, RoundingMode::HalfUp);

        let payment = self
            .ledger
            .insert(&NewPayment {
                id: order.payment_id.unwrap_or_else(Uuid::new_v4),
                user_id: original.user_id,
                kind: PaymentKind::Refund,
                gateway: original.gateway,
                amount_usd: amount_usd.clone(),
                local_amount: local.amount.clone(),
                local_currency: local.currency.clone(),
                provider_details: serde_json::json!({}),
                plan_id: original.plan_id,
                shares: original.shares,
                share_window: None,
                investment_id: order.investment_id.or(original.investment_id),
                original_payment_id: Some(original.id),
            })
            .await?;
        info!(
            payment_id = %payment.id,
            original_payment_id = %original.id,
            amount_usd = %amount_usd,
            "refund initiated"
        );
        self.notifier
            .notify(&payment, NotificationType::PaymentInitiated, "refund started")
            .await;

        let request = RefundRequest {
            payment_id: payment.id,
            amount: local,
            original_tx_id,
            reason: order.reason,
            callback_url: self.callback_url(gateway.name()),
        };
        let response = match self
            .call("refund", gateway.name(), || gateway.refund(request.clone()))
            .await
        {
            Ok(response) => response,
            Err(err) => return Err(self.fail(payment.id, err).await),
        };

        if let Some(tx_id) = &response.refund_tx_id {
            self.assign_tx_id(payment.id, tx_id).await?;
        }
        if !response.success {
            let reason = response
                .failure_reason
                .unwrap_or_else(|| "refund rejected by provider".to_string());
            return Err(self.decline(payment.id, reason).await);
        }
        if response.pending {
            self.track_transfer(gateway, &payment, response.refund_tx_id)
                .await?;
        } else {
            self.settler
                .settle(payment.id, PaymentStatus::Success, None, None)
                .await?;
        }
        self.outcome(payment.id, None).await
    }

    /// Runs one adapter operation under the retry policy, bounding every
    /// attempt by the gateway timeout.
    async fn call<T, F, Fut>(&self, operation: &'static str, gateway: GatewayName, mut op: F) -> PaymentResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PaymentResult<T>>,
    {
        let timeout = self.config.gateway_timeout;
        self.config
            .retry
            .run(operation, || {
                let attempt = op();
                async move {
                    match tokio::time::timeout(timeout, attempt).await {
                        Ok(result) => result,
                        Err(_) => Err(PaymentError::NetworkError {
                            message: format!(
                                "{} {} timed out after {}s",
                                gateway,
                                operation,
                                timeout.as_secs()
                            ),
                        }),
                    }
                }
            })
            .await
    }

    async fn assign_tx_id(&self, payment_id: Uuid, tx_id: &str) -> OrchestratorResult<()> {
        match self.ledger.assign_provider_tx_id(payment_id, tx_id).await {
            Ok(()) => Ok(()),
            Err(e) if matches!(e.kind, DatabaseErrorKind::UniqueViolation { .. }) => {
                error!(payment_id = %payment_id, provider_tx_id = tx_id, "provider transaction id conflict");
                self.settle_failed(payment_id, "provider transaction id conflict")
                    .await;
                Err(OrchestratorError::ProviderTxIdConflict {
                    provider_tx_id: tx_id.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn require_tx_id(
        &self,
        payment_id: Uuid,
        tx_id: Option<String>,
    ) -> OrchestratorResult<String> {
        match tx_id {
            Some(tx_id) => Ok(tx_id),
            None => {
                self.settle_failed(payment_id, "provider returned no transaction id")
                    .await;
                Err(OrchestratorError::MissingProviderTxId { payment_id })
            }
        }
    }

    async fn fail(&self, payment_id: Uuid, err: PaymentError) -> OrchestratorError {
        warn!(payment_id = %payment_id, error = %err, "gateway call failed");
        self.settle_failed(payment_id, &err.to_string()).await;
        err.into()
    }

    async fn decline(&self, payment_id: Uuid, reason: String) -> OrchestratorError {
        warn!(payment_id = %payment_id, reason = %reason, "payment declined");
        self.settle_failed(payment_id, &reason).await;
        OrchestratorError::Declined { payment_id, reason }
    }

    async fn settle_failed(&self, payment_id: Uuid, reason: &str) {
        if let Err(e) = self
            .settler
            .settle(payment_id, PaymentStatus::Failed, Some(reason), None)
            .await
        {
            error!(payment_id = %payment_id, error = %e, "failed to record payment failure");
        }
    }

    async fn outcome(
        &self,
        payment_id: Uuid,
        redirect_url: Option<String>,
    ) -> OrchestratorResult<ProcessOutcome> {
        let record = self
            .ledger
            .find_by_id(payment_id)
            .await?
            .ok_or(OrchestratorError::PaymentNotFound { payment_id })?;
        Ok(ProcessOutcome::from_record(&record, redirect_url))
    }

    fn callback_url(&self, gateway: GatewayName) -> String {
        format!(
            "{}/payments/callback/{}",
            self.config.callback_base_url.trim_end_matches('/'),
            gateway
        )
    }
}
