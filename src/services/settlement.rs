//! The one ledger update path. The orchestrator, the poll supervisor and the
//! callback reconciler all terminate payments here, so the side effects of a
//! terminal status (notification, investment bookkeeping) run exactly once:
//! only the caller whose compare-and-set wins sees `Some`.

use crate::database::models::PaymentRecord;
use crate::database::repository::{DbResult, PaymentLedger};
use crate::payments::types::{PaymentStatus, ProviderOutcome};
use crate::services::notification::{NotificationType, Notifier};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

pub const TIMEOUT_REASON: &str = "timeout";

/// Reacts to a payment reaching a terminal status. Called once per payment.
#[async_trait]
pub trait SettlementHook: Send + Sync {
    async fn on_settled(&self, payment: &PaymentRecord);
}

pub struct PaymentSettler {
    ledger: Arc<dyn PaymentLedger>,
    notifier: Arc<dyn Notifier>,
    hooks: Vec<Arc<dyn SettlementHook>>,
}

impl PaymentSettler {
    pub fn new(ledger: Arc<dyn PaymentLedger>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            ledger,
            notifier,
            hooks: Vec::new(),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn SettlementHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn ledger(&self) -> &Arc<dyn PaymentLedger> {
        &self.ledger
    }

    /// `pending -> status`. Returns the settled record if this call made the
    /// transition, `None` if the payment was already terminal.
    pub async fn settle(
        &self,
        payment_id: Uuid,
        status: PaymentStatus,
        failure_reason: Option<&str>,
        provider_data: Option<JsonValue>,
    ) -> DbResult<Option<PaymentRecord>> {
        let Some(payment) = self
            .ledger
            .mark_terminal(payment_id, status, failure_reason, provider_data)
            .await?
        else {
            debug!(payment_id = %payment_id, "payment already terminal, settlement skipped");
            return Ok(None);
        };

        info!(
            payment_id = %payment.id,
            gateway = %payment.gateway,
            kind = payment.kind.as_str(),
            status = %payment.status,
            reason = payment.failure_reason.as_deref().unwrap_or(""),
            "payment settled"
        );

        let (notification, message) = match (payment.status, payment.failure_reason.as_deref()) {
            (PaymentStatus::Success, _) => (NotificationType::PaymentSucceeded, "payment completed"),
            (_, Some(TIMEOUT_REASON)) => (
                NotificationType::PaymentTimedOut,
                "no confirmation received from the provider",
            ),
            _ => (NotificationType::PaymentFailed, "payment was not completed"),
        };
        self.notifier.notify(&payment, notification, message).await;

        for hook in &self.hooks {
            hook.on_settled(&payment).await;
        }
        Ok(Some(payment))
    }

    /// Settles from a provider answer; a pending outcome changes nothing.
    pub async fn settle_outcome(
        &self,
        payment_id: Uuid,
        outcome: &ProviderOutcome,
        provider_data: Option<JsonValue>,
    ) -> DbResult<Option<PaymentRecord>> {
        match outcome.terminal_status() {
            Some(status) => {
                self.settle(payment_id, status, outcome.failure_reason(), provider_data)
                    .await
            }
            None => Ok(None),
        }
    }

    pub async fn time_out(&self, payment_id: Uuid) -> DbResult<Option<PaymentRecord>> {
        self.settle(payment_id, PaymentStatus::Failed, Some(TIMEOUT_REASON), None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemoryPaymentLedger;
    use crate::database::models::NewPayment;
    use crate::payments::types::{GatewayName, PaymentKind};
    use crate::services::notification::RecordingNotifier;
    use bigdecimal::BigDecimal;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingHook(AtomicUsize);

    #[async_trait]
    impl SettlementHook for CountingHook {
        async fn on_settled(&self, _payment: &PaymentRecord) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn pending(ledger: &InMemoryPaymentLedger) -> Uuid {
        ledger
            .insert(&NewPayment {
                id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                kind: PaymentKind::Verification,
                gateway: GatewayName::Sandbox,
                amount_usd: BigDecimal::from(5),
                local_amount: BigDecimal::from(5),
                local_currency: "USD".to_string(),
                provider_details: serde_json::json!({}),
                plan_id: None,
                shares: None,
                share_window: None,
                investment_id: None,
                original_payment_id: None,
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn only_the_winning_writer_notifies_and_runs_hooks() {
        let ledger = Arc::new(InMemoryPaymentLedger::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let hook = Arc::new(CountingHook::default());
        let settler =
            PaymentSettler::new(ledger.clone(), notifier.clone()).with_hook(hook.clone());
        let id = pending(&ledger).await;

        let first = settler
            .settle_outcome(id, &ProviderOutcome::Succeeded, None)
            .await
            .unwrap();
        let second = settler
            .settle_outcome(id, &ProviderOutcome::failed("late"), None)
            .await
            .unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(hook.0.load(Ordering::SeqCst), 1);
        assert_eq!(notifier.count(id, NotificationType::PaymentSucceeded), 1);
        assert_eq!(notifier.count(id, NotificationType::PaymentFailed), 0);
    }

    #[tokio::test]
    async fn pending_outcome_is_a_no_op() {
        let ledger = Arc::new(InMemoryPaymentLedger::new());
        let settler = PaymentSettler::new(ledger.clone(), Arc::new(RecordingNotifier::new()));
        let id = pending(&ledger).await;

        let result = settler
            .settle_outcome(id, &ProviderOutcome::Pending, None)
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(
            ledger.find_by_id(id).await.unwrap().unwrap().status,
            PaymentStatus::Pending
        );
    }

    #[tokio::test]
    async fn timeout_fails_with_reason_and_timeout_notification() {
        let ledger = Arc::new(InMemoryPaymentLedger::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let settler = PaymentSettler::new(ledger.clone(), notifier.clone());
        let id = pending(&ledger).await;

        let settled = settler.time_out(id).await.unwrap().unwrap();
        assert_eq!(settled.status, PaymentStatus::Failed);
        assert_eq!(settled.failure_reason.as_deref(), Some(TIMEOUT_REASON));
        assert_eq!(notifier.count(id, NotificationType::PaymentTimedOut), 1);
    }
}
