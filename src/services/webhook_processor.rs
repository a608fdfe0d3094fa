use crate::database::error::DatabaseError;
use crate::error::{AppError, AppErrorKind, ExternalError};
use crate::payments::error::PaymentError;
use crate::payments::factory::GatewayRegistry;
use crate::payments::provider::ParseCallback;
use crate::payments::types::{GatewayName, RawCallback};
use crate::services::settlement::PaymentSettler;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum WebhookProcessorError {
    #[error("Callback rejected for {gateway}: {source}")]
    Rejected {
        gateway: GatewayName,
        #[source]
        source: PaymentError,
    },

    #[error("Gateway unavailable: {0}")]
    Gateway(PaymentError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl From<WebhookProcessorError> for AppError {
    fn from(err: WebhookProcessorError) -> Self {
        match err {
            WebhookProcessorError::Rejected { gateway, source } => {
                AppError::new(AppErrorKind::External(ExternalError::WebhookVerification {
                    gateway: gateway.to_string(),
                    message: source.to_string(),
                }))
            }
            WebhookProcessorError::Gateway(e) => e.into(),
            WebhookProcessorError::Database(e) => e.into(),
        }
    }
}

/// What a callback did to the ledger. Every variant is acknowledged with a
/// 2xx so providers stop redelivering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ReconcileResult {
    /// This delivery moved the payment to its terminal status.
    Applied {
        payment_id: Uuid,
        provider_tx_id: String,
    },
    /// The payment was already terminal; at most the payload was recorded.
    AlreadyTerminal {
        payment_id: Uuid,
        provider_tx_id: String,
    },
    /// The provider reported a non-final state.
    Ignored { provider_tx_id: String },
    /// No payment carries this provider transaction id.
    Unmatched { provider_tx_id: String },
}

impl ReconcileResult {
    pub fn provider_tx_id(&self) -> &str {
        match self {
            ReconcileResult::Applied { provider_tx_id, .. }
            | ReconcileResult::AlreadyTerminal { provider_tx_id, .. }
            | ReconcileResult::Ignored { provider_tx_id }
            | ReconcileResult::Unmatched { provider_tx_id } => provider_tx_id,
        }
    }
}

/// Inbound callback entrypoint. Verification and decoding belong to the
/// adapter; this maps the normalized outcome onto the ledger exactly once.
pub struct WebhookProcessor {
    registry: GatewayRegistry,
    settler: Arc<PaymentSettler>,
}

impl WebhookProcessor {
    pub fn new(registry: GatewayRegistry, settler: Arc<PaymentSettler>) -> Self {
        Self { registry, settler }
    }

    pub async fn reconcile(
        &self,
        gateway: GatewayName,
        callback: RawCallback,
    ) -> Result<ReconcileResult, WebhookProcessorError> {
        let adapter = self
            .registry
            .get(gateway)
            .map_err(WebhookProcessorError::Gateway)?;

        let outcome = adapter.parse_callback(&callback).map_err(|source| {
            warn!(gateway = %gateway, error = %source, "callback rejected");
            WebhookProcessorError::Rejected { gateway, source }
        })?;
        let provider_tx_id = outcome.provider_tx_id.clone();

        let ledger = self.settler.ledger();
        let Some(payment) = ledger
            .find_by_provider_tx_id(gateway, &provider_tx_id)
            .await?
        else {
            error!(
                gateway = %gateway,
                provider_tx_id = %provider_tx_id,
                event_type = %outcome.event_type,
                "callback for unknown transaction"
            );
            return Ok(ReconcileResult::Unmatched { provider_tx_id });
        };

        if let Some(reference) = outcome.signed_reference.as_deref() {
            if reference != payment.id.to_string() {
                warn!(
                    gateway = %gateway,
                    payment_id = %payment.id,
                    signed_reference = %reference,
                    "callback body names a payment its token does not cover"
                );
                return Err(WebhookProcessorError::Rejected {
                    gateway,
                    source: PaymentError::WebhookVerificationError {
                        message: "callback reference does not match the transaction".to_string(),
                    },
                });
            }
        }

        if payment.status.is_terminal() {
            let recorded = ledger
                .record_reconciliation(payment.id, outcome.payload)
                .await?;
            info!(
                payment_id = %payment.id,
                gateway = %gateway,
                recorded,
                "callback for settled payment"
            );
            return Ok(ReconcileResult::AlreadyTerminal {
                payment_id: payment.id,
                provider_tx_id,
            });
        }

        if !outcome.outcome.is_definitive() {
            info!(
                payment_id = %payment.id,
                gateway = %gateway,
                event_type = %outcome.event_type,
                "non-final callback ignored"
            );
            return Ok(ReconcileResult::Ignored { provider_tx_id });
        }

        let settled = self
            .settler
            .settle_outcome(payment.id, &outcome.outcome, Some(outcome.payload.clone()))
            .await?;

        ledger
            .record_reconciliation(payment.id, outcome.payload)
            .await?;

        Ok(match settled {
            Some(_) => ReconcileResult::Applied {
                payment_id: payment.id,
                provider_tx_id,
            },
            // A poller or a concurrent delivery won the race.
            None => ReconcileResult::AlreadyTerminal {
                payment_id: payment.id,
                provider_tx_id,
            },
        })
    }
}
