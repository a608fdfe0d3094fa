use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::providers::env_or;
use crate::payments::types::{
    CallbackOutcome, CaptureResponse, CountryPolicy, GatewayName, InitiateRequest,
    InitiateResponse, PayoutRequest, PayoutResponse, ProviderOutcome, RawCallback, RefundRequest,
    RefundResponse, SettlementMode, StatusResponse,
};
use crate::payments::utils::secure_eq;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

pub const SANDBOX_SECRET_HEADER: &str = "x-sandbox-secret";

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub callback_secret: String,
}

impl SandboxConfig {
    pub fn from_env() -> PaymentResult<Self> {
        Ok(Self {
            callback_secret: env_or("SANDBOX_CALLBACK_SECRET", "sandbox_secret"),
        })
    }
}

/// Network-free rail for development. Approves everything unless the payer
/// details carry `sandbox_outcome`: `decline`, `pending` or `error`.
pub struct SandboxGateway {
    config: SandboxConfig,
    transactions: Mutex<HashMap<String, ProviderOutcome>>,
}

impl SandboxGateway {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            transactions: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_env() -> PaymentResult<Self> {
        Ok(Self::new(SandboxConfig::from_env()?))
    }

    fn scripted(details: &crate::payments::types::PaymentDetails) -> PaymentResult<ProviderOutcome> {
        match details.extra_str("sandbox_outcome") {
            None | Some("success") => Ok(ProviderOutcome::Succeeded),
            Some("decline") => Ok(ProviderOutcome::failed("declined by sandbox")),
            Some("pending") => Ok(ProviderOutcome::Pending),
            Some("error") => Err(PaymentError::NetworkError {
                message: "sandbox simulated outage".to_string(),
            }),
            Some(other) => Err(PaymentError::validation(
                format!("unknown sandbox_outcome '{}'", other),
                "sandbox_outcome",
            )),
        }
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    fn name(&self) -> GatewayName {
        GatewayName::Sandbox
    }

    fn settlement_mode(&self) -> SettlementMode {
        SettlementMode::Synchronous
    }

    fn country_policy(&self) -> CountryPolicy {
        CountryPolicy::Deny(&[])
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &[]
    }

    async fn initiate(&self, request: InitiateRequest) -> PaymentResult<InitiateResponse> {
        request.amount.validate_positive("amount")?;
        let outcome = Self::scripted(&request.details)?;
        let tx_id = format!("sbx_{}", request.payment_id.simple());
        self.transactions
            .lock()
            .await
            .insert(tx_id.clone(), outcome.clone());
        debug!(tx_id = %tx_id, ?outcome, "sandbox payment initiated");

        Ok(match outcome {
            ProviderOutcome::Succeeded => InitiateResponse {
                accepted: true,
                provider_tx_id: Some(tx_id),
                ..Default::default()
            },
            ProviderOutcome::Pending => InitiateResponse {
                accepted: true,
                provider_tx_id: Some(tx_id),
                pending: true,
                ..Default::default()
            },
            ProviderOutcome::Failed { reason } => InitiateResponse {
                provider_tx_id: Some(tx_id),
                ..InitiateResponse::declined(reason)
            },
        })
    }

    async fn capture(&self, provider_tx_id: &str) -> PaymentResult<CaptureResponse> {
        let status = self.query_status(provider_tx_id).await?;
        Ok(CaptureResponse {
            outcome: status.outcome,
            provider_data: None,
        })
    }

    async fn refund(&self, request: RefundRequest) -> PaymentResult<RefundResponse> {
        request.amount.validate_positive("amount")?;
        Ok(RefundResponse {
            success: true,
            refund_tx_id: Some(format!("sbx_rf_{}", request.payment_id.simple())),
            ..Default::default()
        })
    }

    async fn payout(&self, request: PayoutRequest) -> PaymentResult<PayoutResponse> {
        request.amount.validate_positive("amount")?;
        match Self::scripted(&request.details)? {
            ProviderOutcome::Failed { reason } => Ok(PayoutResponse {
                failure_reason: Some(reason),
                ..Default::default()
            }),
            outcome => Ok(PayoutResponse {
                success: true,
                provider_tx_id: Some(format!("sbx_po_{}", request.payment_id.simple())),
                pending: outcome == ProviderOutcome::Pending,
                ..Default::default()
            }),
        }
    }

    async fn query_status(&self, provider_tx_id: &str) -> PaymentResult<StatusResponse> {
        let outcome = self
            .transactions
            .lock()
            .await
            .get(provider_tx_id)
            .cloned()
            .ok_or_else(|| PaymentError::provider("sandbox", "unknown transaction", false))?;
        Ok(StatusResponse {
            outcome,
            provider_tx_id: provider_tx_id.to_string(),
            provider_data: None,
        })
    }

    fn verify_callback(&self, callback: &RawCallback) -> PaymentResult<()> {
        let provided = callback.header(SANDBOX_SECRET_HEADER).unwrap_or_default();
        if secure_eq(provided.as_bytes(), self.config.callback_secret.as_bytes()) {
            Ok(())
        } else {
            Err(PaymentError::WebhookVerificationError {
                message: "invalid sandbox callback secret".to_string(),
            })
        }
    }

    fn decode_callback(&self, callback: &RawCallback) -> PaymentResult<CallbackOutcome> {
        let parsed = callback.json()?;
        let outcome = match parsed.get("status").and_then(|v| v.as_str()) {
            Some("success") => ProviderOutcome::Succeeded,
            Some("failed") => ProviderOutcome::failed(
                parsed
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .unwrap_or("sandbox failure"),
            ),
            _ => ProviderOutcome::Pending,
        };
        Ok(CallbackOutcome {
            gateway: GatewayName::Sandbox,
            event_type: "sandbox".to_string(),
            provider_tx_id: parsed
                .get("reference")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            outcome,
            payload: parsed,
            signed_reference: None,
        })
    }
}
