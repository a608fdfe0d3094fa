use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::providers::{env_or, env_required, env_timeout};
use crate::payments::types::{
    CallbackOutcome, CaptureResponse, CountryPolicy, GatewayName, InitiateRequest,
    InitiateResponse, PayoutRequest, PayoutResponse, ProviderOutcome, RawCallback, RefundRequest,
    RefundResponse, SettlementMode, StatusResponse,
};
use crate::payments::utils::{verify_hmac_sha256_hex, Auth, PaymentHttpClient};
use crate::payments::validation::{ensure_country, ensure_currency};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct RazorpayConfig {
    pub key_id: String,
    pub key_secret: String,
    pub webhook_secret: String,
    /// RazorpayX current account that funds payouts.
    pub payout_account_number: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl RazorpayConfig {
    pub fn from_env() -> PaymentResult<Self> {
        Ok(Self {
            key_id: env_required("RAZORPAY_KEY_ID")?,
            key_secret: env_required("RAZORPAY_KEY_SECRET")?,
            webhook_secret: env_required("RAZORPAY_WEBHOOK_SECRET")?,
            payout_account_number: std::env::var("RAZORPAYX_ACCOUNT_NUMBER").ok(),
            base_url: env_or("RAZORPAY_BASE_URL", "https://api.razorpay.com"),
            timeout_secs: env_timeout("RAZORPAY_TIMEOUT_SECS"),
        })
    }
}

/// Orders API: checkout runs client-side against the order id; the payment
/// may arrive authorized and is captured through `capture`.
pub struct RazorpayGateway {
    config: RazorpayConfig,
    http: PaymentHttpClient,
}

impl RazorpayGateway {
    pub fn new(config: RazorpayConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new("razorpay", Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(RazorpayConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn auth(&self) -> Auth<'_> {
        Auth::Basic(&self.config.key_id, &self.config.key_secret)
    }

    async fn get(&self, path: &str) -> PaymentResult<JsonValue> {
        self.http
            .request_json(reqwest::Method::GET, &self.endpoint(path), self.auth(), None, &[])
            .await
    }

    async fn post(&self, path: &str, body: &JsonValue) -> PaymentResult<JsonValue> {
        self.http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(path),
                self.auth(),
                Some(body),
                &[],
            )
            .await
    }

    async fn order_payments(&self, order_id: &str) -> PaymentResult<Vec<JsonValue>> {
        let list = self.get(&format!("/v1/orders/{}/payments", order_id)).await?;
        Ok(list
            .get("items")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }

    fn payments_outcome(payments: &[JsonValue]) -> ProviderOutcome {
        fn status_of(p: &JsonValue) -> &str {
            p.get("status").and_then(|v| v.as_str()).unwrap_or("")
        }
        if payments.iter().any(|p| status_of(p) == "captured") {
            return ProviderOutcome::Succeeded;
        }
        if !payments.is_empty() && payments.iter().all(|p| status_of(p) == "failed") {
            let reason = payments
                .last()
                .and_then(|p| p.get("error_description"))
                .and_then(|v| v.as_str())
                .unwrap_or("razorpay payment failed");
            return ProviderOutcome::failed(reason);
        }
        ProviderOutcome::Pending
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    fn name(&self) -> GatewayName {
        GatewayName::Razorpay
    }

    fn settlement_mode(&self) -> SettlementMode {
        SettlementMode::Redirect
    }

    fn country_policy(&self) -> CountryPolicy {
        CountryPolicy::Allow(&["IN", "MY"])
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &["INR", "MYR", "USD"]
    }

    async fn initiate(&self, request: InitiateRequest) -> PaymentResult<InitiateResponse> {
        request.amount.validate_positive("amount")?;
        ensure_country(self.name(), self.country_policy(), &request.details)?;
        ensure_currency(self.name(), self.supported_currencies(), &request.amount.currency)?;
        let payment_id = request.payment_id.to_string();

        let payload = serde_json::json!({
            "amount": request.amount.minor_units()?,
            "currency": request.amount.currency,
            "receipt": payment_id,
            "notes": { "payment_id": payment_id },
        });
        let order = self.post("/v1/orders", &payload).await?;
        let order_id = order
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PaymentError::provider("razorpay", "order id missing", false))?
            .to_string();

        info!(order_id = %order_id, "razorpay order created");

        Ok(InitiateResponse {
            accepted: true,
            provider_tx_id: Some(order_id.clone()),
            pending: true,
            provider_data: Some(serde_json::json!({
                "order_id": order_id,
                "key_id": self.config.key_id,
                "callback_url": request.details.return_url.unwrap_or(request.callback_url),
            })),
            ..Default::default()
        })
    }

    async fn capture(&self, provider_tx_id: &str) -> PaymentResult<CaptureResponse> {
        let payments = self.order_payments(provider_tx_id).await?;
        let authorized = payments
            .iter()
            .find(|p| p.get("status").and_then(|v| v.as_str()) == Some("authorized"));

        if let Some(payment) = authorized {
            let pay_id = payment.get("id").and_then(|v| v.as_str()).unwrap_or_default();
            let payload = serde_json::json!({
                "amount": payment.get("amount").cloned().unwrap_or_default(),
                "currency": payment.get("currency").cloned().unwrap_or_default(),
            });
            let captured = self
                .post(&format!("/v1/payments/{}/capture", pay_id), &payload)
                .await?;
            return Ok(CaptureResponse {
                outcome: Self::payments_outcome(std::slice::from_ref(&captured)),
                provider_data: Some(captured),
            });
        }

        Ok(CaptureResponse {
            outcome: Self::payments_outcome(&payments),
            provider_data: None,
        })
    }

    async fn refund(&self, request: RefundRequest) -> PaymentResult<RefundResponse> {
        request.amount.validate_positive("amount")?;
        let payments = self.order_payments(&request.original_tx_id).await?;
        let pay_id = payments
            .iter()
            .find(|p| p.get("status").and_then(|v| v.as_str()) == Some("captured"))
            .and_then(|p| p.get("id"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                PaymentError::provider("razorpay", "order has no captured payment to refund", false)
            })?
            .to_string();

        let payload = serde_json::json!({
            "amount": request.amount.minor_units()?,
            "receipt": request.payment_id.to_string(),
            "notes": { "reason": request.reason },
        });
        let refund = self
            .post(&format!("/v1/payments/{}/refund", pay_id), &payload)
            .await?;
        let status = refund.get("status").and_then(|v| v.as_str()).unwrap_or("pending");
        Ok(RefundResponse {
            success: status != "failed",
            refund_tx_id: refund.get("id").and_then(|v| v.as_str()).map(|s| s.to_string()),
            pending: status == "pending",
            failure_reason: None,
        })
    }

    /// RazorpayX payout to a pre-registered fund account
    /// (`account_number` holds the `fa_` id).
    async fn payout(&self, request: PayoutRequest) -> PaymentResult<PayoutResponse> {
        request.amount.validate_positive("amount")?;
        let source = self.config.payout_account_number.as_deref().ok_or_else(|| {
            PaymentError::provider("razorpay", "RAZORPAYX_ACCOUNT_NUMBER is not configured", false)
        })?;
        let fund_account = request
            .details
            .account_number
            .clone()
            .ok_or_else(|| PaymentError::validation("fund account id is required", "account_number"))?;

        let payload = serde_json::json!({
            "account_number": source,
            "fund_account_id": fund_account,
            "amount": request.amount.minor_units()?,
            "currency": request.amount.currency,
            "mode": "IMPS",
            "purpose": "payout",
            "queue_if_low_balance": true,
            "reference_id": request.payment_id.to_string(),
            "narration": request.narration,
        });
        let payout = self.post("/v1/payouts", &payload).await?;
        let status = payout.get("status").and_then(|v| v.as_str()).unwrap_or("queued");
        let failed = matches!(status, "rejected" | "failed" | "cancelled" | "reversed");
        Ok(PayoutResponse {
            success: !failed,
            provider_tx_id: payout.get("id").and_then(|v| v.as_str()).map(|s| s.to_string()),
            pending: status != "processed" && !failed,
            failure_reason: if failed {
                payout
                    .pointer("/status_details/description")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
            } else {
                None
            },
        })
    }

    async fn query_status(&self, provider_tx_id: &str) -> PaymentResult<StatusResponse> {
        let order = self.get(&format!("/v1/orders/{}", provider_tx_id)).await?;
        let outcome = if order.get("status").and_then(|v| v.as_str()) == Some("paid") {
            ProviderOutcome::Succeeded
        } else {
            Self::payments_outcome(&self.order_payments(provider_tx_id).await?)
        };
        Ok(StatusResponse {
            outcome,
            provider_tx_id: provider_tx_id.to_string(),
            provider_data: Some(order),
        })
    }

    fn verify_callback(&self, callback: &RawCallback) -> PaymentResult<()> {
        let signature = callback.header("x-razorpay-signature").unwrap_or_default();
        if verify_hmac_sha256_hex(&callback.body, &self.config.webhook_secret, signature) {
            Ok(())
        } else {
            Err(PaymentError::WebhookVerificationError {
                message: "invalid razorpay signature".to_string(),
            })
        }
    }

    fn decode_callback(&self, callback: &RawCallback) -> PaymentResult<CallbackOutcome> {
        let parsed = callback.json()?;
        let event_type = parsed
            .get("event")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();

        let (provider_tx_id, outcome) = match event_type.as_str() {
            "order.paid" => (
                parsed.pointer("/payload/order/entity/id"),
                ProviderOutcome::Succeeded,
            ),
            "payment.captured" => (
                parsed.pointer("/payload/payment/entity/order_id"),
                ProviderOutcome::Succeeded,
            ),
            "payment.failed" => (
                parsed.pointer("/payload/payment/entity/order_id"),
                ProviderOutcome::failed(
                    parsed
                        .pointer("/payload/payment/entity/error_description")
                        .and_then(|v| v.as_str())
                        .unwrap_or("razorpay payment failed"),
                ),
            ),
            "payout.processed" => (
                parsed.pointer("/payload/payout/entity/id"),
                ProviderOutcome::Succeeded,
            ),
            "payout.failed" | "payout.rejected" | "payout.reversed" => (
                parsed.pointer("/payload/payout/entity/id"),
                ProviderOutcome::failed(event_type.as_str()),
            ),
            _ => (
                parsed.pointer("/payload/payment/entity/order_id"),
                ProviderOutcome::Pending,
            ),
        };

        Ok(CallbackOutcome {
            gateway: GatewayName::Razorpay,
            provider_tx_id: provider_tx_id
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            event_type,
            outcome,
            payload: parsed,
            signed_reference: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::provider::ParseCallback;
    use crate::payments::utils::hmac_sha256;

    fn gateway() -> RazorpayGateway {
        RazorpayGateway::new(RazorpayConfig {
            key_id: "rzp_test".to_string(),
            key_secret: "secret".to_string(),
            webhook_secret: "rzp_whsec".to_string(),
            payout_account_number: None,
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 5,
        })
        .expect("gateway init should succeed")
    }

    #[test]
    fn payment_failed_resolves_order() {
        let body = br#"{"event":"payment.failed","payload":{"payment":{"entity":{"id":"pay_1","order_id":"order_1","error_description":"Card expired"}}}}"#;
        let sig = hex::encode(hmac_sha256("rzp_whsec", body).unwrap());
        let raw = RawCallback::new(body.to_vec()).with_header("X-Razorpay-Signature", sig);
        let outcome = gateway().parse_callback(&raw).expect("valid webhook");
        assert_eq!(outcome.provider_tx_id, "order_1");
        assert_eq!(outcome.outcome.failure_reason(), Some("Card expired"));
    }

    #[test]
    fn payments_outcome_prefers_captured() {
        let payments = vec![
            serde_json::json!({"status": "failed"}),
            serde_json::json!({"status": "captured"}),
        ];
        assert_eq!(RazorpayGateway::payments_outcome(&payments), ProviderOutcome::Succeeded);
        assert_eq!(RazorpayGateway::payments_outcome(&[]), ProviderOutcome::Pending);
        assert!(RazorpayGateway::payments_outcome(&payments[..1])
            .terminal_status()
            .is_some());
    }

    #[test]
    fn all_failed_payments_fail_the_order() {
        let payments = vec![
            serde_json::json!({"status": "failed", "error_description": "Card declined"}),
            serde_json::json!({"status": "failed", "error_description": "Insufficient balance"}),
        ];
        let outcome = RazorpayGateway::payments_outcome(&payments);
        assert_eq!(outcome.failure_reason(), Some("Insufficient balance"));
        let mixed = vec![serde_json::json!({"status": "failed"}), serde_json::json!({})];
        assert_eq!(RazorpayGateway::payments_outcome(&mixed), ProviderOutcome::Pending);
    }
}
