use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::providers::{env_or, env_required, env_timeout};
use crate::payments::types::{
    CallbackOutcome, CaptureResponse, CountryPolicy, GatewayName, InitiateRequest,
    InitiateResponse, PayoutRequest, PayoutResponse, ProviderOutcome, RawCallback, RefundRequest,
    RefundResponse, SettlementMode, StatusResponse,
};
use crate::payments::utils::{verify_timestamped_signature, Auth, PaymentHttpClient};
use crate::payments::validation::{ensure_country, ensure_currency, normalize_msisdn};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct WaveConfig {
    pub api_key: String,
    pub webhook_secret: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl WaveConfig {
    pub fn from_env() -> PaymentResult<Self> {
        Ok(Self {
            api_key: env_required("WAVE_API_KEY")?,
            webhook_secret: env_required("WAVE_WEBHOOK_SECRET")?,
            base_url: env_or("WAVE_BASE_URL", "https://api.wave.com"),
            timeout_secs: env_timeout("WAVE_TIMEOUT_SECS"),
        })
    }
}

/// Checkout sessions: the payer confirms in the Wave app from a launch URL.
pub struct WaveGateway {
    config: WaveConfig,
    http: PaymentHttpClient,
}

impl WaveGateway {
    pub fn new(config: WaveConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new("wave", Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(WaveConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn session_outcome(session: &JsonValue) -> ProviderOutcome {
        let checkout = session.get("checkout_status").and_then(|v| v.as_str());
        let payment = session.get("payment_status").and_then(|v| v.as_str());
        match (checkout, payment) {
            (_, Some("succeeded")) => ProviderOutcome::Succeeded,
            (Some("expired"), _) => ProviderOutcome::failed("wave checkout session expired"),
            (_, Some("cancelled")) => ProviderOutcome::failed("wave payment cancelled"),
            _ => ProviderOutcome::Pending,
        }
    }
}

#[async_trait]
impl PaymentGateway for WaveGateway {
    fn name(&self) -> GatewayName {
        GatewayName::Wave
    }

    fn settlement_mode(&self) -> SettlementMode {
        SettlementMode::Redirect
    }

    fn country_policy(&self) -> CountryPolicy {
        CountryPolicy::Allow(&["SN", "CI", "ML", "BF", "GM", "UG"])
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &["XOF", "GMD", "UGX"]
    }

    async fn initiate(&self, request: InitiateRequest) -> PaymentResult<InitiateResponse> {
        request.amount.validate_positive("amount")?;
        ensure_country(self.name(), self.country_policy(), &request.details)?;
        ensure_currency(self.name(), self.supported_currencies(), &request.amount.currency)?;
        let return_url = request
            .details
            .return_url
            .clone()
            .unwrap_or_else(|| request.callback_url.clone());

        let payload = serde_json::json!({
            "amount": request.amount.major_string(),
            "currency": request.amount.currency,
            "success_url": return_url,
            "error_url": return_url,
            "client_reference": request.payment_id.to_string(),
        });
        let idempotency_key = format!("initiate-{}", request.payment_id);
        let session: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v1/checkout/sessions"),
                Auth::Bearer(&self.config.api_key),
                Some(&payload),
                &[("Idempotency-Key", idempotency_key.as_str())],
            )
            .await?;
        let session_id = session
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PaymentError::provider("wave", "checkout session id missing", false))?
            .to_string();

        info!(session_id = %session_id, "wave checkout session created");

        Ok(InitiateResponse {
            accepted: true,
            provider_tx_id: Some(session_id),
            pending: true,
            redirect_url: session
                .get("wave_launch_url")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            ..Default::default()
        })
    }

    async fn capture(&self, provider_tx_id: &str) -> PaymentResult<CaptureResponse> {
        let status = self.query_status(provider_tx_id).await?;
        Ok(CaptureResponse {
            outcome: status.outcome,
            provider_data: status.provider_data,
        })
    }

    async fn refund(&self, request: RefundRequest) -> PaymentResult<RefundResponse> {
        // Wave only refunds complete sessions in full.
        self.http
            .request_accepted(
                reqwest::Method::POST,
                &self.endpoint(&format!("/v1/checkout/sessions/{}/refund", request.original_tx_id)),
                Auth::Bearer(&self.config.api_key),
                None,
                &[],
            )
            .await?;
        Ok(RefundResponse {
            success: true,
            refund_tx_id: Some(request.original_tx_id),
            pending: false,
            failure_reason: None,
        })
    }

    async fn payout(&self, request: PayoutRequest) -> PaymentResult<PayoutResponse> {
        request.amount.validate_positive("amount")?;
        let country = ensure_country(self.name(), self.country_policy(), &request.details)?;
        let msisdn = normalize_msisdn(&request.details.require_phone()?, &country)?;

        let payload = serde_json::json!({
            "currency": request.amount.currency,
            "receive_amount": request.amount.major_string(),
            "mobile": format!("+{}", msisdn),
            "name": request.details.full_name,
            "client_reference": request.payment_id.to_string(),
            "payment_reason": request.narration,
        });
        let idempotency_key = format!("payout-{}", request.payment_id);
        let payout: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v1/payout"),
                Auth::Bearer(&self.config.api_key),
                Some(&payload),
                &[("Idempotency-Key", idempotency_key.as_str())],
            )
            .await?;
        let status = payout.get("status").and_then(|v| v.as_str()).unwrap_or("processing");
        Ok(PayoutResponse {
            success: status != "failed",
            provider_tx_id: payout.get("id").and_then(|v| v.as_str()).map(|s| s.to_string()),
            pending: status == "processing",
            failure_reason: payout
                .pointer("/payout_error/error_message")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        })
    }

    async fn query_status(&self, provider_tx_id: &str) -> PaymentResult<StatusResponse> {
        let session: JsonValue = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/v1/checkout/sessions/{}", provider_tx_id)),
                Auth::Bearer(&self.config.api_key),
                None,
                &[],
            )
            .await?;
        Ok(StatusResponse {
            outcome: Self::session_outcome(&session),
            provider_tx_id: provider_tx_id.to_string(),
            provider_data: Some(session),
        })
    }

    fn verify_callback(&self, callback: &RawCallback) -> PaymentResult<()> {
        let header = callback.header("wave-signature").unwrap_or_default();
        if verify_timestamped_signature(&callback.body, &self.config.webhook_secret, header, "") {
            Ok(())
        } else {
            Err(PaymentError::WebhookVerificationError {
                message: "invalid wave signature".to_string(),
            })
        }
    }

    fn decode_callback(&self, callback: &RawCallback) -> PaymentResult<CallbackOutcome> {
        let parsed = callback.json()?;
        let event_type = parsed
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let data = parsed.get("data").cloned().unwrap_or_default();
        let outcome = match event_type.as_str() {
            "checkout.session.completed" => Self::session_outcome(&data),
            "checkout.session.payment_failed" => ProviderOutcome::failed(
                data.pointer("/last_payment_error/message")
                    .and_then(|v| v.as_str())
                    .unwrap_or("wave payment failed"),
            ),
            "payout.succeeded" | "b2b.payment_received" => ProviderOutcome::Succeeded,
            "payout.failed" | "payout.reversed" => ProviderOutcome::failed(event_type.as_str()),
            _ => ProviderOutcome::Pending,
        };

        Ok(CallbackOutcome {
            gateway: GatewayName::Wave,
            provider_tx_id: data
                .get("id")
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

    fn gateway() -> WaveGateway {
        WaveGateway::new(WaveConfig {
            api_key: "wave_sn_prod_x".to_string(),
            webhook_secret: "wave_sn_WHS_x".to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 5,
        })
        .expect("gateway init should succeed")
    }

    #[test]
    fn completed_session_is_success() {
        let body = br#"{"type":"checkout.session.completed","data":{"id":"cos-1","checkout_status":"complete","payment_status":"succeeded"}}"#;
        let signed_payload = [b"1700000000".as_slice(), body.as_slice()].concat();
        let sig = hex::encode(hmac_sha256("wave_sn_WHS_x", &signed_payload).unwrap());
        let raw = RawCallback::new(body.to_vec())
            .with_header("Wave-Signature", format!("t=1700000000,v1={}", sig));
        let outcome = gateway().parse_callback(&raw).expect("valid webhook");
        assert_eq!(outcome.provider_tx_id, "cos-1");
        assert_eq!(outcome.outcome, ProviderOutcome::Succeeded);
    }

    #[test]
    fn expired_session_fails() {
        let session = serde_json::json!({"checkout_status": "expired", "payment_status": "processing"});
        assert!(WaveGateway::session_outcome(&session).terminal_status().is_some());
    }
}
