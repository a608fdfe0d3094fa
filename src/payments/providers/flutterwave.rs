use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::providers::{env_or, env_required, env_timeout};
use crate::payments::types::{
    CallbackOutcome, CaptureResponse, CountryPolicy, GatewayName, InitiateRequest,
    InitiateResponse, PayoutRequest, PayoutResponse, ProviderOutcome, RawCallback, RefundRequest,
    RefundResponse, SettlementMode, StatusResponse,
};
use crate::payments::utils::{secure_eq, Auth, PaymentHttpClient};
use crate::payments::validation::{ensure_country, ensure_currency};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct FlutterwaveConfig {
    pub secret_key: String,
    pub webhook_hash: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl FlutterwaveConfig {
    pub fn from_env() -> PaymentResult<Self> {
        Ok(Self {
            secret_key: env_required("FLUTTERWAVE_SECRET_KEY")?,
            webhook_hash: std::env::var("FLUTTERWAVE_WEBHOOK_SECRET")
                .ok()
                .or_else(|| std::env::var("FLUTTERWAVE_WEBHOOK_HASH").ok()),
            base_url: env_or("FLUTTERWAVE_BASE_URL", "https://api.flutterwave.com/v3"),
            timeout_secs: env_timeout("FLUTTERWAVE_TIMEOUT_SECS"),
        })
    }
}

pub struct FlutterwaveGateway {
    config: FlutterwaveConfig,
    http: PaymentHttpClient,
}

impl FlutterwaveGateway {
    pub fn new(config: FlutterwaveConfig) -> PaymentResult<Self> {
        let http =
            PaymentHttpClient::new("flutterwave", Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(FlutterwaveConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn auth(&self) -> Auth<'_> {
        Auth::Bearer(&self.config.secret_key)
    }

    fn map_message_error(message: String) -> PaymentError {
        let lowered = message.to_lowercase();
        if lowered.contains("insufficient") || lowered.contains("low balance") {
            return PaymentError::InsufficientFundsError { message };
        }
        if lowered.contains("declined")
            || lowered.contains("do not honor")
            || lowered.contains("expired card")
        {
            return PaymentError::PaymentDeclinedError {
                message,
                provider_code: None,
            };
        }
        if lowered.contains("too many requests") || lowered.contains("rate limit") {
            return PaymentError::RateLimitError {
                message,
                retry_after_seconds: None,
            };
        }
        PaymentError::provider("flutterwave", message, false)
    }

    async fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&JsonValue>,
    ) -> PaymentResult<JsonValue> {
        let raw: FlutterwaveEnvelope = self
            .http
            .request_json(method, &self.endpoint(path), self.auth(), body, &[])
            .await
            .map_err(|e| match e {
                PaymentError::ProviderError {
                    message,
                    retryable: false,
                    ..
                } => Self::map_message_error(message),
                other => other,
            })?;
        if raw.status.to_lowercase() != "success" {
            return Err(Self::map_message_error(raw.message));
        }
        Ok(raw.data.unwrap_or_default())
    }

    fn outcome(status: &str, reason: Option<&str>) -> ProviderOutcome {
        match status.to_lowercase().as_str() {
            "successful" | "success" | "completed" => ProviderOutcome::Succeeded,
            "failed" | "cancelled" => {
                ProviderOutcome::failed(reason.unwrap_or("flutterwave transaction failed"))
            }
            _ => ProviderOutcome::Pending,
        }
    }

    async fn verify_by_reference(&self, tx_ref: &str) -> PaymentResult<JsonValue> {
        self.send(
            reqwest::Method::GET,
            &format!("/transactions/verify_by_reference?tx_ref={}", tx_ref),
            None,
        )
        .await
    }
}

#[async_trait]
impl PaymentGateway for FlutterwaveGateway {
    fn name(&self) -> GatewayName {
        GatewayName::Flutterwave
    }

    fn settlement_mode(&self) -> SettlementMode {
        SettlementMode::Redirect
    }

    fn country_policy(&self) -> CountryPolicy {
        CountryPolicy::Allow(&[
            "NG", "GH", "KE", "ZA", "UG", "TZ", "RW", "ZM", "CM", "CI", "SN", "US", "GB",
        ])
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &[
            "NGN", "GHS", "KES", "ZAR", "UGX", "TZS", "RWF", "ZMW", "XAF", "XOF", "USD", "GBP",
            "EUR",
        ]
    }

    async fn initiate(&self, request: InitiateRequest) -> PaymentResult<InitiateResponse> {
        request.amount.validate_positive("amount")?;
        ensure_country(self.name(), self.country_policy(), &request.details)?;
        ensure_currency(self.name(), self.supported_currencies(), &request.amount.currency)?;
        let email = request.details.require_email(self.name())?;
        let tx_ref = request.payment_id.to_string();

        let payload = serde_json::json!({
            "tx_ref": tx_ref,
            "amount": request.amount.major_string(),
            "currency": request.amount.currency,
            "redirect_url": request.details.return_url.clone().unwrap_or(request.callback_url),
            "payment_options": "card,banktransfer,mobilemoney,ussd",
            "customer": {
                "email": email,
                "phonenumber": request.details.phone,
                "name": request.details.full_name,
            },
            "meta": { "payment_id": tx_ref },
            "customizations": { "title": "Investment funding" },
        });

        let data = self
            .send(reqwest::Method::POST, "/payments", Some(&payload))
            .await?;
        let link = data
            .get("link")
            .or_else(|| data.get("checkout_url"))
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .ok_or_else(|| {
                PaymentError::provider(
                    "flutterwave",
                    "missing payment link in flutterwave response",
                    false,
                )
            })?;

        info!(tx_ref = %tx_ref, "flutterwave payment initiated");

        Ok(InitiateResponse {
            accepted: true,
            provider_tx_id: Some(tx_ref),
            pending: true,
            redirect_url: Some(link),
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
        request.amount.validate_positive("amount")?;
        let transaction = self.verify_by_reference(&request.original_tx_id).await?;
        let flw_id = transaction
            .get("id")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| {
                PaymentError::provider("flutterwave", "transaction id missing for refund", false)
            })?;

        let payload = serde_json::json!({ "amount": request.amount.major_string() });
        let data = self
            .send(
                reqwest::Method::POST,
                &format!("/transactions/{}/refund", flw_id),
                Some(&payload),
            )
            .await?;
        let status = data
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("pending")
            .to_lowercase();
        Ok(RefundResponse {
            success: status != "failed",
            refund_tx_id: data.get("id").map(|v| v.to_string()),
            pending: !matches!(status.as_str(), "completed" | "successful"),
            failure_reason: None,
        })
    }

    async fn payout(&self, request: PayoutRequest) -> PaymentResult<PayoutResponse> {
        request.amount.validate_positive("amount")?;
        let account_number = request
            .details
            .account_number
            .clone()
            .ok_or_else(|| PaymentError::validation("account_number is required", "account_number"))?;
        let bank_code = request
            .details
            .bank_code
            .clone()
            .ok_or_else(|| PaymentError::validation("bank_code is required", "bank_code"))?;

        let payload = serde_json::json!({
            "account_bank": bank_code,
            "account_number": account_number,
            "amount": request.amount.major_string(),
            "currency": request.amount.currency,
            "narration": request.narration.clone().unwrap_or_else(|| "Investment withdrawal".to_string()),
            "reference": request.payment_id.to_string(),
            "callback_url": request.callback_url,
            "debit_currency": request.amount.currency,
        });

        let data = self
            .send(reqwest::Method::POST, "/transfers", Some(&payload))
            .await?;
        let status = data
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("NEW")
            .to_uppercase();
        let reference = data
            .get("reference")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| request.payment_id.to_string());

        let (success, pending) = match status.as_str() {
            "SUCCESSFUL" => (true, false),
            "FAILED" => (false, false),
            _ => (true, true),
        };
        Ok(PayoutResponse {
            success,
            provider_tx_id: Some(reference),
            pending,
            failure_reason: if success {
                None
            } else {
                data.get("complete_message")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
            },
        })
    }

    async fn query_status(&self, provider_tx_id: &str) -> PaymentResult<StatusResponse> {
        let data = self.verify_by_reference(provider_tx_id).await?;
        let status = data
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("pending");
        let outcome = Self::outcome(
            status,
            data.get("processor_response").and_then(|v| v.as_str()),
        );
        Ok(StatusResponse {
            outcome,
            provider_tx_id: provider_tx_id.to_string(),
            provider_data: Some(data),
        })
    }

    fn verify_callback(&self, callback: &RawCallback) -> PaymentResult<()> {
        let expected = self.config.webhook_hash.as_deref().ok_or_else(|| {
            PaymentError::WebhookVerificationError {
                message: "FLUTTERWAVE_WEBHOOK_SECRET is not configured".to_string(),
            }
        })?;
        let signature = callback.header("verif-hash").unwrap_or_default();
        if secure_eq(expected.trim().as_bytes(), signature.trim().as_bytes()) {
            Ok(())
        } else {
            Err(PaymentError::WebhookVerificationError {
                message: "invalid flutterwave webhook hash".to_string(),
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
        let data = parsed.get("data").cloned().unwrap_or_default();

        // Charges echo our tx_ref; transfers echo the reference we sent.
        let provider_tx_id = data
            .get("tx_ref")
            .or_else(|| data.get("reference"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let outcome = data
            .get("status")
            .and_then(|v| v.as_str())
            .map(|s| {
                Self::outcome(
                    s,
                    data.get("complete_message")
                        .or_else(|| data.get("processor_response"))
                        .and_then(|v| v.as_str()),
                )
            })
            .unwrap_or(ProviderOutcome::Pending);

        Ok(CallbackOutcome {
            gateway: GatewayName::Flutterwave,
            event_type,
            provider_tx_id,
            outcome,
            payload: parsed,
            signed_reference: None,
        })
    }
}

#[derive(Debug, Deserialize)]
struct FlutterwaveEnvelope {
    status: String,
    message: String,
    #[serde(default)]
    data: Option<JsonValue>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::provider::ParseCallback;

    fn gateway() -> FlutterwaveGateway {
        FlutterwaveGateway::new(FlutterwaveConfig {
            secret_key: "FLWSECK_TEST_demo".to_string(),
            webhook_hash: Some("hash_123".to_string()),
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 5,
        })
        .expect("gateway init should succeed")
    }

    #[test]
    fn webhook_hash_validation_works() {
        let body = br#"{"event":"charge.completed","data":{"tx_ref":"p-1","status":"successful"}}"#;
        let valid = RawCallback::new(body.to_vec()).with_header("verif-hash", "hash_123");
        assert!(gateway().parse_callback(&valid).is_ok());

        let invalid = RawCallback::new(body.to_vec()).with_header("verif-hash", "wrong");
        assert!(gateway().parse_callback(&invalid).is_err());
    }

    #[test]
    fn decode_maps_charge_and_transfer_events() {
        let charge = RawCallback::new(
            br#"{"event":"charge.completed","data":{"status":"successful","tx_ref":"tx_ref_1","flw_ref":"flw_1"}}"#
                .to_vec(),
        )
        .with_header("verif-hash", "hash_123");
        let event = gateway().parse_callback(&charge).expect("parse should succeed");
        assert_eq!(event.event_type, "charge.completed");
        assert_eq!(event.provider_tx_id, "tx_ref_1");
        assert_eq!(event.outcome, ProviderOutcome::Succeeded);

        let transfer = RawCallback::new(
            br#"{"event":"transfer.completed","data":{"status":"FAILED","reference":"w-1","complete_message":"DISBURSE FAILED"}}"#
                .to_vec(),
        )
        .with_header("verif-hash", "hash_123");
        let event = gateway().parse_callback(&transfer).expect("parse should succeed");
        assert_eq!(event.provider_tx_id, "w-1");
        assert_eq!(event.outcome.failure_reason(), Some("DISBURSE FAILED"));
    }
}
