use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::providers::{env_or, env_required, env_timeout};
use crate::payments::types::{
    CallbackOutcome, CaptureResponse, CountryPolicy, GatewayName, InitiateRequest,
    InitiateResponse, PayoutRequest, PayoutResponse, ProviderOutcome, RawCallback, RefundRequest,
    RefundResponse, SettlementMode, StatusResponse,
};
use crate::payments::utils::{verify_timestamped_signature, Auth, PaymentHttpClient};
use crate::payments::validation::ensure_country;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl StripeConfig {
    pub fn from_env() -> PaymentResult<Self> {
        Ok(Self {
            secret_key: env_required("STRIPE_SECRET_KEY")?,
            webhook_secret: env_required("STRIPE_WEBHOOK_SECRET")?,
            base_url: env_or("STRIPE_BASE_URL", "https://api.stripe.com"),
            timeout_secs: env_timeout("STRIPE_TIMEOUT_SECS"),
        })
    }
}

/// Card payments through manual-capture PaymentIntents.
pub struct StripeGateway {
    config: StripeConfig,
    http: PaymentHttpClient,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new("stripe", Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(StripeConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn auth(&self) -> Auth<'_> {
        Auth::Bearer(&self.config.secret_key)
    }

    /// Stripe answers card declines with `402 Payment Required`.
    fn map_error(err: PaymentError) -> PaymentError {
        match err {
            PaymentError::ProviderError {
                message,
                provider_code: Some(code),
                ..
            } if code == "402" => PaymentError::PaymentDeclinedError {
                message,
                provider_code: Some(code),
            },
            other => other,
        }
    }

    fn intent_outcome(intent: &StripePaymentIntent) -> ProviderOutcome {
        match intent.status.as_str() {
            "succeeded" => ProviderOutcome::Succeeded,
            "canceled" => ProviderOutcome::failed(
                intent
                    .cancellation_reason
                    .clone()
                    .unwrap_or_else(|| "payment intent canceled".to_string()),
            ),
            "requires_payment_method" if intent.last_payment_error.is_some() => {
                ProviderOutcome::failed(intent.decline_message())
            }
            _ => ProviderOutcome::Pending,
        }
    }

    async fn fetch_intent(&self, id: &str) -> PaymentResult<StripePaymentIntent> {
        self.http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/v1/payment_intents/{}", id)),
                self.auth(),
                None,
                &[],
            )
            .await
            .map_err(Self::map_error)
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn name(&self) -> GatewayName {
        GatewayName::Stripe
    }

    fn settlement_mode(&self) -> SettlementMode {
        SettlementMode::AuthorizeCapture
    }

    fn country_policy(&self) -> CountryPolicy {
        CountryPolicy::Deny(&["CU", "IR", "KP", "SY", "RU", "BY"])
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &[]
    }

    async fn initiate(&self, request: InitiateRequest) -> PaymentResult<InitiateResponse> {
        request.amount.validate_positive("amount")?;
        ensure_country(self.name(), self.country_policy(), &request.details)?;
        let payment_method = request
            .details
            .payment_method_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                PaymentError::validation("payment_method_token is required for stripe", "payment_method_token")
            })?;

        let payment_id = request.payment_id.to_string();
        let mut form = vec![
            ("amount", request.amount.minor_units()?.to_string()),
            ("currency", request.amount.currency.to_lowercase()),
            ("payment_method", payment_method),
            ("confirm", "true".to_string()),
            ("capture_method", "manual".to_string()),
            ("metadata[payment_id]", payment_id.clone()),
        ];
        if let Some(email) = request.details.email.clone() {
            form.push(("receipt_email", email));
        }
        if let Some(return_url) = request.details.return_url.clone() {
            form.push(("return_url", return_url));
        }
        let idempotency_key = format!("initiate-{}", payment_id);

        let intent: StripePaymentIntent = self
            .http
            .request_form(
                reqwest::Method::POST,
                &self.endpoint("/v1/payment_intents"),
                self.auth(),
                &form,
                &[("Idempotency-Key", idempotency_key.as_str())],
            )
            .await
            .map_err(Self::map_error)?;

        info!(intent_id = %intent.id, status = %intent.status, "stripe payment intent created");

        let response = match intent.status.as_str() {
            "requires_capture" => InitiateResponse {
                accepted: true,
                provider_tx_id: Some(intent.id.clone()),
                capture_required: true,
                ..Default::default()
            },
            "succeeded" => InitiateResponse {
                accepted: true,
                provider_tx_id: Some(intent.id.clone()),
                ..Default::default()
            },
            "requires_action" | "processing" => InitiateResponse {
                accepted: true,
                provider_tx_id: Some(intent.id.clone()),
                pending: true,
                redirect_url: intent.redirect_url(),
                ..Default::default()
            },
            _ => {
                let mut declined = InitiateResponse::declined(intent.decline_message());
                declined.provider_tx_id = Some(intent.id.clone());
                declined
            }
        };
        Ok(response)
    }

    async fn capture(&self, provider_tx_id: &str) -> PaymentResult<CaptureResponse> {
        let idempotency_key = format!("capture-{}", provider_tx_id);
        let intent: StripePaymentIntent = self
            .http
            .request_form(
                reqwest::Method::POST,
                &self.endpoint(&format!("/v1/payment_intents/{}/capture", provider_tx_id)),
                self.auth(),
                &[] as &[(&str, &str)],
                &[("Idempotency-Key", idempotency_key.as_str())],
            )
            .await
            .map_err(Self::map_error)?;
        Ok(CaptureResponse {
            outcome: Self::intent_outcome(&intent),
            provider_data: Some(serde_json::json!({ "status": intent.status })),
        })
    }

    async fn refund(&self, request: RefundRequest) -> PaymentResult<RefundResponse> {
        request.amount.validate_positive("amount")?;
        let form = [
            ("payment_intent", request.original_tx_id.clone()),
            ("amount", request.amount.minor_units()?.to_string()),
            ("metadata[payment_id]", request.payment_id.to_string()),
        ];
        let idempotency_key = format!("refund-{}", request.payment_id);
        let refund: StripeObject = self
            .http
            .request_form(
                reqwest::Method::POST,
                &self.endpoint("/v1/refunds"),
                self.auth(),
                &form,
                &[("Idempotency-Key", idempotency_key.as_str())],
            )
            .await
            .map_err(Self::map_error)?;
        Ok(RefundResponse {
            success: refund.status != "failed" && refund.status != "canceled",
            refund_tx_id: Some(refund.id),
            pending: refund.status == "pending",
            failure_reason: refund.failure_reason,
        })
    }

    /// Pays out to a connected account (`account_number` holds the `acct_` id).
    async fn payout(&self, request: PayoutRequest) -> PaymentResult<PayoutResponse> {
        request.amount.validate_positive("amount")?;
        let destination = request
            .details
            .account_number
            .clone()
            .filter(|a| a.starts_with("acct_"))
            .ok_or_else(|| {
                PaymentError::validation("a connected account id is required for stripe payouts", "account_number")
            })?;
        let form = [
            ("amount", request.amount.minor_units()?.to_string()),
            ("currency", request.amount.currency.to_lowercase()),
            ("destination", destination),
            ("transfer_group", request.payment_id.to_string()),
        ];
        let idempotency_key = format!("payout-{}", request.payment_id);
        let transfer: StripeObject = self
            .http
            .request_form(
                reqwest::Method::POST,
                &self.endpoint("/v1/transfers"),
                self.auth(),
                &form,
                &[("Idempotency-Key", idempotency_key.as_str())],
            )
            .await
            .map_err(Self::map_error)?;
        Ok(PayoutResponse {
            success: true,
            provider_tx_id: Some(transfer.id),
            pending: false,
            failure_reason: None,
        })
    }

    async fn query_status(&self, provider_tx_id: &str) -> PaymentResult<StatusResponse> {
        let intent = self.fetch_intent(provider_tx_id).await?;
        Ok(StatusResponse {
            outcome: Self::intent_outcome(&intent),
            provider_tx_id: intent.id.clone(),
            provider_data: Some(serde_json::json!({ "status": intent.status })),
        })
    }

    fn verify_callback(&self, callback: &RawCallback) -> PaymentResult<()> {
        let header = callback.header("stripe-signature").unwrap_or_default();
        if verify_timestamped_signature(&callback.body, &self.config.webhook_secret, header, ".") {
            Ok(())
        } else {
            Err(PaymentError::WebhookVerificationError {
                message: "invalid stripe signature".to_string(),
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
        let object = parsed
            .get("data")
            .and_then(|d| d.get("object"))
            .cloned()
            .unwrap_or_default();
        let provider_tx_id = object
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let outcome = match event_type.as_str() {
            "payment_intent.succeeded" | "transfer.paid" => ProviderOutcome::Succeeded,
            "payment_intent.payment_failed" => ProviderOutcome::failed(
                object
                    .get("last_payment_error")
                    .and_then(|e| e.get("message"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("card payment failed"),
            ),
            "payment_intent.canceled" => ProviderOutcome::failed("payment intent canceled"),
            "transfer.failed" | "transfer.reversed" => ProviderOutcome::failed(event_type.as_str()),
            _ => ProviderOutcome::Pending,
        };

        Ok(CallbackOutcome {
            gateway: GatewayName::Stripe,
            event_type,
            provider_tx_id,
            outcome,
            payload: parsed,
            signed_reference: None,
        })
    }
}

#[derive(Debug, Deserialize)]
struct StripePaymentIntent {
    id: String,
    status: String,
    #[serde(default)]
    cancellation_reason: Option<String>,
    #[serde(default)]
    last_payment_error: Option<StripeLastError>,
    #[serde(default)]
    next_action: Option<serde_json::Value>,
}

impl StripePaymentIntent {
    fn decline_message(&self) -> String {
        self.last_payment_error
            .as_ref()
            .and_then(|e| e.message.clone())
            .unwrap_or_else(|| format!("payment intent {}", self.status))
    }

    fn redirect_url(&self) -> Option<String> {
        self.next_action
            .as_ref()
            .and_then(|a| a.get("redirect_to_url"))
            .and_then(|r| r.get("url"))
            .and_then(|u| u.as_str())
            .map(|s| s.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct StripeLastError {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeObject {
    id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    failure_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::provider::ParseCallback;
    use crate::payments::utils::hmac_sha256;

    fn gateway() -> StripeGateway {
        StripeGateway::new(StripeConfig {
            secret_key: "sk_test".to_string(),
            webhook_secret: "whsec_test".to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 5,
        })
        .expect("gateway init should succeed")
    }

    fn signed(body: &[u8]) -> RawCallback {
        let signed_payload = [b"1700000000.".as_slice(), body].concat();
        let sig = hex::encode(hmac_sha256("whsec_test", &signed_payload).unwrap());
        RawCallback::new(body.to_vec())
            .with_header("Stripe-Signature", format!("t=1700000000,v1={}", sig))
    }

    #[test]
    fn payment_failed_event_maps_to_failure() {
        let body = br#"{"type":"payment_intent.payment_failed","data":{"object":{"id":"pi_1","last_payment_error":{"message":"Your card was declined."}}}}"#;
        let outcome = gateway().parse_callback(&signed(body)).expect("valid event");
        assert_eq!(outcome.provider_tx_id, "pi_1");
        assert_eq!(outcome.outcome.failure_reason(), Some("Your card was declined."));
    }

    #[test]
    fn unsigned_events_are_rejected() {
        let raw = RawCallback::new(
            br#"{"type":"payment_intent.succeeded","data":{"object":{"id":"pi_1"}}}"#.to_vec(),
        );
        assert!(gateway().parse_callback(&raw).is_err());
    }

    #[test]
    fn intent_status_mapping() {
        let intent = StripePaymentIntent {
            id: "pi_2".to_string(),
            status: "requires_capture".to_string(),
            cancellation_reason: None,
            last_payment_error: None,
            next_action: None,
        };
        assert_eq!(StripeGateway::intent_outcome(&intent), ProviderOutcome::Pending);

        let declined = PaymentError::ProviderError {
            provider: "stripe".to_string(),
            message: "card_declined".to_string(),
            provider_code: Some("402".to_string()),
            retryable: false,
        };
        assert!(matches!(
            StripeGateway::map_error(declined),
            PaymentError::PaymentDeclinedError { .. }
        ));
    }
}
