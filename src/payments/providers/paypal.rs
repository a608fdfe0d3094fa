use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::providers::{env_or, env_required, env_timeout, expires_in_secs, AccessTokenCache};
use crate::payments::types::{
    CallbackOutcome, CaptureResponse, CountryPolicy, GatewayName, InitiateRequest,
    InitiateResponse, PayoutRequest, PayoutResponse, ProviderOutcome, RawCallback, RefundRequest,
    RefundResponse, SettlementMode, StatusResponse,
};
use crate::payments::utils::{secure_eq, Auth, PaymentHttpClient};
use crate::payments::validation::{ensure_country, ensure_currency};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct PaypalConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Static token appended to the webhook URL registered with PayPal.
    pub webhook_token: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl PaypalConfig {
    pub fn from_env() -> PaymentResult<Self> {
        Ok(Self {
            client_id: env_required("PAYPAL_CLIENT_ID")?,
            client_secret: env_required("PAYPAL_CLIENT_SECRET")?,
            webhook_token: env_required("PAYPAL_WEBHOOK_TOKEN")?,
            base_url: env_or("PAYPAL_BASE_URL", "https://api-m.sandbox.paypal.com"),
            timeout_secs: env_timeout("PAYPAL_TIMEOUT_SECS"),
        })
    }
}

/// Orders v2 redirect checkout. The buyer approves on PayPal, then the
/// order is captured from the return URL or the approval webhook.
pub struct PaypalGateway {
    config: PaypalConfig,
    http: PaymentHttpClient,
    token: AccessTokenCache,
}

impl PaypalGateway {
    pub fn new(config: PaypalConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new("paypal", Duration::from_secs(config.timeout_secs))?;
        Ok(Self {
            config,
            http,
            token: AccessTokenCache::default(),
        })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(PaypalConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn access_token(&self) -> PaymentResult<String> {
        self.token
            .get_or_fetch(|| async move {
                let raw: JsonValue = self
                    .http
                    .request_form(
                        reqwest::Method::POST,
                        &self.endpoint("/v1/oauth2/token"),
                        Auth::Basic(&self.config.client_id, &self.config.client_secret),
                        &[("grant_type", "client_credentials")],
                        &[],
                    )
                    .await?;
                let token = raw
                    .get("access_token")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| PaymentError::provider("paypal", "missing access_token", false))?
                    .to_string();
                Ok((token, expires_in_secs(&raw["expires_in"])))
            })
            .await
    }

    async fn call(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&JsonValue>,
        request_id: Option<&str>,
    ) -> PaymentResult<JsonValue> {
        let token = self.access_token().await?;
        let mut headers = vec![("Prefer", "return=representation")];
        if let Some(id) = request_id {
            headers.push(("PayPal-Request-Id", id));
        }
        self.http
            .request_json(method, &self.endpoint(path), Auth::Bearer(&token), body, &headers)
            .await
    }

    fn order_outcome(order: &JsonValue) -> ProviderOutcome {
        let capture_status = order
            .pointer("/purchase_units/0/payments/captures/0/status")
            .and_then(|v| v.as_str());
        match (order.get("status").and_then(|v| v.as_str()), capture_status) {
            (_, Some("DECLINED")) | (_, Some("FAILED")) => {
                ProviderOutcome::failed("paypal capture declined")
            }
            (Some("COMPLETED"), Some("PENDING")) => ProviderOutcome::Pending,
            (Some("COMPLETED"), _) => ProviderOutcome::Succeeded,
            (Some("VOIDED"), _) => ProviderOutcome::failed("paypal order voided"),
            _ => ProviderOutcome::Pending,
        }
    }
}

#[async_trait]
impl PaymentGateway for PaypalGateway {
    fn name(&self) -> GatewayName {
        GatewayName::Paypal
    }

    fn settlement_mode(&self) -> SettlementMode {
        SettlementMode::Redirect
    }

    fn country_policy(&self) -> CountryPolicy {
        CountryPolicy::Deny(&["CU", "IR", "KP", "SY", "RU", "BY", "AF", "IQ", "LY", "SD"])
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &[
            "USD", "EUR", "GBP", "CAD", "AUD", "JPY", "CHF", "SEK", "NOK", "DKK", "PLN", "MXN",
            "BRL", "SGD", "HKD", "NZD",
        ]
    }

    async fn initiate(&self, request: InitiateRequest) -> PaymentResult<InitiateResponse> {
        request.amount.validate_positive("amount")?;
        ensure_country(self.name(), self.country_policy(), &request.details)?;
        ensure_currency(self.name(), self.supported_currencies(), &request.amount.currency)?;
        let payment_id = request.payment_id.to_string();
        let return_url = request
            .details
            .return_url
            .clone()
            .unwrap_or_else(|| request.callback_url.clone());

        let payload = serde_json::json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": payment_id,
                "custom_id": payment_id,
                "amount": {
                    "currency_code": request.amount.currency,
                    "value": request.amount.major_string(),
                },
            }],
            "application_context": {
                "return_url": return_url,
                "cancel_url": return_url,
                "user_action": "PAY_NOW",
                "shipping_preference": "NO_SHIPPING",
            },
        });

        let order = self
            .call(reqwest::Method::POST, "/v2/checkout/orders", Some(&payload), Some(&payment_id))
            .await?;
        let order_id = order
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PaymentError::provider("paypal", "order id missing", false))?
            .to_string();
        let approve_url = order
            .get("links")
            .and_then(|v| v.as_array())
            .and_then(|links| {
                links.iter().find(|l| {
                    matches!(
                        l.get("rel").and_then(|r| r.as_str()),
                        Some("approve") | Some("payer-action")
                    )
                })
            })
            .and_then(|l| l.get("href"))
            .and_then(|h| h.as_str())
            .map(|s| s.to_string());

        info!(order_id = %order_id, "paypal order created");

        Ok(InitiateResponse {
            accepted: true,
            provider_tx_id: Some(order_id),
            pending: true,
            redirect_url: approve_url,
            ..Default::default()
        })
    }

    async fn capture(&self, provider_tx_id: &str) -> PaymentResult<CaptureResponse> {
        let request_id = format!("capture-{}", provider_tx_id);
        let result = self
            .call(
                reqwest::Method::POST,
                &format!("/v2/checkout/orders/{}/capture", provider_tx_id),
                Some(&serde_json::json!({})),
                Some(&request_id),
            )
            .await;

        let order = match result {
            Ok(order) => order,
            // 422 ORDER_ALREADY_CAPTURED / ORDER_NOT_APPROVED: fall back to the order state.
            Err(PaymentError::ProviderError {
                provider_code: Some(code),
                ..
            }) if code == "422" => {
                self.call(
                    reqwest::Method::GET,
                    &format!("/v2/checkout/orders/{}", provider_tx_id),
                    None,
                    None,
                )
                .await?
            }
            Err(e) => return Err(e),
        };

        Ok(CaptureResponse {
            outcome: Self::order_outcome(&order),
            provider_data: Some(order),
        })
    }

    async fn refund(&self, request: RefundRequest) -> PaymentResult<RefundResponse> {
        request.amount.validate_positive("amount")?;
        let order = self
            .call(
                reqwest::Method::GET,
                &format!("/v2/checkout/orders/{}", request.original_tx_id),
                None,
                None,
            )
            .await?;
        let capture_id = order
            .pointer("/purchase_units/0/payments/captures/0/id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                PaymentError::provider("paypal", "order has no capture to refund", false)
            })?
            .to_string();

        let payload = serde_json::json!({
            "amount": {
                "currency_code": request.amount.currency,
                "value": request.amount.major_string(),
            },
            "note_to_payer": request.reason,
        });
        let request_id = format!("refund-{}", request.payment_id);
        let refund = self
            .call(
                reqwest::Method::POST,
                &format!("/v2/payments/captures/{}/refund", capture_id),
                Some(&payload),
                Some(&request_id),
            )
            .await?;
        let status = refund.get("status").and_then(|v| v.as_str()).unwrap_or("PENDING");
        Ok(RefundResponse {
            success: status != "FAILED" && status != "CANCELLED",
            refund_tx_id: refund.get("id").and_then(|v| v.as_str()).map(|s| s.to_string()),
            pending: status == "PENDING",
            failure_reason: None,
        })
    }

    async fn payout(&self, request: PayoutRequest) -> PaymentResult<PayoutResponse> {
        request.amount.validate_positive("amount")?;
        let receiver = request.details.require_email(self.name())?;
        let payment_id = request.payment_id.to_string();
        let payload = serde_json::json!({
            "sender_batch_header": {
                "sender_batch_id": payment_id,
                "email_subject": "Your investment payout",
            },
            "items": [{
                "recipient_type": "EMAIL",
                "amount": {
                    "value": request.amount.major_string(),
                    "currency": request.amount.currency,
                },
                "receiver": receiver,
                "note": request.narration,
                "sender_item_id": payment_id,
            }],
        });
        let batch = self
            .call(reqwest::Method::POST, "/v1/payments/payouts", Some(&payload), None)
            .await?;
        let batch_id = batch
            .pointer("/batch_header/payout_batch_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let status = batch
            .pointer("/batch_header/batch_status")
            .and_then(|v| v.as_str())
            .unwrap_or("PENDING");

        Ok(PayoutResponse {
            success: !matches!(status, "DENIED" | "CANCELED"),
            provider_tx_id: batch_id,
            pending: status != "SUCCESS",
            failure_reason: None,
        })
    }

    async fn query_status(&self, provider_tx_id: &str) -> PaymentResult<StatusResponse> {
        let order = self
            .call(
                reqwest::Method::GET,
                &format!("/v2/checkout/orders/{}", provider_tx_id),
                None,
                None,
            )
            .await?;
        Ok(StatusResponse {
            outcome: Self::order_outcome(&order),
            provider_tx_id: provider_tx_id.to_string(),
            provider_data: Some(order),
        })
    }

    fn verify_callback(&self, callback: &RawCallback) -> PaymentResult<()> {
        let token = callback
            .query_param("token")
            .or_else(|| callback.header("x-webhook-token"))
            .unwrap_or_default();
        if !token.is_empty() && secure_eq(token.as_bytes(), self.config.webhook_token.as_bytes()) {
            Ok(())
        } else {
            Err(PaymentError::WebhookVerificationError {
                message: "invalid paypal webhook token".to_string(),
            })
        }
    }

    fn decode_callback(&self, callback: &RawCallback) -> PaymentResult<CallbackOutcome> {
        let parsed = callback.json()?;
        let event_type = parsed
            .get("event_type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let resource = parsed.get("resource").cloned().unwrap_or_default();

        let (provider_tx_id, outcome) = match event_type.as_str() {
            "PAYMENT.CAPTURE.COMPLETED" => (
                resource.pointer("/supplementary_data/related_ids/order_id"),
                ProviderOutcome::Succeeded,
            ),
            "PAYMENT.CAPTURE.DENIED" | "PAYMENT.CAPTURE.DECLINED" => (
                resource.pointer("/supplementary_data/related_ids/order_id"),
                ProviderOutcome::failed("paypal capture denied"),
            ),
            "CHECKOUT.ORDER.VOIDED" => (resource.get("id"), ProviderOutcome::failed("paypal order voided")),
            "PAYMENT.PAYOUTSBATCH.SUCCESS" => (
                resource.pointer("/batch_header/payout_batch_id"),
                ProviderOutcome::Succeeded,
            ),
            "PAYMENT.PAYOUTSBATCH.DENIED" => (
                resource.pointer("/batch_header/payout_batch_id"),
                ProviderOutcome::failed("paypal payout denied"),
            ),
            // CHECKOUT.ORDER.APPROVED and friends: the order still needs a capture.
            _ => (resource.get("id"), ProviderOutcome::Pending),
        };

        Ok(CallbackOutcome {
            gateway: GatewayName::Paypal,
            event_type,
            provider_tx_id: provider_tx_id
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            outcome,
            payload: parsed,
            signed_reference: None,
        })
    }
}
