use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::providers::{env_or, env_required, env_timeout};
use crate::payments::types::{
    CallbackOutcome, CaptureResponse, CountryPolicy, GatewayName, InitiateRequest,
    InitiateResponse, PayoutRequest, PayoutResponse, ProviderOutcome, RawCallback, RefundRequest,
    RefundResponse, SettlementMode, StatusResponse,
};
use crate::payments::utils::{verify_hmac_sha512_hex, Auth, PaymentHttpClient};
use crate::payments::validation::{ensure_country, ensure_currency};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct PaystackConfig {
    pub secret_key: String,
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl PaystackConfig {
    pub fn from_env() -> PaymentResult<Self> {
        Ok(Self {
            secret_key: env_required("PAYSTACK_SECRET_KEY")?,
            webhook_secret: std::env::var("PAYSTACK_WEBHOOK_SECRET").ok(),
            base_url: env_or("PAYSTACK_BASE_URL", "https://api.paystack.co"),
            timeout_secs: env_timeout("PAYSTACK_TIMEOUT_SECS"),
        })
    }
}

pub struct PaystackGateway {
    config: PaystackConfig,
    http: PaymentHttpClient,
}

impl PaystackGateway {
    pub fn new(config: PaystackConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new("paystack", Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(PaystackConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn auth(&self) -> Auth<'_> {
        Auth::Bearer(&self.config.secret_key)
    }

    fn ensure_ok<T>(raw: PaystackEnvelope<T>) -> PaymentResult<T> {
        if !raw.status {
            return Err(map_message_error(raw.message));
        }
        raw.data.ok_or_else(|| {
            PaymentError::provider("paystack", "missing data in paystack response", false)
        })
    }

    fn outcome(status: &str, gateway_response: Option<String>) -> ProviderOutcome {
        match status {
            "success" => ProviderOutcome::Succeeded,
            "failed" | "abandoned" | "reversed" => ProviderOutcome::failed(
                gateway_response.unwrap_or_else(|| format!("paystack transaction {}", status)),
            ),
            _ => ProviderOutcome::Pending,
        }
    }
}

fn map_message_error(message: String) -> PaymentError {
    let lowered = message.to_lowercase();
    if lowered.contains("insufficient") {
        return PaymentError::InsufficientFundsError { message };
    }
    if lowered.contains("declined") {
        return PaymentError::PaymentDeclinedError {
            message,
            provider_code: None,
        };
    }
    PaymentError::provider("paystack", message, false)
}

#[async_trait]
impl PaymentGateway for PaystackGateway {
    fn name(&self) -> GatewayName {
        GatewayName::Paystack
    }

    fn settlement_mode(&self) -> SettlementMode {
        SettlementMode::Redirect
    }

    fn country_policy(&self) -> CountryPolicy {
        CountryPolicy::Allow(&["NG", "GH", "ZA", "KE", "CI"])
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &["NGN", "GHS", "ZAR", "KES", "XOF", "USD"]
    }

    async fn initiate(&self, request: InitiateRequest) -> PaymentResult<InitiateResponse> {
        request.amount.validate_positive("amount")?;
        ensure_country(self.name(), self.country_policy(), &request.details)?;
        ensure_currency(self.name(), self.supported_currencies(), &request.amount.currency)?;
        let email = request.details.require_email(self.name())?;
        let reference = request.payment_id.to_string();

        let payload = serde_json::json!({
            "email": email,
            "amount": request.amount.minor_units()?,
            "currency": request.amount.currency,
            "reference": reference,
            "callback_url": request.details.return_url.clone().unwrap_or(request.callback_url),
            "metadata": { "payment_id": reference },
        });

        let raw: PaystackEnvelope<PaystackInitializeData> = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/transaction/initialize"),
                self.auth(),
                Some(&payload),
                &[],
            )
            .await?;
        let data = Self::ensure_ok(raw)?;
        info!(reference = %data.reference, "paystack payment initiated");

        Ok(InitiateResponse {
            accepted: true,
            provider_tx_id: Some(data.reference.clone()),
            pending: true,
            redirect_url: Some(data.authorization_url),
            provider_data: Some(serde_json::json!({ "access_code": data.access_code })),
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
        let payload = serde_json::json!({
            "transaction": request.original_tx_id,
            "amount": request.amount.minor_units()?,
            "merchant_note": request.reason,
        });
        let raw: PaystackEnvelope<PaystackRefundData> = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/refund"),
                self.auth(),
                Some(&payload),
                &[],
            )
            .await?;
        let data = Self::ensure_ok(raw)?;
        Ok(RefundResponse {
            success: data.status != "failed",
            refund_tx_id: Some(data.id.to_string()),
            pending: matches!(data.status.as_str(), "pending" | "processing"),
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

        let recipient_payload = serde_json::json!({
            "type": "nuban",
            "name": request.details.full_name.clone().unwrap_or_else(|| "Investor".to_string()),
            "account_number": account_number,
            "bank_code": bank_code,
            "currency": request.amount.currency,
        });
        let recipient: PaystackEnvelope<PaystackRecipientData> = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/transferrecipient"),
                self.auth(),
                Some(&recipient_payload),
                &[],
            )
            .await?;
        let recipient = Self::ensure_ok(recipient)?;

        let transfer_payload = serde_json::json!({
            "source": "balance",
            "amount": request.amount.minor_units()?,
            "recipient": recipient.recipient_code,
            "reference": request.payment_id.to_string(),
            "reason": request.narration,
        });
        let transfer: PaystackEnvelope<PaystackTransferData> = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/transfer"),
                self.auth(),
                Some(&transfer_payload),
                &[],
            )
            .await?;
        let transfer = Self::ensure_ok(transfer)?;

        let (success, pending) = match transfer.status.as_str() {
            "success" => (true, false),
            "failed" | "reversed" => (false, false),
            _ => (true, true),
        };
        Ok(PayoutResponse {
            success,
            provider_tx_id: Some(transfer.reference),
            pending,
            failure_reason: if success { None } else { transfer.failure_reason },
        })
    }

    async fn query_status(&self, provider_tx_id: &str) -> PaymentResult<StatusResponse> {
        let raw: PaystackEnvelope<PaystackVerifyData> = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/transaction/verify/{}", provider_tx_id)),
                self.auth(),
                None,
                &[],
            )
            .await?;
        let data = Self::ensure_ok(raw)?;
        Ok(StatusResponse {
            outcome: Self::outcome(&data.status, data.gateway_response),
            provider_tx_id: provider_tx_id.to_string(),
            provider_data: Some(serde_json::json!({ "channel": data.channel })),
        })
    }

    fn verify_callback(&self, callback: &RawCallback) -> PaymentResult<()> {
        let secret = self
            .config
            .webhook_secret
            .as_deref()
            .unwrap_or(&self.config.secret_key);
        let signature = callback.header("x-paystack-signature").unwrap_or_default();
        if verify_hmac_sha512_hex(&callback.body, secret, signature) {
            Ok(())
        } else {
            Err(PaymentError::WebhookVerificationError {
                message: "invalid paystack signature".to_string(),
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
        let reference = data
            .get("reference")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let outcome = match event_type.as_str() {
            "charge.success" | "transfer.success" => ProviderOutcome::Succeeded,
            "charge.failed" | "transfer.failed" | "transfer.reversed" => ProviderOutcome::failed(
                data.get("gateway_response")
                    .or_else(|| data.get("reason"))
                    .and_then(|v| v.as_str())
                    .unwrap_or(event_type.as_str()),
            ),
            _ => ProviderOutcome::Pending,
        };

        Ok(CallbackOutcome {
            gateway: GatewayName::Paystack,
            event_type,
            provider_tx_id: reference,
            outcome,
            payload: parsed,
            signed_reference: None,
        })
    }
}

#[derive(Debug, Deserialize)]
struct PaystackEnvelope<T> {
    status: bool,
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct PaystackInitializeData {
    authorization_url: String,
    access_code: String,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct PaystackVerifyData {
    status: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    gateway_response: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaystackRefundData {
    id: u64,
    status: String,
}

#[derive(Debug, Deserialize)]
struct PaystackRecipientData {
    recipient_code: String,
}

#[derive(Debug, Deserialize)]
struct PaystackTransferData {
    reference: String,
    status: String,
    #[serde(default)]
    failure_reason: Option<String>,
}
