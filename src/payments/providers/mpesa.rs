use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::providers::{env_or, env_required, env_timeout, expires_in_secs, AccessTokenCache};
use crate::payments::types::{
    CallbackOutcome, CaptureResponse, CountryPolicy, GatewayName, InitiateRequest,
    InitiateResponse, PayoutRequest, PayoutResponse, ProviderOutcome, RawCallback, RefundRequest,
    RefundResponse, SettlementMode, StatusResponse,
};
use crate::payments::utils::{signed_callback_url, verify_callback_token, Auth, PaymentHttpClient};
use crate::payments::validation::{ensure_country, ensure_currency, normalize_msisdn};
use async_trait::async_trait;
use base64::Engine;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct MpesaConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub passkey: String,
    pub shortcode: String,
    pub initiator_name: String,
    pub security_credential: String,
    /// Signs the per-payment callback URLs; Daraja does not sign callbacks.
    pub callback_secret: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl MpesaConfig {
    pub fn from_env() -> PaymentResult<Self> {
        Ok(Self {
            consumer_key: env_required("MPESA_CONSUMER_KEY")?,
            consumer_secret: env_required("MPESA_CONSUMER_SECRET")?,
            passkey: env_required("MPESA_PASSKEY")?,
            shortcode: env_or("MPESA_SHORTCODE", "174379"),
            initiator_name: env_or("MPESA_INITIATOR_NAME", "testapi"),
            security_credential: std::env::var("MPESA_SECURITY_CREDENTIAL").unwrap_or_default(),
            callback_secret: env_required("MPESA_CALLBACK_SECRET")?,
            base_url: env_or("MPESA_BASE_URL", "https://sandbox.safaricom.co.ke"),
            timeout_secs: env_timeout("MPESA_TIMEOUT_SECS"),
        })
    }
}

/// Lipa na M-Pesa STK push. The outcome is polled through the STK query
/// endpoint; the result callback is accepted as well.
pub struct MpesaGateway {
    config: MpesaConfig,
    http: PaymentHttpClient,
    token: AccessTokenCache,
}

impl MpesaGateway {
    pub fn new(config: MpesaConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new("mpesa", Duration::from_secs(config.timeout_secs))?;
        Ok(Self {
            config,
            http,
            token: AccessTokenCache::default(),
        })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(MpesaConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn access_token(&self) -> PaymentResult<String> {
        self.token
            .get_or_fetch(|| async move {
                let raw: JsonValue = self
                    .http
                    .request_json(
                        reqwest::Method::GET,
                        &self.endpoint("/oauth/v1/generate?grant_type=client_credentials"),
                        Auth::Basic(&self.config.consumer_key, &self.config.consumer_secret),
                        None,
                        &[],
                    )
                    .await?;
                let token = raw
                    .get("access_token")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| PaymentError::provider("mpesa", "missing access_token", false))?
                    .to_string();
                Ok((token, expires_in_secs(&raw["expires_in"])))
            })
            .await
    }

    async fn post(&self, path: &str, body: &JsonValue) -> PaymentResult<JsonValue> {
        let token = self.access_token().await?;
        self.http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(path),
                Auth::Bearer(&token),
                Some(body),
                &[],
            )
            .await
    }

    /// `(password, timestamp)` for STK requests.
    fn stk_password(&self) -> (String, String) {
        let timestamp = chrono::Utc::now().format("%Y%m%d%H%M%S").to_string();
        let raw = format!("{}{}{}", self.config.shortcode, self.config.passkey, timestamp);
        (
            base64::engine::general_purpose::STANDARD.encode(raw),
            timestamp,
        )
    }

    fn result_outcome(code: &JsonValue, description: Option<&str>) -> ProviderOutcome {
        let code = code
            .as_i64()
            .or_else(|| code.as_str().and_then(|s| s.parse::<i64>().ok()));
        match code {
            Some(0) => ProviderOutcome::Succeeded,
            Some(_) => ProviderOutcome::failed(description.unwrap_or("mpesa transaction failed")),
            None => ProviderOutcome::Pending,
        }
    }

    fn ensure_accepted(response: &JsonValue) -> PaymentResult<()> {
        match response.get("ResponseCode").and_then(|v| v.as_str()) {
            Some("0") => Ok(()),
            _ => Err(PaymentError::PaymentDeclinedError {
                message: response
                    .get("ResponseDescription")
                    .or_else(|| response.get("errorMessage"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("mpesa request rejected")
                    .to_string(),
                provider_code: response
                    .get("ResponseCode")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
            }),
        }
    }
}

#[async_trait]
impl PaymentGateway for MpesaGateway {
    fn name(&self) -> GatewayName {
        GatewayName::Mpesa
    }

    fn settlement_mode(&self) -> SettlementMode {
        SettlementMode::Poll
    }

    fn country_policy(&self) -> CountryPolicy {
        CountryPolicy::Allow(&["KE"])
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &["KES"]
    }

    /// B2C and reversal results arrive on the signed result URL, or on the
    /// queue-timeout URL when Daraja gives up.
    fn polls_transfers(&self) -> bool {
        false
    }

    async fn initiate(&self, request: InitiateRequest) -> PaymentResult<InitiateResponse> {
        request.amount.validate_positive("amount")?;
        let country = ensure_country(self.name(), self.country_policy(), &request.details)?;
        ensure_currency(self.name(), self.supported_currencies(), &request.amount.currency)?;
        let msisdn = normalize_msisdn(&request.details.require_phone()?, &country)?;
        let reference = request.payment_id.to_string();
        let (password, timestamp) = self.stk_password();

        let payload = serde_json::json!({
            "BusinessShortCode": self.config.shortcode,
            "Password": password,
            "Timestamp": timestamp,
            "TransactionType": "CustomerPayBillOnline",
            "Amount": request.amount.whole_units()?,
            "PartyA": msisdn,
            "PartyB": self.config.shortcode,
            "PhoneNumber": msisdn,
            "CallBackURL": signed_callback_url(&request.callback_url, &self.config.callback_secret, &reference),
            "AccountReference": reference.chars().take(12).collect::<String>(),
            "TransactionDesc": "Investment",
        });

        let response = self.post("/mpesa/stkpush/v1/processrequest", &payload).await?;
        Self::ensure_accepted(&response)?;
        let checkout_id = response
            .get("CheckoutRequestID")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PaymentError::provider("mpesa", "CheckoutRequestID missing", false))?
            .to_string();

        info!(checkout_request_id = %checkout_id, "mpesa stk push sent");

        Ok(InitiateResponse {
            accepted: true,
            provider_tx_id: Some(checkout_id),
            pending: true,
            provider_data: Some(response),
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

    /// Transaction reversal; completes asynchronously via the result URL.
    async fn refund(&self, request: RefundRequest) -> PaymentResult<RefundResponse> {
        request.amount.validate_positive("amount")?;
        let reference = request.payment_id.to_string();
        let result_url =
            signed_callback_url(&request.callback_url, &self.config.callback_secret, &reference);
        let payload = serde_json::json!({
            "Initiator": self.config.initiator_name,
            "SecurityCredential": self.config.security_credential,
            "CommandID": "TransactionReversal",
            "TransactionID": request.original_tx_id,
            "Amount": request.amount.whole_units()?,
            "ReceiverParty": self.config.shortcode,
            "RecieverIdentifierType": "11",
            "ResultURL": result_url,
            "QueueTimeOutURL": result_url,
            "Remarks": request.reason.clone().unwrap_or_else(|| "Investment cancelled".to_string()),
        });
        let response = self.post("/mpesa/reversal/v1/request", &payload).await?;
        Self::ensure_accepted(&response)?;
        Ok(RefundResponse {
            success: true,
            refund_tx_id: response
                .get("ConversationID")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            pending: true,
            failure_reason: None,
        })
    }

    /// B2C business payment to the investor's handset.
    async fn payout(&self, request: PayoutRequest) -> PaymentResult<PayoutResponse> {
        request.amount.validate_positive("amount")?;
        let country = ensure_country(self.name(), self.country_policy(), &request.details)?;
        let msisdn = normalize_msisdn(&request.details.require_phone()?, &country)?;
        let result_url = signed_callback_url(
            &request.callback_url,
            &self.config.callback_secret,
            &request.payment_id.to_string(),
        );

        let payload = serde_json::json!({
            "InitiatorName": self.config.initiator_name,
            "SecurityCredential": self.config.security_credential,
            "CommandID": "BusinessPayment",
            "Amount": request.amount.whole_units()?,
            "PartyA": self.config.shortcode,
            "PartyB": msisdn,
            "Remarks": request.narration.clone().unwrap_or_else(|| "Investment payout".to_string()),
            "QueueTimeOutURL": result_url,
            "ResultURL": result_url,
            "Occasion": request.payment_id.to_string(),
        });
        let response = self.post("/mpesa/b2c/v1/paymentrequest", &payload).await?;
        Self::ensure_accepted(&response)?;

        Ok(PayoutResponse {
            success: true,
            provider_tx_id: response
                .get("ConversationID")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            pending: true,
            failure_reason: None,
        })
    }

    async fn query_status(&self, provider_tx_id: &str) -> PaymentResult<StatusResponse> {
        let (password, timestamp) = self.stk_password();
        let payload = serde_json::json!({
            "BusinessShortCode": self.config.shortcode,
            "Password": password,
            "Timestamp": timestamp,
            "CheckoutRequestID": provider_tx_id,
        });

        let outcome = match self.post("/mpesa/stkpushquery/v1/query", &payload).await {
            Ok(response) => Self::result_outcome(
                response.get("ResultCode").unwrap_or(&JsonValue::Null),
                response.get("ResultDesc").and_then(|v| v.as_str()),
            ),
            // Daraja answers "transaction is being processed" with an error status.
            Err(PaymentError::ProviderError { message, .. })
                if message.contains("being processed") =>
            {
                ProviderOutcome::Pending
            }
            Err(e) => return Err(e),
        };

        Ok(StatusResponse {
            outcome,
            provider_tx_id: provider_tx_id.to_string(),
            provider_data: None,
        })
    }

    fn verify_callback(&self, callback: &RawCallback) -> PaymentResult<()> {
        let reference = callback.query_param("ref").unwrap_or_default();
        let token = callback.query_param("token").unwrap_or_default();
        if verify_callback_token(&self.config.callback_secret, reference, token) {
            Ok(())
        } else {
            warn!("mpesa callback with invalid token");
            Err(PaymentError::WebhookVerificationError {
                message: "invalid mpesa callback token".to_string(),
            })
        }
    }

    fn decode_callback(&self, callback: &RawCallback) -> PaymentResult<CallbackOutcome> {
        let parsed = callback.json()?;
        // The token signs `ref` only; the body ids are bound to it downstream.
        let signed_reference = callback.query_param("ref").map(str::to_string);

        if let Some(stk) = parsed.pointer("/Body/stkCallback") {
            return Ok(CallbackOutcome {
                gateway: GatewayName::Mpesa,
                event_type: "stk_callback".to_string(),
                provider_tx_id: stk
                    .get("CheckoutRequestID")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                outcome: Self::result_outcome(
                    stk.get("ResultCode").unwrap_or(&JsonValue::Null),
                    stk.get("ResultDesc").and_then(|v| v.as_str()),
                ),
                payload: parsed.clone(),
                signed_reference,
            });
        }

        let result = parsed.get("Result").cloned().unwrap_or_default();
        Ok(CallbackOutcome {
            gateway: GatewayName::Mpesa,
            event_type: "result".to_string(),
            provider_tx_id: result
                .get("ConversationID")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            outcome: Self::result_outcome(
                result.get("ResultCode").unwrap_or(&JsonValue::Null),
                result.get("ResultDesc").and_then(|v| v.as_str()),
            ),
            payload: parsed,
            signed_reference,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::provider::ParseCallback;
    use crate::payments::types::{Money, PaymentDetails};
    use crate::payments::utils::callback_token;
    use bigdecimal::BigDecimal;

    fn gateway() -> MpesaGateway {
        MpesaGateway::new(MpesaConfig {
            consumer_key: "ck".to_string(),
            consumer_secret: "cs".to_string(),
            passkey: "pk".to_string(),
            shortcode: "174379".to_string(),
            initiator_name: "testapi".to_string(),
            security_credential: "cred".to_string(),
            callback_secret: "cb_secret".to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 5,
        })
        .expect("gateway init should succeed")
    }

    #[test]
    fn stk_callback_with_valid_token() {
        let body = br#"{"Body":{"stkCallback":{"MerchantRequestID":"m1","CheckoutRequestID":"ws_CO_1","ResultCode":1032,"ResultDesc":"Request cancelled by user"}}}"#;
        let raw = RawCallback::new(body.to_vec())
            .with_query("ref", "p-1")
            .with_query("token", callback_token("cb_secret", "p-1"));
        let outcome = gateway().parse_callback(&raw).expect("valid callback");
        assert_eq!(outcome.provider_tx_id, "ws_CO_1");
        assert_eq!(outcome.signed_reference.as_deref(), Some("p-1"));
        assert_eq!(outcome.outcome.failure_reason(), Some("Request cancelled by user"));
    }

    #[test]
    fn forged_callback_is_rejected() {
        let body = br#"{"Body":{"stkCallback":{"CheckoutRequestID":"ws_CO_1","ResultCode":0}}}"#;
        let raw = RawCallback::new(body.to_vec())
            .with_query("ref", "p-1")
            .with_query("token", "forged");
        assert!(gateway().parse_callback(&raw).is_err());
    }

    #[test]
    fn b2c_result_maps_conversation_id() {
        let body = br#"{"Result":{"ResultType":0,"ResultCode":0,"ResultDesc":"ok","ConversationID":"AG_1"}}"#;
        let raw = RawCallback::new(body.to_vec())
            .with_query("ref", "w-1")
            .with_query("token", callback_token("cb_secret", "w-1"));
        let outcome = gateway().parse_callback(&raw).expect("valid callback");
        assert_eq!(outcome.provider_tx_id, "AG_1");
        assert_eq!(outcome.outcome, ProviderOutcome::Succeeded);
    }

    #[tokio::test]
    async fn invalid_phone_fails_before_network() {
        let err = gateway()
            .initiate(InitiateRequest {
                payment_id: uuid::Uuid::new_v4(),
                amount: Money::new(BigDecimal::from(1300), "KES"),
                details: PaymentDetails {
                    phone: Some("12".to_string()),
                    country: Some("KE".to_string()),
                    ..Default::default()
                },
                callback_url: "https://api.example.com/payments/callback/mpesa".to_string(),
            })
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn non_kenyan_payers_are_unsupported() {
        let err = gateway()
            .initiate(InitiateRequest {
                payment_id: uuid::Uuid::new_v4(),
                amount: Money::new(BigDecimal::from(1300), "KES"),
                details: PaymentDetails {
                    phone: Some("+233241234567".to_string()),
                    country: Some("GH".to_string()),
                    ..Default::default()
                },
                callback_url: "https://api.example.com/payments/callback/mpesa".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::UnsupportedCountry { .. }));
    }
}
