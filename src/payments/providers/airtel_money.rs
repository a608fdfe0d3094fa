use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::providers::{env_or, env_required, env_timeout, expires_in_secs, AccessTokenCache};
use crate::payments::types::{
    CallbackOutcome, CaptureResponse, CountryPolicy, GatewayName, InitiateRequest,
    InitiateResponse, PaymentKind, PayoutRequest, PayoutResponse, ProviderOutcome, RawCallback,
    RefundRequest, RefundResponse, SettlementMode, StatusResponse,
};
use crate::payments::utils::{verify_hmac_sha256_base64, Auth, PaymentHttpClient};
use crate::payments::validation::{ensure_country, ensure_currency, national_number, normalize_msisdn};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct AirtelMoneyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub callback_secret: String,
    /// Encrypted disbursement PIN.
    pub disbursement_pin: Option<String>,
    /// Country and currency headers used when a lookup has no payer context.
    pub default_country: String,
    pub default_currency: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl AirtelMoneyConfig {
    pub fn from_env() -> PaymentResult<Self> {
        Ok(Self {
            client_id: env_required("AIRTEL_CLIENT_ID")?,
            client_secret: env_required("AIRTEL_CLIENT_SECRET")?,
            callback_secret: env_required("AIRTEL_CALLBACK_SECRET")?,
            disbursement_pin: std::env::var("AIRTEL_DISBURSEMENT_PIN").ok(),
            default_country: env_or("AIRTEL_DEFAULT_COUNTRY", "UG"),
            default_currency: env_or("AIRTEL_DEFAULT_CURRENCY", "UGX"),
            base_url: env_or("AIRTEL_BASE_URL", "https://openapiuat.airtel.africa"),
            timeout_secs: env_timeout("AIRTEL_TIMEOUT_SECS"),
        })
    }
}

/// USSD push collection. Transaction ids are our ledger payment ids.
pub struct AirtelMoneyGateway {
    config: AirtelMoneyConfig,
    http: PaymentHttpClient,
    token: AccessTokenCache,
}

impl AirtelMoneyGateway {
    pub fn new(config: AirtelMoneyConfig) -> PaymentResult<Self> {
        let http =
            PaymentHttpClient::new("airtel_money", Duration::from_secs(config.timeout_secs))?;
        Ok(Self {
            config,
            http,
            token: AccessTokenCache::default(),
        })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(AirtelMoneyConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn access_token(&self) -> PaymentResult<String> {
        self.token
            .get_or_fetch(|| async move {
                let payload = serde_json::json!({
                    "client_id": self.config.client_id,
                    "client_secret": self.config.client_secret,
                    "grant_type": "client_credentials",
                });
                let raw: JsonValue = self
                    .http
                    .request_json(
                        reqwest::Method::POST,
                        &self.endpoint("/auth/oauth2/token"),
                        Auth::None,
                        Some(&payload),
                        &[],
                    )
                    .await?;
                let token = raw
                    .get("access_token")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        PaymentError::provider("airtel_money", "missing access_token", false)
                    })?
                    .to_string();
                Ok((token, expires_in_secs(&raw["expires_in"])))
            })
            .await
    }

    async fn call(
        &self,
        method: reqwest::Method,
        path: &str,
        country: &str,
        currency: &str,
        body: Option<&JsonValue>,
    ) -> PaymentResult<JsonValue> {
        let token = self.access_token().await?;
        let response: JsonValue = self
            .http
            .request_json(
                method,
                &self.endpoint(path),
                Auth::Bearer(&token),
                body,
                &[("X-Country", country), ("X-Currency", currency)],
            )
            .await?;
        if response.pointer("/status/success").and_then(|v| v.as_bool()) == Some(false) {
            let message = response
                .pointer("/status/message")
                .and_then(|v| v.as_str())
                .unwrap_or("airtel request rejected")
                .to_string();
            return Err(PaymentError::PaymentDeclinedError {
                message,
                provider_code: response
                    .pointer("/status/response_code")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
            });
        }
        Ok(response)
    }

    fn status_outcome(code: Option<&str>, message: Option<&str>) -> ProviderOutcome {
        match code {
            Some("TS") => ProviderOutcome::Succeeded,
            Some("TF") | Some("TE") => {
                ProviderOutcome::failed(message.unwrap_or("airtel transaction failed"))
            }
            _ => ProviderOutcome::Pending,
        }
    }

    async fn enquiry(&self, provider_tx_id: &str) -> PaymentResult<JsonValue> {
        self.call(
            reqwest::Method::GET,
            &format!("/standard/v1/payments/{}", provider_tx_id),
            &self.config.default_country,
            &self.config.default_currency,
            None,
        )
        .await
    }
}

#[async_trait]
impl PaymentGateway for AirtelMoneyGateway {
    fn name(&self) -> GatewayName {
        GatewayName::AirtelMoney
    }

    fn settlement_mode(&self) -> SettlementMode {
        SettlementMode::Poll
    }

    fn country_policy(&self) -> CountryPolicy {
        CountryPolicy::Allow(&["UG", "KE", "TZ", "RW", "ZM", "MW", "CD", "CG", "MG", "NG"])
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &["UGX", "KES", "TZS", "RWF", "ZMW", "MWK", "CDF", "XAF", "MGA", "NGN", "USD"]
    }

    async fn initiate(&self, request: InitiateRequest) -> PaymentResult<InitiateResponse> {
        request.amount.validate_positive("amount")?;
        let country = ensure_country(self.name(), self.country_policy(), &request.details)?;
        ensure_currency(self.name(), self.supported_currencies(), &request.amount.currency)?;
        let msisdn = normalize_msisdn(&request.details.require_phone()?, &country)?;
        let transaction_id = request.payment_id.to_string();

        let payload = serde_json::json!({
            "reference": "Investment funding",
            "subscriber": {
                "country": country,
                "currency": request.amount.currency,
                "msisdn": national_number(&msisdn, &country),
            },
            "transaction": {
                "amount": request.amount.whole_units()?,
                "country": country,
                "currency": request.amount.currency,
                "id": transaction_id,
            },
        });
        let response = self
            .call(
                reqwest::Method::POST,
                "/merchant/v1/payments/",
                &country,
                &request.amount.currency,
                Some(&payload),
            )
            .await?;

        info!(transaction_id = %transaction_id, "airtel ussd push sent");

        Ok(InitiateResponse {
            accepted: true,
            provider_tx_id: Some(transaction_id),
            pending: true,
            provider_data: response.get("data").cloned(),
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
        let enquiry = self.enquiry(&request.original_tx_id).await?;
        let airtel_money_id = enquiry
            .pointer("/data/transaction/airtel_money_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                PaymentError::provider("airtel_money", "airtel_money_id missing for refund", false)
            })?
            .to_string();

        let payload = serde_json::json!({
            "transaction": { "airtel_money_id": airtel_money_id },
        });
        let response = self
            .call(
                reqwest::Method::POST,
                "/standard/v1/payments/refund",
                &self.config.default_country,
                &request.amount.currency,
                Some(&payload),
            )
            .await?;
        let status = response
            .pointer("/data/transaction/status")
            .and_then(|v| v.as_str());
        Ok(RefundResponse {
            success: status != Some("TF"),
            refund_tx_id: Some(airtel_money_id),
            pending: status != Some("TS"),
            failure_reason: None,
        })
    }

    async fn payout(&self, request: PayoutRequest) -> PaymentResult<PayoutResponse> {
        request.amount.validate_positive("amount")?;
        let country = ensure_country(self.name(), self.country_policy(), &request.details)?;
        let msisdn = normalize_msisdn(&request.details.require_phone()?, &country)?;
        let pin = self.config.disbursement_pin.as_deref().ok_or_else(|| {
            PaymentError::provider("airtel_money", "AIRTEL_DISBURSEMENT_PIN is not configured", false)
        })?;
        let transaction_id = request.payment_id.to_string();

        let payload = serde_json::json!({
            "payee": { "msisdn": national_number(&msisdn, &country) },
            "reference": request.narration.clone().unwrap_or_else(|| "Investment payout".to_string()),
            "pin": pin,
            "transaction": {
                "amount": request.amount.whole_units()?,
                "id": transaction_id,
            },
        });
        let response = self
            .call(
                reqwest::Method::POST,
                "/standard/v1/disbursements/",
                &country,
                &request.amount.currency,
                Some(&payload),
            )
            .await?;
        let status = response
            .pointer("/data/transaction/status")
            .and_then(|v| v.as_str());

        Ok(PayoutResponse {
            success: status != Some("TF"),
            provider_tx_id: Some(transaction_id),
            pending: status != Some("TS"),
            failure_reason: None,
        })
    }

    async fn query_status(&self, provider_tx_id: &str) -> PaymentResult<StatusResponse> {
        let response = self.enquiry(provider_tx_id).await?;
        let transaction = response
            .pointer("/data/transaction")
            .cloned()
            .unwrap_or_default();
        Ok(StatusResponse {
            outcome: Self::status_outcome(
                transaction.get("status").and_then(|v| v.as_str()),
                transaction.get("message").and_then(|v| v.as_str()),
            ),
            provider_tx_id: provider_tx_id.to_string(),
            provider_data: Some(transaction),
        })
    }

    /// Disbursements have their own enquiry. A refund is keyed by the
    /// original `airtel_money_id`, which has no enquiry of its own, so it
    /// stays pending until the callback or the poll budget ends it.
    async fn query_transfer_status(
        &self,
        kind: PaymentKind,
        provider_tx_id: &str,
    ) -> PaymentResult<StatusResponse> {
        if kind == PaymentKind::Refund {
            return Ok(StatusResponse {
                outcome: ProviderOutcome::Pending,
                provider_tx_id: provider_tx_id.to_string(),
                provider_data: None,
            });
        }
        let response = self
            .call(
                reqwest::Method::GET,
                &format!("/standard/v1/disbursements/{}", provider_tx_id),
                &self.config.default_country,
                &self.config.default_currency,
                None,
            )
            .await?;
        let transaction = response
            .pointer("/data/transaction")
            .cloned()
            .unwrap_or_default();
        Ok(StatusResponse {
            outcome: Self::status_outcome(
                transaction.get("status").and_then(|v| v.as_str()),
                transaction.get("message").and_then(|v| v.as_str()),
            ),
            provider_tx_id: provider_tx_id.to_string(),
            provider_data: Some(transaction),
        })
    }

    fn verify_callback(&self, callback: &RawCallback) -> PaymentResult<()> {
        let signature = callback.header("x-signature").unwrap_or_default();
        if verify_hmac_sha256_base64(&callback.body, &self.config.callback_secret, signature) {
            Ok(())
        } else {
            Err(PaymentError::WebhookVerificationError {
                message: "invalid airtel callback signature".to_string(),
            })
        }
    }

    fn decode_callback(&self, callback: &RawCallback) -> PaymentResult<CallbackOutcome> {
        let parsed = callback.json()?;
        let transaction = parsed.get("transaction").cloned().unwrap_or_default();
        Ok(CallbackOutcome {
            gateway: GatewayName::AirtelMoney,
            event_type: "transaction".to_string(),
            provider_tx_id: transaction
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            outcome: Self::status_outcome(
                transaction.get("status_code").and_then(|v| v.as_str()),
                transaction.get("message").and_then(|v| v.as_str()),
            ),
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
    use base64::Engine;

    fn gateway() -> AirtelMoneyGateway {
        AirtelMoneyGateway::new(AirtelMoneyConfig {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            callback_secret: "airtel_cb".to_string(),
            disbursement_pin: None,
            default_country: "UG".to_string(),
            default_currency: "UGX".to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 5,
        })
        .expect("gateway init should succeed")
    }

    fn signed(body: &[u8]) -> RawCallback {
        let sig = base64::engine::general_purpose::STANDARD
            .encode(hmac_sha256("airtel_cb", body).unwrap());
        RawCallback::new(body.to_vec()).with_header("X-Signature", sig)
    }

    #[test]
    fn successful_callback() {
        let body = br#"{"transaction":{"id":"p-3","message":"Paid","status_code":"TS","airtel_money_id":"MP1"}}"#;
        let outcome = gateway().parse_callback(&signed(body)).expect("valid callback");
        assert_eq!(outcome.provider_tx_id, "p-3");
        assert_eq!(outcome.outcome, ProviderOutcome::Succeeded);
    }

    #[tokio::test]
    async fn refund_status_waits_for_callback() {
        let status = gateway()
            .query_transfer_status(PaymentKind::Refund, "MP1")
            .await
            .expect("no network call for refunds");
        assert_eq!(status.outcome, ProviderOutcome::Pending);
        assert!(gateway().polls_transfers());
    }

    #[test]
    fn ambiguous_status_stays_pending() {
        assert_eq!(
            AirtelMoneyGateway::status_outcome(Some("TA"), None),
            ProviderOutcome::Pending
        );
        assert_eq!(
            AirtelMoneyGateway::status_outcome(Some("TF"), Some("Insufficient balance"))
                .failure_reason(),
            Some("Insufficient balance")
        );
    }

    #[test]
    fn tampered_callback_is_rejected() {
        let mut raw = signed(br#"{"transaction":{"id":"p-3","status_code":"TF"}}"#);
        raw.body = br#"{"transaction":{"id":"p-3","status_code":"TS"}}"#.to_vec();
        assert!(gateway().parse_callback(&raw).is_err());
    }
}
