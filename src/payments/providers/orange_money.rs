use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::providers::{env_or, env_required, env_timeout, expires_in_secs, AccessTokenCache};
use crate::payments::types::{
    CallbackOutcome, CaptureResponse, CountryPolicy, GatewayName, InitiateRequest,
    InitiateResponse, PayoutRequest, PayoutResponse, ProviderOutcome, RawCallback, RefundRequest,
    RefundResponse, SettlementMode, StatusResponse,
};
use crate::payments::utils::{signed_callback_url, verify_callback_token, Auth, PaymentHttpClient};
use crate::payments::validation::{ensure_country, ensure_currency};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct OrangeMoneyConfig {
    pub client_id: String,
    pub client_secret: String,
    pub merchant_key: String,
    pub callback_secret: String,
    /// Country segment of the web payment path, e.g. `dev`, `ci`, `sn`.
    pub country_path: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl OrangeMoneyConfig {
    pub fn from_env() -> PaymentResult<Self> {
        Ok(Self {
            client_id: env_required("ORANGE_CLIENT_ID")?,
            client_secret: env_required("ORANGE_CLIENT_SECRET")?,
            merchant_key: env_required("ORANGE_MERCHANT_KEY")?,
            callback_secret: env_required("ORANGE_CALLBACK_SECRET")?,
            country_path: env_or("ORANGE_COUNTRY_PATH", "dev"),
            base_url: env_or("ORANGE_BASE_URL", "https://api.orange.com"),
            timeout_secs: env_timeout("ORANGE_TIMEOUT_SECS"),
        })
    }
}

#[derive(Debug, Clone)]
struct OpenOrder {
    pay_token: String,
    amount: i64,
}

/// Orange Money Web Payment. The order id is the ledger payment id.
///
/// The status endpoint needs the `pay_token` issued at initiation, which is
/// only held in memory: after a restart a resumed poll cannot query the
/// order and the payment settles through the callback or the poll timeout.
pub struct OrangeMoneyGateway {
    config: OrangeMoneyConfig,
    http: PaymentHttpClient,
    token: AccessTokenCache,
    open_orders: Mutex<HashMap<String, OpenOrder>>,
}

impl OrangeMoneyGateway {
    pub fn new(config: OrangeMoneyConfig) -> PaymentResult<Self> {
        let http =
            PaymentHttpClient::new("orange_money", Duration::from_secs(config.timeout_secs))?;
        Ok(Self {
            config,
            http,
            token: AccessTokenCache::default(),
            open_orders: Mutex::new(HashMap::new()),
        })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(OrangeMoneyConfig::from_env()?)
    }

    fn webpay_url(&self, operation: &str) -> String {
        format!(
            "{}/orange-money-webpay/{}/v1/{}",
            self.config.base_url, self.config.country_path, operation
        )
    }

    async fn access_token(&self) -> PaymentResult<String> {
        self.token
            .get_or_fetch(|| async move {
                let raw: JsonValue = self
                    .http
                    .request_form(
                        reqwest::Method::POST,
                        &format!("{}/oauth/v3/token", self.config.base_url),
                        Auth::Basic(&self.config.client_id, &self.config.client_secret),
                        &[("grant_type", "client_credentials")],
                        &[],
                    )
                    .await?;
                let token = raw
                    .get("access_token")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        PaymentError::provider("orange_money", "missing access_token", false)
                    })?
                    .to_string();
                Ok((token, expires_in_secs(&raw["expires_in"])))
            })
            .await
    }

    fn status_outcome(status: Option<&str>) -> ProviderOutcome {
        match status.map(|s| s.to_ascii_uppercase()).as_deref() {
            Some("SUCCESS") => ProviderOutcome::Succeeded,
            Some("FAILED") => ProviderOutcome::failed("orange money payment failed"),
            Some("EXPIRED") => ProviderOutcome::failed("orange money payment expired"),
            _ => ProviderOutcome::Pending,
        }
    }

    fn unsupported(operation: &str) -> PaymentError {
        PaymentError::validation(
            format!(
                "orange money does not support {}; choose another payment method",
                operation
            ),
            "gateway",
        )
    }
}

#[async_trait]
impl PaymentGateway for OrangeMoneyGateway {
    fn name(&self) -> GatewayName {
        GatewayName::OrangeMoney
    }

    fn settlement_mode(&self) -> SettlementMode {
        SettlementMode::Poll
    }

    fn country_policy(&self) -> CountryPolicy {
        CountryPolicy::Allow(&["CI", "SN", "ML", "CM", "GN", "BF", "MG", "CD", "BW", "SL", "LR"])
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &["XOF", "XAF", "GNF", "MGA", "CDF", "BWP", "SLE", "LRD", "OUV"]
    }

    /// The web payment API only collects.
    fn supports_refunds(&self) -> bool {
        false
    }

    fn supports_payouts(&self) -> bool {
        false
    }

    async fn initiate(&self, request: InitiateRequest) -> PaymentResult<InitiateResponse> {
        request.amount.validate_positive("amount")?;
        ensure_country(self.name(), self.country_policy(), &request.details)?;
        ensure_currency(self.name(), self.supported_currencies(), &request.amount.currency)?;
        let return_url = request
            .details
            .return_url
            .clone()
            .ok_or_else(|| PaymentError::validation("return_url is required for orange money", "return_url"))?;

        let order_id = request.payment_id.to_string();
        let amount = request.amount.whole_units()?;
        let notif_url =
            signed_callback_url(&request.callback_url, &self.config.callback_secret, &order_id);
        let payload = serde_json::json!({
            "merchant_key": self.config.merchant_key,
            "currency": request.amount.currency,
            "order_id": order_id,
            "amount": amount,
            "return_url": return_url,
            "cancel_url": return_url,
            "notif_url": notif_url,
            "lang": "fr",
            "reference": "Investment funding",
        });

        let token = self.access_token().await?;
        let response: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.webpay_url("webpayment"),
                Auth::Bearer(&token),
                Some(&payload),
                &[],
            )
            .await?;

        let pay_token = response
            .get("pay_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PaymentError::provider("orange_money", "missing pay_token", false))?
            .to_string();
        self.open_orders
            .lock()
            .await
            .insert(order_id.clone(), OpenOrder { pay_token, amount });

        info!(order_id = %order_id, "orange money web payment created");

        Ok(InitiateResponse {
            accepted: true,
            provider_tx_id: Some(order_id),
            pending: true,
            redirect_url: response
                .get("payment_url")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
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

    async fn refund(&self, _request: RefundRequest) -> PaymentResult<RefundResponse> {
        Err(Self::unsupported("refunds"))
    }

    async fn payout(&self, _request: PayoutRequest) -> PaymentResult<PayoutResponse> {
        Err(Self::unsupported("payouts"))
    }

    async fn query_status(&self, provider_tx_id: &str) -> PaymentResult<StatusResponse> {
        let order = self
            .open_orders
            .lock()
            .await
            .get(provider_tx_id)
            .cloned()
            .ok_or_else(|| {
                warn!(order_id = %provider_tx_id, "orange money order has no pay_token in memory");
                PaymentError::provider("orange_money", "unknown order, awaiting callback", false)
            })?;

        let payload = serde_json::json!({
            "order_id": provider_tx_id,
            "amount": order.amount,
            "pay_token": order.pay_token,
        });
        let token = self.access_token().await?;
        let response: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.webpay_url("transactionstatus"),
                Auth::Bearer(&token),
                Some(&payload),
                &[],
            )
            .await?;

        let outcome = Self::status_outcome(response.get("status").and_then(|v| v.as_str()));
        if outcome.is_definitive() {
            self.open_orders.lock().await.remove(provider_tx_id);
        }
        Ok(StatusResponse {
            outcome,
            provider_tx_id: provider_tx_id.to_string(),
            provider_data: Some(response),
        })
    }

    fn verify_callback(&self, callback: &RawCallback) -> PaymentResult<()> {
        let reference = callback.query_param("ref").unwrap_or_default();
        let token = callback.query_param("token").unwrap_or_default();
        if verify_callback_token(&self.config.callback_secret, reference, token) {
            Ok(())
        } else {
            Err(PaymentError::WebhookVerificationError {
                message: "invalid orange money callback token".to_string(),
            })
        }
    }

    fn decode_callback(&self, callback: &RawCallback) -> PaymentResult<CallbackOutcome> {
        let parsed = callback.json()?;
        Ok(CallbackOutcome {
            gateway: GatewayName::OrangeMoney,
            event_type: "webpayment".to_string(),
            // The notification body carries no order id; the signed URL does.
            provider_tx_id: callback.query_param("ref").unwrap_or_default().to_string(),
            outcome: Self::status_outcome(parsed.get("status").and_then(|v| v.as_str())),
            payload: parsed,
            signed_reference: callback.query_param("ref").map(str::to_string),
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
    use uuid::Uuid;

    fn gateway() -> OrangeMoneyGateway {
        OrangeMoneyGateway::new(OrangeMoneyConfig {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            merchant_key: "mk".to_string(),
            callback_secret: "orange_cb".to_string(),
            country_path: "dev".to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 5,
        })
        .expect("gateway init should succeed")
    }

    #[test]
    fn callback_reference_comes_from_signed_url() {
        let raw = RawCallback::new(br#"{"status":"SUCCESS","notif_token":"nt","txnid":"MP1"}"#.to_vec())
            .with_query("ref", "order-7")
            .with_query("token", callback_token("orange_cb", "order-7"));
        let outcome = gateway().parse_callback(&raw).expect("valid callback");
        assert_eq!(outcome.provider_tx_id, "order-7");
        assert_eq!(outcome.outcome, ProviderOutcome::Succeeded);
    }

    #[test]
    fn forged_reference_is_rejected() {
        let raw = RawCallback::new(br#"{"status":"SUCCESS"}"#.to_vec())
            .with_query("ref", "order-8")
            .with_query("token", callback_token("orange_cb", "order-7"));
        assert!(gateway().parse_callback(&raw).is_err());
    }

    #[tokio::test]
    async fn unknown_order_status_is_an_error() {
        let err = gateway().query_status("order-unknown").await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn initiate_requires_return_url() {
        let err = gateway()
            .initiate(InitiateRequest {
                payment_id: Uuid::new_v4(),
                amount: Money::new(BigDecimal::from(5000), "XOF"),
                details: PaymentDetails {
                    country: Some("CI".to_string()),
                    ..Default::default()
                },
                callback_url: "https://api.example.com/payments/callback/orange_money".to_string(),
            })
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn payouts_are_not_offered() {
        let err = gateway()
            .payout(PayoutRequest {
                payment_id: Uuid::new_v4(),
                amount: Money::new(BigDecimal::from(5000), "XOF"),
                details: PaymentDetails::default(),
                callback_url: String::new(),
                narration: None,
            })
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(!gateway().supports_payouts());
        assert!(!gateway().supports_refunds());
    }
}
