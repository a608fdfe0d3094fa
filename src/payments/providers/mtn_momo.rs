use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::providers::{env_or, env_required, env_timeout, expires_in_secs, AccessTokenCache};
use crate::payments::types::{
    CallbackOutcome, CaptureResponse, CountryPolicy, GatewayName, InitiateRequest,
    InitiateResponse, PaymentKind, PayoutRequest, PayoutResponse, ProviderOutcome, RawCallback,
    RefundRequest, RefundResponse, SettlementMode, StatusResponse,
};
use crate::payments::utils::{signed_callback_url, verify_callback_token, Auth, PaymentHttpClient};
use crate::payments::validation::{ensure_country, ensure_currency, normalize_msisdn};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct MomoProductCredentials {
    pub subscription_key: String,
    pub api_user: String,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct MtnMomoConfig {
    pub collection: MomoProductCredentials,
    pub disbursement: Option<MomoProductCredentials>,
    pub target_environment: String,
    pub callback_secret: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl MtnMomoConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let disbursement = match std::env::var("MTN_MOMO_DISBURSEMENT_SUBSCRIPTION_KEY") {
            Ok(subscription_key) => Some(MomoProductCredentials {
                subscription_key,
                api_user: env_required("MTN_MOMO_DISBURSEMENT_API_USER")?,
                api_key: env_required("MTN_MOMO_DISBURSEMENT_API_KEY")?,
            }),
            Err(_) => None,
        };
        Ok(Self {
            collection: MomoProductCredentials {
                subscription_key: env_required("MTN_MOMO_COLLECTION_SUBSCRIPTION_KEY")?,
                api_user: env_required("MTN_MOMO_COLLECTION_API_USER")?,
                api_key: env_required("MTN_MOMO_COLLECTION_API_KEY")?,
            },
            disbursement,
            target_environment: env_or("MTN_MOMO_TARGET_ENVIRONMENT", "sandbox"),
            callback_secret: env_required("MTN_MOMO_CALLBACK_SECRET")?,
            base_url: env_or("MTN_MOMO_BASE_URL", "https://sandbox.momodeveloper.mtn.com"),
            timeout_secs: env_timeout("MTN_MOMO_TIMEOUT_SECS"),
        })
    }
}

#[derive(Clone, Copy)]
enum Product {
    Collection,
    Disbursement,
}

impl Product {
    fn path(&self) -> &'static str {
        match self {
            Product::Collection => "collection",
            Product::Disbursement => "disbursement",
        }
    }
}

/// MoMo Open API request-to-pay. The X-Reference-Id we assign is the ledger
/// payment id, which the status endpoint and callbacks key on.
pub struct MtnMomoGateway {
    config: MtnMomoConfig,
    http: PaymentHttpClient,
    collection_token: AccessTokenCache,
    disbursement_token: AccessTokenCache,
}

impl MtnMomoGateway {
    pub fn new(config: MtnMomoConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new("mtn_momo", Duration::from_secs(config.timeout_secs))?;
        Ok(Self {
            config,
            http,
            collection_token: AccessTokenCache::default(),
            disbursement_token: AccessTokenCache::default(),
        })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(MtnMomoConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn credentials(&self, product: Product) -> PaymentResult<&MomoProductCredentials> {
        match product {
            Product::Collection => Ok(&self.config.collection),
            Product::Disbursement => self.config.disbursement.as_ref().ok_or_else(|| {
                PaymentError::provider("mtn_momo", "disbursement product is not configured", false)
            }),
        }
    }

    async fn access_token(&self, product: Product) -> PaymentResult<String> {
        let credentials = self.credentials(product)?;
        let cache = match product {
            Product::Collection => &self.collection_token,
            Product::Disbursement => &self.disbursement_token,
        };
        cache
            .get_or_fetch(|| async move {
                let raw: JsonValue = self
                    .http
                    .request_json(
                        reqwest::Method::POST,
                        &self.endpoint(&format!("/{}/token/", product.path())),
                        Auth::Basic(&credentials.api_user, &credentials.api_key),
                        None,
                        &[("Ocp-Apim-Subscription-Key", credentials.subscription_key.as_str())],
                    )
                    .await?;
                let token = raw
                    .get("access_token")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| PaymentError::provider("mtn_momo", "missing access_token", false))?
                    .to_string();
                Ok((token, expires_in_secs(&raw["expires_in"])))
            })
            .await
    }

    /// Fire-and-accept request; MoMo replies `202 Accepted` with no body.
    async fn submit(
        &self,
        product: Product,
        path: &str,
        reference_id: &str,
        callback_url: Option<&str>,
        body: &JsonValue,
    ) -> PaymentResult<()> {
        let token = self.access_token(product).await?;
        let credentials = self.credentials(product)?;
        let mut headers = vec![
            ("X-Reference-Id", reference_id),
            ("X-Target-Environment", self.config.target_environment.as_str()),
            ("Ocp-Apim-Subscription-Key", credentials.subscription_key.as_str()),
        ];
        if let Some(url) = callback_url {
            headers.push(("X-Callback-Url", url));
        }
        self.http
            .request_accepted(
                reqwest::Method::POST,
                &self.endpoint(&format!("/{}/{}", product.path(), path)),
                Auth::Bearer(&token),
                Some(body),
                &headers,
            )
            .await
    }

    async fn fetch(&self, product: Product, path: &str) -> PaymentResult<JsonValue> {
        let token = self.access_token(product).await?;
        let credentials = self.credentials(product)?;
        self.http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/{}/{}", product.path(), path)),
                Auth::Bearer(&token),
                None,
                &[
                    ("X-Target-Environment", self.config.target_environment.as_str()),
                    ("Ocp-Apim-Subscription-Key", credentials.subscription_key.as_str()),
                ],
            )
            .await
    }

    fn status_outcome(body: &JsonValue) -> ProviderOutcome {
        match body.get("status").and_then(|v| v.as_str()) {
            Some("SUCCESSFUL") => ProviderOutcome::Succeeded,
            Some("FAILED") | Some("REJECTED") | Some("TIMEOUT") => {
                let reason = body
                    .get("reason")
                    .and_then(|r| r.as_str().or_else(|| r.get("code").and_then(|c| c.as_str())))
                    .unwrap_or("momo transaction failed");
                ProviderOutcome::failed(reason)
            }
            _ => ProviderOutcome::Pending,
        }
    }
}

#[async_trait]
impl PaymentGateway for MtnMomoGateway {
    fn name(&self) -> GatewayName {
        GatewayName::MtnMomo
    }

    fn settlement_mode(&self) -> SettlementMode {
        SettlementMode::Poll
    }

    fn country_policy(&self) -> CountryPolicy {
        CountryPolicy::Allow(&["UG", "GH", "CM", "CI", "RW", "ZM", "BJ", "CG", "GN"])
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &["UGX", "GHS", "XAF", "XOF", "RWF", "ZMW", "GNF", "EUR"]
    }

    async fn initiate(&self, request: InitiateRequest) -> PaymentResult<InitiateResponse> {
        request.amount.validate_positive("amount")?;
        let country = ensure_country(self.name(), self.country_policy(), &request.details)?;
        ensure_currency(self.name(), self.supported_currencies(), &request.amount.currency)?;
        let msisdn = normalize_msisdn(&request.details.require_phone()?, &country)?;
        let reference = request.payment_id.to_string();
        let callback_url =
            signed_callback_url(&request.callback_url, &self.config.callback_secret, &reference);

        let payload = serde_json::json!({
            "amount": request.amount.whole_units()?.to_string(),
            "currency": request.amount.currency,
            "externalId": reference,
            "payer": { "partyIdType": "MSISDN", "partyId": msisdn },
            "payerMessage": "Investment funding",
            "payeeNote": reference,
        });
        self.submit(
            Product::Collection,
            "v1_0/requesttopay",
            &reference,
            Some(&callback_url),
            &payload,
        )
        .await?;

        info!(reference_id = %reference, "momo request-to-pay submitted");

        Ok(InitiateResponse {
            accepted: true,
            provider_tx_id: Some(reference),
            pending: true,
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
        let refund_reference = request.payment_id.to_string();
        let callback_url =
            signed_callback_url(&request.callback_url, &self.config.callback_secret, &refund_reference);
        let payload = serde_json::json!({
            "amount": request.amount.whole_units()?.to_string(),
            "currency": request.amount.currency,
            "externalId": refund_reference,
            "payerMessage": request.reason.clone().unwrap_or_else(|| "Refund".to_string()),
            "payeeNote": refund_reference,
            "referenceIdToRefund": request.original_tx_id,
        });
        self.submit(
            Product::Disbursement,
            "v1_0/refund",
            &refund_reference,
            Some(&callback_url),
            &payload,
        )
        .await?;
        Ok(RefundResponse {
            success: true,
            refund_tx_id: Some(refund_reference),
            pending: true,
            failure_reason: None,
        })
    }

    async fn payout(&self, request: PayoutRequest) -> PaymentResult<PayoutResponse> {
        request.amount.validate_positive("amount")?;
        let country = ensure_country(self.name(), self.country_policy(), &request.details)?;
        let msisdn = normalize_msisdn(&request.details.require_phone()?, &country)?;
        let reference = request.payment_id.to_string();
        let callback_url =
            signed_callback_url(&request.callback_url, &self.config.callback_secret, &reference);

        let payload = serde_json::json!({
            "amount": request.amount.whole_units()?.to_string(),
            "currency": request.amount.currency,
            "externalId": reference,
            "payee": { "partyIdType": "MSISDN", "partyId": msisdn },
            "payerMessage": request.narration.clone().unwrap_or_else(|| "Investment payout".to_string()),
            "payeeNote": reference,
        });
        self.submit(
            Product::Disbursement,
            "v1_0/transfer",
            &reference,
            Some(&callback_url),
            &payload,
        )
        .await?;

        Ok(PayoutResponse {
            success: true,
            provider_tx_id: Some(reference),
            pending: true,
            failure_reason: None,
        })
    }

    async fn query_status(&self, provider_tx_id: &str) -> PaymentResult<StatusResponse> {
        let body = self
            .fetch(
                Product::Collection,
                &format!("v1_0/requesttopay/{}", provider_tx_id),
            )
            .await?;
        Ok(StatusResponse {
            outcome: Self::status_outcome(&body),
            provider_tx_id: provider_tx_id.to_string(),
            provider_data: Some(body),
        })
    }

    async fn query_transfer_status(
        &self,
        kind: PaymentKind,
        provider_tx_id: &str,
    ) -> PaymentResult<StatusResponse> {
        let resource = match kind {
            PaymentKind::Refund => "refund",
            _ => "transfer",
        };
        let body = self
            .fetch(
                Product::Disbursement,
                &format!("v1_0/{}/{}", resource, provider_tx_id),
            )
            .await?;
        Ok(StatusResponse {
            outcome: Self::status_outcome(&body),
            provider_tx_id: provider_tx_id.to_string(),
            provider_data: Some(body),
        })
    }

    fn verify_callback(&self, callback: &RawCallback) -> PaymentResult<()> {
        let reference = callback.query_param("ref").unwrap_or_default();
        let token = callback.query_param("token").unwrap_or_default();
        if verify_callback_token(&self.config.callback_secret, reference, token) {
            Ok(())
        } else {
            Err(PaymentError::WebhookVerificationError {
                message: "invalid momo callback token".to_string(),
            })
        }
    }

    fn decode_callback(&self, callback: &RawCallback) -> PaymentResult<CallbackOutcome> {
        let parsed = callback.json()?;
        // Every MoMo reference id we assign is the ledger payment id, so the
        // signed `ref` is the transaction id and the body must agree with it.
        let reference = callback.query_param("ref").unwrap_or_default().to_string();
        if let Some(external_id) = parsed.get("externalId").and_then(|v| v.as_str()) {
            if external_id != reference {
                return Err(PaymentError::WebhookVerificationError {
                    message: format!(
                        "momo callback externalId {} does not match signed reference",
                        external_id
                    ),
                });
            }
        }
        let event_type = if parsed.get("payee").is_some() {
            "transfer"
        } else {
            "requesttopay"
        };

        Ok(CallbackOutcome {
            gateway: GatewayName::MtnMomo,
            event_type: event_type.to_string(),
            provider_tx_id: reference.clone(),
            outcome: Self::status_outcome(&parsed),
            payload: parsed,
            signed_reference: Some(reference),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::provider::ParseCallback;
    use crate::payments::utils::callback_token;
    use uuid::Uuid;

    fn gateway() -> MtnMomoGateway {
        MtnMomoGateway::new(MtnMomoConfig {
            collection: MomoProductCredentials {
                subscription_key: "sub".to_string(),
                api_user: "user".to_string(),
                api_key: "key".to_string(),
            },
            disbursement: None,
            target_environment: "sandbox".to_string(),
            callback_secret: "momo_cb".to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 5,
        })
        .expect("gateway init should succeed")
    }

    #[test]
    fn failed_request_to_pay_callback() {
        let body = br#"{"financialTransactionId":"123","externalId":"p-9","amount":"1000","currency":"UGX","payer":{"partyIdType":"MSISDN","partyId":"256772123456"},"status":"FAILED","reason":"APPROVAL_REJECTED"}"#;
        let raw = RawCallback::new(body.to_vec())
            .with_query("ref", "p-9")
            .with_query("token", callback_token("momo_cb", "p-9"));
        let outcome = gateway().parse_callback(&raw).expect("valid callback");
        assert_eq!(outcome.provider_tx_id, "p-9");
        assert_eq!(outcome.outcome.failure_reason(), Some("APPROVAL_REJECTED"));
    }

    #[test]
    fn callback_body_for_another_reference_is_rejected() {
        let body = br#"{"externalId":"p-2","amount":"1000","currency":"UGX","status":"SUCCESSFUL"}"#;
        let raw = RawCallback::new(body.to_vec())
            .with_query("ref", "p-1")
            .with_query("token", callback_token("momo_cb", "p-1"));
        let err = gateway().parse_callback(&raw).unwrap_err();
        assert!(matches!(err, PaymentError::WebhookVerificationError { .. }));

        let body = br#"{"amount":"1000","currency":"UGX","status":"SUCCESSFUL"}"#;
        let raw = RawCallback::new(body.to_vec())
            .with_query("ref", "p-1")
            .with_query("token", callback_token("momo_cb", "p-1"));
        let outcome = gateway().parse_callback(&raw).expect("valid callback");
        assert_eq!(outcome.provider_tx_id, "p-1");
        assert_eq!(outcome.signed_reference.as_deref(), Some("p-1"));
    }

    #[test]
    fn status_mapping_handles_structured_reason() {
        let body = serde_json::json!({"status": "FAILED", "reason": {"code": "PAYER_NOT_FOUND"}});
        assert_eq!(
            MtnMomoGateway::status_outcome(&body).failure_reason(),
            Some("PAYER_NOT_FOUND")
        );
        assert_eq!(
            MtnMomoGateway::status_outcome(&serde_json::json!({"status": "PENDING"})),
            ProviderOutcome::Pending
        );
    }

    #[tokio::test]
    async fn payout_without_disbursement_credentials_fails() {
        let err = gateway()
            .payout(PayoutRequest {
                payment_id: Uuid::new_v4(),
                amount: crate::payments::types::Money::new(bigdecimal::BigDecimal::from(5000), "UGX"),
                details: crate::payments::types::PaymentDetails {
                    phone: Some("0772123456".to_string()),
                    country: Some("UG".to_string()),
                    ..Default::default()
                },
                callback_url: "https://api.example.com/payments/callback/mtn_momo".to_string(),
                narration: None,
            })
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }
}
