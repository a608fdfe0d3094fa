use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::{
    CallbackOutcome, CaptureResponse, CountryPolicy, GatewayName, InitiateRequest,
    InitiateResponse, PaymentKind, PayoutRequest, PayoutResponse, RawCallback, RefundRequest,
    RefundResponse, SettlementMode, StatusResponse,
};
use async_trait::async_trait;

/// Uniform contract every payment rail implements. Provider quirks
/// (redirects, STK pushes, OAuth tokens, minor units) stay behind it.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> GatewayName;

    fn settlement_mode(&self) -> SettlementMode;

    fn country_policy(&self) -> CountryPolicy;

    fn supported_currencies(&self) -> &'static [&'static str];

    /// Whether `refund` can move money back on this rail.
    fn supports_refunds(&self) -> bool {
        true
    }

    /// Whether `payout` can send money out on this rail.
    fn supports_payouts(&self) -> bool {
        true
    }

    /// Whether pending payouts and refunds are tracked by polling
    /// `query_transfer_status`. Rails whose transfers always end in a
    /// callback (result or queue-timeout URL) opt out.
    fn polls_transfers(&self) -> bool {
        self.settlement_mode() == SettlementMode::Poll
    }

    /// Validates rail prerequisites before any network call, then asks the
    /// provider to collect `request.amount`.
    async fn initiate(&self, request: InitiateRequest) -> PaymentResult<InitiateResponse>;

    /// Completes an authorization. Rails without a separate capture step
    /// re-query the transaction instead.
    async fn capture(&self, provider_tx_id: &str) -> PaymentResult<CaptureResponse>;

    async fn refund(&self, request: RefundRequest) -> PaymentResult<RefundResponse>;

    async fn payout(&self, request: PayoutRequest) -> PaymentResult<PayoutResponse>;

    /// Current provider-side state of a transaction; drives the poll loop.
    async fn query_status(&self, provider_tx_id: &str) -> PaymentResult<StatusResponse>;

    /// State of a payout (`Withdrawal`) or `Refund` this rail issued.
    async fn query_transfer_status(
        &self,
        _kind: PaymentKind,
        provider_tx_id: &str,
    ) -> PaymentResult<StatusResponse> {
        self.query_status(provider_tx_id).await
    }

    /// Authenticates an inbound notification (HMAC, shared token, signed
    /// callback URL). Required: there is no default.
    fn verify_callback(&self, callback: &RawCallback) -> PaymentResult<()>;

    /// Translates an already verified notification. Must be side-effect free.
    fn decode_callback(&self, callback: &RawCallback) -> PaymentResult<CallbackOutcome>;
}

/// Verify-then-parse for every gateway. Implemented once for all
/// `PaymentGateway`s so no rail can hand out an unverified payload.
pub trait ParseCallback {
    fn parse_callback(&self, callback: &RawCallback) -> PaymentResult<CallbackOutcome>;
}

impl<T: PaymentGateway + ?Sized> ParseCallback for T {
    fn parse_callback(&self, callback: &RawCallback) -> PaymentResult<CallbackOutcome> {
        self.verify_callback(callback)?;
        let outcome = self.decode_callback(callback)?;
        if outcome.provider_tx_id.trim().is_empty() {
            return Err(PaymentError::WebhookVerificationError {
                message: format!("{} callback carries no transaction id", self.name()),
            });
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::{ProviderOutcome, StatusResponse};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockGateway {
        decoded: AtomicUsize,
    }

    #[async_trait]
    impl PaymentGateway for MockGateway {
        fn name(&self) -> GatewayName {
            GatewayName::Sandbox
        }

        fn settlement_mode(&self) -> SettlementMode {
            SettlementMode::Synchronous
        }

        fn country_policy(&self) -> CountryPolicy {
            CountryPolicy::Deny(&[])
        }

        fn supported_currencies(&self) -> &'static [&'static str] {
            &["USD"]
        }

        async fn initiate(&self, request: InitiateRequest) -> PaymentResult<InitiateResponse> {
            Ok(InitiateResponse {
                accepted: true,
                provider_tx_id: Some(format!("mock_{}", request.payment_id)),
                ..Default::default()
            })
        }

        async fn capture(&self, provider_tx_id: &str) -> PaymentResult<CaptureResponse> {
            let status = self.query_status(provider_tx_id).await?;
            Ok(CaptureResponse {
                outcome: status.outcome,
                provider_data: None,
            })
        }

        async fn refund(&self, request: RefundRequest) -> PaymentResult<RefundResponse> {
            Ok(RefundResponse {
                success: true,
                refund_tx_id: Some(format!("rf_{}", request.original_tx_id)),
                ..Default::default()
            })
        }

        async fn payout(&self, _request: PayoutRequest) -> PaymentResult<PayoutResponse> {
            Ok(PayoutResponse {
                success: true,
                provider_tx_id: Some("po_1".to_string()),
                ..Default::default()
            })
        }

        async fn query_status(&self, provider_tx_id: &str) -> PaymentResult<StatusResponse> {
            Ok(StatusResponse {
                outcome: ProviderOutcome::Succeeded,
                provider_tx_id: provider_tx_id.to_string(),
                provider_data: None,
            })
        }

        fn verify_callback(&self, callback: &RawCallback) -> PaymentResult<()> {
            match callback.header("x-mock-signature") {
                Some("good") => Ok(()),
                _ => Err(PaymentError::WebhookVerificationError {
                    message: "bad mock signature".to_string(),
                }),
            }
        }

        fn decode_callback(&self, callback: &RawCallback) -> PaymentResult<CallbackOutcome> {
            self.decoded.fetch_add(1, Ordering::SeqCst);
            let payload = callback.json()?;
            Ok(CallbackOutcome {
                gateway: GatewayName::Sandbox,
                event_type: "mock".to_string(),
                provider_tx_id: payload["id"].as_str().unwrap_or_default().to_string(),
                outcome: ProviderOutcome::Succeeded,
                payload,
                signed_reference: None,
            })
        }
    }

    #[test]
    fn parse_callback_never_decodes_unverified_payloads() {
        let gateway = MockGateway {
            decoded: AtomicUsize::new(0),
        };
        let raw = RawCallback::new(br#"{"id":"tx_1"}"#.to_vec()).with_header("X-Mock-Signature", "bad");
        let err = gateway.parse_callback(&raw).unwrap_err();
        assert!(matches!(err, PaymentError::WebhookVerificationError { .. }));
        assert_eq!(gateway.decoded.load(Ordering::SeqCst), 0);

        let raw = RawCallback::new(br#"{"id":"tx_1"}"#.to_vec()).with_header("X-Mock-Signature", "good");
        let outcome = gateway.parse_callback(&raw).expect("verified callback parses");
        assert_eq!(outcome.provider_tx_id, "tx_1");
    }

    #[test]
    fn parse_callback_rejects_missing_transaction_id() {
        let gateway = MockGateway {
            decoded: AtomicUsize::new(0),
        };
        let raw = RawCallback::new(br#"{}"#.to_vec()).with_header("x-mock-signature", "good");
        assert!(gateway.parse_callback(&raw).is_err());
    }

    #[tokio::test]
    async fn capability_defaults_follow_settlement_mode() {
        let gateway = MockGateway {
            decoded: AtomicUsize::new(0),
        };
        assert!(gateway.supports_refunds());
        assert!(gateway.supports_payouts());
        assert!(!gateway.polls_transfers());
        let status = gateway
            .query_transfer_status(PaymentKind::Withdrawal, "po_1")
            .await
            .unwrap();
        assert_eq!(status.outcome, ProviderOutcome::Succeeded);
    }

    #[tokio::test]
    async fn trait_objects_are_usable() {
        let gateway: Box<dyn PaymentGateway> = Box::new(MockGateway {
            decoded: AtomicUsize::new(0),
        });
        let refund = gateway
            .refund(RefundRequest {
                payment_id: uuid::Uuid::new_v4(),
                amount: crate::payments::types::Money::new(bigdecimal::BigDecimal::from(5), "USD"),
                original_tx_id: "tx_9".to_string(),
                reason: None,
                callback_url: "https://example.com/cb".to_string(),
            })
            .await
            .expect("refund should succeed");
        assert!(refund.success);
        assert_eq!(refund.refund_tx_id.as_deref(), Some("rf_tx_9"));
        let raw = RawCallback::new(br#"{"id":"tx_2"}"#.to_vec()).with_header("x-mock-signature", "good");
        assert!(gateway.parse_callback(&raw).is_ok());
    }
}
