#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, TimeZone, Utc};
use fundrail_backend::clock::ManualClock;
use fundrail_backend::config::{EngineConfig, SchedulerConfig};
use fundrail_backend::database::memory::{
    InMemoryInvestmentStore, InMemoryPaymentLedger, InMemoryPlanStore, InMemoryReferralStore,
};
use fundrail_backend::database::models::{Plan, Referral, ReferralStatus};
use fundrail_backend::database::repository::{PlanStore, ReferralStore};
use fundrail_backend::database::Stores;
use fundrail_backend::payments::error::{PaymentError, PaymentResult};
use fundrail_backend::payments::factory::GatewayRegistry;
use fundrail_backend::payments::provider::PaymentGateway;
use fundrail_backend::payments::types::{
    CallbackOutcome, CaptureResponse, CountryPolicy, GatewayName, InitiateRequest,
    InitiateResponse, PaymentKind, PayoutRequest, PayoutResponse, ProviderOutcome, RawCallback,
    RefundRequest,
    RefundResponse, SettlementMode, StatusResponse,
};
use fundrail_backend::services::exchange_rate::{ExchangeRateService, ExchangeRateServiceConfig};
use fundrail_backend::services::notification::RecordingNotifier;
use fundrail_backend::services::rate_providers::FixedRateProvider;
use fundrail_backend::Engine;
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const SIGNATURE_HEADER: &str = "x-test-signature";
pub const GOOD_SIGNATURE: &str = "ok";

pub fn dec(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

/// Gateway whose answers are set by the test. `initiate` answers with
/// `initiate_outcome`; `capture` and `query_status` pop `statuses` and
/// report pending once the queue is empty.
pub struct ScriptedGateway {
    name: GatewayName,
    mode: SettlementMode,
    initiate_outcome: Mutex<ProviderOutcome>,
    initiate_error: Mutex<Option<PaymentError>>,
    statuses: Mutex<VecDeque<ProviderOutcome>>,
    refund_error: Mutex<Option<PaymentError>>,
    transfers_pending: AtomicBool,
    refundable: AtomicBool,
    pays_out: AtomicBool,
    pub initiated: AtomicUsize,
    pub queried: AtomicUsize,
    pub refunds: Mutex<Vec<RefundRequest>>,
    pub payouts: Mutex<Vec<PayoutRequest>>,
}

impl ScriptedGateway {
    pub fn new(name: GatewayName, mode: SettlementMode) -> Self {
        let initiate_outcome = match mode {
            SettlementMode::Synchronous | SettlementMode::AuthorizeCapture => {
                ProviderOutcome::Succeeded
            }
            SettlementMode::Redirect | SettlementMode::Poll => ProviderOutcome::Pending,
        };
        Self {
            name,
            mode,
            initiate_outcome: Mutex::new(initiate_outcome),
            initiate_error: Mutex::new(None),
            statuses: Mutex::new(VecDeque::new()),
            refund_error: Mutex::new(None),
            transfers_pending: AtomicBool::new(false),
            refundable: AtomicBool::new(true),
            pays_out: AtomicBool::new(true),
            initiated: AtomicUsize::new(0),
            queried: AtomicUsize::new(0),
            refunds: Mutex::new(Vec::new()),
            payouts: Mutex::new(Vec::new()),
        }
    }

    pub fn synchronous() -> Arc<Self> {
        Arc::new(Self::new(GatewayName::Sandbox, SettlementMode::Synchronous))
    }

    pub fn poll() -> Arc<Self> {
        Arc::new(Self::new(GatewayName::Mpesa, SettlementMode::Poll))
    }

    pub fn redirect() -> Arc<Self> {
        Arc::new(Self::new(GatewayName::Paystack, SettlementMode::Redirect))
    }

    pub fn authorize_capture() -> Arc<Self> {
        Arc::new(Self::new(GatewayName::Stripe, SettlementMode::AuthorizeCapture))
    }

    pub fn answer_initiate(&self, outcome: ProviderOutcome) {
        *self.initiate_outcome.lock().unwrap() = outcome;
    }

    pub fn fail_initiate(&self, error: PaymentError) {
        *self.initiate_error.lock().unwrap() = Some(error);
    }

    /// Every refund attempt fails with `error` until cleared with `None`.
    pub fn fail_refunds(&self, error: Option<PaymentError>) {
        *self.refund_error.lock().unwrap() = error;
    }

    /// Payouts and refunds are accepted but settle later.
    pub fn defer_transfers(&self) {
        self.transfers_pending.store(true, Ordering::SeqCst);
    }

    pub fn disable_refunds(&self) {
        self.refundable.store(false, Ordering::SeqCst);
    }

    pub fn disable_payouts(&self) {
        self.pays_out.store(false, Ordering::SeqCst);
    }

    pub fn queue_status(&self, outcome: ProviderOutcome) {
        self.statuses.lock().unwrap().push_back(outcome);
    }

    pub fn tx_id(&self, payment_id: Uuid) -> String {
        format!("{}_{}", self.name, payment_id.simple())
    }

    pub fn callback(&self, tx_id: &str, status: &str) -> RawCallback {
        RawCallback::new(
            serde_json::json!({ "tx": tx_id, "status": status })
                .to_string()
                .into_bytes(),
        )
        .with_header(SIGNATURE_HEADER, GOOD_SIGNATURE)
    }

    /// Callback delivered to a URL signed for `reference`.
    pub fn signed_callback(&self, reference: Uuid, tx_id: &str, status: &str) -> RawCallback {
        self.callback(tx_id, status)
            .with_query("ref", reference.to_string())
    }

    fn next_status(&self) -> ProviderOutcome {
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ProviderOutcome::Pending)
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    fn name(&self) -> GatewayName {
        self.name
    }

    fn settlement_mode(&self) -> SettlementMode {
        self.mode
    }

    fn country_policy(&self) -> CountryPolicy {
        CountryPolicy::Deny(&[])
    }

    fn supported_currencies(&self) -> &'static [&'static str] {
        &[]
    }

    fn supports_refunds(&self) -> bool {
        self.refundable.load(Ordering::SeqCst)
    }

    fn supports_payouts(&self) -> bool {
        self.pays_out.load(Ordering::SeqCst)
    }

    async fn initiate(&self, request: InitiateRequest) -> PaymentResult<InitiateResponse> {
        self.initiated.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.initiate_error.lock().unwrap().clone() {
            return Err(err);
        }
        let tx_id = self.tx_id(request.payment_id);
        let outcome = self.initiate_outcome.lock().unwrap().clone();
        Ok(match outcome {
            ProviderOutcome::Succeeded if self.mode == SettlementMode::AuthorizeCapture => {
                InitiateResponse {
                    accepted: true,
                    provider_tx_id: Some(tx_id),
                    capture_required: true,
                    ..Default::default()
                }
            }
            ProviderOutcome::Succeeded => InitiateResponse {
                accepted: true,
                provider_tx_id: Some(tx_id),
                ..Default::default()
            },
            ProviderOutcome::Pending => InitiateResponse {
                accepted: true,
                provider_tx_id: Some(tx_id),
                pending: true,
                redirect_url: (self.mode == SettlementMode::Redirect)
                    .then(|| format!("https://pay.example.com/{}", request.payment_id)),
                ..Default::default()
            },
            ProviderOutcome::Failed { reason } => InitiateResponse {
                provider_tx_id: Some(tx_id),
                ..InitiateResponse::declined(reason)
            },
        })
    }

    async fn capture(&self, _provider_tx_id: &str) -> PaymentResult<CaptureResponse> {
        Ok(CaptureResponse {
            outcome: self.next_status(),
            provider_data: None,
        })
    }

    async fn refund(&self, request: RefundRequest) -> PaymentResult<RefundResponse> {
        let refund_tx_id = format!("rf_{}", request.payment_id.simple());
        self.refunds.lock().unwrap().push(request);
        if let Some(err) = self.refund_error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(RefundResponse {
            success: true,
            refund_tx_id: Some(refund_tx_id),
            pending: self.transfers_pending.load(Ordering::SeqCst),
            ..Default::default()
        })
    }

    async fn payout(&self, request: PayoutRequest) -> PaymentResult<PayoutResponse> {
        let provider_tx_id = format!("po_{}", request.payment_id.simple());
        self.payouts.lock().unwrap().push(request);
        Ok(PayoutResponse {
            success: true,
            provider_tx_id: Some(provider_tx_id),
            pending: self.transfers_pending.load(Ordering::SeqCst),
            ..Default::default()
        })
    }

    async fn query_transfer_status(
        &self,
        _kind: PaymentKind,
        provider_tx_id: &str,
    ) -> PaymentResult<StatusResponse> {
        self.query_status(provider_tx_id).await
    }

    async fn query_status(&self, provider_tx_id: &str) -> PaymentResult<StatusResponse> {
        self.queried.fetch_add(1, Ordering::SeqCst);
        Ok(StatusResponse {
            outcome: self.next_status(),
            provider_tx_id: provider_tx_id.to_string(),
            provider_data: None,
        })
    }

    fn verify_callback(&self, callback: &RawCallback) -> PaymentResult<()> {
        match callback.header(SIGNATURE_HEADER) {
            Some(GOOD_SIGNATURE) => Ok(()),
            _ => Err(PaymentError::WebhookVerificationError {
                message: "bad test signature".to_string(),
            }),
        }
    }

    fn decode_callback(&self, callback: &RawCallback) -> PaymentResult<CallbackOutcome> {
        let payload = callback.json()?;
        let outcome = match payload["status"].as_str() {
            Some("success") => ProviderOutcome::Succeeded,
            Some("failed") => ProviderOutcome::failed("declined by payer"),
            _ => ProviderOutcome::Pending,
        };
        Ok(CallbackOutcome {
            gateway: self.name,
            event_type: "test".to_string(),
            provider_tx_id: payload["tx"].as_str().unwrap_or_default().to_string(),
            outcome,
            payload,
            signed_reference: callback.query_param("ref").map(str::to_string),
        })
    }
}

/// Fast retries and a short poll budget; sleeps are instant under a paused
/// tokio clock.
pub fn engine_config() -> EngineConfig {
    EngineConfig {
        share_price_usd: dec("10"),
        verification_fee_usd: dec("2"),
        referral_bonus_percent: dec("5"),
        cancellation_penalty_percent: dec("10"),
        auto_reinvest_grace_hours: 48,
        retry_max_attempts: 2,
        retry_initial_delay_ms: 10,
        gateway_timeout_secs: 5,
        poll_interval_secs: 1,
        poll_max_attempts: 3,
        ..EngineConfig::default()
    }
}

pub struct Harness {
    pub engine: Engine,
    pub payments: Arc<InMemoryPaymentLedger>,
    pub investments: Arc<InMemoryInvestmentStore>,
    pub plans: Arc<InMemoryPlanStore>,
    pub referrals: Arc<InMemoryReferralStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
}

pub struct HarnessBuilder {
    gateways: Vec<Arc<dyn PaymentGateway>>,
    config: EngineConfig,
    payments: Arc<InMemoryPaymentLedger>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            gateways: Vec::new(),
            config: engine_config(),
            payments: Arc::new(InMemoryPaymentLedger::new()),
        }
    }

    pub fn gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.push(gateway);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Reuses a ledger, as a restarted process would.
    pub fn ledger(mut self, payments: Arc<InMemoryPaymentLedger>) -> Self {
        self.payments = payments;
        self
    }

    pub fn build(self) -> Harness {
        let investments = Arc::new(InMemoryInvestmentStore::new());
        let plans = Arc::new(InMemoryPlanStore::new());
        let referrals = Arc::new(InMemoryReferralStore::new());
        let stores = Stores {
            payments: self.payments.clone(),
            investments: investments.clone(),
            plans: plans.clone(),
            referrals: referrals.clone(),
        };

        let registry = self
            .gateways
            .into_iter()
            .fold(GatewayRegistry::builder(), |builder, gateway| {
                builder.register(gateway)
            })
            .build();

        let rates = ExchangeRateService::new(ExchangeRateServiceConfig::default()).add_provider(
            Arc::new(
                FixedRateProvider::new()
                    .with_rate("NGN", dec("1500"))
                    .with_rate("KES", dec("130"))
                    .with_rate("XOF", dec("600.5")),
            ),
        );

        let notifier = Arc::new(RecordingNotifier::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let engine = Engine::assemble(
            stores,
            registry,
            Arc::new(rates),
            notifier.clone(),
            clock.clone(),
            &self.config,
            SchedulerConfig::default(),
        );

        Harness {
            engine,
            payments: self.payments,
            investments,
            plans,
            referrals,
            notifier,
            clock,
        }
    }
}

impl Harness {
    pub async fn seed_plan(&self, duration_days: i32, profit: &str, daily_limit: i32, daily_sold: i32) -> Plan {
        let now = start_time();
        self.plans
            .insert(&Plan {
                id: Uuid::new_v4(),
                name: "Growth".to_string(),
                duration_days,
                profit_percent: dec(profit),
                min_shares: 1,
                max_shares: 50,
                daily_limit,
                daily_sold,
                sales_window: 0,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap()
    }

    pub async fn seed_referral(&self, referrer_id: Uuid, referred_id: Uuid) -> Referral {
        let now = start_time();
        self.referrals
            .insert(&Referral {
                id: Uuid::new_v4(),
                referrer_id,
                referred_id,
                bonus_amount: None,
                currency: "USD".to_string(),
                status: ReferralStatus::Pending,
                first_investment: false,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap()
    }
}
