//! Services module for business logic and integrations

pub mod exchange_rate;
pub mod investment_lifecycle;
pub mod notification;
pub mod payment_orchestrator;
pub mod rate_providers;
pub mod referral_bonus;
pub mod settlement;
pub mod webhook_processor;

pub use exchange_rate::{ExchangeRateService, ExchangeRateServiceConfig};
pub use investment_lifecycle::{
    InvestmentLifecycleManager, InvestmentSettlementHook, LifecycleConfig, LifecycleError,
};
pub use payment_orchestrator::{
    OrchestratorConfig, OrchestratorError, OrchestratorResult, PaymentOrchestrator,
    ProcessOutcome, ProcessRequest,
};
pub use settlement::{PaymentSettler, SettlementHook};
pub use webhook_processor::{ReconcileResult, WebhookProcessor, WebhookProcessorError};
