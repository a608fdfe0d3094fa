//! Wires stores, rails and services into one running engine.

use crate::api::AppState;
use crate::clock::Clock;
use crate::config::{EngineConfig, SchedulerConfig};
use crate::database::Stores;
use crate::payments::factory::GatewayRegistry;
use crate::payments::poller::PollSupervisor;
use crate::services::exchange_rate::ExchangeRateService;
use crate::services::investment_lifecycle::{InvestmentLifecycleManager, InvestmentSettlementHook};
use crate::services::notification::Notifier;
use crate::services::payment_orchestrator::PaymentOrchestrator;
use crate::services::referral_bonus::ReferralBonusCalculator;
use crate::services::settlement::PaymentSettler;
use crate::services::webhook_processor::WebhookProcessor;
use crate::workers::scheduler::LifecycleScheduler;
use bigdecimal::BigDecimal;
use std::sync::Arc;
use tracing::info;

pub struct Engine {
    pub stores: Stores,
    pub registry: GatewayRegistry,
    pub settler: Arc<PaymentSettler>,
    pub poller: Arc<PollSupervisor>,
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub reconciler: Arc<WebhookProcessor>,
    pub lifecycle: Arc<InvestmentLifecycleManager>,
    pub scheduler: Arc<LifecycleScheduler>,
    verification_fee_usd: BigDecimal,
}

impl Engine {
    pub fn assemble(
        stores: Stores,
        registry: GatewayRegistry,
        rates: Arc<ExchangeRateService>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        engine: &EngineConfig,
        scheduler: SchedulerConfig,
    ) -> Self {
        let referrals = Arc::new(ReferralBonusCalculator::new(
            stores.referrals.clone(),
            engine.referral_bonus_percent.clone(),
        ));
        let hook = Arc::new(InvestmentSettlementHook::new(
            stores.investments.clone(),
            stores.plans.clone(),
            referrals,
            clock.clone(),
        ));
        let settler = Arc::new(
            PaymentSettler::new(stores.payments.clone(), notifier.clone()).with_hook(hook),
        );
        let poller = Arc::new(PollSupervisor::new(settler.clone(), engine.poll_config()));
        let orchestrator = Arc::new(PaymentOrchestrator::new(
            registry.clone(),
            rates,
            settler.clone(),
            notifier,
            poller.clone(),
            engine.orchestrator_config(),
        ));
        let reconciler = Arc::new(WebhookProcessor::new(registry.clone(), settler.clone()));
        let lifecycle = Arc::new(InvestmentLifecycleManager::new(
            stores.investments.clone(),
            stores.plans.clone(),
            orchestrator.clone(),
            clock.clone(),
            engine.lifecycle_config(scheduler.batch_size),
        ));
        let scheduler = Arc::new(LifecycleScheduler::new(lifecycle.clone(), clock, scheduler));

        Self {
            stores,
            registry,
            settler,
            poller,
            orchestrator,
            reconciler,
            lifecycle,
            scheduler,
            verification_fee_usd: engine.verification_fee_usd.clone(),
        }
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            orchestrator: self.orchestrator.clone(),
            lifecycle: self.lifecycle.clone(),
            reconciler: self.reconciler.clone(),
            verification_fee_usd: self.verification_fee_usd.clone(),
        }
    }

    /// Resumes poll loops left by a previous process and starts the sweeps.
    pub async fn start(&self, resume_limit: i64) -> Result<usize, crate::database::error::DatabaseError> {
        let resumed = self.poller.resume_pending(&self.registry, resume_limit).await?;
        self.scheduler.start().await;
        info!(resumed, "engine started");
        Ok(resumed)
    }

    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
        self.poller.shutdown().await;
        info!("engine stopped");
    }
}
