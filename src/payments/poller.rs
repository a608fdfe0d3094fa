//! Poll loops for push rails that have no reliable webhook.
//!
//! [`PollSupervisor`] owns one task per provider transaction id. Collections
//! are queried with `query_status`, payouts and refunds with
//! `query_transfer_status`. A loop
//! stops on a definitive provider answer, on finding the ledger entry
//! already terminal (a callback won the race), or after `max_attempts`,
//! in which case the payment is failed with a timeout reason.

use crate::database::repository::DbResult;
use crate::payments::factory::GatewayRegistry;
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{PaymentKind, SettlementMode};
use crate::services::settlement::PaymentSettler;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
    /// Bound on each status query.
    pub call_timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_attempts: 30,
            call_timeout: Duration::from_secs(30),
        }
    }
}

type TaskMap = Arc<Mutex<HashMap<String, JoinHandle<()>>>>;

pub struct PollSupervisor {
    settler: Arc<PaymentSettler>,
    config: PollConfig,
    tasks: TaskMap,
    shutdown_tx: watch::Sender<bool>,
}

impl PollSupervisor {
    pub fn new(settler: Arc<PaymentSettler>, config: PollConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            settler,
            config,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            shutdown_tx,
        }
    }

    /// Starts a loop for `provider_tx_id` unless one is already live or the
    /// supervisor is shutting down. Returns whether a loop was started.
    pub async fn spawn(
        &self,
        gateway: Arc<dyn PaymentGateway>,
        payment_id: Uuid,
        kind: PaymentKind,
        provider_tx_id: String,
    ) -> bool {
        if *self.shutdown_tx.borrow() {
            warn!(payment_id = %payment_id, "poll supervisor stopped, loop not started");
            return false;
        }

        let mut tasks = self.tasks.lock().await;
        if tasks
            .get(&provider_tx_id)
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
        {
            debug!(provider_tx_id = %provider_tx_id, "poll loop already running");
            return false;
        }

        let poll = PollLoop {
            gateway,
            settler: self.settler.clone(),
            config: self.config,
            payment_id,
            kind,
            provider_tx_id: provider_tx_id.clone(),
        };
        let registry = self.tasks.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        let key = provider_tx_id.clone();
        // The map lock is held until the handle is inserted, so the task's
        // own removal always runs after it.
        let handle = tokio::spawn(async move {
            poll.run(shutdown_rx).await;
            registry.lock().await.remove(&key);
        });
        tasks.insert(provider_tx_id, handle);
        true
    }

    pub async fn is_polling(&self, provider_tx_id: &str) -> bool {
        self.tasks
            .lock()
            .await
            .get(provider_tx_id)
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    pub async fn active_count(&self) -> usize {
        self.tasks
            .lock()
            .await
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Restarts loops for pending payments on poll-settled rails. Transfers
    /// are skipped on rails that report them by callback only.
    pub async fn resume_pending(&self, registry: &GatewayRegistry, limit: i64) -> DbResult<usize> {
        let poll_rails: Vec<_> = registry
            .list_available()
            .into_iter()
            .filter(|name| {
                registry
                    .get(*name)
                    .map(|g| g.settlement_mode() == SettlementMode::Poll)
                    .unwrap_or(false)
            })
            .collect();
        if poll_rails.is_empty() {
            return Ok(0);
        }

        let pending = self
            .settler
            .ledger()
            .list_pending_tracked(&poll_rails, limit)
            .await?;

        let mut resumed = 0;
        for payment in pending {
            let (Some(tx_id), Ok(gateway)) = (payment.provider_tx_id, registry.get(payment.gateway))
            else {
                continue;
            };
            if payment.kind.is_transfer() && !gateway.polls_transfers() {
                continue;
            }
            if self.spawn(gateway, payment.id, payment.kind, tx_id).await {
                resumed += 1;
            }
        }
        info!(resumed, "resumed pending poll loops");
        Ok(resumed)
    }

    /// Signals every loop to stop and waits for them. Payments left pending
    /// are picked up by `resume_pending` on the next start.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<_> = self.tasks.lock().await.drain().collect();
        for (tx_id, handle) in handles {
            if let Err(e) = handle.await {
                error!(provider_tx_id = %tx_id, error = %e, "poll task panicked");
            }
        }
        info!("poll supervisor drained");
    }
}

struct PollLoop {
    gateway: Arc<dyn PaymentGateway>,
    settler: Arc<PaymentSettler>,
    config: PollConfig,
    payment_id: Uuid,
    kind: PaymentKind,
    provider_tx_id: String,
}

impl PollLoop {
    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let gateway = self.gateway.name();
        debug!(
            payment_id = %self.payment_id,
            gateway = %gateway,
            kind = self.kind.as_str(),
            provider_tx_id = %self.provider_tx_id,
            "poll loop started"
        );

        for attempt in 1..=self.config.max_attempts {
            if *shutdown_rx.borrow() {
                return;
            }
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!(payment_id = %self.payment_id, "poll loop interrupted by shutdown");
                        return;
                    }
                }
                _ = tokio::time::sleep(self.config.interval) => {}
            }

            match self.settler.ledger().find_by_id(self.payment_id).await {
                Ok(Some(payment)) if payment.status.is_terminal() => {
                    debug!(payment_id = %self.payment_id, "payment settled elsewhere, poll loop done");
                    return;
                }
                Ok(None) => {
                    error!(payment_id = %self.payment_id, "polled payment missing from ledger");
                    return;
                }
                Err(e) => warn!(payment_id = %self.payment_id, error = %e, "ledger read failed"),
                Ok(Some(_)) => {}
            }

            let query = async {
                if self.kind.is_transfer() {
                    self.gateway
                        .query_transfer_status(self.kind, &self.provider_tx_id)
                        .await
                } else {
                    self.gateway.query_status(&self.provider_tx_id).await
                }
            };
            let status = tokio::time::timeout(self.config.call_timeout, query).await;

            match status {
                Ok(Ok(status)) if status.outcome.is_definitive() => {
                    if let Err(e) = self
                        .settler
                        .settle_outcome(self.payment_id, &status.outcome, status.provider_data)
                        .await
                    {
                        error!(payment_id = %self.payment_id, error = %e, "failed to settle polled payment");
                        continue;
                    }
                    return;
                }
                Ok(Ok(_)) => debug!(
                    payment_id = %self.payment_id,
                    attempt,
                    "provider still pending"
                ),
                Ok(Err(e)) => warn!(
                    payment_id = %self.payment_id,
                    gateway = %gateway,
                    attempt,
                    error = %e,
                    "status query failed"
                ),
                Err(_) => warn!(
                    payment_id = %self.payment_id,
                    gateway = %gateway,
                    attempt,
                    "status query timed out"
                ),
            }
        }

        warn!(
            payment_id = %self.payment_id,
            gateway = %gateway,
            attempts = self.config.max_attempts,
            "no definitive status, failing payment"
        );
        if let Err(e) = self.settler.time_out(self.payment_id).await {
            error!(payment_id = %self.payment_id, error = %e, "failed to time out payment");
        }
    }
}
