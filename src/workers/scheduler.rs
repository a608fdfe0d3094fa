//! Time-driven lifecycle sweeps.
//!
//! Four loops run independently: the nightly reset of plan share counters,
//! the maturity sweep, the auto-reinvest sweep (offset from maturity so
//! they do not start together) and the reissue of owed cancellation
//! refunds. Each sweep holds its own guard, so a sweep
//! never overlaps itself; sweeps are public so tests can drive them without
//! waiting on timers.

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::services::investment_lifecycle::{InvestmentLifecycleManager, LifecycleResult};
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub struct LifecycleScheduler {
    lifecycle: Arc<InvestmentLifecycleManager>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    reset_guard: Mutex<()>,
    maturity_guard: Mutex<()>,
    reinvest_guard: Mutex<()>,
    refund_guard: Mutex<()>,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl LifecycleScheduler {
    pub fn new(
        lifecycle: Arc<InvestmentLifecycleManager>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            lifecycle,
            clock,
            config,
            reset_guard: Mutex::new(()),
            maturity_guard: Mutex::new(()),
            reinvest_guard: Mutex::new(()),
            refund_guard: Mutex::new(()),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub async fn run_daily_reset(&self) -> LifecycleResult<u64> {
        let _guard = self.reset_guard.lock().await;
        self.lifecycle.reset_daily_limits().await
    }

    pub async fn run_maturity_sweep(&self) -> LifecycleResult<usize> {
        let _guard = self.maturity_guard.lock().await;
        let matured = self.lifecycle.mature_due().await?;
        if matured > 0 {
            info!(matured, "maturity sweep finished");
        }
        Ok(matured)
    }

    pub async fn run_reinvest_sweep(&self) -> LifecycleResult<usize> {
        let _guard = self.reinvest_guard.lock().await;
        let reinvested = self.lifecycle.auto_reinvest_due().await?;
        if reinvested > 0 {
            info!(reinvested, "auto-reinvest sweep finished");
        }
        Ok(reinvested)
    }

    pub async fn run_refund_sweep(&self) -> LifecycleResult<usize> {
        let _guard = self.refund_guard.lock().await;
        let issued = self.lifecycle.reissue_owed_refunds().await?;
        if issued > 0 {
            info!(issued, "refund sweep finished");
        }
        Ok(issued)
    }

    /// Spawns the sweep sweep loops. Calling it twice is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            warn!("scheduler already started");
            return;
        }
        if *self.shutdown_tx.borrow() {
            warn!("scheduler stopped, not restarting");
            return;
        }

        info!(
            maturity_interval_secs = self.config.maturity_sweep_interval.as_secs(),
            reinvest_interval_secs = self.config.reinvest_sweep_interval.as_secs(),
            reinvest_offset_secs = self.config.reinvest_sweep_offset.as_secs(),
            refund_interval_secs = self.config.refund_sweep_interval.as_secs(),
            daily_reset_hour_utc = self.config.daily_reset_hour_utc,
            "lifecycle scheduler starting"
        );

        let scheduler = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move {
            let hour = scheduler.config.daily_reset_hour_utc;
            loop {
                let wait = until_next_reset(scheduler.clock.now(), hour);
                if !sleep_unless_shutdown(&mut shutdown_rx, wait).await {
                    break;
                }
                if let Err(e) = scheduler.run_daily_reset().await {
                    warn!(error = %e, "daily reset failed");
                }
            }
        }));

        let scheduler = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move {
            let interval = scheduler.config.maturity_sweep_interval;
            while sleep_unless_shutdown(&mut shutdown_rx, interval).await {
                if let Err(e) = scheduler.run_maturity_sweep().await {
                    warn!(error = %e, "maturity sweep failed");
                }
            }
        }));

        let scheduler = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move {
            let mut wait = scheduler.config.reinvest_sweep_offset;
            while sleep_unless_shutdown(&mut shutdown_rx, wait).await {
                wait = scheduler.config.reinvest_sweep_interval;
                if let Err(e) = scheduler.run_reinvest_sweep().await {
                    warn!(error = %e, "auto-reinvest sweep failed");
                }
            }
        }));

        let scheduler = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move {
            let interval = scheduler.config.refund_sweep_interval;
            while sleep_unless_shutdown(&mut shutdown_rx, interval).await {
                if let Err(e) = scheduler.run_refund_sweep().await {
                    warn!(error = %e, "refund sweep failed");
                }
            }
        }));
    }

    /// Stops the loops and waits for any sweep in progress to finish.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "scheduler task panicked");
            }
        }
        info!("lifecycle scheduler stopped");
    }
}

/// False once shutdown has been signalled.
async fn sleep_unless_shutdown(shutdown_rx: &mut watch::Receiver<bool>, wait: Duration) -> bool {
    if *shutdown_rx.borrow() {
        return false;
    }
    tokio::select! {
        changed = shutdown_rx.changed() => changed.is_ok() && !*shutdown_rx.borrow(),
        _ = tokio::time::sleep(wait) => true,
    }
}

/// Time until the next `hour:00` UTC strictly after `now`.
pub fn until_next_reset(now: DateTime<Utc>, hour: u32) -> Duration {
    let at = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    let today = now.date_naive().and_time(at).and_utc();
    let next = if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    };
    (next - now).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn next_reset_is_later_today_or_tomorrow() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 22, 30, 0).unwrap();
        assert_eq!(until_next_reset(now, 0), Duration::from_secs(90 * 60));
        assert_eq!(until_next_reset(now, 23), Duration::from_secs(30 * 60));

        let midnight = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(until_next_reset(midnight, 0), Duration::from_secs(24 * 3600));
    }
}
