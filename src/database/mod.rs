pub mod error;
pub mod memory;
pub mod models;
pub mod repository;

#[cfg(feature = "database")]
pub mod investment_repository;
#[cfg(feature = "database")]
pub mod payment_repository;
#[cfg(feature = "database")]
pub mod plan_repository;
#[cfg(feature = "database")]
pub mod referral_repository;

use std::sync::Arc;

use self::memory::{
    InMemoryInvestmentStore, InMemoryPaymentLedger, InMemoryPlanStore, InMemoryReferralStore,
};
use self::repository::{InvestmentStore, PaymentLedger, PlanStore, ReferralStore};

/// The four stores the engine runs on, behind their traits.
#[derive(Clone)]
pub struct Stores {
    pub payments: Arc<dyn PaymentLedger>,
    pub investments: Arc<dyn InvestmentStore>,
    pub plans: Arc<dyn PlanStore>,
    pub referrals: Arc<dyn ReferralStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            payments: Arc::new(InMemoryPaymentLedger::new()),
            investments: Arc::new(InMemoryInvestmentStore::new()),
            plans: Arc::new(InMemoryPlanStore::new()),
            referrals: Arc::new(InMemoryReferralStore::new()),
        }
    }

    #[cfg(feature = "database")]
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        Self {
            payments: Arc::new(payment_repository::PaymentRepository::new(pool.clone())),
            investments: Arc::new(investment_repository::InvestmentRepository::new(pool.clone())),
            plans: Arc::new(plan_repository::PlanRepository::new(pool.clone())),
            referrals: Arc::new(referral_repository::ReferralRepository::new(pool)),
        }
    }
}

#[cfg(feature = "database")]
pub use pool::{health_check, init_pool, init_pool_from_config, PoolConfig};

#[cfg(feature = "database")]
mod pool {
    use sqlx::postgres::PgPoolOptions;
    use sqlx::PgPool;
    use std::time::Duration;
    use tracing::{error as log_error, info, warn};

    use super::error::DatabaseError;
    use crate::config::DatabaseConfig;

    #[derive(Debug, Clone)]
    pub struct PoolConfig {
        pub max_connections: u32,
        pub min_connections: u32,
        pub connection_timeout: Duration,
        pub idle_timeout: Duration,
        pub max_lifetime: Duration,
    }

    impl Default for PoolConfig {
        fn default() -> Self {
            Self {
                max_connections: 20,
                min_connections: 5,
                connection_timeout: Duration::from_secs(30),
                idle_timeout: Duration::from_secs(600),
                max_lifetime: Duration::from_secs(1800),
            }
        }
    }

    pub async fn init_pool(
        database_url: &str,
        config: Option<PoolConfig>,
    ) -> Result<PgPool, DatabaseError> {
        let config = config.unwrap_or_default();

        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            connection_timeout = ?config.connection_timeout,
            "Initializing database pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connection_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| {
                log_error!("Failed to initialize database pool: {}", e);
                DatabaseError::from_sqlx(e)
            })?;

        pool.acquire().await.map_err(|e| {
            log_error!("Failed to acquire test connection: {}", e);
            DatabaseError::from_sqlx(e)
        })?;

        info!("Database pool initialized");
        Ok(pool)
    }

    pub async fn health_check(pool: &PgPool) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").fetch_one(pool).await.map_err(|e| {
            warn!("Health check failed: {}", e);
            DatabaseError::from_sqlx(e)
        })?;
        Ok(())
    }

    pub async fn init_pool_from_config(config: &DatabaseConfig) -> Result<PgPool, DatabaseError> {
        let pool_config = PoolConfig {
            max_connections: config.max_connections,
            min_connections: config.min_connections,
            connection_timeout: Duration::from_secs(config.connection_timeout),
            idle_timeout: Duration::from_secs(config.idle_timeout.unwrap_or(600)),
            max_lifetime: Duration::from_secs(1800),
        };

        init_pool(&config.url, Some(pool_config)).await
    }

}
