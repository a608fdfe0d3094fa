//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use crate::payments::factory::GatewayRegistryConfig;
use crate::payments::poller::PollConfig;
use crate::payments::retry::RetryPolicy;
use crate::services::exchange_rate::ExchangeRateServiceConfig;
use crate::services::investment_lifecycle::LifecycleConfig;
use crate::services::payment_orchestrator::OrchestratorConfig;
use bigdecimal::{BigDecimal, Zero};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub engine: EngineConfig,
    pub scheduler: SchedulerConfig,
    pub gateways: GatewayRegistryConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
    /// Run on in-memory stores; no database is contacted.
    pub skip_externals: bool,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Money rules and engine tuning
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub share_price_usd: BigDecimal,
    pub verification_fee_usd: BigDecimal,
    pub referral_bonus_percent: BigDecimal,
    pub cancellation_penalty_percent: BigDecimal,
    pub auto_reinvest_grace_hours: i64,
    /// Issue attempts before an owed cancellation refund is left to an operator.
    pub refund_max_attempts: i32,
    pub retry_max_attempts: u32,
    pub retry_initial_delay_ms: u64,
    pub gateway_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub poll_max_attempts: u32,
    pub rate_cache_ttl_secs: u64,
    pub rate_api_url: Option<String>,
    /// `NGN=1500,KES=129.5`; used instead of the rate API when set.
    pub fixed_rates: Option<String>,
    pub callback_base_url: String,
}

/// Sweep cadence
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub maturity_sweep_interval: Duration,
    pub reinvest_sweep_interval: Duration,
    pub reinvest_sweep_offset: Duration,
    /// Cadence for reissuing cancellation refunds that could not be sent.
    pub refund_sweep_interval: Duration,
    pub daily_reset_hour_utc: u32,
    pub batch_size: i64,
}

fn env_or<T: FromStr>(key: &str, default: &str) -> Result<T, ConfigError> {
    parse_value(key, &env::var(key).unwrap_or_else(|_| default.to_string()))
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            engine: EngineConfig::from_env()?,
            scheduler: SchedulerConfig::from_env()?,
            gateways: GatewayRegistryConfig::from_env()
                .map_err(|e| ConfigError::ValidationFailed(e.to_string()))?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.logging.validate()?;
        self.engine.validate()?;
        self.scheduler.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env_or("SERVER_PORT", "8000")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let skip_externals: bool = env_or("SKIP_EXTERNALS", "false")?;
        let url = match env::var("DATABASE_URL") {
            Ok(url) => url,
            Err(_) if skip_externals => String::new(),
            Err(_) => return Err(ConfigError::MissingVariable("DATABASE_URL".to_string())),
        };

        Ok(DatabaseConfig {
            url,
            max_connections: env_or("DB_MAX_CONNECTIONS", "20")?,
            min_connections: env_or("DB_MIN_CONNECTIONS", "5")?,
            connection_timeout: env_or("DB_CONNECTION_TIMEOUT", "30")?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
            skip_externals,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.skip_externals {
            return Ok(());
        }

        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            share_price_usd: BigDecimal::from(10),
            verification_fee_usd: BigDecimal::from(2),
            referral_bonus_percent: BigDecimal::from(5),
            cancellation_penalty_percent: BigDecimal::from(10),
            auto_reinvest_grace_hours: 48,
            refund_max_attempts: 5,
            retry_max_attempts: 3,
            retry_initial_delay_ms: 1000,
            gateway_timeout_secs: 30,
            poll_interval_secs: 10,
            poll_max_attempts: 30,
            rate_cache_ttl_secs: 3600,
            rate_api_url: None,
            fixed_rates: None,
            callback_base_url: "http://localhost:8000".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(EngineConfig {
            share_price_usd: env_or("SHARE_PRICE_USD", "10")?,
            verification_fee_usd: env_or("VERIFICATION_FEE_USD", "2")?,
            referral_bonus_percent: env_or("REFERRAL_BONUS_PERCENT", "5")?,
            cancellation_penalty_percent: env_or("CANCELLATION_PENALTY_PERCENT", "10")?,
            auto_reinvest_grace_hours: env_or("AUTO_REINVEST_GRACE_HOURS", "48")?,
            refund_max_attempts: env_or("REFUND_MAX_ATTEMPTS", "5")?,
            retry_max_attempts: env_or("RETRY_MAX_ATTEMPTS", "3")?,
            retry_initial_delay_ms: env_or("RETRY_INITIAL_DELAY_MS", "1000")?,
            gateway_timeout_secs: env_or("GATEWAY_TIMEOUT_SECS", "30")?,
            poll_interval_secs: env_or("POLL_INTERVAL_SECS", "10")?,
            poll_max_attempts: env_or("POLL_MAX_ATTEMPTS", "30")?,
            rate_cache_ttl_secs: env_or("RATE_CACHE_TTL_SECS", "3600")?,
            rate_api_url: env_optional("RATE_API_URL"),
            fixed_rates: env_optional("FIXED_RATES"),
            callback_base_url: env::var("CALLBACK_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.share_price_usd <= BigDecimal::zero() {
            return Err(ConfigError::InvalidValue("SHARE_PRICE_USD".to_string()));
        }

        let hundred = BigDecimal::from(100);
        for (key, percent) in [
            ("REFERRAL_BONUS_PERCENT", &self.referral_bonus_percent),
            ("CANCELLATION_PENALTY_PERCENT", &self.cancellation_penalty_percent),
        ] {
            if *percent < BigDecimal::zero() || *percent > hundred {
                return Err(ConfigError::InvalidValue(format!(
                    "{} must be between 0 and 100",
                    key
                )));
            }
        }

        if self.auto_reinvest_grace_hours < 0 {
            return Err(ConfigError::InvalidValue(
                "AUTO_REINVEST_GRACE_HOURS".to_string(),
            ));
        }

        if self.refund_max_attempts <= 0 {
            return Err(ConfigError::InvalidValue("REFUND_MAX_ATTEMPTS".to_string()));
        }

        if self.retry_max_attempts == 0 {
            return Err(ConfigError::InvalidValue("RETRY_MAX_ATTEMPTS".to_string()));
        }

        if self.gateway_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue("GATEWAY_TIMEOUT_SECS".to_string()));
        }

        if self.poll_max_attempts == 0 {
            return Err(ConfigError::InvalidValue("POLL_MAX_ATTEMPTS".to_string()));
        }

        if !self.callback_base_url.starts_with("http://")
            && !self.callback_base_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidValue(
                "CALLBACK_BASE_URL must be a valid URL".to_string(),
            ));
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_max_attempts,
            Duration::from_millis(self.retry_initial_delay_ms),
        )
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            retry: self.retry_policy(),
            gateway_timeout: Duration::from_secs(self.gateway_timeout_secs),
            callback_base_url: self.callback_base_url.clone(),
        }
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(self.poll_interval_secs),
            max_attempts: self.poll_max_attempts,
            call_timeout: Duration::from_secs(self.gateway_timeout_secs),
        }
    }

    pub fn rate_service_config(&self) -> ExchangeRateServiceConfig {
        ExchangeRateServiceConfig {
            cache_ttl: Duration::from_secs(self.rate_cache_ttl_secs),
        }
    }

    pub fn lifecycle_config(&self, sweep_batch_size: i64) -> LifecycleConfig {
        LifecycleConfig {
            share_price_usd: self.share_price_usd.clone(),
            cancellation_penalty_percent: self.cancellation_penalty_percent.clone(),
            reinvest_grace: chrono::Duration::hours(self.auto_reinvest_grace_hours),
            refund_max_attempts: self.refund_max_attempts,
            sweep_batch_size,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            maturity_sweep_interval: Duration::from_secs(3600),
            reinvest_sweep_interval: Duration::from_secs(3600),
            reinvest_sweep_offset: Duration::from_secs(1800),
            refund_sweep_interval: Duration::from_secs(600),
            daily_reset_hour_utc: 0,
            batch_size: 500,
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(SchedulerConfig {
            maturity_sweep_interval: Duration::from_secs(env_or(
                "MATURITY_SWEEP_INTERVAL_SECS",
                "3600",
            )?),
            reinvest_sweep_interval: Duration::from_secs(env_or(
                "REINVEST_SWEEP_INTERVAL_SECS",
                "3600",
            )?),
            reinvest_sweep_offset: Duration::from_secs(env_or(
                "REINVEST_SWEEP_OFFSET_SECS",
                "1800",
            )?),
            refund_sweep_interval: Duration::from_secs(env_or(
                "REFUND_SWEEP_INTERVAL_SECS",
                "600",
            )?),
            daily_reset_hour_utc: env_or("DAILY_RESET_HOUR_UTC", "0")?,
            batch_size: env_or("SWEEP_BATCH_SIZE", "500")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.maturity_sweep_interval.is_zero()
            || self.reinvest_sweep_interval.is_zero()
            || self.refund_sweep_interval.is_zero()
        {
            return Err(ConfigError::InvalidValue(
                "sweep intervals must be positive".to_string(),
            ));
        }

        if self.daily_reset_hour_utc > 23 {
            return Err(ConfigError::InvalidValue("DAILY_RESET_HOUR_UTC".to_string()));
        }

        if self.batch_size <= 0 {
            return Err(ConfigError::InvalidValue("SWEEP_BATCH_SIZE".to_string()));
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_port_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_database_url_not_required_without_externals() {
        let config = DatabaseConfig {
            url: String::new(),
            max_connections: 20,
            min_connections: 5,
            connection_timeout: 30,
            idle_timeout: None,
            skip_externals: true,
        };
        assert!(config.validate().is_ok());

        let config = DatabaseConfig {
            skip_externals: false,
            ..config
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_engine_defaults_are_valid() {
        let engine = EngineConfig::default();
        assert!(engine.validate().is_ok());

        let retry = engine.retry_policy();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.initial_delay, Duration::from_millis(1000));
        assert_eq!(
            engine.rate_service_config().cache_ttl,
            Duration::from_secs(3600)
        );
    }

    #[test]
    fn test_penalty_percent_bounds() {
        let engine = EngineConfig {
            cancellation_penalty_percent: BigDecimal::from(101),
            ..EngineConfig::default()
        };
        assert!(engine.validate().is_err());
    }

    #[test]
    fn test_parse_value_reports_key() {
        let parsed: u32 = parse_value("POLL_MAX_ATTEMPTS", " 12 ").unwrap();
        assert_eq!(parsed, 12);

        let err = parse_value::<u32>("POLL_MAX_ATTEMPTS", "twelve").unwrap_err();
        assert!(err.to_string().contains("POLL_MAX_ATTEMPTS"));

        let percent: BigDecimal = parse_value("REFERRAL_BONUS_PERCENT", "2.5").unwrap();
        assert_eq!(percent, BigDecimal::from_str("2.5").unwrap());
    }

    #[test]
    fn test_scheduler_reset_hour_bounds() {
        let scheduler = SchedulerConfig {
            daily_reset_hour_utc: 24,
            ..SchedulerConfig::default()
        };
        assert!(scheduler.validate().is_err());
        assert!(SchedulerConfig::default().validate().is_ok());
    }
}
