//! Exchange Rate Service
//!
//! Spot USD conversion for gateway quotes. Rates are cached in process for
//! a fixed TTL; an expired entry is refreshed on demand and kept as a
//! fallback if the refresh fails.

use crate::payments::types::Money;
use async_trait::async_trait;
use bigdecimal::{BigDecimal, RoundingMode, Zero};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const BASE_CURRENCY: &str = "USD";

#[derive(Debug, Clone, thiserror::Error)]
pub enum ExchangeRateError {
    #[error("Rate not found for {from} -> {to}")]
    RateNotFound { from: String, to: String },

    #[error("Invalid rate: {0}")]
    InvalidRate(String),

    #[error("Rate provider error: {0}")]
    ProviderError(String),

    #[error("Invalid currency: {0}")]
    InvalidCurrency(String),
}

pub type ExchangeRateResult<T> = Result<T, ExchangeRateError>;

/// Source of spot rates.
#[async_trait]
pub trait RateProvider: Send + Sync {
    async fn fetch_rate(&self, from: &str, to: &str) -> ExchangeRateResult<RateData>;

    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateData {
    pub currency_pair: String,
    pub rate: BigDecimal,
    pub source: String,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ExchangeRateServiceConfig {
    pub cache_ttl: Duration,
}

impl Default for ExchangeRateServiceConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedRate {
    rate: BigDecimal,
    fetched_at: Instant,
}

pub struct ExchangeRateService {
    providers: Vec<Arc<dyn RateProvider>>,
    cache: RwLock<HashMap<String, CachedRate>>,
    config: ExchangeRateServiceConfig,
}

impl ExchangeRateService {
    pub fn new(config: ExchangeRateServiceConfig) -> Self {
        Self {
            providers: Vec::new(),
            cache: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn add_provider(mut self, provider: Arc<dyn RateProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Units of `currency` per one USD.
    pub async fn rate(&self, currency: &str) -> ExchangeRateResult<BigDecimal> {
        let currency = normalize(currency)?;
        if currency == BASE_CURRENCY {
            return Ok(BigDecimal::from(1));
        }

        let cached = self.cache.read().await.get(&currency).cloned();
        if let Some(entry) = &cached {
            if entry.fetched_at.elapsed() < self.config.cache_ttl {
                debug!(currency = %currency, "rate cache hit");
                return Ok(entry.rate.clone());
            }
        }

        // Concurrent misses may each refresh; the last write wins.
        match self.fetch(&currency).await {
            Ok(data) => {
                self.cache.write().await.insert(
                    currency.clone(),
                    CachedRate {
                        rate: data.rate.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                Ok(data.rate)
            }
            Err(err) => match cached {
                Some(stale) => {
                    warn!(
                        currency = %currency,
                        error = %err,
                        "rate refresh failed, serving stale value"
                    );
                    Ok(stale.rate)
                }
                None => Err(err),
            },
        }
    }

    /// Converts a USD amount to `currency`, rounded to that currency's
    /// precision.
    pub async fn convert_from_usd(
        &self,
        amount_usd: &BigDecimal,
        currency: &str,
    ) -> ExchangeRateResult<Money> {
        let rate = self.rate(currency).await?;
        let mut money = Money::new(amount_usd * rate, currency);
        let scale = if money.is_zero_decimal() { 0 } else { 2 };
        money.amount = money.amount.with_scale_round(scale, RoundingMode::HalfUp);
        Ok(money)
    }

    pub async fn invalidate(&self, currency: &str) {
        self.cache.write().await.remove(&currency.trim().to_uppercase());
    }

    async fn fetch(&self, currency: &str) -> ExchangeRateResult<RateData> {
        let mut last_error = None;
        for provider in &self.providers {
            match provider.fetch_rate(BASE_CURRENCY, currency).await {
                Ok(data) if data.rate > BigDecimal::zero() => return Ok(data),
                Ok(data) => {
                    last_error = Some(ExchangeRateError::InvalidRate(format!(
                        "{} returned non-positive rate {} for {}",
                        provider.name(),
                        data.rate,
                        data.currency_pair
                    )));
                }
                Err(e) => {
                    warn!(provider = provider.name(), currency, error = %e, "rate provider failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| ExchangeRateError::RateNotFound {
            from: BASE_CURRENCY.to_string(),
            to: currency.to_string(),
        }))
    }
}

fn normalize(currency: &str) -> ExchangeRateResult<String> {
    let code = currency.trim().to_uppercase();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ExchangeRateError::InvalidCurrency(currency.to_string()));
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
        fail: AtomicBool,
        rate: BigDecimal,
    }

    impl CountingProvider {
        fn new(rate: &str) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                rate: BigDecimal::from_str(rate).unwrap(),
            })
        }
    }

    #[async_trait]
    impl RateProvider for CountingProvider {
        async fn fetch_rate(&self, from: &str, to: &str) -> ExchangeRateResult<RateData> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(ExchangeRateError::ProviderError("down".to_string()));
            }
            Ok(RateData {
                currency_pair: format!("{}/{}", from, to),
                rate: self.rate.clone(),
                source: "test".to_string(),
                last_updated: Utc::now(),
            })
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    fn service(provider: Arc<CountingProvider>) -> ExchangeRateService {
        ExchangeRateService::new(ExchangeRateServiceConfig::default()).add_provider(provider)
    }

    #[tokio::test]
    async fn usd_is_identity_without_provider_call() {
        let provider = CountingProvider::new("1500");
        let service = service(provider.clone());
        assert_eq!(service.rate("usd").await.unwrap(), BigDecimal::from(1));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cached_until_ttl_expires() {
        let provider = CountingProvider::new("1500");
        let service = service(provider.clone());

        service.rate("NGN").await.unwrap();
        service.rate("NGN").await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(3601)).await;
        service.rate("NGN").await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_rate_served_when_refresh_fails() {
        let provider = CountingProvider::new("130");
        let service = service(provider.clone());
        service.rate("KES").await.unwrap();

        provider.fail.store(true, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(7200)).await;
        assert_eq!(service.rate("KES").await.unwrap(), BigDecimal::from(130));
    }

    #[tokio::test]
    async fn failure_without_cached_value_is_an_error() {
        let provider = CountingProvider::new("130");
        provider.fail.store(true, Ordering::SeqCst);
        let service = service(provider);
        assert!(service.rate("KES").await.is_err());
    }

    #[tokio::test]
    async fn conversion_rounds_to_currency_precision() {
        let service = service(CountingProvider::new("612.3456"));
        let xof = service
            .convert_from_usd(&BigDecimal::from(10), "XOF")
            .await
            .unwrap();
        assert_eq!(xof.amount, BigDecimal::from(6123));

        let service = ExchangeRateService::new(ExchangeRateServiceConfig::default())
            .add_provider(CountingProvider::new("1.23456"));
        let eur = service
            .convert_from_usd(&BigDecimal::from(10), "EUR")
            .await
            .unwrap();
        assert_eq!(eur.amount, BigDecimal::from_str("12.35").unwrap());
    }

    #[tokio::test]
    async fn rejects_malformed_currency() {
        let service = service(CountingProvider::new("1"));
        assert!(matches!(
            service.rate("NAIRA").await,
            Err(ExchangeRateError::InvalidCurrency(_))
        ));
    }
}
