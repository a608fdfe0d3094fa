//! Rate providers for the exchange rate service
//!
//! - FixedRateProvider: configured rates, for development and tests
//! - HttpRateProvider: `GET {RATE_API_URL}/{base}` returning a `rates` map

use super::exchange_rate::{ExchangeRateError, ExchangeRateResult, RateData, RateProvider};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct FixedRateProvider {
    rates: HashMap<String, BigDecimal>,
}

impl FixedRateProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rate(mut self, currency: &str, rate: BigDecimal) -> Self {
        self.rates.insert(currency.trim().to_uppercase(), rate);
        self
    }

    /// Parses `NGN=1500,KES=129.5`.
    pub fn parse(spec: &str) -> ExchangeRateResult<Self> {
        let mut provider = Self::new();
        for pair in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (code, value) = pair
                .split_once('=')
                .ok_or_else(|| ExchangeRateError::InvalidRate(pair.to_string()))?;
            let rate = BigDecimal::from_str(value.trim())
                .map_err(|e| ExchangeRateError::InvalidRate(format!("{}: {}", pair, e)))?;
            provider = provider.with_rate(code, rate);
        }
        Ok(provider)
    }
}

#[async_trait]
impl RateProvider for FixedRateProvider {
    async fn fetch_rate(&self, from: &str, to: &str) -> ExchangeRateResult<RateData> {
        let rate = self
            .rates
            .get(to)
            .cloned()
            .ok_or_else(|| ExchangeRateError::RateNotFound {
                from: from.to_string(),
                to: to.to_string(),
            })?;

        Ok(RateData {
            currency_pair: format!("{}/{}", from, to),
            rate,
            source: "fixed".to_string(),
            last_updated: Utc::now(),
        })
    }

    fn name(&self) -> &str {
        "FixedRateProvider"
    }
}

/// Fetches spot rates from an exchangerate-api style endpoint.
pub struct HttpRateProvider {
    api_url: String,
    client: reqwest::Client,
}

impl HttpRateProvider {
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> ExchangeRateResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExchangeRateError::ProviderError(e.to_string()))?;
        Ok(Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn extract_rate(body: &JsonValue, to: &str) -> Option<BigDecimal> {
        let rates = body
            .get("rates")
            .or_else(|| body.get("conversion_rates"))?;
        match rates.get(to)? {
            JsonValue::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
            JsonValue::String(s) => BigDecimal::from_str(s).ok(),
            _ => None,
        }
    }
}

#[async_trait]
impl RateProvider for HttpRateProvider {
    async fn fetch_rate(&self, from: &str, to: &str) -> ExchangeRateResult<RateData> {
        let url = format!("{}/{}", self.api_url, from);
        debug!(url = %url, to, "fetching spot rate");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ExchangeRateError::ProviderError(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ExchangeRateError::ProviderError(format!(
                "rate api returned {}",
                response.status()
            )));
        }
        let body: JsonValue = response
            .json()
            .await
            .map_err(|e| ExchangeRateError::ProviderError(e.to_string()))?;

        let rate = Self::extract_rate(&body, to).ok_or_else(|| ExchangeRateError::RateNotFound {
            from: from.to_string(),
            to: to.to_string(),
        })?;

        Ok(RateData {
            currency_pair: format!("{}/{}", from, to),
            rate,
            source: "http".to_string(),
            last_updated: Utc::now(),
        })
    }

    fn name(&self) -> &str {
        "HttpRateProvider"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixed_provider_returns_configured_rates() {
        let provider = FixedRateProvider::parse("NGN=1500, kes=129.5").unwrap();
        let ngn = provider.fetch_rate("USD", "NGN").await.unwrap();
        assert_eq!(ngn.rate, BigDecimal::from(1500));
        let kes = provider.fetch_rate("USD", "KES").await.unwrap();
        assert_eq!(kes.rate, BigDecimal::from_str("129.5").unwrap());
        assert!(provider.fetch_rate("USD", "GHS").await.is_err());
    }

    #[test]
    fn fixed_provider_rejects_malformed_pairs() {
        assert!(FixedRateProvider::parse("NGN:1500").is_err());
        assert!(FixedRateProvider::parse("NGN=abc").is_err());
    }

    #[test]
    fn extracts_numeric_and_string_rates() {
        let body = serde_json::json!({"rates": {"NGN": 1530.25, "XOF": "605"}});
        assert_eq!(
            HttpRateProvider::extract_rate(&body, "NGN"),
            Some(BigDecimal::from_str("1530.25").unwrap())
        );
        assert_eq!(
            HttpRateProvider::extract_rate(&body, "XOF"),
            Some(BigDecimal::from(605))
        );
        let alt = serde_json::json!({"conversion_rates": {"KES": 129}});
        assert_eq!(
            HttpRateProvider::extract_rate(&alt, "KES"),
            Some(BigDecimal::from(129))
        );
        assert_eq!(HttpRateProvider::extract_rate(&body, "GHS"), None);
    }
}
