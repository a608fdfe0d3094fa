pub mod airtel_money;
pub mod flutterwave;
pub mod mpesa;
pub mod mtn_momo;
pub mod orange_money;
pub mod paypal;
pub mod paystack;
pub mod razorpay;
pub mod sandbox;
pub mod stripe;
pub mod wave;

pub use airtel_money::{AirtelMoneyConfig, AirtelMoneyGateway};
pub use flutterwave::{FlutterwaveConfig, FlutterwaveGateway};
pub use mpesa::{MpesaConfig, MpesaGateway};
pub use mtn_momo::{MtnMomoConfig, MtnMomoGateway};
pub use orange_money::{OrangeMoneyConfig, OrangeMoneyGateway};
pub use paypal::{PaypalConfig, PaypalGateway};
pub use paystack::{PaystackConfig, PaystackGateway};
pub use razorpay::{RazorpayConfig, RazorpayGateway};
pub use sandbox::{SandboxConfig, SandboxGateway};
pub use stripe::{StripeConfig, StripeGateway};
pub use wave::{WaveConfig, WaveGateway};

use crate::payments::error::{PaymentError, PaymentResult};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub(crate) fn env_required(key: &str) -> PaymentResult<String> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| PaymentError::ValidationError {
            message: format!("{} environment variable is required", key),
            field: Some(key.to_string()),
        })
}

pub(crate) fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

pub(crate) fn env_timeout(key: &str) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .or_else(|| {
            std::env::var("GATEWAY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
        })
        .unwrap_or(30)
}

/// Cached OAuth access token for rails that issue short-lived bearer tokens
/// (PayPal, Daraja, MoMo, Airtel, Orange).
#[derive(Default)]
pub(crate) struct AccessTokenCache {
    slot: Mutex<Option<(String, Instant)>>,
}

impl AccessTokenCache {
    /// Returns the cached token, or fetches a new one holding the lock so
    /// concurrent callers share a single refresh.
    pub(crate) async fn get_or_fetch<F, Fut>(&self, fetch: F) -> PaymentResult<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PaymentResult<(String, u64)>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some((token, expires_at)) = slot.as_ref() {
            if Instant::now() < *expires_at {
                return Ok(token.clone());
            }
        }
        let (token, expires_in) = fetch().await?;
        // Refresh a minute early so a token never expires mid-request.
        let ttl = Duration::from_secs(expires_in.saturating_sub(60).max(1));
        *slot = Some((token.clone(), Instant::now() + ttl));
        Ok(token)
    }
}

/// Lenient parse of provider `expires_in` fields, which arrive as numbers or
/// strings depending on the rail.
pub(crate) fn expires_in_secs(value: &serde_json::Value) -> u64 {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse::<u64>().ok()))
        .unwrap_or(3600)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn token_cache_reuses_fresh_tokens() {
        let cache = AccessTokenCache::default();
        let counter = AtomicU32::new(0);
        let fetches = &counter;
        for _ in 0..3 {
            let token = cache
                .get_or_fetch(|| async move {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Ok(("tok".to_string(), 3600))
                })
                .await
                .unwrap();
            assert_eq!(token, "tok");
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn expires_in_accepts_strings() {
        assert_eq!(expires_in_secs(&serde_json::json!("3599")), 3599);
        assert_eq!(expires_in_secs(&serde_json::json!(120)), 120);
        assert_eq!(expires_in_secs(&serde_json::json!(null)), 3600);
    }
}
