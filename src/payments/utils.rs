use crate::payments::error::{PaymentError, PaymentResult};
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use sha2::{Sha256, Sha512};
use std::time::Duration;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// Credentials attached to an outbound provider call.
#[derive(Debug, Clone, Copy)]
pub enum Auth<'a> {
    None,
    Bearer(&'a str),
    Basic(&'a str, &'a str),
}

/// Thin transport for provider APIs. Classifies failures into
/// [`PaymentError`] so the retry policy can tell transient from terminal;
/// it never retries by itself.
#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    provider: &'static str,
    timeout: Duration,
}

impl PaymentHttpClient {
    pub fn new(provider: &'static str, timeout: Duration) -> PaymentResult<Self> {
        let client =
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| PaymentError::NetworkError {
                    message: format!("failed to initialize HTTP client: {}", e),
                })?;

        Ok(Self {
            client,
            provider,
            timeout,
        })
    }

    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        auth: Auth<'_>,
        body: Option<&JsonValue>,
        additional_headers: &[(&str, &str)],
    ) -> PaymentResult<T> {
        let mut request = self.prepare(method, url, auth, additional_headers);
        if let Some(payload) = body {
            request = request.json(payload);
        }
        let text = self.send(request).await?;
        self.decode(&text)
    }

    /// Form-encoded request (Stripe, OAuth token endpoints).
    pub async fn request_form<T: DeserializeOwned, F: Serialize + ?Sized>(
        &self,
        method: reqwest::Method,
        url: &str,
        auth: Auth<'_>,
        form: &F,
        additional_headers: &[(&str, &str)],
    ) -> PaymentResult<T> {
        let request = self
            .prepare(method, url, auth, additional_headers)
            .form(form);
        let text = self.send(request).await?;
        self.decode(&text)
    }

    /// For endpoints answering `202 Accepted` with an empty body.
    pub async fn request_accepted(
        &self,
        method: reqwest::Method,
        url: &str,
        auth: Auth<'_>,
        body: Option<&JsonValue>,
        additional_headers: &[(&str, &str)],
    ) -> PaymentResult<()> {
        let mut request = self.prepare(method, url, auth, additional_headers);
        if let Some(payload) = body {
            request = request.json(payload);
        }
        self.send(request).await.map(|_| ())
    }

    fn prepare(
        &self,
        method: reqwest::Method,
        url: &str,
        auth: Auth<'_>,
        additional_headers: &[(&str, &str)],
    ) -> reqwest::RequestBuilder {
        let mut request = self.client.request(method, url).timeout(self.timeout);
        request = match auth {
            Auth::None => request,
            Auth::Bearer(token) => request.bearer_auth(token),
            Auth::Basic(user, password) => request.basic_auth(user, Some(password)),
        };
        for (k, v) in additional_headers {
            request = request.header(*k, *v);
        }
        request
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> PaymentResult<String> {
        let resp = request.send().await.map_err(|e| PaymentError::NetworkError {
            message: format!("{} request failed: {}", self.provider, e),
        })?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if status.is_success() {
            return Ok(text);
        }

        if status.as_u16() == 429 {
            return Err(PaymentError::RateLimitError {
                message: format!("{} rate limit exceeded", self.provider),
                retry_after_seconds: None,
            });
        }

        if status.is_server_error() {
            warn!(
                provider = self.provider,
                status = %status,
                "provider server error"
            );
        }

        Err(PaymentError::ProviderError {
            provider: self.provider.to_string(),
            message: format!("HTTP {}: {}", status, text),
            provider_code: Some(status.as_u16().to_string()),
            retryable: status.is_server_error(),
        })
    }

    fn decode<T: DeserializeOwned>(&self, text: &str) -> PaymentResult<T> {
        serde_json::from_str::<T>(text).map_err(|e| PaymentError::ProviderError {
            provider: self.provider.to_string(),
            message: format!("invalid provider JSON response: {}", e),
            provider_code: None,
            retryable: false,
        })
    }
}

pub fn hmac_sha256(secret: &str, payload: &[u8]) -> Option<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(payload);
    Some(mac.finalize().into_bytes().to_vec())
}

pub fn verify_hmac_sha512_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    let mut mac = match HmacSha512::new_from_slice(secret.as_bytes()) {
        Ok(v) => v,
        Err(_) => return false,
    };
    mac.update(payload);
    let computed = hex::encode(mac.finalize().into_bytes());
    secure_eq(computed.as_bytes(), signature.trim().as_bytes())
}

pub fn verify_hmac_sha256_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    match hmac_sha256(secret, payload) {
        Some(raw) => secure_eq(
            hex::encode(raw).as_bytes(),
            signature.trim().to_lowercase().as_bytes(),
        ),
        None => false,
    }
}

pub fn verify_hmac_sha256_base64(payload: &[u8], secret: &str, signature: &str) -> bool {
    match hmac_sha256(secret, payload) {
        Some(raw) => secure_eq(
            base64::engine::general_purpose::STANDARD
                .encode(raw)
                .as_bytes(),
            signature.trim().as_bytes(),
        ),
        None => false,
    }
}

/// Verifies `t=<unix>,v1=<hex>` headers (Stripe, Wave), where the MAC covers
/// `"{t}{separator}{body}"`.
pub fn verify_timestamped_signature(
    payload: &[u8],
    secret: &str,
    header: &str,
    separator: &str,
) -> bool {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = Some(v),
            Some(("v1", v)) => signatures.push(v),
            _ => {}
        }
    }
    let Some(timestamp) = timestamp else {
        return false;
    };

    let mut signed = Vec::with_capacity(timestamp.len() + separator.len() + payload.len());
    signed.extend_from_slice(timestamp.as_bytes());
    signed.extend_from_slice(separator.as_bytes());
    signed.extend_from_slice(payload);

    signatures
        .iter()
        .any(|sig| verify_hmac_sha256_hex(&signed, secret, sig))
}

/// Per-payment token embedded in callback URLs for rails whose provider does
/// not sign notifications.
pub fn callback_token(secret: &str, reference: &str) -> String {
    hmac_sha256(secret, reference.as_bytes())
        .map(hex::encode)
        .unwrap_or_default()
}

pub fn signed_callback_url(base: &str, secret: &str, reference: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!(
        "{}{}ref={}&token={}",
        base,
        separator,
        reference,
        callback_token(secret, reference)
    )
}

pub fn verify_callback_token(secret: &str, reference: &str, token: &str) -> bool {
    !token.is_empty()
        && secure_eq(
            callback_token(secret, reference).as_bytes(),
            token.trim().as_bytes(),
        )
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_eq_behaves_correctly() {
        assert!(secure_eq(b"abc", b"abc"));
        assert!(!secure_eq(b"abc", b"abd"));
        assert!(!secure_eq(b"abc", b"ab"));
    }

    #[test]
    fn webhook_hmac_verification_detects_invalid_signature() {
        let payload = br#"{"event":"charge.success"}"#;
        let valid = verify_hmac_sha512_hex(payload, "secret", "not-a-valid-signature");
        assert!(!valid);
    }

    #[test]
    fn hmac_sha256_hex_round_trips() {
        let payload = br#"{"event":"payment.captured"}"#;
        let signature = hex::encode(hmac_sha256("whsec", payload).unwrap());
        assert!(verify_hmac_sha256_hex(payload, "whsec", &signature));
        assert!(!verify_hmac_sha256_hex(payload, "other", &signature));
    }

    #[test]
    fn timestamped_signature_requires_matching_timestamp() {
        let payload = br#"{"id":"evt_1"}"#;
        let signed = [b"1700000000.".as_slice(), payload.as_slice()].concat();
        let sig = hex::encode(hmac_sha256("whsec", &signed).unwrap());

        let header = format!("t=1700000000,v1={}", sig);
        assert!(verify_timestamped_signature(payload, "whsec", &header, "."));

        let tampered = format!("t=1700000001,v1={}", sig);
        assert!(!verify_timestamped_signature(payload, "whsec", &tampered, "."));
        assert!(!verify_timestamped_signature(payload, "whsec", "v1=abc", "."));
    }

    #[test]
    fn callback_tokens_bind_to_reference() {
        let url = signed_callback_url("https://api.example.com/payments/callback/mpesa", "s3", "p-1");
        let token = url.split("token=").nth(1).unwrap();
        assert!(url.contains("ref=p-1"));
        assert!(verify_callback_token("s3", "p-1", token));
        assert!(!verify_callback_token("s3", "p-2", token));
        assert!(!verify_callback_token("s3", "p-1", ""));
    }
}
