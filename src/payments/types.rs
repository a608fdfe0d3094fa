use crate::payments::error::{PaymentError, PaymentResult};
use bigdecimal::{BigDecimal, RoundingMode, ToPrimitive, Zero};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GatewayName {
    Stripe,
    Paypal,
    Paystack,
    Flutterwave,
    Razorpay,
    Wave,
    Mpesa,
    MtnMomo,
    AirtelMoney,
    OrangeMoney,
    Sandbox,
}

impl GatewayName {
    pub const ALL: [GatewayName; 11] = [
        GatewayName::Stripe,
        GatewayName::Paypal,
        GatewayName::Paystack,
        GatewayName::Flutterwave,
        GatewayName::Razorpay,
        GatewayName::Wave,
        GatewayName::Mpesa,
        GatewayName::MtnMomo,
        GatewayName::AirtelMoney,
        GatewayName::OrangeMoney,
        GatewayName::Sandbox,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayName::Stripe => "stripe",
            GatewayName::Paypal => "paypal",
            GatewayName::Paystack => "paystack",
            GatewayName::Flutterwave => "flutterwave",
            GatewayName::Razorpay => "razorpay",
            GatewayName::Wave => "wave",
            GatewayName::Mpesa => "mpesa",
            GatewayName::MtnMomo => "mtn_momo",
            GatewayName::AirtelMoney => "airtel_money",
            GatewayName::OrangeMoney => "orange_money",
            GatewayName::Sandbox => "sandbox",
        }
    }
}

impl std::fmt::Display for GatewayName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GatewayName {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().replace('-', "_").as_str() {
            "stripe" => Ok(GatewayName::Stripe),
            "paypal" => Ok(GatewayName::Paypal),
            "paystack" => Ok(GatewayName::Paystack),
            "flutterwave" => Ok(GatewayName::Flutterwave),
            "razorpay" => Ok(GatewayName::Razorpay),
            "wave" => Ok(GatewayName::Wave),
            "mpesa" | "m_pesa" => Ok(GatewayName::Mpesa),
            "mtn_momo" | "mtn" | "momo" => Ok(GatewayName::MtnMomo),
            "airtel_money" | "airtel" => Ok(GatewayName::AirtelMoney),
            "orange_money" | "orange" => Ok(GatewayName::OrangeMoney),
            "sandbox" => Ok(GatewayName::Sandbox),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported gateway: {}", value),
                field: Some("gateway".to_string()),
            }),
        }
    }
}

/// What a ledger entry moves money for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    Verification,
    Investment,
    Withdrawal,
    Refund,
}

impl PaymentKind {
    /// Money leaving the platform: payouts and refunds.
    pub fn is_transfer(&self) -> bool {
        matches!(self, PaymentKind::Withdrawal | PaymentKind::Refund)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentKind::Verification => "verification",
            PaymentKind::Investment => "investment",
            PaymentKind::Withdrawal => "withdrawal",
            PaymentKind::Refund => "refund",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "verification" => Some(PaymentKind::Verification),
            "investment" => Some(PaymentKind::Investment),
            "withdrawal" => Some(PaymentKind::Withdrawal),
            "refund" => Some(PaymentKind::Refund),
            _ => None,
        }
    }
}

/// Ledger status. Moves `Pending -> Success | Failed` exactly once.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(PaymentStatus::Pending),
            "success" => Some(PaymentStatus::Success),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalized answer from a provider about one transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProviderOutcome {
    Pending,
    Succeeded,
    Failed { reason: String },
}

impl ProviderOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        ProviderOutcome::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_definitive(&self) -> bool {
        !matches!(self, ProviderOutcome::Pending)
    }

    /// Ledger status this outcome terminates a payment with, if any.
    pub fn terminal_status(&self) -> Option<PaymentStatus> {
        match self {
            ProviderOutcome::Pending => None,
            ProviderOutcome::Succeeded => Some(PaymentStatus::Success),
            ProviderOutcome::Failed { .. } => Some(PaymentStatus::Failed),
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            ProviderOutcome::Failed { reason } => Some(reason.as_str()),
            _ => None,
        }
    }
}

/// How a rail reaches a terminal status after `initiate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementMode {
    /// Final answer returned by `initiate` itself.
    Synchronous,
    /// `initiate` authorizes; the orchestrator captures immediately.
    AuthorizeCapture,
    /// Payer completes on a provider page; outcome arrives by webhook or capture.
    Redirect,
    /// Push to the payer's handset; the engine polls for the outcome.
    Poll,
}

#[derive(Debug, Clone, Copy)]
pub enum CountryPolicy {
    Allow(&'static [&'static str]),
    Deny(&'static [&'static str]),
}

impl CountryPolicy {
    pub fn permits(&self, country: &str) -> bool {
        let normalized = country.trim().to_uppercase();
        match self {
            CountryPolicy::Allow(list) => list.iter().any(|c| *c == normalized),
            CountryPolicy::Deny(list) => !list.iter().any(|c| *c == normalized),
        }
    }
}

const ZERO_DECIMAL_CURRENCIES: &[&str] = &[
    "BIF", "CLP", "DJF", "GNF", "JPY", "KMF", "KRW", "MGA", "PYG", "RWF", "UGX", "VND", "VUV",
    "XAF", "XOF", "XPF",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Money {
    pub amount: BigDecimal,
    pub currency: String,
}

impl Money {
    pub fn new(amount: BigDecimal, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into().trim().to_uppercase(),
        }
    }

    pub fn validate_positive(&self, field: &str) -> Result<(), PaymentError> {
        if self.amount <= BigDecimal::zero() {
            return Err(PaymentError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some(field.to_string()),
            });
        }
        if self.currency.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "currency is required".to_string(),
                field: Some("currency".to_string()),
            });
        }
        Ok(())
    }

    pub fn is_zero_decimal(&self) -> bool {
        ZERO_DECIMAL_CURRENCIES.contains(&self.currency.as_str())
    }

    /// Amount in the currency's smallest unit (cents, kobo, paise).
    pub fn minor_units(&self) -> PaymentResult<i64> {
        let scaled = if self.is_zero_decimal() {
            self.amount.clone()
        } else {
            &self.amount * BigDecimal::from(100)
        };
        scaled
            .with_scale_round(0, RoundingMode::HalfUp)
            .to_i64()
            .ok_or_else(|| PaymentError::validation("amount out of range", "amount"))
    }

    /// Decimal string with the currency's precision, e.g. `"1250.50"`.
    pub fn major_string(&self) -> String {
        let scale = if self.is_zero_decimal() { 0 } else { 2 };
        self.amount
            .with_scale_round(scale, RoundingMode::HalfUp)
            .to_string()
    }

    /// Whole-unit amount for rails that reject decimals (M-Pesa, MoMo).
    pub fn whole_units(&self) -> PaymentResult<i64> {
        self.amount
            .with_scale_round(0, RoundingMode::Up)
            .to_i64()
            .ok_or_else(|| PaymentError::validation("amount out of range", "amount"))
    }
}

/// Payer- or payee-supplied details. Everything a rail might need; each
/// adapter checks the subset it requires.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PaymentDetails {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    /// Tokenized card / payment method reference from the client SDK.
    #[serde(default)]
    pub payment_method_token: Option<String>,
    #[serde(default)]
    pub account_number: Option<String>,
    #[serde(default)]
    pub bank_code: Option<String>,
    #[serde(default)]
    pub return_url: Option<String>,
    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, JsonValue>,
}

impl PaymentDetails {
    pub fn require_country(&self) -> PaymentResult<String> {
        self.country
            .as_deref()
            .map(|c| c.trim().to_uppercase())
            .filter(|c| c.len() == 2)
            .ok_or_else(|| PaymentError::validation("a two-letter country code is required", "country"))
    }

    pub fn require_email(&self, gateway: GatewayName) -> PaymentResult<String> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|e| e.contains('@'))
            .map(str::to_string)
            .ok_or_else(|| {
                PaymentError::validation(format!("a valid email is required for {}", gateway), "email")
            })
    }

    pub fn require_phone(&self) -> PaymentResult<String> {
        self.phone
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .ok_or_else(|| PaymentError::validation("phone number is required", "phone"))
    }

    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct InitiateRequest {
    /// Ledger id of the pending payment; used as the merchant reference.
    pub payment_id: Uuid,
    pub amount: Money,
    pub details: PaymentDetails,
    pub callback_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitiateResponse {
    pub accepted: bool,
    pub provider_tx_id: Option<String>,
    /// Outcome arrives later (redirect, push, webhook).
    pub pending: bool,
    /// Authorized but not yet captured.
    pub capture_required: bool,
    pub redirect_url: Option<String>,
    pub failure_reason: Option<String>,
    pub provider_data: Option<JsonValue>,
}

impl InitiateResponse {
    pub fn declined(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            failure_reason: Some(reason.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureResponse {
    pub outcome: ProviderOutcome,
    pub provider_data: Option<JsonValue>,
}

impl CaptureResponse {
    pub fn success(&self) -> bool {
        self.outcome == ProviderOutcome::Succeeded
    }
}

#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub payment_id: Uuid,
    pub amount: Money,
    pub original_tx_id: String,
    pub reason: Option<String>,
    pub callback_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefundResponse {
    pub success: bool,
    pub refund_tx_id: Option<String>,
    pub pending: bool,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PayoutRequest {
    pub payment_id: Uuid,
    pub amount: Money,
    pub details: PaymentDetails,
    pub callback_url: String,
    pub narration: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PayoutResponse {
    pub success: bool,
    pub provider_tx_id: Option<String>,
    pub pending: bool,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub outcome: ProviderOutcome,
    pub provider_tx_id: String,
    pub provider_data: Option<JsonValue>,
}

/// Inbound provider notification exactly as received.
#[derive(Debug, Clone, Default)]
pub struct RawCallback {
    /// Header names are stored lowercase.
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RawCallback {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_lowercase(), value.into());
        self
    }

    pub fn with_query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query.insert(name.to_string(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn json(&self) -> PaymentResult<JsonValue> {
        serde_json::from_slice(&self.body).map_err(|e| PaymentError::WebhookVerificationError {
            message: format!("invalid webhook JSON payload: {}", e),
        })
    }
}

/// Provider notification translated into engine terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackOutcome {
    pub gateway: GatewayName,
    pub event_type: String,
    pub provider_tx_id: String,
    pub outcome: ProviderOutcome,
    pub payload: JsonValue,
    /// Ledger payment id carried by a signed callback URL. When present the
    /// callback only authenticates that payment.
    #[serde(default)]
    pub signed_reference: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_name_parsing_accepts_aliases() {
        assert_eq!(GatewayName::from_str("M-Pesa").unwrap(), GatewayName::Mpesa);
        assert_eq!(GatewayName::from_str("mtn").unwrap(), GatewayName::MtnMomo);
        assert_eq!(
            GatewayName::from_str("orange_money").unwrap(),
            GatewayName::OrangeMoney
        );
        assert!(GatewayName::from_str("venmo").is_err());
        for name in GatewayName::ALL {
            assert_eq!(GatewayName::from_str(name.as_str()).unwrap(), name);
        }
    }

    #[test]
    fn minor_units_respect_zero_decimal_currencies() {
        let ngn = Money::new(BigDecimal::from_str("1500.255").unwrap(), "ngn");
        assert_eq!(ngn.minor_units().unwrap(), 150026);
        assert_eq!(ngn.major_string(), "1500.26");

        let ugx = Money::new(BigDecimal::from_str("37000.4").unwrap(), "UGX");
        assert_eq!(ugx.minor_units().unwrap(), 37000);
        assert_eq!(ugx.major_string(), "37000");
    }

    #[test]
    fn whole_units_round_up() {
        let kes = Money::new(BigDecimal::from_str("1290.01").unwrap(), "KES");
        assert_eq!(kes.whole_units().unwrap(), 1291);
    }

    #[test]
    fn country_policy_allow_and_deny() {
        let allow = CountryPolicy::Allow(&["KE", "TZ"]);
        assert!(allow.permits("ke"));
        assert!(!allow.permits("NG"));

        let deny = CountryPolicy::Deny(&["KP"]);
        assert!(deny.permits("US"));
        assert!(!deny.permits("kp"));
    }

    #[test]
    fn payment_details_keep_unknown_fields() {
        let details: PaymentDetails = serde_json::from_value(serde_json::json!({
            "phone": "+254712345678",
            "country": "KE",
            "sandbox_outcome": "pending"
        }))
        .expect("details should deserialize");
        assert_eq!(details.extra_str("sandbox_outcome"), Some("pending"));
        assert_eq!(details.require_country().unwrap(), "KE");
    }

    #[test]
    fn provider_outcome_maps_to_ledger_status() {
        assert_eq!(ProviderOutcome::Pending.terminal_status(), None);
        assert_eq!(
            ProviderOutcome::Succeeded.terminal_status(),
            Some(PaymentStatus::Success)
        );
        assert_eq!(
            ProviderOutcome::failed("cancelled").terminal_status(),
            Some(PaymentStatus::Failed)
        );
    }
}
