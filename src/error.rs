//! Unified error handling for the funding engine
//!
//! Every layer keeps its own `thiserror` enum; they all convert into
//! [`AppError`], which carries the HTTP status, a stable error code and a
//! user-facing message that never exposes provider detail.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::payments::error::PaymentError;
use crate::services::exchange_rate::ExchangeRateError;

/// Error codes for programmatic handling by clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "FORBIDDEN")]
    Forbidden,
    #[serde(rename = "DAILY_LIMIT_EXCEEDED")]
    DailyLimitExceeded,
    #[serde(rename = "INVALID_STATE")]
    InvalidState,
    #[serde(rename = "INVALID_SHARES")]
    InvalidShares,
    #[serde(rename = "PAYMENT_DECLINED")]
    PaymentDeclined,
    #[serde(rename = "UNSUPPORTED_COUNTRY")]
    UnsupportedCountry,
    #[serde(rename = "DUPLICATE_TRANSACTION")]
    DuplicateTransaction,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,
    #[serde(rename = "INTEGRITY_ERROR")]
    IntegrityError,

    // External errors (401, 429, 502, 503, 504)
    #[serde(rename = "PAYMENT_PROVIDER_ERROR")]
    PaymentProviderError,
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimitError,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,
    #[serde(rename = "EXCHANGE_RATE_UNAVAILABLE")]
    ExchangeRateUnavailable,
    #[serde(rename = "INVALID_SIGNATURE")]
    InvalidSignature,

    // Generic
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Business rule outcomes
#[derive(Debug, Clone)]
pub enum DomainError {
    NotFound { entity: String, id: String },
    /// The resource belongs to another user
    Forbidden { entity: String, id: String },
    DailyLimitExceeded {
        plan_id: String,
        requested: i32,
        remaining: i32,
    },
    /// Illegal investment transition, e.g. withdrawing an active position
    InvalidStateTransition {
        entity: String,
        id: String,
        from: String,
        to: String,
    },
    SharesOutOfRange { requested: i32, min: i32, max: i32 },
    PaymentDeclined { reason: String },
    UnsupportedCountry { gateway: String, country: String },
    DuplicateTransaction { transaction_id: String },
}

/// Infrastructure-level errors (database, configuration, integrity)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Configuration { message: String },
    /// A storage invariant was violated (e.g. a provider id already owned)
    Integrity { message: String },
}

/// External service errors (payment rails, rate source)
#[derive(Debug, Clone)]
pub enum ExternalError {
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },
    Timeout { service: String, timeout_secs: u64 },
    ExchangeRate { message: String },
    WebhookVerification { gateway: String, message: String },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidCurrency { currency: String, reason: String },
    InvalidAmount { amount: String, reason: String },
    MissingField { field: String },
    InvalidField { field: String, reason: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }))
    }

    pub fn invalid_field(field: &str, reason: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::InvalidField {
            field: field.to_string(),
            reason: reason.into(),
        }))
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::NotFound { .. } => 404,
                DomainError::Forbidden { .. } => 403,
                DomainError::DailyLimitExceeded { .. } => 409,
                DomainError::InvalidStateTransition { .. } => 409,
                DomainError::SharesOutOfRange { .. } => 400,
                DomainError::PaymentDeclined { .. } => 402,
                DomainError::UnsupportedCountry { .. } => 422,
                DomainError::DuplicateTransaction { .. } => 409,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => 502,
                ExternalError::RateLimit { .. } => 429,
                ExternalError::Timeout { .. } => 504,
                ExternalError::ExchangeRate { .. } => 503,
                ExternalError::WebhookVerification { .. } => 401,
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::NotFound { .. } => ErrorCode::NotFound,
                DomainError::Forbidden { .. } => ErrorCode::Forbidden,
                DomainError::DailyLimitExceeded { .. } => ErrorCode::DailyLimitExceeded,
                DomainError::InvalidStateTransition { .. } => ErrorCode::InvalidState,
                DomainError::SharesOutOfRange { .. } => ErrorCode::InvalidShares,
                DomainError::PaymentDeclined { .. } => ErrorCode::PaymentDeclined,
                DomainError::UnsupportedCountry { .. } => ErrorCode::UnsupportedCountry,
                DomainError::DuplicateTransaction { .. } => ErrorCode::DuplicateTransaction,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
                InfrastructureError::Integrity { .. } => ErrorCode::IntegrityError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => ErrorCode::PaymentProviderError,
                ExternalError::RateLimit { .. } => ErrorCode::RateLimitError,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
                ExternalError::ExchangeRate { .. } => ErrorCode::ExchangeRateUnavailable,
                ExternalError::WebhookVerification { .. } => ErrorCode::InvalidSignature,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// User-facing message. Provider and infrastructure detail stays in logs.
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::NotFound { entity, id } => format!("{} '{}' not found", entity, id),
                DomainError::Forbidden { entity, .. } => {
                    format!("You do not have access to this {}", entity.to_lowercase())
                }
                DomainError::DailyLimitExceeded { remaining, .. } => format!(
                    "Daily share limit reached for this plan. {} shares remain today",
                    remaining
                ),
                DomainError::InvalidStateTransition { entity, from, to, .. } => format!(
                    "{} cannot move from {} to {}",
                    entity, from, to
                ),
                DomainError::SharesOutOfRange { min, max, .. } => {
                    format!("Shares must be between {} and {}", min, max)
                }
                DomainError::PaymentDeclined { .. } => {
                    "Payment was declined. Please try another method".to_string()
                }
                DomainError::UnsupportedCountry { .. } => {
                    "This payment method is not available in your country. Please choose another method"
                        .to_string()
                }
                DomainError::DuplicateTransaction { transaction_id } => {
                    format!("Transaction '{}' already exists", transaction_id)
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { is_retryable, .. } => {
                    if *is_retryable {
                        "Payment provider is temporarily unavailable. Please try again".to_string()
                    } else {
                        "Payment processing failed. Please contact support".to_string()
                    }
                }
                ExternalError::RateLimit { retry_after, .. } => match retry_after {
                    Some(secs) => format!(
                        "Too many requests. Please try again in {} seconds",
                        secs
                    ),
                    None => "Too many requests. Please try again later".to_string(),
                },
                ExternalError::Timeout { .. } => {
                    "The payment provider did not respond in time. Please try again".to_string()
                }
                ExternalError::ExchangeRate { .. } => {
                    "Currency conversion is temporarily unavailable".to_string()
                }
                ExternalError::WebhookVerification { .. } => "Invalid signature".to_string(),
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidCurrency { currency, reason } => {
                    format!("Invalid currency '{}': {}", currency, reason)
                }
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid {}: {}", field, reason)
                }
            },
        }
    }

    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
                InfrastructureError::Integrity { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { is_retryable, .. } => *is_retryable,
                ExternalError::RateLimit { .. } => true,
                ExternalError::Timeout { .. } => true,
                ExternalError::ExchangeRate { .. } => true,
                ExternalError::WebhookVerification { .. } => false,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(context) => write!(f, "{} ({})", self.user_message(), context),
            None => write!(f, "{}", self.user_message()),
        }
    }
}

impl std::error::Error for AppError {}

// From<DatabaseError> lives in database/error.rs.

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        let context = err.to_string();
        let kind = match err {
            PaymentError::ValidationError { message, field } => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: field.unwrap_or_else(|| "request".to_string()),
                    reason: message,
                })
            }
            PaymentError::UnsupportedCountry { gateway, country } => {
                AppErrorKind::Domain(DomainError::UnsupportedCountry { gateway, country })
            }
            PaymentError::InsufficientFundsError { message }
            | PaymentError::PaymentDeclinedError { message, .. } => {
                AppErrorKind::Domain(DomainError::PaymentDeclined { reason: message })
            }
            PaymentError::NetworkError { message } => {
                AppErrorKind::External(ExternalError::PaymentProvider {
                    provider: "gateway".to_string(),
                    message,
                    is_retryable: true,
                })
            }
            PaymentError::RateLimitError {
                retry_after_seconds,
                ..
            } => AppErrorKind::External(ExternalError::RateLimit {
                service: "payment provider".to_string(),
                retry_after: retry_after_seconds,
            }),
            PaymentError::WebhookVerificationError { message } => {
                AppErrorKind::External(ExternalError::WebhookVerification {
                    gateway: "unknown".to_string(),
                    message,
                })
            }
            PaymentError::ProviderError {
                provider,
                message,
                retryable,
                ..
            } => AppErrorKind::External(ExternalError::PaymentProvider {
                provider,
                message,
                is_retryable: retryable,
            }),
        };
        AppError::new(kind).with_context(context)
    }
}

impl From<ExchangeRateError> for AppError {
    fn from(err: ExchangeRateError) -> Self {
        let kind = match &err {
            ExchangeRateError::InvalidCurrency(currency) => {
                AppErrorKind::Validation(ValidationError::InvalidCurrency {
                    currency: currency.clone(),
                    reason: "expected a three-letter ISO code".to_string(),
                })
            }
            _ => AppErrorKind::External(ExternalError::ExchangeRate {
                message: err.to_string(),
            }),
        };
        AppError::new(kind)
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_limit_is_a_conflict() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::DailyLimitExceeded {
            plan_id: "p".to_string(),
            requested: 8,
            remaining: 2,
        }));
        assert_eq!(error.status_code(), 409);
        assert_eq!(error.error_code(), ErrorCode::DailyLimitExceeded);
        assert!(error.user_message().contains("2 shares remain"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn unsupported_country_is_distinguishable() {
        let error: AppError = PaymentError::UnsupportedCountry {
            gateway: "mpesa".to_string(),
            country: "NG".to_string(),
        }
        .into();
        assert_eq!(error.status_code(), 422);
        assert_eq!(error.error_code(), ErrorCode::UnsupportedCountry);
    }

    #[test]
    fn provider_detail_never_reaches_the_user() {
        let error: AppError = PaymentError::ProviderError {
            provider: "stripe".to_string(),
            message: "card_declined: secret internal code 0x42".to_string(),
            provider_code: Some("card_declined".to_string()),
            retryable: false,
        }
        .into();
        assert_eq!(error.status_code(), 502);
        assert!(!error.user_message().contains("0x42"));
        assert!(error.context.as_deref().unwrap_or("").contains("0x42"));
    }

    #[test]
    fn validation_maps_to_400() {
        let error: AppError = PaymentError::validation("phone number is required", "phone").into();
        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::ValidationError);
        assert!(error.user_message().contains("phone"));
    }

    #[test]
    fn missing_rate_is_retryable_503() {
        let error: AppError = ExchangeRateError::RateNotFound {
            from: "USD".to_string(),
            to: "NGN".to_string(),
        }
        .into();
        assert_eq!(error.status_code(), 503);
        assert!(error.is_retryable());
    }
}
