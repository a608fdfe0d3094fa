use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    /// The rail does not operate in the payer's country. Callers should offer
    /// a different payment method instead of retrying.
    #[error("Unsupported country: gateway={gateway}, country={country}")]
    UnsupportedCountry { gateway: String, country: String },

    #[error("Insufficient funds: {message}")]
    InsufficientFundsError { message: String },

    #[error("Payment declined: {message}")]
    PaymentDeclinedError {
        message: String,
        provider_code: Option<String>,
    },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Webhook verification failed: {message}")]
    WebhookVerificationError { message: String },

    #[error("Provider error: provider={provider}, message={message}")]
    ProviderError {
        provider: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },
}

impl PaymentError {
    pub fn validation(message: impl Into<String>, field: &str) -> Self {
        PaymentError::ValidationError {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    pub fn provider(provider: &str, message: impl Into<String>, retryable: bool) -> Self {
        PaymentError::ProviderError {
            provider: provider.to_string(),
            message: message.into(),
            provider_code: None,
            retryable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::UnsupportedCountry { .. } => false,
            PaymentError::InsufficientFundsError { .. } => false,
            PaymentError::PaymentDeclinedError { .. } => false,
            PaymentError::NetworkError { .. } => true,
            PaymentError::RateLimitError { .. } => true,
            PaymentError::WebhookVerificationError { .. } => false,
            PaymentError::ProviderError { retryable, .. } => *retryable,
        }
    }

    /// Validation-class errors are raised before any network call.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PaymentError::ValidationError { .. } | PaymentError::UnsupportedCountry { .. }
        )
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ValidationError { .. } => 400,
            PaymentError::UnsupportedCountry { .. } => 422,
            PaymentError::InsufficientFundsError { .. } => 402,
            PaymentError::PaymentDeclinedError { .. } => 402,
            PaymentError::NetworkError { .. } => 503,
            PaymentError::RateLimitError { .. } => 429,
            PaymentError::WebhookVerificationError { .. } => 401,
            PaymentError::ProviderError { .. } => 502,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::UnsupportedCountry { .. } => {
                "This payment method is not available in your country. Please choose another method"
                    .to_string()
            }
            PaymentError::InsufficientFundsError { .. } => {
                "Insufficient funds to complete payment".to_string()
            }
            PaymentError::PaymentDeclinedError { .. } => {
                "Payment was declined by the provider".to_string()
            }
            PaymentError::NetworkError { .. } => {
                "Payment provider is temporarily unavailable".to_string()
            }
            PaymentError::RateLimitError { .. } => {
                "Too many requests to payment provider. Please retry shortly".to_string()
            }
            PaymentError::WebhookVerificationError { .. } => {
                "Invalid webhook signature".to_string()
            }
            PaymentError::ProviderError { .. } => "Payment provider returned an error".to_string(),
        }
    }
}
