//! Error types for the checkout SDK

use thiserror::Error;

/// Error codes for checkout errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutErrorCode {
    /// Prefill token expired, already used or unknown
    PrefillUnavailable,
    /// Request rejected by server-side validation (missing email, bad order)
    ValidationError,
    /// Too many requests from this client
    RateLimited,
    /// Server or payment provider failure
    ServerError,
    /// Server unreachable or the response body was unreadable
    NetworkError,
}

impl std::fmt::Display for CheckoutErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PrefillUnavailable => write!(f, "PREFILL_UNAVAILABLE"),
            Self::ValidationError => write!(f, "VALIDATION_ERROR"),
            Self::RateLimited => write!(f, "RATE_LIMITED"),
            Self::ServerError => write!(f, "SERVER_ERROR"),
            Self::NetworkError => write!(f, "NETWORK_ERROR"),
        }
    }
}

/// Checkout SDK error
#[derive(Debug, Clone, Error)]
#[error("{message} (code: {code})")]
pub struct CheckoutError {
    pub code: CheckoutErrorCode,
    pub message: String,
    /// Set when the server answered; `None` for transport failures.
    pub status_code: Option<u16>,
}

impl CheckoutError {
    pub fn new(code: CheckoutErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status_code: None,
        }
    }

    pub fn with_status(code: CheckoutErrorCode, message: impl Into<String>, status_code: u16) -> Self {
        Self {
            code,
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(CheckoutErrorCode::ValidationError, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(CheckoutErrorCode::NetworkError, message)
    }
}

/// Result type for checkout operations
pub type Result<T> = std::result::Result<T, CheckoutError>;

/// Map an HTTP status from the server to an error code. `path` is the API
/// route the error came from.
pub(crate) fn map_status_to_error_code(status: u16, path: &str) -> CheckoutErrorCode {
    if path.contains("/intake/prefill") && matches!(status, 401 | 403 | 404) {
        return CheckoutErrorCode::PrefillUnavailable;
    }
    match status {
        429 => CheckoutErrorCode::RateLimited,
        400..=499 => CheckoutErrorCode::ValidationError,
        _ => CheckoutErrorCode::ServerError,
    }
}
