//! Error types for the provider crate.

use thiserror::Error;

/// Errors returned by provider and user-directory collaborators.
///
/// Every variant carries enough text to be surfaced to an operator; the
/// transient/fatal split is what automation keys retry decisions on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Network failure, timeout, rate limiting, a gateway error, or a 500
    /// without a provider exception code.
    #[error("transient provider error during {operation}: {message}")]
    Transient {
        /// The provider operation that failed.
        operation: String,
        /// Provider or transport message.
        message: String,
    },

    /// The provider rejected the request (invalid state, permission denied, bad input).
    #[error("provider rejected {operation}: {message}")]
    Fatal {
        /// The provider operation that failed.
        operation: String,
        /// Provider message.
        message: String,
    },

    /// The provider refused an order (bad location, unavailable item, quota).
    #[error("order rejected during {operation}: {message}")]
    OrderRejected {
        /// The provider operation that failed.
        operation: String,
        /// Provider message.
        message: String,
    },

    /// The addressed object does not exist at the provider.
    #[error("not found: {resource}")]
    NotFound {
        /// Description of the missing resource.
        resource: String,
    },

    /// The provider answered with a payload we could not interpret.
    #[error("failed to decode provider response for {operation}: {message}")]
    Decode {
        /// The provider operation whose response was malformed.
        operation: String,
        /// Parser message.
        message: String,
    },
}

impl ProviderError {
    /// Build a transient error.
    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Build a fatal error.
    pub fn fatal(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fatal {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Build a not-found error.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Check if this error is retriable.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Classify an HTTP status returned by the provider without an
    /// exception code.
    #[must_use]
    pub fn from_status(operation: &str, status: u16, message: String) -> Self {
        match status {
            404 => Self::not_found(format!("{operation}: {message}")),
            429 | 500 | 502..=504 => {
                Self::transient(operation, format!("HTTP {status}: {message}"))
            }
            _ => Self::fatal(operation, format!("HTTP {status}: {message}")),
        }
    }

    /// Classify a failed response from its status and the exception code in
    /// the error body, if any.
    ///
    /// The provider reports most exceptions as HTTP 500, so a code always
    /// takes precedence over a 500. Rate limiting and gateway errors stay
    /// transient whatever the body says.
    #[must_use]
    pub fn classify(operation: &str, status: u16, code: Option<&str>, message: String) -> Self {
        let Some(code) = code else {
            return Self::from_status(operation, status, message);
        };

        if code.ends_with("ObjectNotFound") {
            return Self::not_found(format!("{operation}: {message}"));
        }
        if matches!(status, 429 | 502..=504) {
            return Self::transient(operation, format!("HTTP {status}: {message}"));
        }
        if code.starts_with("SoftLayer_Exception_Order") {
            return Self::OrderRejected {
                operation: operation.to_string(),
                message: format!("{code}: {message}"),
            };
        }
        if code.starts_with("SoftLayer_Exception") || code.ends_with("NotAuthorized") {
            return Self::fatal(operation, format!("{code}: {message}"));
        }
        Self::from_status(operation, status, message)
    }
}

/// A specialized Result type for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;
