//! Error Types
//!
//! Crate-wide error taxonomy. Recoverable failures travel as `AppResult<T>`;
//! the kind decides whether a caller retries, logs or surfaces the failure.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::money::MoneyError;

/// Result type used by every fallible operation in the crate
pub type AppResult<T> = Result<T, AppError>;

/// How loudly the layer above should react to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone)]
pub enum AppError {
    // === Non-retryable ===
    #[error("Validation failed{}: {message}", .field.as_ref().map(|f| format!(" for {f}")).unwrap_or_default())]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("{resource} not found: {id}")]
    NotFound {
        code: &'static str,
        resource: &'static str,
        id: String,
    },

    // === Retryable ===
    #[error("{service} failed: {message}")]
    ExternalService {
        service: String,
        message: String,
        status: Option<u16>,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout { operation: String, after: Duration },

    #[error("Concurrent modification: {0}")]
    Concurrency(String),

    // === Generic ===
    #[error("{message}")]
    Service { code: &'static str, message: String },

    #[error("{message} ({} errors)", .errors.len())]
    Aggregate {
        message: String,
        errors: Vec<AppError>,
    },
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: None,
        }
    }

    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn not_found(code: &'static str, resource: &'static str, id: impl Into<String>) -> Self {
        AppError::NotFound {
            code,
            resource,
            id: id.into(),
        }
    }

    pub fn service(code: &'static str, message: impl Into<String>) -> Self {
        AppError::Service {
            code,
            message: message.into(),
        }
    }

    pub fn external(service: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::ExternalService {
            service: service.into(),
            message: message.into(),
            status: None,
        }
    }

    /// Classify a free-form failure reported by an external provider.
    ///
    /// Providers rarely hand back typed errors, so the message decides:
    /// timeouts and connectivity problems get their own retryable kinds.
    pub fn classify(service: impl Into<String>, message: impl Into<String>) -> Self {
        let service = service.into();
        let message = message.into();
        let lower = message.to_lowercase();

        if lower.contains("timeout") || lower.contains("timed out") {
            AppError::Timeout {
                operation: service,
                after: Duration::ZERO,
            }
        } else if lower.contains("network")
            || lower.contains("connection")
            || lower.contains("econnrefused")
            || lower.contains("econnreset")
            || lower.contains("dns")
        {
            AppError::Network(format!("{service}: {message}"))
        } else {
            AppError::ExternalService {
                service,
                message,
                status: None,
            }
        }
    }

    /// Stable error code for logs and the presentation layer
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation { .. } => "VALIDATION_ERROR",
            AppError::NotFound { code, .. } => *code,
            AppError::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            AppError::Network(_) => "NETWORK_ERROR",
            AppError::Timeout { .. } => "TIMEOUT",
            AppError::Concurrency(_) => "CONCURRENCY_ERROR",
            AppError::Service { code, .. } => *code,
            AppError::Aggregate { .. } => "AGGREGATE_ERROR",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            AppError::Validation { .. } | AppError::Concurrency(_) => Severity::Low,
            AppError::NotFound { .. } | AppError::Network(_) | AppError::Timeout { .. } => {
                Severity::Medium
            }
            AppError::ExternalService { status, .. } => match status {
                Some(s) if *s >= 500 => Severity::High,
                _ => Severity::Medium,
            },
            AppError::Service { .. } => Severity::High,
            AppError::Aggregate { errors, .. } => errors
                .iter()
                .map(AppError::severity)
                .max()
                .unwrap_or(Severity::Low),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Validation { .. } | AppError::NotFound { .. } | AppError::Service { .. } => {
                false
            }
            AppError::Network(_) | AppError::Timeout { .. } | AppError::Concurrency(_) => true,
            AppError::ExternalService { status, .. } => match status {
                Some(408) | Some(429) => true,
                Some(s) => !(400..500).contains(s),
                None => true,
            },
            AppError::Aggregate { errors, .. } => {
                !errors.is_empty() && errors.iter().all(AppError::is_retryable)
            }
        }
    }

    /// Message suitable for showing to an end user
    pub fn user_message(&self) -> String {
        match self {
            AppError::Validation { message, .. } => format!("Invalid input: {message}"),
            AppError::NotFound { resource, .. } => format!("The requested {resource} is not available"),
            AppError::ExternalService { service, .. } => {
                format!("{service} is currently unavailable. Please try again later.")
            }
            AppError::Network(_) => "Network connection problem. Check your connection.".to_string(),
            AppError::Timeout { .. } => "The request took too long. Please try again.".to_string(),
            AppError::Concurrency(_) => {
                "The data was updated elsewhere. Please refresh.".to_string()
            }
            AppError::Service { .. } => "Something went wrong. Please try again.".to_string(),
            AppError::Aggregate { errors, .. } => match errors.first() {
                Some(first) if errors.len() == 1 => first.user_message(),
                _ => format!("{} operations failed", errors.len()),
            },
        }
    }
}

impl From<MoneyError> for AppError {
    fn from(e: MoneyError) -> Self {
        AppError::validation(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::service("SERIALIZATION_ERROR", e.to_string())
    }
}

impl From<sled::Error> for AppError {
    fn from(e: sled::Error) -> Self {
        AppError::service("STORAGE_ERROR", e.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AppError::Timeout {
                operation: e
                    .url()
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| "http request".to_string()),
                after: Duration::ZERO,
            }
        } else if e.is_connect() {
            AppError::Network(e.to_string())
        } else {
            AppError::ExternalService {
                service: "http".to_string(),
                message: e.to_string(),
                status: e.status().map(|s| s.as_u16()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(AppError::validation("x").code(), "VALIDATION_ERROR");
        assert_eq!(
            AppError::not_found("PROVIDER_NOT_FOUND", "provider", "solana").code(),
            "PROVIDER_NOT_FOUND"
        );
        assert_eq!(AppError::Network("down".into()).code(), "NETWORK_ERROR");
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(!AppError::validation("bad").is_retryable());
        assert!(!AppError::not_found("PROVIDER_NOT_FOUND", "provider", "x").is_retryable());
        assert!(AppError::Network("reset".into()).is_retryable());
        assert!(AppError::Concurrency("version".into()).is_retryable());

        let rate_limited = AppError::ExternalService {
            service: "coingecko".into(),
            message: "slow down".into(),
            status: Some(429),
        };
        assert!(rate_limited.is_retryable());

        let bad_request = AppError::ExternalService {
            service: "coingecko".into(),
            message: "unknown id".into(),
            status: Some(404),
        };
        assert!(!bad_request.is_retryable());
    }

    #[test]
    fn test_classify_by_message() {
        assert!(matches!(
            AppError::classify("rpc", "request timed out"),
            AppError::Timeout { .. }
        ));
        assert!(matches!(
            AppError::classify("rpc", "connection refused"),
            AppError::Network(_)
        ));
        assert!(matches!(
            AppError::classify("rpc", "invalid params"),
            AppError::ExternalService { .. }
        ));
    }

    #[test]
    fn test_aggregate_severity_and_retry() {
        let agg = AppError::Aggregate {
            message: "batch failed".into(),
            errors: vec![
                AppError::Network("a".into()),
                AppError::ExternalService {
                    service: "p".into(),
                    message: "boom".into(),
                    status: Some(503),
                },
            ],
        };
        assert_eq!(agg.severity(), Severity::High);
        assert!(agg.is_retryable());

        let mixed = AppError::Aggregate {
            message: "batch failed".into(),
            errors: vec![AppError::Network("a".into()), AppError::validation("b")],
        };
        assert!(!mixed.is_retryable());

        let empty = AppError::Aggregate {
            message: "nothing".into(),
            errors: vec![],
        };
        assert!(!empty.is_retryable());
        assert_eq!(empty.severity(), Severity::Low);
    }

    #[test]
    fn test_display() {
        let err = AppError::invalid_field("symbol", "must not be empty");
        assert_eq!(err.to_string(), "Validation failed for symbol: must not be empty");
        assert_eq!(err.user_message(), "Invalid input: must not be empty");
    }
}
