use std::path::PathBuf;

use thiserror::Error;

use crate::models::Provider;

/// Type alias for Result with InvoiceError
pub type Result<T> = std::result::Result<T, InvoiceError>;

/// Message recorded in the run summary when a provider needs interactive auth
pub const AUTH_REQUIRED: &str = "AUTH_REQUIRED";

/// Message recorded in the run summary when a provider was aborted
pub const CANCELLED: &str = "CANCELLED";

/// Error types for the invoice acquisition workflow
#[derive(Error, Debug)]
pub enum InvoiceError {
    /// Malformed or partial month/year input
    #[error("Invalid date spec: {0}")]
    InvalidDateSpec(String),

    /// Cached credentials are missing or expired; an interactive bootstrap is needed
    #[error("Authentication required for {provider}")]
    ProviderAuthRequired { provider: Provider },

    /// Network, API or process failure inside a single fetcher
    #[error("Fetch failed for {provider}: {message}")]
    ProviderFetchError { provider: Provider, message: String },

    /// Every requested provider failed
    #[error("All providers failed (summary written to {summary_path:?})")]
    AllProvidersFailed { summary_path: PathBuf },

    /// Files were consolidated but the run summary could not be persisted
    #[error("Failed to write run summary: {0}")]
    SummaryWriteError(String),

    /// Run was interrupted before every fetcher completed
    #[error("Operation cancelled")]
    Cancelled,

    /// Provider name not recognised
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl InvoiceError {
    /// Text stored under the provider key in `run_summary.json`
    pub fn summary_message(&self) -> String {
        match self {
            InvoiceError::ProviderAuthRequired { .. } => AUTH_REQUIRED.to_string(),
            InvoiceError::ProviderFetchError { message, .. } => message.clone(),
            InvoiceError::Cancelled => CANCELLED.to_string(),
            other => other.to_string(),
        }
    }

    /// Whether the error is scoped to a single provider and must not abort siblings
    pub fn is_provider_scoped(&self) -> bool {
        matches!(
            self,
            InvoiceError::ProviderAuthRequired { .. }
                | InvoiceError::ProviderFetchError { .. }
                | InvoiceError::Cancelled
        )
    }

    /// Process exit code for a whole-run failure
    pub fn exit_code(&self) -> i32 {
        match self {
            InvoiceError::InvalidDateSpec(_)
            | InvoiceError::UnknownProvider(_)
            | InvoiceError::ConfigError(_) => 2,
            InvoiceError::AllProvidersFailed { .. } => 3,
            InvoiceError::SummaryWriteError(_) => 4,
            InvoiceError::Cancelled => 130,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_required_summary_message() {
        let error = InvoiceError::ProviderAuthRequired {
            provider: Provider::Gmail,
        };
        assert_eq!(error.summary_message(), "AUTH_REQUIRED");
        assert!(error.is_provider_scoped());
    }

    #[test]
    fn test_fetch_error_summary_message_is_raw_message() {
        let error = InvoiceError::ProviderFetchError {
            provider: Provider::Outlook,
            message: "HTTP 503".to_string(),
        };
        assert_eq!(error.summary_message(), "HTTP 503");
        assert!(format!("{}", error).contains("outlook"));
    }

    #[test]
    fn test_whole_run_errors_are_not_provider_scoped() {
        assert!(!InvoiceError::InvalidDateSpec("x".to_string()).is_provider_scoped());
        assert!(!InvoiceError::SummaryWriteError("disk full".to_string()).is_provider_scoped());
        assert!(!InvoiceError::AllProvidersFailed {
            summary_path: PathBuf::from("run_summary.json"),
        }
        .is_provider_scoped());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(InvoiceError::InvalidDateSpec("m".to_string()).exit_code(), 2);
        assert_eq!(
            InvoiceError::AllProvidersFailed {
                summary_path: PathBuf::new()
            }
            .exit_code(),
            3
        );
        assert_eq!(InvoiceError::SummaryWriteError("e".to_string()).exit_code(), 4);
        assert_eq!(InvoiceError::Cancelled.exit_code(), 130);
        let io = InvoiceError::from(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert_eq!(io.exit_code(), 1);
    }
}
