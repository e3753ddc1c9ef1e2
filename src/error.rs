//! Unified error hierarchy for ridelab
//!
//! The analytics math itself is total: missing thresholds, empty series and
//! zero denominators resolve to `None` rather than errors. The types here
//! cover what can genuinely fail: invalid configuration, malformed input
//! documents, and conflicting writes to the shared analytics record.

use thiserror::Error;

/// Top-level error type for all ridelab operations
#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// Input validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Calculation errors
    #[error("Calculation error: {0}")]
    Calculation(#[from] CalculationError),

    /// Analytics record store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Calculation errors
#[derive(Debug, Error)]
pub enum CalculationError {
    /// Insufficient data for calculation
    #[error("Insufficient data for {calculation}: {reason}")]
    InsufficientData { calculation: String, reason: String },

    /// Invalid parameter
    #[error("Invalid parameter for {calculation}: {parameter}={value}")]
    InvalidParameter {
        calculation: String,
        parameter: String,
        value: String,
    },
}

/// Errors raised while merging snapshots into a per-user record
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another writer updated the record first
    #[error("Version conflict for {user_id}: expected {expected:?}, found {actual:?}")]
    VersionConflict {
        user_id: String,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    /// Optimistic merge gave up
    #[error("Merge for {user_id} abandoned after {attempts} attempts")]
    RetriesExhausted { user_id: String, attempts: u32 },

    /// Backend failure (lock poisoned, connection lost, ...)
    #[error("Store backend failure: {reason}")]
    Backend { reason: String },
}

/// Result type alias for ridelab operations
pub type Result<T> = std::result::Result<T, AnalyticsError>;

impl AnalyticsError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AnalyticsError::Store(StoreError::VersionConflict { .. }) | AnalyticsError::Io(_)
        )
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            AnalyticsError::Validation(_) => ErrorSeverity::Warning,
            AnalyticsError::Store(StoreError::VersionConflict { .. }) => ErrorSeverity::Warning,
            AnalyticsError::Store(StoreError::Backend { .. }) => ErrorSeverity::Critical,
            AnalyticsError::Configuration(_) | AnalyticsError::Toml(_) => ErrorSeverity::Error,
            _ => ErrorSeverity::Error,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            AnalyticsError::Configuration(reason) => {
                format!("The analytics configuration is invalid: {}", reason)
            }
            AnalyticsError::Json(err) => {
                format!("Could not read the input document: {}", err)
            }
            AnalyticsError::Store(StoreError::RetriesExhausted { .. }) => {
                "The analytics record is busy. Please try again shortly.".to_string()
            }
            _ => self.to_string(),
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical system error requiring immediate attention
    Critical,
    /// Error that prevents operation but system can continue
    Error,
    /// Warning that doesn't prevent operation
    Warning,
}

impl ErrorSeverity {
    /// Convert to tracing level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            ErrorSeverity::Critical | ErrorSeverity::Error => tracing::Level::ERROR,
            ErrorSeverity::Warning => tracing::Level::WARN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_severity() {
        let err = AnalyticsError::Validation("empty duration list".to_string());
        assert_eq!(err.severity(), ErrorSeverity::Warning);

        let err = AnalyticsError::Store(StoreError::Backend {
            reason: "poisoned".to_string(),
        });
        assert_eq!(err.severity(), ErrorSeverity::Critical);
        assert_eq!(err.severity().to_tracing_level(), tracing::Level::ERROR);
    }

    #[test]
    fn test_error_retryable() {
        let err = AnalyticsError::Store(StoreError::VersionConflict {
            user_id: "u1".to_string(),
            expected: Some(1),
            actual: Some(2),
        });
        assert!(err.is_retryable());

        let err = AnalyticsError::Configuration("bad".to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_user_messages() {
        let err = AnalyticsError::Store(StoreError::RetriesExhausted {
            user_id: "u1".to_string(),
            attempts: 5,
        });
        assert!(err.user_message().contains("busy"));

        let err = AnalyticsError::Calculation(CalculationError::InvalidParameter {
            calculation: "rolling window".to_string(),
            parameter: "window".to_string(),
            value: "0".to_string(),
        });
        assert!(err.user_message().contains("window=0"));
    }
}
