//! Unified error handling for the muster crate
//!
//! This module provides a unified error type that consolidates all domain-specific
//! errors into a single `Error` enum, while maintaining the ability to use
//! domain-specific errors when needed.
//!
//! # Architecture
//!
//! - [`MusterErrorTrait`] - Common interface implemented by the unified error type
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use muster::error::{Error, ErrorCategory, MusterErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         println!("Retrying: {}", err);
//!     } else {
//!         eprintln!("Fatal error: {}", err);
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::aggregation::AggregationError;
pub use crate::auth::AuthError;
pub use crate::fleet::registry::RegistryError;
pub use crate::profile::ProfileError;
pub use crate::storage::StorageError;

/// Common trait for muster error handling
///
/// This trait provides a unified interface for error handling across
/// all modules, enabling consistent error processing strategies.
pub trait MusterErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Caller identity could not be established
    Auth,
    /// Provider profile lookup and state errors
    Profile,
    /// Fleet registry membership errors
    Fleet,
    /// Artifact storage and I/O errors
    Storage,
    /// External aggregation process errors
    Aggregation,
    /// Network-related errors (HTTP, timeout)
    Network,
    /// Configuration and validation errors
    Config,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Short machine-readable code, used in error response bodies
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Profile => "profile",
            Self::Fleet => "fleet",
            Self::Storage => "storage",
            Self::Aggregation => "aggregation",
            Self::Network => "network",
            Self::Config => "config",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the muster crate
///
/// This enum wraps all domain-specific errors, providing a single error type
/// that can be used across module boundaries while preserving the detailed
/// error information.
#[derive(Error, Debug)]
pub enum Error {
    /// Caller identity errors (bad or missing bearer token)
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Provider profile errors (missing, not ready, persistence)
    #[error("Profile error: {0}")]
    Profile(#[from] ProfileError),

    /// Fleet registry errors (unknown provider, capacity, transitions)
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Artifact storage errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// External aggregation process errors
    #[error("Aggregation error: {0}")]
    Aggregation(#[from] AggregationError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl MusterErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Auth(_) => false,
            Self::Profile(e) => matches!(e, ProfileError::Persistence { .. }),
            Self::Registry(e) => matches!(e, RegistryError::CapacityExceeded { .. }),
            Self::Storage(_) => true, // filesystem errors are often transient
            Self::Aggregation(e) => e.is_transient(),
            Self::Io(_) => true,
            Self::Json(_) => false,
            Self::Http(_) => true, // HTTP errors are often transient
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Auth(_) => ErrorCategory::Auth,
            Self::Profile(_) => ErrorCategory::Profile,
            Self::Registry(_) => ErrorCategory::Fleet,
            Self::Storage(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Aggregation(_) => ErrorCategory::Aggregation,
            Self::Http(_) => ErrorCategory::Network,
            Self::Json(_) => ErrorCategory::Other,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        let auth_err = Error::Auth(AuthError::MissingToken);
        assert_eq!(auth_err.category(), ErrorCategory::Auth);

        let registry_err = Error::Registry(RegistryError::UnknownProvider("p1".to_string()));
        assert_eq!(registry_err.category(), ErrorCategory::Fleet);
    }

    #[test]
    fn test_is_recoverable() {
        let auth_err = Error::Auth(AuthError::InvalidToken("expired".to_string()));
        assert!(!auth_err.is_recoverable());

        let capacity_err = Error::Registry(RegistryError::CapacityExceeded { current: 8, max: 8 });
        assert!(capacity_err.is_recoverable());

        let unknown_err = Error::Registry(RegistryError::UnknownProvider("ghost".to_string()));
        assert!(!unknown_err.is_recoverable());
    }

    #[test]
    fn test_error_conversion() {
        let profile_err = ProfileError::Missing("p1".to_string());
        let unified: Error = profile_err.into();
        assert!(matches!(unified, Error::Profile(_)));
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("Invalid round timeout");
        assert_eq!(err.category(), ErrorCategory::Config);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_other_error() {
        let err = Error::other("Something went wrong");
        assert_eq!(err.category(), ErrorCategory::Other);
    }

    #[test]
    fn test_category_codes() {
        assert_eq!(ErrorCategory::Auth.as_str(), "auth");
        assert_eq!(ErrorCategory::Storage.as_str(), "storage");
    }
}
