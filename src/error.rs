//! Error types for checkwarden.
//!
//! All errors are strongly typed using thiserror so callers can match on the
//! failure class: a malformed event is dropped, a store failure ends the
//! processing loop, a validation failure is a programming defect.

use thiserror::Error;

use crate::config::ConfigError;
use crate::storage::StoreError;

/// Validation errors raised while building or persisting domain records.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ValidationError {
    #[error("Check '{check}' has no state and cannot be persisted")]
    MissingState {
        check: String,
    },

    #[error("Entity name cannot be empty")]
    EmptyEntityName,

    #[error("Check name cannot be empty")]
    EmptyCheckName,

    #[error("Malformed event: {reason}")]
    MalformedEvent {
        reason: String,
    },

    #[error("Invalid maintenance window: {reason}")]
    InvalidMaintenanceWindow {
        reason: String,
    },
}

/// Top-level error type for checkwarden.
#[derive(Debug, Error)]
pub enum WardenError {
    /// A record failed validation.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The store failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The configuration is unusable.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The burst lock could not be taken.
    #[error("Lock error: {0}")]
    Lock(#[source] std::io::Error),

    /// A broken internal invariant.
    #[error("Internal error: {message}")]
    Internal {
        /// What went wrong.
        message: String,
    },
}

impl WardenError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a store error.
    #[must_use]
    pub const fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    /// Returns true if a supervisor restarting the processor could recover.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => matches!(e, StoreError::Connection(_)),
            Self::Lock(_) => true,
            Self::Validation(_) | Self::Config(_) | Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for checkwarden operations.
pub type WardenResult<T> = Result<T, WardenError>;
