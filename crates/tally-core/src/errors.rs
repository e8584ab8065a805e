//! Unified error type for metering operations
//!
//! Quota outcomes (daily/monthly caps, exhausted budget, missing credits) are
//! not errors: they are recovered into decision flags by the metering crate.
//! Only infrastructure faults and token preconditions surface here.

use crate::effects::{CacheError, LedgerError, TimeError};
use serde::{Deserialize, Serialize};

/// Unified error type for all metering operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum TallyError {
    /// The counter cache could not be reached or timed out
    #[error("Cache unavailable: {message}")]
    CacheUnavailable {
        /// Error message describing the cache failure
        message: String,
    },

    /// The durable store could not be reached
    #[error("Durable store unavailable: {message}")]
    StoreUnavailable {
        /// Error message describing the store failure
        message: String,
    },

    /// Distribution token is unknown
    #[error("Invalid token: {message}")]
    InvalidToken {
        /// Error message describing the token
        message: String,
    },

    /// Distribution channel exists but has been switched off by its owner
    #[error("Channel disabled: {message}")]
    ChannelDisabled {
        /// Error message describing the channel
        message: String,
    },

    /// Invalid input or configuration
    #[error("Invalid: {message}")]
    Invalid {
        /// Error message describing the invalid input
        message: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message describing the serialization failure
        message: String,
    },

    /// Internal system error
    #[error("Internal error: {message}")]
    Internal {
        /// Error message describing the internal error
        message: String,
    },
}

impl TallyError {
    /// Create a cache unavailable error
    pub fn cache_unavailable(message: impl Into<String>) -> Self {
        Self::CacheUnavailable {
            message: message.into(),
        }
    }

    /// Create a durable store unavailable error
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    /// Create an invalid token error
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken {
            message: message.into(),
        }
    }

    /// Create a disabled channel error
    pub fn channel_disabled(message: impl Into<String>) -> Self {
        Self::ChannelDisabled {
            message: message.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the caller may retry the same request later.
    ///
    /// Infrastructure unavailability is transient; token preconditions and
    /// malformed input are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CacheUnavailable { .. } | Self::StoreUnavailable { .. }
        )
    }

    /// Whether the request was rejected before metering ran.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::InvalidToken { .. } | Self::ChannelDisabled { .. })
    }
}

/// Standard Result type for metering operations
pub type Result<T> = std::result::Result<T, TallyError>;

impl From<CacheError> for TallyError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Corrupt { .. } => Self::serialization(err.to_string()),
            CacheError::Unavailable { reason } => Self::cache_unavailable(reason),
            CacheError::Timeout { timeout_ms } => {
                Self::cache_unavailable(format!("timed out after {timeout_ms}ms"))
            }
        }
    }
}

impl From<LedgerError> for TallyError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Unavailable { reason } => Self::store_unavailable(reason),
            LedgerError::NotFound { .. } => Self::invalid(err.to_string()),
            LedgerError::Rejected { .. } => Self::internal(err.to_string()),
        }
    }
}

impl From<TimeError> for TallyError {
    fn from(err: TimeError) -> Self {
        Self::internal(err.to_string())
    }
}

impl From<serde_json::Error> for TallyError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<std::io::Error> for TallyError {
    fn from(err: std::io::Error) -> Self {
        Self::internal(err.to_string())
    }
}
