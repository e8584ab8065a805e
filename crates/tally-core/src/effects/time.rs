//! Physical clock effect trait
//!
//! # Effect Classification
//!
//! - **Category**: Infrastructure Effect
//! - **Implementation**: `tally-effects` (real and simulated clocks)
//! - **Usage**: billing window resolution, in-memory cache expiry, periodic flush

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Error type for time operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum TimeError {
    /// The system clock reported an instant before the unix epoch
    #[error("Clock before unix epoch: {reason}")]
    ClockSkew {
        /// Clock-specific reason
        reason: String,
    },
    /// Generic failure
    #[error("Operation failed: {reason}")]
    OperationFailed {
        /// Failure reason
        reason: String,
    },
}

/// Wall-clock time for window keys and expiries.
#[async_trait]
pub trait PhysicalTimeEffects: Send + Sync {
    /// Current unix timestamp in milliseconds.
    async fn current_timestamp_ms(&self) -> Result<u64, TimeError>;

    /// Sleep for `ms` milliseconds. Simulated clocks advance instead of waiting.
    async fn sleep_ms(&self, ms: u64) -> Result<(), TimeError>;
}

/// Blanket implementation for Arc<T> where T: PhysicalTimeEffects
#[async_trait]
impl<T: PhysicalTimeEffects + ?Sized> PhysicalTimeEffects for Arc<T> {
    async fn current_timestamp_ms(&self) -> Result<u64, TimeError> {
        (**self).current_timestamp_ms().await
    }

    async fn sleep_ms(&self, ms: u64) -> Result<(), TimeError> {
        (**self).sleep_ms(ms).await
    }
}
