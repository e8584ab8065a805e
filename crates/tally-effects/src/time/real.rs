//! Real time effect handler for production use

use async_trait::async_trait;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tally_core::effects::{PhysicalTimeEffects, TimeError};

/// Wall-clock time handler
#[derive(Debug, Clone, Copy, Default)]
pub struct RealTimeHandler;

impl RealTimeHandler {
    /// Create a new real time handler
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PhysicalTimeEffects for RealTimeHandler {
    async fn current_timestamp_ms(&self) -> Result<u64, TimeError> {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| TimeError::ClockSkew {
                reason: e.to_string(),
            })?;
        Ok(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
    }

    async fn sleep_ms(&self, ms: u64) -> Result<(), TimeError> {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_a_post_2020_timestamp() {
        let now = RealTimeHandler::new().current_timestamp_ms().await.unwrap();
        assert!(now > 1_577_836_800_000);
    }
}
