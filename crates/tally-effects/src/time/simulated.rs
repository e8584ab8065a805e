//! Simulated time effect handler for testing

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tally_core::effects::{PhysicalTimeEffects, TimeError};

/// Simulated time handler for testing and simulation.
///
/// Sleeping advances the clock immediately instead of waiting, so periodic
/// work and window rollover can be driven deterministically.
#[derive(Debug, Clone)]
pub struct SimulatedTimeHandler {
    /// Current simulated time in milliseconds
    current_time: Arc<Mutex<u64>>,
}

impl SimulatedTimeHandler {
    /// Create a new simulated time handler starting at the given time
    pub fn new(start_time_ms: u64) -> Self {
        Self {
            current_time: Arc::new(Mutex::new(start_time_ms)),
        }
    }

    /// Create a simulated time handler starting at Unix epoch
    pub fn new_at_epoch() -> Self {
        Self::new(0)
    }

    /// Advance simulated time by the given duration
    pub fn advance_time(&self, duration_ms: u64) {
        let mut time = self.current_time.lock();
        *time = time.saturating_add(duration_ms);
    }

    /// Set the absolute simulated time
    pub fn set_time(&self, time_ms: u64) {
        *self.current_time.lock() = time_ms;
    }

    /// Get the current simulated time
    pub fn get_time(&self) -> u64 {
        *self.current_time.lock()
    }
}

impl Default for SimulatedTimeHandler {
    fn default() -> Self {
        Self::new_at_epoch()
    }
}

#[async_trait]
impl PhysicalTimeEffects for SimulatedTimeHandler {
    async fn current_timestamp_ms(&self) -> Result<u64, TimeError> {
        Ok(self.get_time())
    }

    async fn sleep_ms(&self, ms: u64) -> Result<(), TimeError> {
        self.advance_time(ms);
        tokio::task::yield_now().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sleep_advances_without_waiting() {
        let clock = SimulatedTimeHandler::new(1_000);
        clock.sleep_ms(60_000).await.unwrap();
        assert_eq!(clock.current_timestamp_ms().await.unwrap(), 61_000);
    }

    #[test]
    fn clones_share_one_clock() {
        let clock = SimulatedTimeHandler::new(0);
        let other = clock.clone();
        other.set_time(42);
        assert_eq!(clock.get_time(), 42);
    }
}
