//! Tally Effects - handler implementations for the metering effect traits
//!
//! - `MemoryCacheHandler`: single-process counter cache with clock-driven expiry
//! - `RedisCacheHandler` (feature `redis`): shared counter cache
//! - `MemoryLedgerHandler`: durable store stand-in with credit transactions
//! - `RealTimeHandler` / `SimulatedTimeHandler`: clocks
//! - `TaskRegistry` / `DeferredSpawner`: detached work
//!
//! Handlers are stateless apart from their backing store and can be shared
//! behind `Arc`.

#![forbid(unsafe_code)]

/// Counter cache handlers
pub mod cache;

/// Durable ledger handlers
pub mod ledger;

/// Task spawning handlers
pub mod task;

/// Clock handlers
pub mod time;

pub use cache::MemoryCacheHandler;
#[cfg(feature = "redis")]
pub use cache::RedisCacheHandler;
pub use ledger::{LedgerCallCounts, MemoryLedgerHandler};
pub use task::{DeferredSpawner, TaskRegistry};
pub use time::{RealTimeHandler, SimulatedTimeHandler};
