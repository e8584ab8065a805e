//! Effect traits consumed by the metering engine
//!
//! Two stores back the engine: a fast ephemeral counter cache
//! ([`CacheEffects`]) that is the source of truth for every mutable counter,
//! and a slow durable ledger ([`LedgerEffects`]) reached only through named
//! transactional operations. Clocks and task spawning are effects too, so the
//! whole pipeline runs deterministically under simulation.

pub mod cache;
pub mod ledger;
pub mod task;
pub mod time;

pub use cache::{CacheEffects, CacheError};
pub use ledger::{
    ContentProfile, CreditDeduction, DistributionToken, LedgerEffects, LedgerError,
    SubscriptionRecord,
};
pub use task::TaskSpawner;
pub use time::{PhysicalTimeEffects, TimeError};
