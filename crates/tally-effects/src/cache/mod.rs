//! Counter cache handlers

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::MemoryCacheHandler;
#[cfg(feature = "redis")]
pub use self::redis::RedisCacheHandler;
