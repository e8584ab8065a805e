//! Contract tests for the in-memory counter cache
//!
//! The metering engine relies on two mutual-exclusion points only: claim-if-absent
//! and increment. These tests drive both with many interleaved callers.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tally_core::effects::CacheEffects;
use tally_effects::{MemoryCacheHandler, SimulatedTimeHandler};

fn cache() -> Arc<MemoryCacheHandler> {
    let clock = Arc::new(SimulatedTimeHandler::new(1_792_411_200_000));
    Arc::new(MemoryCacheHandler::new(clock))
}

#[tokio::test]
async fn interleaved_claims_have_one_winner() {
    let cache = cache();
    let claims = (0..64).map(|_| {
        let cache = cache.clone();
        async move {
            cache
                .set_if_absent("dedup:c1:fp", "1", Duration::from_secs(1800))
                .await
                .unwrap()
        }
    });

    let winners = join_all(claims).await.into_iter().filter(|won| *won).count();
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn interleaved_increments_are_not_lost() {
    let cache = cache();
    let increments = (0..100).map(|_| {
        let cache = cache.clone();
        async move { cache.incr_by("usage:user:o:month:2026-10", 25_000).await.unwrap() }
    });

    let mut results = join_all(increments).await;
    results.sort_unstable();
    results.dedup();
    assert_eq!(results.len(), 100);
    assert_eq!(
        cache.get("usage:user:o:month:2026-10").await.unwrap(),
        Some("2500000".to_string())
    );
}

#[tokio::test]
async fn arc_wrapped_handler_is_a_cache() {
    let cache: Arc<dyn CacheEffects> = cache();
    cache.set("k", "v", None).await.unwrap();
    assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));
}
