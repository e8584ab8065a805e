//! End-to-end metering scenarios against in-memory handlers
#![allow(clippy::unwrap_used, clippy::expect_used)]

use assert_matches::assert_matches;
use futures::future::join_all;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tally_core::effects::{CacheEffects, ContentProfile, DistributionToken, LedgerEffects};
use tally_core::{
    keys, BillingWindow, ContentId, MeteringConfig, MicroUsd, OwnerId, TallyError, Tier, TokenId,
};
use tally_effects::{DeferredSpawner, MemoryCacheHandler, MemoryLedgerHandler, SimulatedTimeHandler};
use tally_metering::{
    ContentGate, ContentRequest, GateDependencies, RequestSignals, StaticContentSource,
};

const NOON: u64 = 1_792_411_200_000;
const DAY_MS: u64 = 24 * 60 * 60 * 1000;

struct Harness {
    gate: ContentGate,
    cache: Arc<MemoryCacheHandler>,
    store: Arc<MemoryLedgerHandler>,
    clock: Arc<SimulatedTimeHandler>,
    spawner: Arc<DeferredSpawner>,
}

struct Channel {
    tier: Tier,
    ai_enabled: bool,
    daily_limit: Option<u64>,
    monthly_limit: Option<u64>,
}

impl Default for Channel {
    fn default() -> Self {
        Self {
            tier: Tier::Free,
            ai_enabled: false,
            daily_limit: None,
            monthly_limit: None,
        }
    }
}

async fn harness(channel: Channel) -> Harness {
    let clock = Arc::new(SimulatedTimeHandler::new(NOON));
    let cache = Arc::new(MemoryCacheHandler::new(clock.clone()));
    let store = Arc::new(MemoryLedgerHandler::new());
    let spawner = Arc::new(DeferredSpawner::new());
    let content = Arc::new(StaticContentSource::new());

    content
        .insert(content_id(), serde_json::json!({"title": "Harbour walk"}))
        .await;
    store.insert_subscription(owner(), channel.tier).await;
    store
        .insert_content(ContentProfile {
            content: content_id(),
            owner: owner(),
            ai_enabled: channel.ai_enabled,
        })
        .await;
    store
        .insert_token(DistributionToken {
            token: token(),
            content: content_id(),
            owner: owner(),
            enabled: true,
            daily_limit: channel.daily_limit,
            monthly_limit: channel.monthly_limit,
        })
        .await;

    let gate = ContentGate::new(
        &MeteringConfig::default(),
        GateDependencies {
            cache: cache.clone(),
            store: store.clone(),
            clock: clock.clone(),
            spawner: spawner.clone(),
            content,
        },
    );
    Harness {
        gate,
        cache,
        store,
        clock,
        spawner,
    }
}

fn owner() -> OwnerId {
    OwnerId::new("owner-harbour")
}

fn content_id() -> ContentId {
    ContentId::new("content-harbour")
}

fn token() -> TokenId {
    TokenId::new("qr-entrance")
}

fn visitor(n: u32) -> ContentRequest {
    ContentRequest::new(
        token(),
        "en",
        RequestSignals {
            anonymous_session_id: Some(format!("visitor-{n:04}")),
            ..RequestSignals::default()
        },
    )
}

async fn exhaust_premium_budget(h: &Harness) {
    let window = BillingWindow::at(h.clock.get_time());
    h.cache
        .set(&keys::owner_consumed(&owner(), &window.month), "30000000", None)
        .await
        .unwrap();
}

#[tokio::test]
async fn new_free_visitor_under_limit_is_admitted_at_no_cost() {
    let h = harness(Channel::default()).await;

    let envelope = h.gate.serve(&visitor(1)).await.unwrap();
    assert!(envelope.success);
    assert!(envelope.data.allowed);
    assert!(envelope.data.is_new_session);
    assert_eq!(envelope.data.session_cost, MicroUsd::ZERO);
    assert!(!envelope.deduplicated);
    assert!(envelope.data.content.is_some());
}

#[tokio::test]
async fn repeat_visit_within_window_is_not_billed() {
    let h = harness(Channel::default()).await;
    h.gate.serve(&visitor(1)).await.unwrap();
    h.spawner.run_pending().await;

    h.clock.advance_time(29 * 60 * 1000);
    let repeat = h.gate.serve(&visitor(1)).await.unwrap();
    assert!(repeat.data.allowed);
    assert!(!repeat.data.is_new_session);
    assert!(repeat.deduplicated);
    assert_eq!(h.spawner.pending_count(), 0);

    let usage = h.gate.usage_stats(&owner()).await.unwrap();
    assert_eq!(usage.total_sessions(), 1);
    let daily = h.gate.daily_access_stats(&token()).await.unwrap();
    assert_eq!(daily.current, 1);
}

#[tokio::test]
async fn visit_after_window_is_a_new_session() {
    let h = harness(Channel::default()).await;
    h.gate.serve(&visitor(1)).await.unwrap();
    h.clock.advance_time(30 * 60 * 1000);

    let again = h.gate.serve(&visitor(1)).await.unwrap();
    assert!(again.data.is_new_session);
    assert_eq!(h.gate.usage_stats(&owner()).await.unwrap().total_sessions(), 2);
}

#[tokio::test]
async fn exhausted_premium_budget_spends_exactly_one_credit_batch() {
    let h = harness(Channel {
        tier: Tier::Premium,
        ai_enabled: true,
        ..Channel::default()
    })
    .await;
    h.store.purchase_credits(&owner(), 8).await.unwrap();
    exhaust_premium_budget(&h).await;

    let envelope = h.gate.serve(&visitor(1)).await.unwrap();
    assert!(envelope.data.allowed);
    assert!(envelope.data.needs_overage);
    assert_eq!(envelope.data.session_cost, MicroUsd::new(50_000));
    assert_eq!(h.store.credit_balance(&owner()).await.unwrap(), 3);

    let next = h.gate.serve(&visitor(2)).await.unwrap();
    assert!(next.data.allowed);
    assert!(!next.data.needs_overage);
    assert_eq!(h.store.credit_balance(&owner()).await.unwrap(), 3);

    let usage = h.gate.usage_stats(&owner()).await.unwrap();
    assert_eq!(usage.top_up, MicroUsd::from_usd(5.0));
}

#[tokio::test]
async fn exhausted_budget_without_credits_is_flagged_not_failed() {
    let h = harness(Channel {
        tier: Tier::Premium,
        ai_enabled: true,
        ..Channel::default()
    })
    .await;
    exhaust_premium_budget(&h).await;

    let envelope = h.gate.serve(&visitor(1)).await.unwrap();
    assert!(envelope.success);
    assert!(!envelope.data.allowed);
    assert!(envelope.data.budget_exhausted);
    assert!(envelope.data.credits_insufficient);
    assert!(envelope.data.content.is_none());

    let repeat = h.gate.serve(&visitor(1)).await.unwrap();
    assert!(repeat.deduplicated);
    assert!(!repeat.data.allowed);
    assert!(repeat.data.credits_insufficient);
    assert!(repeat.data.content.is_none());
}

#[tokio::test]
async fn token_at_daily_cap_is_rejected_before_budget_logic() {
    let h = harness(Channel {
        tier: Tier::Premium,
        daily_limit: Some(2),
        ..Channel::default()
    })
    .await;
    for n in 1..=2 {
        assert!(h.gate.serve(&visitor(n)).await.unwrap().data.allowed);
    }
    h.spawner.run_pending().await;
    let deductions_before = h.store.calls().deductions.load(Ordering::SeqCst);

    exhaust_premium_budget(&h).await;
    let envelope = h.gate.serve(&visitor(3)).await.unwrap();
    assert!(!envelope.data.allowed);
    assert!(envelope.data.daily_limit_exceeded);
    assert!(!envelope.data.budget_exhausted);
    assert!(!envelope.data.credits_insufficient);
    assert_eq!(
        h.store.calls().deductions.load(Ordering::SeqCst),
        deductions_before
    );

    let repeat = h.gate.serve(&visitor(3)).await.unwrap();
    assert!(repeat.data.daily_limit_exceeded);

    h.clock.advance_time(DAY_MS);
    let tomorrow = h.gate.serve(&visitor(3)).await.unwrap();
    assert!(!tomorrow.data.daily_limit_exceeded);
}

#[tokio::test]
async fn token_at_monthly_cap_is_rejected() {
    let h = harness(Channel {
        monthly_limit: Some(1),
        ..Channel::default()
    })
    .await;
    h.gate.serve(&visitor(1)).await.unwrap();
    h.spawner.run_pending().await;

    let envelope = h.gate.serve(&visitor(2)).await.unwrap();
    assert!(envelope.data.monthly_limit_exceeded);
    assert!(!envelope.data.daily_limit_exceeded);
}

#[tokio::test]
async fn unreachable_cache_opens_checks_but_not_the_budget_increment() {
    let h = harness(Channel {
        daily_limit: Some(1),
        ..Channel::default()
    })
    .await;
    h.cache.set_offline(true);

    let err = h.gate.serve(&visitor(1)).await.unwrap_err();
    assert_matches!(err, TallyError::CacheUnavailable { .. });
    assert!(err.is_retryable());

    assert_eq!(
        h.gate.dedup().statistics().fail_open.load(Ordering::Relaxed),
        1
    );
    assert_eq!(
        h.gate.limiter().statistics().fail_open.load(Ordering::Relaxed),
        1
    );

    h.cache.set_offline(false);
    let retry = h.gate.serve(&visitor(1)).await.unwrap();
    assert!(retry.data.allowed);
    assert!(retry.data.is_new_session);
    assert_eq!(h.gate.usage_stats(&owner()).await.unwrap().total_sessions(), 1);
}

#[tokio::test]
async fn failed_budget_increment_is_billed_on_retry() {
    let h = harness(Channel {
        tier: Tier::Premium,
        ai_enabled: true,
        ..Channel::default()
    })
    .await;
    h.cache.fail_next_increments(1);

    let err = h.gate.serve(&visitor(1)).await.unwrap_err();
    assert_matches!(err, TallyError::CacheUnavailable { .. });
    assert!(err.is_retryable());
    assert_eq!(
        h.gate.dedup().statistics().released.load(Ordering::Relaxed),
        1
    );

    let retry = h.gate.serve(&visitor(1)).await.unwrap();
    assert!(retry.data.allowed);
    assert!(retry.data.is_new_session);
    assert!(!retry.deduplicated);
    assert_eq!(retry.data.session_cost, MicroUsd::new(50_000));

    let usage = h.gate.usage_stats(&owner()).await.unwrap();
    assert_eq!(usage.consumed, MicroUsd::new(50_000));
    assert_eq!(usage.ai_sessions, 1);

    let repeat = h.gate.serve(&visitor(1)).await.unwrap();
    assert!(repeat.deduplicated);
    assert_eq!(
        h.gate.usage_stats(&owner()).await.unwrap().consumed,
        MicroUsd::new(50_000)
    );
}

#[tokio::test]
async fn failed_top_up_refunds_the_credit_batch() {
    let h = harness(Channel {
        tier: Tier::Premium,
        ai_enabled: true,
        ..Channel::default()
    })
    .await;
    h.store.purchase_credits(&owner(), 5).await.unwrap();
    exhaust_premium_budget(&h).await;
    h.cache.fail_next_increments(1);

    let err = h.gate.serve(&visitor(1)).await.unwrap_err();
    assert_matches!(err, TallyError::CacheUnavailable { .. });
    assert_eq!(h.store.credit_balance(&owner()).await.unwrap(), 5);
    assert_eq!(h.store.calls().refunds.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.gate.usage_stats(&owner()).await.unwrap().top_up,
        MicroUsd::ZERO
    );

    let retry = h.gate.serve(&visitor(1)).await.unwrap();
    assert!(retry.data.allowed);
    assert!(retry.data.needs_overage);
    assert!(!retry.deduplicated);
    assert_eq!(h.store.credit_balance(&owner()).await.unwrap(), 0);

    let usage = h.gate.usage_stats(&owner()).await.unwrap();
    assert_eq!(usage.top_up, MicroUsd::from_usd(5.0));
    assert_eq!(usage.consumed, MicroUsd::new(30_050_000));
}

#[tokio::test]
async fn store_outage_is_a_request_failure_not_a_denial() {
    let h = harness(Channel::default()).await;
    h.gate.serve(&visitor(1)).await.unwrap();
    h.store.set_offline(true);

    let err = h.gate.serve(&visitor(2)).await.unwrap_err();
    assert_matches!(err, TallyError::StoreUnavailable { .. });
}

#[tokio::test]
async fn free_tier_ceiling_flags_budget_exhausted() {
    let h = harness(Channel::default()).await;
    for n in 0..50 {
        assert!(h.gate.serve(&visitor(n)).await.unwrap().data.allowed);
    }

    let envelope = h.gate.serve(&visitor(50)).await.unwrap();
    assert!(!envelope.data.allowed);
    assert!(envelope.data.budget_exhausted);
    assert!(!envelope.data.credits_insufficient);
}

#[tokio::test]
async fn concurrent_loads_by_one_visitor_bill_once() {
    let h = harness(Channel {
        tier: Tier::Premium,
        ..Channel::default()
    })
    .await;
    let request = visitor(1);

    let envelopes = join_all((0..16).map(|_| h.gate.serve(&request))).await;
    let new_sessions = envelopes
        .into_iter()
        .map(Result::unwrap)
        .filter(|envelope| envelope.data.is_new_session)
        .count();
    assert_eq!(new_sessions, 1);

    let usage = h.gate.usage_stats(&owner()).await.unwrap();
    assert_eq!(usage.consumed, MicroUsd::new(25_000));
}

#[tokio::test]
async fn month_rollover_starts_a_fresh_budget() {
    let h = harness(Channel {
        tier: Tier::Premium,
        ..Channel::default()
    })
    .await;
    exhaust_premium_budget(&h).await;
    assert!(!h.gate.serve(&visitor(1)).await.unwrap().data.allowed);

    h.clock.advance_time(31 * DAY_MS);
    let envelope = h.gate.serve(&visitor(2)).await.unwrap();
    assert!(envelope.data.allowed);
    assert_eq!(
        h.gate.usage_stats(&owner()).await.unwrap().consumed,
        MicroUsd::new(25_000)
    );
}

#[tokio::test]
async fn every_new_session_decision_reaches_the_durable_log() {
    let h = harness(Channel {
        daily_limit: Some(2),
        ..Channel::default()
    })
    .await;
    for n in 0..3 {
        h.gate.serve(&visitor(n)).await.unwrap();
        h.spawner.run_pending().await;
    }
    h.gate.serve(&visitor(0)).await.unwrap();
    h.gate.serve(&visitor(0).owner_preview()).await.unwrap();
    h.spawner.run_pending().await;

    assert_eq!(h.gate.flush_access_log_buffer().await.unwrap(), 3);
    let logs = h.store.access_logs().await;
    assert_eq!(logs.len(), 3);
    assert!(logs.iter().all(|entry| entry.owner_tier == Tier::Free));
    assert!(logs.iter().all(|entry| entry.session_cost == MicroUsd::ZERO));
}

#[tokio::test]
async fn invalidating_a_token_resets_its_counters() {
    let h = harness(Channel {
        daily_limit: Some(1),
        ..Channel::default()
    })
    .await;
    h.gate.serve(&visitor(1)).await.unwrap();
    h.spawner.run_pending().await;
    assert!(h.gate.serve(&visitor(2)).await.unwrap().data.daily_limit_exceeded);

    let removed = h.gate.invalidate_cache(&token()).await.unwrap();
    assert_eq!(removed, 3);
    assert!(h.gate.serve(&visitor(3)).await.unwrap().data.allowed);
}

#[tokio::test]
async fn downgrade_carries_consumption_into_the_free_ceiling() {
    let h = harness(Channel {
        tier: Tier::Premium,
        ..Channel::default()
    })
    .await;
    for n in 0..3 {
        h.gate.serve(&visitor(n)).await.unwrap();
    }
    h.gate.change_tier(&owner(), Tier::Free).await.unwrap();

    let usage = h.gate.usage_stats(&owner()).await.unwrap();
    assert_eq!(usage.tier, Tier::Free);
    assert_eq!(usage.total_sessions(), 3);
    assert_eq!(
        h.store.fetch_subscription(&owner()).await.unwrap().tier,
        Tier::Free
    );
}
