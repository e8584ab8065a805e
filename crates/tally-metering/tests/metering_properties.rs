//! Property tests for the metering invariants
//!
//! - A dedup key yields exactly one new session per window, whatever the call order
//! - Consumption within a window never decreases
//! - Overage credits leave the balance only in whole batches
//! - Fingerprints depend only on the request signals
#![allow(clippy::unwrap_used, clippy::expect_used)]

use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tally_core::effects::{CacheEffects, ContentProfile, LedgerEffects};
use tally_core::{
    keys, BillingWindow, ContentId, MeteringConfig, OwnerId, Tier, VisitorFingerprint,
};
use tally_effects::{MemoryCacheHandler, MemoryLedgerHandler, SimulatedTimeHandler};
use tally_metering::{BudgetLedger, DedupGate, IdentityResolver, RequestSignals};

const NOON: u64 = 1_792_411_200_000;

fn block_on<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
        .block_on(fut)
}

async fn ledger_for(
    tier: Tier,
    credits: u64,
) -> (BudgetLedger, Arc<MemoryCacheHandler>, Arc<MemoryLedgerHandler>) {
    let clock = Arc::new(SimulatedTimeHandler::new(NOON));
    let cache = Arc::new(MemoryCacheHandler::new(clock));
    let store = Arc::new(MemoryLedgerHandler::new());
    store.insert_subscription(OwnerId::new("owner"), tier).await;
    for (id, ai_enabled) in [("ai", true), ("plain", false)] {
        store
            .insert_content(ContentProfile {
                content: ContentId::new(id),
                owner: OwnerId::new("owner"),
                ai_enabled,
            })
            .await;
    }
    if credits > 0 {
        store
            .purchase_credits(&OwnerId::new("owner"), credits)
            .await
            .unwrap();
    }
    let config = MeteringConfig::default();
    let ledger = BudgetLedger::new(
        cache.clone(),
        store.clone(),
        config.pricing(),
        config.session,
    );
    (ledger, cache, store)
}

fn signals_strategy() -> impl Strategy<Value = RequestSignals> {
    let field = || proptest::option::of("[a-zA-Z0-9_:., -]{0,40}");
    (field(), field(), field(), field(), field(), field(), field()).prop_map(
        |(session, trusted, forwarded, client, remote, agent, language)| RequestSignals {
            anonymous_session_id: session,
            trusted_client_ip: trusted,
            forwarded_for: forwarded,
            client_visitor_id: client,
            remote_ip: remote,
            user_agent: agent,
            accept_language: language,
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: each (content, visitor) pair is claimed as new exactly once
    #[test]
    fn dedup_claims_are_idempotent(calls in prop::collection::vec((0u8..4, 0u8..4), 1..40)) {
        let wins = block_on(async {
            let clock = Arc::new(SimulatedTimeHandler::new(NOON));
            let cache = Arc::new(MemoryCacheHandler::new(clock));
            let gate = DedupGate::new(cache, Duration::from_secs(1800));

            let mut wins: HashMap<(u8, u8), usize> = HashMap::new();
            for (content, visitor) in &calls {
                let claim = gate
                    .claim(
                        &ContentId::new(format!("c{content}")),
                        &VisitorFingerprint::new(format!("v{visitor}")),
                    )
                    .await;
                let entry = wins.entry((*content, *visitor)).or_default();
                if claim.is_new_session {
                    *entry += 1;
                }
            }
            wins
        });
        prop_assert!(wins.values().all(|count| *count == 1));
    }

    /// Property: recorded consumption never decreases within a window
    #[test]
    fn consumption_is_monotonic(
        ai_flags in prop::collection::vec(any::<bool>(), 1..60),
        credits in 0u64..20
    ) {
        let observed = block_on(async {
            let (ledger, _, _) = ledger_for(Tier::Premium, credits).await;
            let owner = OwnerId::new("owner");
            let window = BillingWindow::at(NOON);
            let mut observed = Vec::new();
            for (n, ai) in ai_flags.iter().enumerate() {
                let content = ContentId::new(if *ai { "ai" } else { "plain" });
                let visitor = VisitorFingerprint::new(format!("v{n}"));
                let check = ledger
                    .check_session_allowed(&owner, &content, &visitor, false, &window)
                    .await
                    .unwrap();
                ledger.record_session(&owner, &check, &window).await.unwrap();
                observed.push(ledger.usage_stats(&owner, &window).await.unwrap().consumed);
            }
            observed
        });
        prop_assert!(observed.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    /// Property: credits leave the balance only in whole batches
    #[test]
    fn credits_decrement_in_whole_batches(
        sessions in 1usize..250,
        credits in 0u64..23,
        consumed_usd in 28u64..31,
    ) {
        let (before, after) = block_on(async {
            let (ledger, cache, store) = ledger_for(Tier::Premium, credits).await;
            let owner = OwnerId::new("owner");
            let window = BillingWindow::at(NOON);
            cache
                .set(
                    &keys::owner_consumed(&owner, &window.month),
                    &(consumed_usd * 1_000_000).to_string(),
                    None,
                )
                .await
                .unwrap();

            let before = store.credit_balance(&owner).await.unwrap();
            for n in 0..sessions {
                let visitor = VisitorFingerprint::new(format!("v{n}"));
                let check = ledger
                    .check_session_allowed(&owner, &ContentId::new("ai"), &visitor, false, &window)
                    .await
                    .unwrap();
                ledger.record_session(&owner, &check, &window).await.unwrap();
            }
            (before, store.credit_balance(&owner).await.unwrap())
        });
        let batch = MeteringConfig::default().overage.credits_per_batch;
        prop_assert!(after <= before);
        prop_assert_eq!((before - after) % batch, 0);
    }

    /// Property: the same signals always resolve to the same fingerprint
    #[test]
    fn fingerprints_are_deterministic(signals in signals_strategy()) {
        let resolver = IdentityResolver::new();
        let first = resolver.resolve_with_source(&signals);
        let second = resolver.resolve_with_source(&signals.clone());
        prop_assert_eq!(first, second);
    }
}
