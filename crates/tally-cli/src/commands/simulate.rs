//! `tally simulate`
//!
//! Builds one owner, one piece of content and one distribution token
//! against in-memory handlers, then sends synthetic visitors through the
//! content gate. By default time is simulated and detached work runs after
//! every request, so the run is reproducible. `--realtime` runs on the wall
//! clock instead, with detached work and the periodic access log flush on
//! the tokio task registry.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tally_core::effects::{
    CacheEffects, ContentProfile, DistributionToken, LedgerEffects, PhysicalTimeEffects,
    TaskSpawner,
};
use tally_core::{keys, BillingWindow, ContentId, MeteringConfig, MicroUsd, OwnerId, Tier, TokenId};
use tally_effects::{
    DeferredSpawner, MemoryCacheHandler, MemoryLedgerHandler, RealTimeHandler,
    SimulatedTimeHandler, TaskRegistry,
};
use tally_metering::{
    ContentEnvelope, ContentGate, ContentRequest, GateDependencies, RequestSignals,
    StaticContentSource,
};
use tracing::{info, warn};
use uuid::Uuid;

/// Traffic shape for a simulation run
#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Distinct visitors
    #[arg(long, default_value_t = 20)]
    pub visitors: u32,

    /// Page loads per visitor
    #[arg(long, default_value_t = 2)]
    pub loads_per_visitor: u32,

    /// Owner tier
    #[arg(long, default_value = "premium")]
    pub tier: Tier,

    /// Content runs the AI assistant
    #[arg(long)]
    pub ai: bool,

    /// Token daily cap
    #[arg(long)]
    pub daily_limit: Option<u64>,

    /// Token monthly cap
    #[arg(long)]
    pub monthly_limit: Option<u64>,

    /// Overage credits the owner starts with
    #[arg(long, default_value_t = 0)]
    pub credits: u64,

    /// Budget already consumed this month, in USD
    #[arg(long, default_value_t = 0.0)]
    pub consumed_usd: f64,

    /// Seconds between requests (slept on the wall clock with --realtime)
    #[arg(long, default_value_t = 60)]
    pub step_secs: u64,

    /// Simulated start instant in unix milliseconds (defaults to now)
    #[arg(long, conflicts_with = "realtime")]
    pub start_ms: Option<u64>,

    /// Run on the wall clock with detached work and periodic log flushes on tokio
    #[arg(long)]
    pub realtime: bool,

    /// Print only the summary
    #[arg(long)]
    pub quiet: bool,
}

/// Outcome counts for a run
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    pub requests: u64,
    pub admitted: u64,
    pub new_sessions: u64,
    pub deduplicated: u64,
    pub daily_limit_denials: u64,
    pub monthly_limit_denials: u64,
    pub budget_denials: u64,
    pub failures: u64,
    pub billed: MicroUsd,
    pub credits_spent: u64,
    pub logs_flushed: usize,
}

impl SimulationReport {
    fn observe(&mut self, envelope: &ContentEnvelope) {
        let data = &envelope.data;
        self.requests += 1;
        if data.allowed {
            self.admitted += 1;
        }
        if data.is_new_session {
            self.new_sessions += 1;
        }
        if envelope.deduplicated {
            self.deduplicated += 1;
        }
        if data.daily_limit_exceeded {
            self.daily_limit_denials += 1;
        }
        if data.monthly_limit_exceeded {
            self.monthly_limit_denials += 1;
        }
        if data.budget_exhausted {
            self.budget_denials += 1;
        }
        self.billed = self.billed + data.session_cost;
    }
}

/// How time passes and detached work runs
enum Driver {
    /// Simulated clock; queued work runs after every request
    Stepped {
        clock: Arc<SimulatedTimeHandler>,
        spawner: Arc<DeferredSpawner>,
    },
    /// Wall clock; work runs on tokio as it is spawned
    Realtime { registry: Arc<TaskRegistry> },
}

/// Time given to in-flight detached work before the final flush
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// In-memory world a simulation runs against
pub struct Simulation {
    pub gate: ContentGate,
    pub store: Arc<MemoryLedgerHandler>,
    pub owner: OwnerId,
    pub token: TokenId,
    clock: Arc<dyn PhysicalTimeEffects>,
    driver: Driver,
}

impl Simulation {
    /// Seed the owner, content and token described by `args`
    pub async fn build(config: &MeteringConfig, args: &SimulateArgs) -> Result<Self> {
        let wall_clock = Arc::new(RealTimeHandler::new());
        let clock: Arc<dyn PhysicalTimeEffects>;
        let spawner: Arc<dyn TaskSpawner>;
        let driver = if args.realtime {
            let registry = Arc::new(TaskRegistry::new());
            clock = wall_clock;
            spawner = registry.clone();
            Driver::Realtime { registry }
        } else {
            let start = match args.start_ms {
                Some(start) => start,
                None => wall_clock
                    .current_timestamp_ms()
                    .await
                    .context("reading wall clock")?,
            };
            let stepped_clock = Arc::new(SimulatedTimeHandler::new(start));
            let deferred = Arc::new(DeferredSpawner::new());
            clock = stepped_clock.clone();
            spawner = deferred.clone();
            Driver::Stepped {
                clock: stepped_clock,
                spawner: deferred,
            }
        };
        let start = clock
            .current_timestamp_ms()
            .await
            .context("reading simulation clock")?;
        let cache = cache_handler(config, clock.clone()).await?;
        let store = Arc::new(MemoryLedgerHandler::new());
        let content = Arc::new(StaticContentSource::new());

        let owner = OwnerId::new(format!("owner-{}", Uuid::new_v4().simple()));
        let content_id = ContentId::new(format!("content-{}", Uuid::new_v4().simple()));
        let token = TokenId::new(format!("token-{}", Uuid::new_v4().simple()));

        content
            .insert(
                content_id.clone(),
                serde_json::json!({"title": "Simulated guide", "sections": 3}),
            )
            .await;
        store.insert_subscription(owner.clone(), args.tier).await;
        store
            .insert_content(ContentProfile {
                content: content_id.clone(),
                owner: owner.clone(),
                ai_enabled: args.ai,
            })
            .await;
        store
            .insert_token(DistributionToken {
                token: token.clone(),
                content: content_id,
                owner: owner.clone(),
                enabled: true,
                daily_limit: args.daily_limit,
                monthly_limit: args.monthly_limit,
            })
            .await;
        if args.credits > 0 {
            store.purchase_credits(&owner, args.credits).await?;
        }
        if args.consumed_usd > 0.0 {
            let window = BillingWindow::at(start);
            cache
                .set(
                    &keys::owner_consumed(&owner, &window.month),
                    &MicroUsd::from_usd(args.consumed_usd).micros().to_string(),
                    Some(config.session.monthly_counter_ttl()),
                )
                .await
                .context("seeding consumed budget")?;
        }

        let gate = ContentGate::new(
            config,
            GateDependencies {
                cache,
                store: store.clone(),
                clock: clock.clone(),
                spawner,
                content,
            },
        );
        if args.realtime {
            gate.start_periodic_flush();
            info!(
                interval_secs = config.access_log.flush_interval_secs,
                "Periodic access log flush started"
            );
        }
        Ok(Self {
            gate,
            store,
            owner,
            token,
            clock,
            driver,
        })
    }

    /// Send the configured traffic, calling `on_envelope` for every response
    pub async fn run<F>(&self, args: &SimulateArgs, mut on_envelope: F) -> Result<SimulationReport>
    where
        F: FnMut(&ContentEnvelope),
    {
        let mut report = SimulationReport::default();
        let credits_before = self.store.credit_balance(&self.owner).await?;
        let step_ms = args.step_secs.saturating_mul(1000);

        for _ in 0..args.visitors {
            let signals = RequestSignals {
                anonymous_session_id: Some(Uuid::new_v4().simple().to_string()),
                user_agent: Some("tally-simulator".to_string()),
                ..RequestSignals::default()
            };
            let request = ContentRequest::new(self.token.clone(), "en", signals);

            for _ in 0..args.loads_per_visitor {
                match self.gate.serve(&request).await {
                    Ok(envelope) => {
                        report.observe(&envelope);
                        on_envelope(&envelope);
                    }
                    Err(e) => {
                        report.requests += 1;
                        report.failures += 1;
                        warn!(error = %e, retryable = e.is_retryable(), "Request failed");
                    }
                }
                self.after_request(step_ms).await?;
            }
        }

        if let Driver::Realtime { registry } = &self.driver {
            if !registry.settle(1, SETTLE_TIMEOUT).await {
                warn!(
                    active = registry.active_count(),
                    "Detached work still running at final flush"
                );
            }
        }
        report.logs_flushed = self.gate.flush_access_log_buffer().await?;
        let credits_after = self.store.credit_balance(&self.owner).await?;
        report.credits_spent = credits_before.saturating_sub(credits_after);
        Ok(report)
    }

    async fn after_request(&self, step_ms: u64) -> Result<()> {
        match &self.driver {
            Driver::Stepped { clock, spawner } => {
                spawner.run_pending().await;
                clock.advance_time(step_ms);
            }
            Driver::Realtime { .. } => {
                if step_ms > 0 {
                    self.clock
                        .sleep_ms(step_ms)
                        .await
                        .context("pacing requests")?;
                }
            }
        }
        Ok(())
    }

    /// Detached tasks not yet finished (queued, in the stepped driver)
    pub fn background_tasks(&self) -> usize {
        match &self.driver {
            Driver::Stepped { spawner, .. } => spawner.pending_count(),
            Driver::Realtime { registry } => registry.active_count(),
        }
    }
}

#[cfg(feature = "redis")]
async fn cache_handler(
    config: &MeteringConfig,
    clock: Arc<dyn PhysicalTimeEffects>,
) -> Result<Arc<dyn CacheEffects>> {
    match &config.cache.url {
        Some(url) => {
            let cache = tally_effects::RedisCacheHandler::connect(url)
                .await
                .with_context(|| format!("connecting to {url}"))?;
            info!("Simulating against Redis; counter expiry follows the server clock");
            Ok(Arc::new(cache))
        }
        None => Ok(Arc::new(MemoryCacheHandler::new(clock))),
    }
}

#[cfg(not(feature = "redis"))]
async fn cache_handler(
    config: &MeteringConfig,
    clock: Arc<dyn PhysicalTimeEffects>,
) -> Result<Arc<dyn CacheEffects>> {
    if config.cache.url.is_some() {
        warn!("cache.url is set but this build has no Redis support; using the in-memory cache");
    }
    Ok(Arc::new(MemoryCacheHandler::new(clock)))
}

/// Run a simulation and print envelopes plus a summary as JSON
pub async fn run(config: &MeteringConfig, args: &SimulateArgs) -> Result<()> {
    let simulation = Simulation::build(config, args).await?;
    info!(
        visitors = args.visitors,
        loads = args.loads_per_visitor,
        tier = %args.tier,
        "Starting simulation"
    );

    let report = simulation
        .run(args, |envelope| {
            if !args.quiet {
                match serde_json::to_string(envelope) {
                    Ok(line) => println!("{line}"),
                    Err(e) => warn!(error = %e, "Unprintable envelope"),
                }
            }
        })
        .await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
