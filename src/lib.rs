//! Tournament Data Access Core.
//!
//! Assembles the content cache (C1), request gate (C2), rate controller
//! (C3), provider client (C4), match poller (C5), broadcast hub (C6), and
//! mutation dispatcher (C7) into one `AppCore`, the same role the
//! teacher's `AppState` plays for `Broker` + `QueryCache`.

pub mod cache;
pub mod config;
pub mod controller;
pub mod database;
pub mod dispatcher;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod hub;
pub mod models;
pub mod poller;
pub mod provider;
pub mod scheduler;
pub mod websocket;

use crate::cache::CacheStore;
use crate::config::Config;
use crate::controller::{PollerControl, RateController, TournamentSnapshot, TournamentsFetchFn};
use crate::dispatcher::MutationDispatcher;
use crate::error::CoreResult;
use crate::gate::{MinDelayFn, RequestGate};
use crate::hub::BroadcastHub;
use crate::models::{CacheType, TournamentRecord};
use crate::poller::MatchPoller;
use crate::provider::records::decode_list;
use crate::provider::ProviderClient;
use sqlx::sqlite::SqlitePool;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

/// Process-lifetime handle shared across every Axum handler and
/// background task, `Clone`-cheap since every field is `Arc`-backed, the
/// same contract `AppState` offers the teacher's handlers.
#[derive(Clone)]
pub struct AppCore {
    pub pool: SqlitePool,
    pub cache: Arc<CacheStore>,
    pub gate: Arc<RequestGate>,
    pub controller: Arc<RateController>,
    pub provider: Arc<ProviderClient>,
    pub poller: Arc<MatchPoller>,
    pub hub: Arc<BroadcastHub>,
    pub dispatcher: Arc<MutationDispatcher>,
}

impl AppCore {
    pub fn new(config: &Config, pool: SqlitePool) -> CoreResult<Arc<Self>> {
        // The gate's `MinDelayFn` needs the controller, but the
        // controller's tournament fetcher needs the provider, which needs
        // the gate. Broken by handing the gate a cell filled in once the
        // controller actually exists.
        let controller_slot: Arc<OnceLock<Weak<RateController>>> = Arc::new(OnceLock::new());
        let slot_for_gate = controller_slot.clone();
        let idle_rate = config.mode_rate_idle.max(1);
        let min_delay: MinDelayFn = Arc::new(move || match slot_for_gate.get().and_then(Weak::upgrade) {
            Some(controller) => controller.min_delay_sync(),
            None => Duration::from_millis((60_000 + idle_rate as u64 - 1) / idle_rate as u64),
        });

        let gate = Arc::new(RequestGate::new(min_delay));
        let provider = Arc::new(ProviderClient::new(gate.clone(), config, pool.clone())?);
        let cache = Arc::new(CacheStore::new(pool.clone()));

        let fetch_tournaments: TournamentsFetchFn = {
            let provider = provider.clone();
            let cache = cache.clone();
            Arc::new(move || {
                let provider = provider.clone();
                let cache = cache.clone();
                Box::pin(fetch_tournament_snapshots(cache, provider))
            })
        };

        let controller = RateController::new(
            config.mode_rate_idle,
            config.mode_rate_upcoming,
            config.mode_rate_active,
            config.manual_cap,
            config.check_interval,
            config.upcoming_window,
            fetch_tournaments,
        );
        let _ = controller_slot.set(Arc::downgrade(&controller));

        let hub = Arc::new(BroadcastHub::new());
        let poller = MatchPoller::new(cache.clone(), provider.clone(), hub.clone(), Arc::downgrade(&controller));

        let dispatcher = Arc::new(MutationDispatcher::new(
            cache.clone(),
            provider.clone(),
            Arc::downgrade(&poller),
            controller.clone(),
        ));

        Ok(Arc::new(Self { pool, cache, gate, controller, provider, poller, hub, dispatcher }))
    }

    /// Wires C5 as C3's retime target, then starts every recurring
    /// background task: the rate ticker, the ack sweeper, and an initial
    /// `Check()` so the process doesn't sit idle until the first period
    /// elapses. Mirrors the teacher spawning its DB-write and purge
    /// workers from `Broker::new`.
    pub async fn spawn_background_tasks(self: &Arc<Self>) {
        self.controller.set_poller_control(self.poller.clone() as Arc<dyn PollerControl>).await;
        self.controller.spawn_ticker();
        self.hub.clone().spawn_ack_sweeper();

        let controller = self.controller.clone();
        tokio::spawn(async move {
            if let Err(err) = controller.check().await {
                tracing::warn!(error = %err, "initial rate check failed");
            }
        });

        let cache = self.cache.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(3600));
            loop {
                interval.tick().await;
                match cache.cleanup_expired().await {
                    Ok(removed) if removed > 0 => tracing::info!(removed, "purged expired cache entries"),
                    Ok(_) => {}
                    Err(err) => tracing::warn!(error = %err, "cache cleanup sweep failed"),
                }
            }
        });
    }
}

async fn fetch_tournament_snapshots(cache: Arc<CacheStore>, provider: Arc<ProviderClient>) -> CoreResult<Vec<TournamentSnapshot>> {
    let provider_for_fetch = provider.clone();
    let (payload, _meta) = cache
        .get_or_fetch(CacheType::TournamentsList, "list", false, false, move || {
            let provider = provider_for_fetch.clone();
            async move { provider.get("/tournaments").await }
        })
        .await?;

    let records: Vec<TournamentRecord> = decode_list(&payload, None)?;
    Ok(records
        .into_iter()
        .map(|r| TournamentSnapshot { id: r.id, state: r.state, started_at: r.started_at, starts_at: r.starts_at })
        .collect())
}
