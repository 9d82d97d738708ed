//! Match Poller (C5): turns the provider's pull-only match data into
//! push events, ticking on a mode-driven schedule and deduplicating via
//! a digest so the broadcast hub only hears about real changes.

use crate::cache::CacheStore;
use crate::controller::{PollerControl, RateController};
use crate::hub::BroadcastHub;
use crate::models::{CacheType, MatchRecord, RateMode, ServerEvent};
use crate::provider::records::decode_list;
use crate::provider::ProviderClient;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::warn;

pub struct MatchPoller {
    cache: Arc<CacheStore>,
    provider: Arc<ProviderClient>,
    hub: Arc<BroadcastHub>,
    controller: Weak<RateController>,
    last_poll_at: RwLock<Option<DateTime<Utc>>>,
    last_digest: RwLock<Option<u64>>,
    schedule_tx: watch::Sender<Option<Duration>>,
}

impl MatchPoller {
    pub fn new(cache: Arc<CacheStore>, provider: Arc<ProviderClient>, hub: Arc<BroadcastHub>, controller: Weak<RateController>) -> Arc<Self> {
        let (schedule_tx, schedule_rx) = watch::channel(None);
        let poller = Arc::new(Self {
            cache,
            provider,
            hub,
            controller,
            last_poll_at: RwLock::new(None),
            last_digest: RwLock::new(None),
            schedule_tx,
        });

        tokio::spawn(run_loop(poller.clone(), schedule_rx));
        poller
    }

    /// `Start(interval)`, idempotent: a repeated call with the same
    /// interval leaves the running ticker's phase untouched.
    pub fn start(&self, interval: Duration) {
        if *self.schedule_tx.borrow() != Some(interval) {
            let _ = self.schedule_tx.send(Some(interval));
        }
    }

    /// `Stop()`, idempotent. A tick already in flight is allowed to
    /// complete; no further ticks are scheduled.
    pub fn stop(&self) {
        if self.schedule_tx.borrow().is_some() {
            let _ = self.schedule_tx.send(None);
        }
    }

    pub async fn last_poll_at(&self) -> Option<DateTime<Utc>> {
        *self.last_poll_at.read().await
    }

    pub async fn is_active(&self) -> bool {
        self.schedule_tx.borrow().is_some()
    }

    /// The tick body, per §4.5's four-step algorithm. Shared by the
    /// scheduled ticker and C7's "fire now" immediate-repoll entrypoint
    /// so there is exactly one implementation of it.
    pub async fn fire_now(&self) {
        let Some(controller) = self.controller.upgrade() else { return };
        let Some(tournament_id) = controller.active_tournament_id().await else { return };
        let active_mode = controller.current_mode().await == RateMode::Active;

        *self.last_poll_at.write().await = Some(Utc::now());

        let provider = self.provider.clone();
        let endpoint_tournament_id = tournament_id.clone();
        let fetch_result = self
            .cache
            .get_or_fetch(CacheType::Matches, &tournament_id, false, active_mode, move || {
                let provider = provider.clone();
                let tournament_id = endpoint_tournament_id.clone();
                async move { provider.get(&format!("/tournaments/{tournament_id}/matches")).await }
            })
            .await;

        let (payload, _meta) = match fetch_result {
            Ok(pair) => pair,
            Err(err) => {
                warn!(error = %err, tournament_id = %tournament_id, "match poll failed");
                return;
            }
        };

        let matches: Vec<MatchRecord> = match decode_list(&payload, Some(&tournament_id)) {
            Ok(matches) => matches,
            Err(err) => {
                warn!(error = %err, "failed to decode match list from provider");
                return;
            }
        };

        let digest = compute_digest(&matches);
        let mut last_digest = self.last_digest.write().await;
        if *last_digest == Some(digest) {
            return;
        }
        *last_digest = Some(digest);
        drop(last_digest);

        let summary = build_summary(&matches);
        self.hub.broadcast(ServerEvent::MatchesUpdate(summary)).await;
    }
}

impl PollerControl for MatchPoller {
    /// §4.5's schedule contract: ACTIVE ticks every 15s, dev mode
    /// overrides to a 5s floor regardless of mode, anything else stops.
    fn retime(&self, mode: RateMode, dev_mode_active: bool) {
        let desired = if dev_mode_active {
            Some(Duration::from_secs(5))
        } else if mode == RateMode::Active {
            Some(Duration::from_secs(15))
        } else {
            None
        };

        match desired {
            Some(interval) => self.start(interval),
            None => self.stop(),
        }
    }
}

async fn run_loop(poller: Arc<MatchPoller>, mut schedule_rx: watch::Receiver<Option<Duration>>) {
    loop {
        let current = *schedule_rx.borrow();
        match current {
            None => {
                if schedule_rx.changed().await.is_err() {
                    return;
                }
            }
            Some(interval_duration) => {
                let mut ticker = tokio::time::interval(interval_duration);
                ticker.tick().await; // the first tick fires immediately; consume it
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            poller.fire_now().await;
                        }
                        changed = schedule_rx.changed() => {
                            if changed.is_err() {
                                return;
                            }
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Stable hash over the tuples the spec calls out, sorted by match id so
/// provider array reordering never produces a spurious digest change.
fn compute_digest(matches: &[MatchRecord]) -> u64 {
    let mut sorted: Vec<&MatchRecord> = matches.iter().collect();
    sorted.sort_by_key(|m| m.id);

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    for m in sorted {
        m.participant1_id.hash(&mut hasher);
        m.participant2_id.hash(&mut hasher);
        m.scores_csv.hash(&mut hasher);
        m.state.hash(&mut hasher);
        m.winner_id.hash(&mut hasher);
        m.station_id.hash(&mut hasher);
        m.underway_at.map(|t| t.timestamp()).hash(&mut hasher);
    }
    hasher.finish()
}

fn build_summary(matches: &[MatchRecord]) -> serde_json::Value {
    let total = matches.len();
    let mut counts_by_state: HashMap<&str, usize> = HashMap::new();
    for m in matches {
        *counts_by_state.entry(m.state.as_str()).or_insert(0) += 1;
    }
    let completed = counts_by_state.get("complete").copied().unwrap_or(0);
    let progress_percent = if total > 0 { (completed as f64 / total as f64) * 100.0 } else { 0.0 };

    let next_match = matches.iter().filter(|m| m.state == "open").min_by_key(|m| m.id);

    serde_json::json!({
        "matches": matches,
        "counts_by_state": counts_by_state,
        "completedCount": completed,
        "progress_percent": progress_percent,
        "next_match_id": next_match.map(|m| m.id),
        "next_match_players": next_match.map(|m| [m.participant1_id, m.participant2_id]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: u64, state: &str) -> MatchRecord {
        MatchRecord {
            id,
            tournament_id: "T1".to_string(),
            state: state.to_string(),
            participant1_id: Some(1),
            participant2_id: Some(2),
            scores_csv: None,
            winner_id: None,
            station_id: None,
            underway_at: None,
            updated_at: None,
            prerequisite_match_ids: vec![],
            raw: json!({}),
        }
    }

    #[test]
    fn digest_is_order_independent() {
        let forward = vec![record(1, "open"), record(2, "complete")];
        let backward = vec![record(2, "complete"), record(1, "open")];
        assert_eq!(compute_digest(&forward), compute_digest(&backward));
    }

    #[test]
    fn digest_changes_on_state_change() {
        let before = vec![record(1, "open")];
        let after = vec![record(1, "complete")];
        assert_ne!(compute_digest(&before), compute_digest(&after));
    }

    #[test]
    fn summary_counts_by_state_and_progress() {
        let matches = vec![record(1, "complete"), record(2, "open")];
        let summary = build_summary(&matches);
        assert_eq!(summary["progress_percent"], 50.0);
        assert_eq!(summary["next_match_id"], 2);
    }
}
