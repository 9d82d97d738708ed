//! Mutation Dispatcher (C7): wraps every write operation the provider
//! exposes in the six-step contract of §4.7 — fresh baseline, build the
//! wire body, dispatch, invalidate, repoll or reschedule.

pub mod wire;

use crate::cache::CacheStore;
use crate::controller::RateController;
use crate::error::{CoreError, CoreResult};
use crate::models::CacheType;
use crate::poller::MatchPoller;
use crate::provider::ProviderClient;
use std::sync::{Arc, Weak};
use wire::{MatchParticipantEntry, TournamentUpdate};

pub struct MutationDispatcher {
    cache: Arc<CacheStore>,
    provider: Arc<ProviderClient>,
    poller: Weak<MatchPoller>,
    controller: Arc<RateController>,
}

impl MutationDispatcher {
    pub fn new(cache: Arc<CacheStore>, provider: Arc<ProviderClient>, poller: Weak<MatchPoller>, controller: Arc<RateController>) -> Self {
        Self { cache, provider, poller, controller }
    }

    // ---- tournament lifecycle -------------------------------------------------

    pub async fn create_tournament(&self, update: TournamentUpdate) -> CoreResult<serde_json::Value> {
        let result = self.provider.post("/tournaments", wire::to_wire(&update)).await?;
        self.cache.invalidate(CacheType::TournamentsList, Some("list")).await?;
        self.controller.schedule_lifecycle_recheck();
        Ok(result)
    }

    pub async fn update_tournament(&self, tournament_id: &str, update: TournamentUpdate) -> CoreResult<serde_json::Value> {
        self.baseline(CacheType::TournamentDetails, tournament_id).await?;
        let result = self.provider.patch(&format!("/tournaments/{tournament_id}"), wire::to_wire(&update)).await?;
        self.after_lifecycle_mutation(tournament_id).await?;
        Ok(result)
    }

    pub async fn start_tournament(&self, tournament_id: &str) -> CoreResult<serde_json::Value> {
        self.process_tournament(tournament_id, "start").await
    }

    pub async fn reset_tournament(&self, tournament_id: &str) -> CoreResult<serde_json::Value> {
        self.process_tournament(tournament_id, "reset").await
    }

    pub async fn complete_tournament(&self, tournament_id: &str) -> CoreResult<serde_json::Value> {
        self.process_tournament(tournament_id, "finalize").await
    }

    async fn process_tournament(&self, tournament_id: &str, action: &str) -> CoreResult<serde_json::Value> {
        self.baseline(CacheType::TournamentDetails, tournament_id).await?;
        let body = wire::process_action_body("TournamentProcess", action);
        let result = self.provider.post(&format!("/tournaments/{tournament_id}/process"), body).await?;
        self.after_lifecycle_mutation(tournament_id).await?;
        Ok(result)
    }

    pub async fn delete_tournament(&self, tournament_id: &str) -> CoreResult<serde_json::Value> {
        self.baseline(CacheType::TournamentDetails, tournament_id).await?;
        let result = self.provider.delete(&format!("/tournaments/{tournament_id}")).await?;
        self.after_lifecycle_mutation(tournament_id).await?;
        Ok(result)
    }

    // ---- match mutations --------------------------------------------------

    pub async fn mark_underway(&self, tournament_id: &str, match_id: u64) -> CoreResult<serde_json::Value> {
        self.change_match_state(tournament_id, match_id, "mark_as_underway").await
    }

    pub async fn unmark_underway(&self, tournament_id: &str, match_id: u64) -> CoreResult<serde_json::Value> {
        self.change_match_state(tournament_id, match_id, "unmark_as_underway").await
    }

    pub async fn reopen_match(&self, tournament_id: &str, match_id: u64) -> CoreResult<serde_json::Value> {
        self.change_match_state(tournament_id, match_id, "reopen").await
    }

    async fn change_match_state(&self, tournament_id: &str, match_id: u64, state: &str) -> CoreResult<serde_json::Value> {
        self.baseline(CacheType::Matches, tournament_id).await?;
        let body = wire::change_state_body(state);
        let result = self.provider.put(&format!("/tournaments/{tournament_id}/matches/{match_id}/change_state"), body).await?;
        self.after_match_mutation(tournament_id).await;
        Ok(result)
    }

    pub async fn update_score(&self, tournament_id: &str, match_id: u64, entries: Vec<MatchParticipantEntry>) -> CoreResult<serde_json::Value> {
        self.baseline(CacheType::Matches, tournament_id).await?;
        let body = wire::match_score_body(&entries);
        let result = self.provider.put(&format!("/tournaments/{tournament_id}/matches/{match_id}"), body).await?;
        self.after_match_mutation(tournament_id).await;
        Ok(result)
    }

    /// Declaring a winner is a score update where every entry carries a
    /// rank; the provider rejects the call if none of the entries carry
    /// a score, so that is validated before any network call, per §4.7.
    pub async fn declare_winner(&self, tournament_id: &str, match_id: u64, entries: Vec<MatchParticipantEntry>) -> CoreResult<serde_json::Value> {
        if entries.iter().all(|e| e.score_set.is_none()) {
            return Err(CoreError::ValidationError {
                field: "score_set",
                reason: "declaring a winner requires scores for at least one participant".to_string(),
            });
        }
        self.update_score(tournament_id, match_id, entries).await
    }

    pub async fn clear_scores(&self, tournament_id: &str, match_id: u64) -> CoreResult<serde_json::Value> {
        self.baseline(CacheType::Matches, tournament_id).await?;
        let body = wire::match_score_body(&[]);
        let result = self.provider.put(&format!("/tournaments/{tournament_id}/matches/{match_id}"), body).await?;
        self.after_match_mutation(tournament_id).await;
        Ok(result)
    }

    /// A forfeit is modeled as a score update in which the forfeiting
    /// participant is marked non-advancing and the remainder are ranked
    /// normally; the provider has no separate DQ endpoint in this wire
    /// dialect.
    pub async fn disqualify_participant(&self, tournament_id: &str, match_id: u64, mut entries: Vec<MatchParticipantEntry>, forfeiting_participant_id: u64) -> CoreResult<serde_json::Value> {
        for entry in entries.iter_mut() {
            if entry.participant_id == forfeiting_participant_id {
                entry.advancing = Some(false);
            } else {
                entry.advancing = Some(true);
            }
        }
        self.update_score(tournament_id, match_id, entries).await
    }

    pub async fn assign_station(&self, tournament_id: &str, match_id: u64, station_id: u64) -> CoreResult<serde_json::Value> {
        self.baseline(CacheType::Matches, tournament_id).await?;
        let body = wire::station_body(Some(station_id));
        let result = self.provider.put(&format!("/tournaments/{tournament_id}/matches/{match_id}"), body).await?;
        self.after_match_mutation(tournament_id).await;
        Ok(result)
    }

    pub async fn unassign_station(&self, tournament_id: &str, match_id: u64) -> CoreResult<serde_json::Value> {
        self.baseline(CacheType::Matches, tournament_id).await?;
        let body = wire::station_body(None);
        let result = self.provider.put(&format!("/tournaments/{tournament_id}/matches/{match_id}"), body).await?;
        self.after_match_mutation(tournament_id).await;
        Ok(result)
    }

    // ---- participant mutations ---------------------------------------------

    pub async fn add_participant(&self, tournament_id: &str, name: &str, seed: Option<u32>) -> CoreResult<serde_json::Value> {
        self.baseline(CacheType::Participants, tournament_id).await?;
        let body = wire::participant_body(Some(name), seed);
        let result = self.provider.post(&format!("/tournaments/{tournament_id}/participants"), body).await?;
        self.after_participant_mutation(tournament_id).await?;
        Ok(result)
    }

    pub async fn update_participant(&self, tournament_id: &str, participant_id: u64, name: Option<&str>, seed: Option<u32>) -> CoreResult<serde_json::Value> {
        self.baseline(CacheType::Participants, tournament_id).await?;
        let body = wire::participant_body(name, seed);
        let result = self.provider.patch(&format!("/tournaments/{tournament_id}/participants/{participant_id}"), body).await?;
        self.after_participant_mutation(tournament_id).await?;
        Ok(result)
    }

    pub async fn delete_participant(&self, tournament_id: &str, participant_id: u64) -> CoreResult<serde_json::Value> {
        self.baseline(CacheType::Participants, tournament_id).await?;
        let result = self.provider.delete(&format!("/tournaments/{tournament_id}/participants/{participant_id}")).await?;
        self.after_participant_mutation(tournament_id).await?;
        Ok(result)
    }

    pub async fn bulk_add_participants(&self, tournament_id: &str, names: Vec<String>) -> CoreResult<serde_json::Value> {
        self.baseline(CacheType::Participants, tournament_id).await?;
        let body = wire::bulk_participants_body(&names);
        let result = self.provider.post(&format!("/tournaments/{tournament_id}/participants/bulk_add"), body).await?;
        self.after_participant_mutation(tournament_id).await?;
        Ok(result)
    }

    pub async fn randomize_participants(&self, tournament_id: &str) -> CoreResult<serde_json::Value> {
        self.baseline(CacheType::Participants, tournament_id).await?;
        let result = self.provider.post(&format!("/tournaments/{tournament_id}/participants/randomize"), serde_json::Value::Null).await?;
        self.after_participant_mutation(tournament_id).await?;
        Ok(result)
    }

    pub async fn check_in_participant(&self, tournament_id: &str, participant_id: u64) -> CoreResult<serde_json::Value> {
        self.process_participant(tournament_id, participant_id, "check_in").await
    }

    pub async fn undo_check_in_participant(&self, tournament_id: &str, participant_id: u64) -> CoreResult<serde_json::Value> {
        self.process_participant(tournament_id, participant_id, "undo_check_in").await
    }

    async fn process_participant(&self, tournament_id: &str, participant_id: u64, action: &str) -> CoreResult<serde_json::Value> {
        self.baseline(CacheType::Participants, tournament_id).await?;
        let body = wire::process_action_body("ParticipantProcess", action);
        let result = self.provider.post(&format!("/tournaments/{tournament_id}/participants/{participant_id}/process"), body).await?;
        self.after_participant_mutation(tournament_id).await?;
        Ok(result)
    }

    // ---- shared contract steps ----------------------------------------------

    /// Step 1: `GetOrFetch(ForWrite:true)`. The payload itself is
    /// discarded; what matters is that a stale refresh failure aborts
    /// the mutation before any network call against the stale baseline.
    async fn baseline(&self, cache_type: CacheType, tournament_id: &str) -> CoreResult<()> {
        let endpoint = match cache_type {
            CacheType::Matches => format!("/tournaments/{tournament_id}/matches"),
            CacheType::Participants => format!("/tournaments/{tournament_id}/participants"),
            CacheType::Stations => format!("/tournaments/{tournament_id}/stations"),
            CacheType::TournamentDetails => format!("/tournaments/{tournament_id}"),
            CacheType::TournamentsList => "/tournaments".to_string(),
        };
        let provider = self.provider.clone();
        self.cache
            .get_or_fetch(cache_type, tournament_id, true, false, move || {
                let provider = provider.clone();
                let endpoint = endpoint.clone();
                async move { provider.get(&endpoint).await }
            })
            .await?;
        Ok(())
    }

    /// Steps 4-5 for match mutations: invalidate the tournament's caches
    /// and fire an immediate repoll so the broadcast hub hears about it
    /// within one round trip.
    async fn after_match_mutation(&self, tournament_id: &str) {
        if let Err(err) = self.cache.invalidate_tournament(tournament_id).await {
            tracing::warn!(error = %err, "failed to invalidate tournament cache after match mutation");
        }
        if let Some(poller) = self.poller.upgrade() {
            poller.fire_now().await;
        }
    }

    async fn after_participant_mutation(&self, tournament_id: &str) -> CoreResult<()> {
        self.cache.invalidate_tournament(tournament_id).await
    }

    /// Steps 4 and 6 for lifecycle mutations: invalidate the tournament
    /// plus `tournaments_list`, then schedule C3's prompt re-check.
    async fn after_lifecycle_mutation(&self, tournament_id: &str) -> CoreResult<()> {
        self.cache.invalidate_tournament(tournament_id).await?;
        self.cache.invalidate(CacheType::TournamentsList, Some("list")).await?;
        self.controller.schedule_lifecycle_recheck();
        Ok(())
    }
}
