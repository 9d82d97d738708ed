//! HTTP handlers: cached reads through C1/C4, mutations through C7, and
//! the cache/rate-controller admin surface, following the teacher's
//! `State` extractor + `Result<Json<_>, StatusCode>` handler shape.

use crate::dispatcher::wire::{MatchParticipantEntry, TournamentUpdate};
use crate::error::{CoreError, CoreResult};
use crate::models::{CacheType, HealthStatus, RateMode};
use crate::AppCore;
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

type CoreState = State<Arc<AppCore>>;

async fn cached_read(core: &AppCore, cache_type: CacheType, key: &str, endpoint: String) -> CoreResult<Value> {
    let active_mode = core.controller.current_mode().await == RateMode::Active;
    let provider = core.provider.clone();
    let (payload, _meta) = core
        .cache
        .get_or_fetch(cache_type, key, false, active_mode, move || {
            let provider = provider.clone();
            let endpoint = endpoint.clone();
            async move { provider.get(&endpoint).await }
        })
        .await?;
    Ok(payload)
}

// ---- reads -----------------------------------------------------------

pub async fn list_tournaments(State(core): CoreState) -> Result<Json<Value>, CoreError> {
    let payload = cached_read(&core, CacheType::TournamentsList, "list", "/tournaments".to_string()).await?;
    Ok(Json(payload))
}

pub async fn get_tournament(State(core): CoreState, Path(id): Path<String>) -> Result<Json<Value>, CoreError> {
    let endpoint = format!("/tournaments/{id}");
    let payload = cached_read(&core, CacheType::TournamentDetails, &id, endpoint).await?;
    Ok(Json(payload))
}

pub async fn list_matches(State(core): CoreState, Path(id): Path<String>) -> Result<Json<Value>, CoreError> {
    let endpoint = format!("/tournaments/{id}/matches");
    let payload = cached_read(&core, CacheType::Matches, &id, endpoint).await?;
    Ok(Json(payload))
}

pub async fn list_participants(State(core): CoreState, Path(id): Path<String>) -> Result<Json<Value>, CoreError> {
    let endpoint = format!("/tournaments/{id}/participants");
    let payload = cached_read(&core, CacheType::Participants, &id, endpoint).await?;
    Ok(Json(payload))
}

pub async fn list_stations(State(core): CoreState, Path(id): Path<String>) -> Result<Json<Value>, CoreError> {
    let endpoint = format!("/tournaments/{id}/stations");
    let payload = cached_read(&core, CacheType::Stations, &id, endpoint).await?;
    Ok(Json(payload))
}

// ---- tournament lifecycle mutations -----------------------------------

#[derive(Debug, Deserialize, Default)]
pub struct TournamentUpdateBody {
    pub name: Option<String>,
    pub tournament_type: Option<String>,
    pub starts_at: Option<chrono::DateTime<Utc>>,
    pub open_signup: Option<bool>,
    pub signup_cap: Option<u32>,
    pub check_in_duration_minutes: Option<u32>,
    pub hide_seeds: Option<bool>,
    pub sequential_pairings: Option<bool>,
    pub ranked_by: Option<String>,
    pub rr_pts_for_match_win: Option<f64>,
    pub consolation_matches_target_rank: Option<u32>,
    pub grand_finals_modifier: Option<String>,
    pub notify_users_when_matches_open: Option<bool>,
    pub notify_users_when_the_tournament_ends: Option<bool>,
}

impl From<TournamentUpdateBody> for TournamentUpdate {
    fn from(body: TournamentUpdateBody) -> Self {
        TournamentUpdate {
            name: body.name,
            tournament_type: body.tournament_type,
            starts_at: body.starts_at,
            open_signup: body.open_signup,
            signup_cap: body.signup_cap,
            check_in_duration_minutes: body.check_in_duration_minutes,
            hide_seeds: body.hide_seeds,
            sequential_pairings: body.sequential_pairings,
            ranked_by: body.ranked_by,
            rr_pts_for_match_win: body.rr_pts_for_match_win,
            consolation_matches_target_rank: body.consolation_matches_target_rank,
            grand_finals_modifier: body.grand_finals_modifier,
            notify_users_when_matches_open: body.notify_users_when_matches_open,
            notify_users_when_the_tournament_ends: body.notify_users_when_the_tournament_ends,
        }
    }
}

pub async fn create_tournament(State(core): CoreState, Json(body): Json<TournamentUpdateBody>) -> Result<Json<Value>, CoreError> {
    Ok(Json(core.dispatcher.create_tournament(body.into()).await?))
}

pub async fn update_tournament(
    State(core): CoreState,
    Path(id): Path<String>,
    Json(body): Json<TournamentUpdateBody>,
) -> Result<Json<Value>, CoreError> {
    Ok(Json(core.dispatcher.update_tournament(&id, body.into()).await?))
}

pub async fn start_tournament(State(core): CoreState, Path(id): Path<String>) -> Result<Json<Value>, CoreError> {
    Ok(Json(core.dispatcher.start_tournament(&id).await?))
}

pub async fn reset_tournament(State(core): CoreState, Path(id): Path<String>) -> Result<Json<Value>, CoreError> {
    Ok(Json(core.dispatcher.reset_tournament(&id).await?))
}

pub async fn complete_tournament(State(core): CoreState, Path(id): Path<String>) -> Result<Json<Value>, CoreError> {
    Ok(Json(core.dispatcher.complete_tournament(&id).await?))
}

pub async fn delete_tournament(State(core): CoreState, Path(id): Path<String>) -> Result<Json<Value>, CoreError> {
    Ok(Json(core.dispatcher.delete_tournament(&id).await?))
}

// ---- match mutations ---------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct MatchStateBody {
    pub action: String,
}

pub async fn change_match_state(
    State(core): CoreState,
    Path((tournament_id, match_id)): Path<(String, u64)>,
    Json(body): Json<MatchStateBody>,
) -> Result<Json<Value>, CoreError> {
    let result = match body.action.as_str() {
        "mark_underway" => core.dispatcher.mark_underway(&tournament_id, match_id).await?,
        "unmark_underway" => core.dispatcher.unmark_underway(&tournament_id, match_id).await?,
        "reopen" => core.dispatcher.reopen_match(&tournament_id, match_id).await?,
        other => {
            return Err(CoreError::ValidationError { field: "action", reason: format!("unknown match state action `{other}`") })
        }
    };
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct MatchScoreEntryBody {
    pub participant_id: u64,
    pub score_set: Option<String>,
    pub rank: Option<u32>,
    pub advancing: Option<bool>,
}

impl From<MatchScoreEntryBody> for MatchParticipantEntry {
    fn from(e: MatchScoreEntryBody) -> Self {
        MatchParticipantEntry { participant_id: e.participant_id, score_set: e.score_set, rank: e.rank, advancing: e.advancing }
    }
}

#[derive(Debug, Deserialize)]
pub struct MatchScoreBody {
    #[serde(default)]
    pub entries: Vec<MatchScoreEntryBody>,
    #[serde(default)]
    pub forfeiting_participant_id: Option<u64>,
}

pub async fn update_match_score(
    State(core): CoreState,
    Path((tournament_id, match_id)): Path<(String, u64)>,
    Json(body): Json<MatchScoreBody>,
) -> Result<Json<Value>, CoreError> {
    let entries: Vec<MatchParticipantEntry> = body.entries.into_iter().map(Into::into).collect();

    let result = if let Some(forfeiting) = body.forfeiting_participant_id {
        core.dispatcher.disqualify_participant(&tournament_id, match_id, entries, forfeiting).await?
    } else if entries.is_empty() {
        core.dispatcher.clear_scores(&tournament_id, match_id).await?
    } else if entries.iter().any(|e| e.rank.is_some()) {
        core.dispatcher.declare_winner(&tournament_id, match_id, entries).await?
    } else {
        core.dispatcher.update_score(&tournament_id, match_id, entries).await?
    };

    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct StationAssignBody {
    pub station_id: Option<u64>,
}

pub async fn assign_match_station(
    State(core): CoreState,
    Path((tournament_id, match_id)): Path<(String, u64)>,
    Json(body): Json<StationAssignBody>,
) -> Result<Json<Value>, CoreError> {
    let result = match body.station_id {
        Some(station_id) => core.dispatcher.assign_station(&tournament_id, match_id, station_id).await?,
        None => core.dispatcher.unassign_station(&tournament_id, match_id).await?,
    };
    Ok(Json(result))
}

// ---- participant mutations ---------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ParticipantBody {
    pub name: Option<String>,
    pub seed: Option<u32>,
}

pub async fn add_participant(
    State(core): CoreState,
    Path(tournament_id): Path<String>,
    Json(body): Json<ParticipantBody>,
) -> Result<Json<Value>, CoreError> {
    let name = body.name.ok_or(CoreError::ValidationError { field: "name", reason: "a new participant requires a name".to_string() })?;
    Ok(Json(core.dispatcher.add_participant(&tournament_id, &name, body.seed).await?))
}

pub async fn update_participant(
    State(core): CoreState,
    Path((tournament_id, participant_id)): Path<(String, u64)>,
    Json(body): Json<ParticipantBody>,
) -> Result<Json<Value>, CoreError> {
    Ok(Json(core.dispatcher.update_participant(&tournament_id, participant_id, body.name.as_deref(), body.seed).await?))
}

pub async fn delete_participant(
    State(core): CoreState,
    Path((tournament_id, participant_id)): Path<(String, u64)>,
) -> Result<Json<Value>, CoreError> {
    Ok(Json(core.dispatcher.delete_participant(&tournament_id, participant_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct BulkParticipantsBody {
    pub names: Vec<String>,
}

pub async fn bulk_add_participants(
    State(core): CoreState,
    Path(tournament_id): Path<String>,
    Json(body): Json<BulkParticipantsBody>,
) -> Result<Json<Value>, CoreError> {
    Ok(Json(core.dispatcher.bulk_add_participants(&tournament_id, body.names).await?))
}

pub async fn randomize_participants(State(core): CoreState, Path(tournament_id): Path<String>) -> Result<Json<Value>, CoreError> {
    Ok(Json(core.dispatcher.randomize_participants(&tournament_id).await?))
}

pub async fn check_in_participant(
    State(core): CoreState,
    Path((tournament_id, participant_id)): Path<(String, u64)>,
) -> Result<Json<Value>, CoreError> {
    Ok(Json(core.dispatcher.check_in_participant(&tournament_id, participant_id).await?))
}

pub async fn undo_check_in_participant(
    State(core): CoreState,
    Path((tournament_id, participant_id)): Path<(String, u64)>,
) -> Result<Json<Value>, CoreError> {
    Ok(Json(core.dispatcher.undo_check_in_participant(&tournament_id, participant_id).await?))
}

// ---- cache admin surface ------------------------------------------------

pub async fn cache_stats(State(core): CoreState) -> Result<Json<Value>, CoreError> {
    let report = core.cache.stats().await?;
    Ok(Json(serde_json::to_value(report)?))
}

#[derive(Debug, Deserialize)]
pub struct InvalidateBody {
    #[serde(rename = "type")]
    pub cache_type: String,
    pub key: Option<String>,
}

pub async fn invalidate_cache(State(core): CoreState, Json(body): Json<InvalidateBody>) -> Result<Json<Value>, CoreError> {
    let cache_type = CacheType::from_str(&body.cache_type)
        .ok_or_else(|| CoreError::ValidationError { field: "type", reason: format!("unknown cache type `{}`", body.cache_type) })?;
    core.cache.invalidate(cache_type, body.key.as_deref()).await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

pub async fn clear_cache(State(core): CoreState) -> Result<Json<Value>, CoreError> {
    for cache_type in
        [CacheType::TournamentsList, CacheType::Matches, CacheType::Participants, CacheType::Stations, CacheType::TournamentDetails]
    {
        core.cache.invalidate(cache_type, None).await?;
    }
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

pub async fn tournament_cache_status(State(core): CoreState, Path(id): Path<String>) -> Result<Json<Value>, CoreError> {
    let mut status = HashMap::new();
    for cache_type in [CacheType::Matches, CacheType::Participants, CacheType::Stations, CacheType::TournamentDetails] {
        let entry = core.cache.get(cache_type, &id).await?;
        status.insert(
            cache_type.as_str(),
            entry.map(|(_, meta)| serde_json::json!({ "cached_at": meta.cached_at, "stale": meta.stale, "version": meta.version })),
        );
    }
    Ok(Json(serde_json::to_value(status)?))
}

// ---- rate controller admin surface -------------------------------------

pub async fn rate_status(State(core): CoreState) -> Result<Json<Value>, CoreError> {
    Ok(Json(serde_json::json!({
        "mode": core.controller.current_mode().await.as_str(),
        "active_tournament_id": core.controller.active_tournament_id().await,
        "dev_mode_active": core.controller.dev_mode_active().await,
        "effective_rate": core.controller.effective_rate().await,
        "last_check": core.controller.last_check().await,
        "next_check": core.controller.next_check().await,
    })))
}

#[derive(Debug, Deserialize)]
pub struct RateModeBody {
    pub mode: String,
}

pub async fn set_rate_mode(State(core): CoreState, Json(body): Json<RateModeBody>) -> Result<Json<Value>, CoreError> {
    let mode = match body.mode.as_str() {
        "idle" => Some(RateMode::Idle),
        "upcoming" => Some(RateMode::Upcoming),
        "active" => Some(RateMode::Active),
        "auto" => None,
        other => {
            return Err(CoreError::ValidationError { field: "mode", reason: format!("unknown rate mode `{other}`") })
        }
    };
    core.controller.set_override(mode).await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

pub async fn enable_dev_mode(State(core): CoreState) -> Result<Json<Value>, CoreError> {
    core.controller.enable_dev_mode().await;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

pub async fn disable_dev_mode(State(core): CoreState) -> Result<Json<Value>, CoreError> {
    core.controller.disable_dev_mode().await;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

pub async fn trigger_rate_check(State(core): CoreState) -> Result<Json<Value>, CoreError> {
    let classification = core.controller.check().await?;
    Ok(Json(serde_json::json!({
        "mode": classification.mode.as_str(),
        "active_tournament_id": classification.active_tournament_id,
    })))
}

// ---- oauth ---------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct OAuthCallbackQuery {
    pub code: String,
}

pub async fn oauth_callback(State(core): CoreState, Query(query): Query<OAuthCallbackQuery>) -> Result<Json<Value>, CoreError> {
    core.provider.exchange_authorization_code(&query.code).await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

// ---- health -------------------------------------------------------------

pub async fn health_check(State(core): CoreState) -> Result<Json<HealthStatus>, CoreError> {
    core.pool.acquire().await.map_err(CoreError::from)?;
    Ok(Json(HealthStatus { status: "healthy".to_string(), timestamp: Utc::now() }))
}
