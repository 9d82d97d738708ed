//! Field-name mapping between the caller-visible flat tournament model
//! and the provider's nested wire shape, per §4.7. Pure functions so the
//! tricky rules (the `starts_at` rename, the consolation-rank omission
//! rule, the grand-finals-modifier enum) are unit testable without a
//! provider round trip.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TournamentUpdate {
    pub name: Option<String>,
    pub tournament_type: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub open_signup: Option<bool>,
    pub signup_cap: Option<u32>,
    pub check_in_duration_minutes: Option<u32>,
    pub hide_seeds: Option<bool>,
    pub sequential_pairings: Option<bool>,
    pub ranked_by: Option<String>,
    pub rr_pts_for_match_win: Option<f64>,
    /// Enables the third-place match when >= 3; omitted entirely
    /// otherwise, since the provider rejects an explicit null.
    pub consolation_matches_target_rank: Option<u32>,
    /// "single", "skip", or `None` (provider accepts a JSON null for this one).
    pub grand_finals_modifier: Option<String>,
    pub notify_users_when_matches_open: Option<bool>,
    pub notify_users_when_the_tournament_ends: Option<bool>,
}

/// A per-participant entry in a match score/winner update, per §6's
/// `attributes.match` array shape.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchParticipantEntry {
    pub participant_id: u64,
    pub score_set: Option<String>,
    pub rank: Option<u32>,
    pub advancing: Option<bool>,
}

/// Builds the `data.attributes` body for `PATCH /tournaments/:id` and
/// `POST /tournaments`, nesting the flat caller fields into the
/// provider's option groups.
pub fn to_wire(update: &TournamentUpdate) -> Value {
    let mut attributes = Map::new();

    if let Some(name) = &update.name {
        attributes.insert("name".to_string(), json!(name));
    }
    if let Some(tournament_type) = &update.tournament_type {
        attributes.insert("tournament_type".to_string(), json!(tournament_type));
    }
    if let Some(starts_at) = update.starts_at {
        attributes.insert("starts_at".to_string(), json!(starts_at.to_rfc3339()));
    }

    let mut registration_options = Map::new();
    if let Some(open_signup) = update.open_signup {
        registration_options.insert("open_signup".to_string(), json!(open_signup));
    }
    if let Some(signup_cap) = update.signup_cap {
        registration_options.insert("signup_cap".to_string(), json!(signup_cap));
    }
    if let Some(minutes) = update.check_in_duration_minutes {
        registration_options.insert("check_in_duration_minutes".to_string(), json!(minutes));
    }
    if !registration_options.is_empty() {
        attributes.insert("registration_options".to_string(), Value::Object(registration_options));
    }

    let mut seeding_options = Map::new();
    if let Some(hide_seeds) = update.hide_seeds {
        seeding_options.insert("hide_seeds".to_string(), json!(hide_seeds));
    }
    if let Some(sequential) = update.sequential_pairings {
        seeding_options.insert("sequential_pairings".to_string(), json!(sequential));
    }
    if !seeding_options.is_empty() {
        attributes.insert("seeding_options".to_string(), Value::Object(seeding_options));
    }

    let mut match_options = Map::new();
    if let Some(ranked_by) = &update.ranked_by {
        match_options.insert("ranked_by".to_string(), json!(ranked_by));
    }
    if let Some(pts) = update.rr_pts_for_match_win {
        match_options.insert("rr_pts_for_match_win".to_string(), json!(pts));
    }
    if !match_options.is_empty() {
        attributes.insert("match_options".to_string(), Value::Object(match_options));
    }

    let mut double_elimination_options = Map::new();
    if let Some(rank) = update.consolation_matches_target_rank {
        if rank >= 3 {
            double_elimination_options.insert("consolation_matches_target_rank".to_string(), json!(rank));
        }
        // ranks below 3 are dropped entirely rather than sent as a disabling value,
        // since the provider rejects an explicit null for this field.
    }
    if let Some(modifier) = &update.grand_finals_modifier {
        double_elimination_options.insert("grand_finals_modifier".to_string(), json!(modifier));
    }
    if !double_elimination_options.is_empty() {
        attributes.insert("double_elimination_options".to_string(), Value::Object(double_elimination_options));
    }

    let mut notifications = Map::new();
    if let Some(v) = update.notify_users_when_matches_open {
        notifications.insert("notify_users_when_matches_open".to_string(), json!(v));
    }
    if let Some(v) = update.notify_users_when_the_tournament_ends {
        notifications.insert("notify_users_when_the_tournament_ends".to_string(), json!(v));
    }
    if !notifications.is_empty() {
        attributes.insert("notifications".to_string(), Value::Object(notifications));
    }

    json!({ "data": { "type": "Tournament", "attributes": Value::Object(attributes) } })
}

/// Builds the `attributes.match` body for a score/winner update.
pub fn match_score_body(entries: &[MatchParticipantEntry]) -> Value {
    let entries: Vec<Value> = entries
        .iter()
        .map(|e| {
            let mut obj = Map::new();
            obj.insert("participant_id".to_string(), json!(e.participant_id));
            if let Some(score_set) = &e.score_set {
                obj.insert("score_set".to_string(), json!(score_set));
            }
            if let Some(rank) = e.rank {
                obj.insert("rank".to_string(), json!(rank));
            }
            if let Some(advancing) = e.advancing {
                obj.insert("advancing".to_string(), json!(advancing));
            }
            Value::Object(obj)
        })
        .collect();

    json!({ "data": { "type": "Match", "attributes": { "match": entries } } })
}

pub fn change_state_body(state: &str) -> Value {
    json!({ "data": { "type": "Match", "attributes": { "state": state } } })
}

pub fn station_body(station_id: Option<u64>) -> Value {
    json!({ "data": { "type": "Match", "attributes": { "station_id": station_id } } })
}

pub fn process_action_body(resource_type: &str, action: &str) -> Value {
    json!({ "data": { "type": resource_type, "attributes": { "action": action } } })
}

pub fn participant_body(name: Option<&str>, seed: Option<u32>) -> Value {
    let mut attributes = Map::new();
    if let Some(name) = name {
        attributes.insert("name".to_string(), json!(name));
    }
    if let Some(seed) = seed {
        attributes.insert("seed".to_string(), json!(seed));
    }
    json!({ "data": { "type": "Participant", "attributes": Value::Object(attributes) } })
}

pub fn bulk_participants_body(names: &[String]) -> Value {
    let data: Vec<Value> =
        names.iter().map(|name| json!({ "type": "Participant", "attributes": { "name": name } })).collect();
    json!({ "data": data })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consolation_rank_below_three_is_omitted_not_nulled() {
        let update = TournamentUpdate { consolation_matches_target_rank: Some(2), ..Default::default() };
        let wire = to_wire(&update);
        assert!(wire["data"]["attributes"].get("double_elimination_options").is_none());
    }

    #[test]
    fn consolation_rank_of_three_or_more_is_included() {
        let update = TournamentUpdate { consolation_matches_target_rank: Some(3), ..Default::default() };
        let wire = to_wire(&update);
        assert_eq!(wire["data"]["attributes"]["double_elimination_options"]["consolation_matches_target_rank"], 3);
    }

    #[test]
    fn starts_at_is_nested_at_top_level_not_start_at() {
        let update = TournamentUpdate { starts_at: Some(Utc::now()), ..Default::default() };
        let wire = to_wire(&update);
        assert!(wire["data"]["attributes"].get("starts_at").is_some());
        assert!(wire["data"]["attributes"].get("start_at").is_none());
    }

    #[test]
    fn grand_finals_modifier_accepts_skip() {
        let update = TournamentUpdate { grand_finals_modifier: Some("skip".to_string()), ..Default::default() };
        let wire = to_wire(&update);
        assert_eq!(wire["data"]["attributes"]["double_elimination_options"]["grand_finals_modifier"], "skip");
    }

    #[test]
    fn match_score_body_carries_optional_fields() {
        let entries = vec![
            MatchParticipantEntry { participant_id: 1, score_set: Some("2-1".into()), rank: Some(1), advancing: Some(true) },
            MatchParticipantEntry { participant_id: 2, score_set: Some("1-2".into()), rank: None, advancing: Some(false) },
        ];
        let body = match_score_body(&entries);
        let matches = body["data"]["attributes"]["match"].as_array().unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0]["rank"], 1);
        assert!(matches[1].get("rank").is_none());
    }
}
