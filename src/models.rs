//! Shared domain types: cache keys, provider record shapes, and the
//! event/mode enums that tie the components together.
//!
//! Provider records keep a `raw` pass-through field so unknown upstream
//! attributes survive a round trip instead of being silently dropped by
//! a duck-typed probe, per the tagged-variant design note.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Challonge's JSON:API responses aren't strict about the spec's "id is
/// always a string" rule; accept either shape rather than failing decode
/// on whichever one shows up.
fn flexible_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Number(n) => n.as_u64().ok_or_else(|| serde::de::Error::custom("id number out of range")),
        serde_json::Value::String(s) => s.parse().map_err(serde::de::Error::custom),
        other => Err(serde::de::Error::custom(format!("expected numeric id, got {other}"))),
    }
}

fn flexible_u64_opt<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => {
            Ok(Some(n.as_u64().ok_or_else(|| serde::de::Error::custom("id number out of range"))?))
        }
        Some(serde_json::Value::String(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
        Some(other) => Err(serde::de::Error::custom(format!("expected numeric id, got {other}"))),
    }
}

/// The five cache content types, per the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheType {
    TournamentsList,
    Matches,
    Participants,
    Stations,
    TournamentDetails,
}

impl CacheType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheType::TournamentsList => "tournaments_list",
            CacheType::Matches => "matches",
            CacheType::Participants => "participants",
            CacheType::Stations => "stations",
            CacheType::TournamentDetails => "tournament_details",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "tournaments_list" => Some(CacheType::TournamentsList),
            "matches" => Some(CacheType::Matches),
            "participants" => Some(CacheType::Participants),
            "stations" => Some(CacheType::Stations),
            "tournament_details" => Some(CacheType::TournamentDetails),
            _ => None,
        }
    }

    /// Default TTL in seconds, per §4.1.
    pub fn default_ttl_secs(&self) -> i64 {
        match self {
            CacheType::TournamentsList => 60,
            CacheType::Matches => 30,
            CacheType::Participants => 120,
            CacheType::Stations => 300,
            CacheType::TournamentDetails => 300,
        }
    }

    /// TTL in seconds while the adaptive controller is in ACTIVE mode.
    pub fn active_ttl_secs(&self) -> i64 {
        match self {
            CacheType::TournamentsList => 30,
            CacheType::Matches => 15,
            CacheType::Participants => 60,
            CacheType::Stations => 60,
            CacheType::TournamentDetails => 120,
        }
    }

    /// Whether this cache type tracks `item_count` (matches/participants only).
    pub fn tracks_item_count(&self) -> bool {
        matches!(self, CacheType::Matches | CacheType::Participants)
    }
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata returned alongside a cache `Get`/`GetOrFetch` result.
#[derive(Debug, Clone, Serialize)]
pub struct CacheMeta {
    pub cached_at: DateTime<Utc>,
    pub age_secs: i64,
    pub stale: bool,
    pub source: &'static str,
    pub version: String,
    pub offline: bool,
    pub for_write: bool,
    pub error: Option<String>,
}

impl CacheMeta {
    pub fn fresh_from_provider(version: String) -> Self {
        Self {
            cached_at: Utc::now(),
            age_secs: 0,
            stale: false,
            source: "provider",
            version,
            offline: false,
            for_write: false,
            error: None,
        }
    }

    pub fn for_write(version: String) -> Self {
        Self { for_write: true, ..Self::fresh_from_provider(version) }
    }

    pub fn fresh_from_cache(cached_at: DateTime<Utc>, version: String) -> Self {
        Self {
            cached_at,
            age_secs: (Utc::now() - cached_at).num_seconds().max(0),
            stale: false,
            source: "cache",
            version,
            offline: false,
            for_write: false,
            error: None,
        }
    }

    pub fn stale_offline(cached_at: DateTime<Utc>, version: String, error: String) -> Self {
        Self {
            cached_at,
            age_secs: (Utc::now() - cached_at).num_seconds().max(0),
            stale: true,
            source: "cache",
            version,
            offline: true,
            for_write: false,
            error: Some(error),
        }
    }
}

/// Adaptive controller modes, per §3/§4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateMode {
    Idle,
    Upcoming,
    Active,
}

impl RateMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateMode::Idle => "idle",
            RateMode::Upcoming => "upcoming",
            RateMode::Active => "active",
        }
    }
}

impl fmt::Display for RateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display client roles for broadcast-hub registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayRole {
    Match,
    Bracket,
    Flyer,
}

/// A provider tournament record, decoded from `data.attributes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TournamentRecord {
    pub id: String,
    pub name: Option<String>,
    pub state: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub starts_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub raw: serde_json::Value,
}

/// A provider match record, decoded from `data.attributes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecord {
    #[serde(deserialize_with = "flexible_u64")]
    pub id: u64,
    pub tournament_id: String,
    pub state: String,
    #[serde(default, deserialize_with = "flexible_u64_opt")]
    pub participant1_id: Option<u64>,
    #[serde(default, deserialize_with = "flexible_u64_opt")]
    pub participant2_id: Option<u64>,
    pub scores_csv: Option<String>,
    #[serde(default, deserialize_with = "flexible_u64_opt")]
    pub winner_id: Option<u64>,
    #[serde(default, deserialize_with = "flexible_u64_opt")]
    pub station_id: Option<u64>,
    pub underway_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub prerequisite_match_ids: Vec<u64>,
    #[serde(flatten)]
    pub raw: serde_json::Value,
}

/// A provider participant record, decoded from `data.attributes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantRecord {
    #[serde(deserialize_with = "flexible_u64")]
    pub id: u64,
    pub tournament_id: String,
    pub name: String,
    pub checked_in: Option<bool>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub raw: serde_json::Value,
}

/// A provider station record, decoded from `data.attributes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationRecord {
    #[serde(deserialize_with = "flexible_u64")]
    pub id: u64,
    pub tournament_id: String,
    pub number: Option<i64>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub raw: serde_json::Value,
}

/// Server-to-client broadcast events, per §4.6's event catalogue.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "matches:update")]
    MatchesUpdate(serde_json::Value),
    #[serde(rename = "tournament:update")]
    TournamentUpdate(serde_json::Value),
    #[serde(rename = "ticker:message")]
    TickerMessage { text: String, duration_s: u32 },
    #[serde(rename = "qr:show")]
    QrShow { url: String, label: String, duration_s: Option<u32> },
    #[serde(rename = "qr:hide")]
    QrHide,
    #[serde(rename = "timer:dq:started")]
    TimerDqStarted { deadline_epoch_secs: i64 },
    #[serde(rename = "timer:dq:warning")]
    TimerDqWarning,
    #[serde(rename = "timer:dq:expired")]
    TimerDqExpired,
    #[serde(rename = "timer:dq:cancelled")]
    TimerDqCancelled,
    #[serde(rename = "sponsor:show")]
    SponsorShow,
    #[serde(rename = "sponsor:hide")]
    SponsorHide,
    #[serde(rename = "sponsor:rotate")]
    SponsorRotate,
    #[serde(rename = "sponsor:config")]
    SponsorConfig(serde_json::Value),
    #[serde(rename = "activity:initial")]
    ActivityInitial(Vec<serde_json::Value>),
    #[serde(rename = "activity:new")]
    ActivityNew(serde_json::Value),
}

impl ServerEvent {
    /// Whether this event requires delivery-with-ack, per §4.6.
    pub fn requires_ack(&self) -> bool {
        matches!(
            self,
            ServerEvent::TimerDqStarted { .. }
                | ServerEvent::TimerDqWarning
                | ServerEvent::TimerDqExpired
                | ServerEvent::TimerDqCancelled
                | ServerEvent::SponsorShow
                | ServerEvent::SponsorHide
        )
    }
}

/// Liveness probe payload, same shape the teacher reports from `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}
