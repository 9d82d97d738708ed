//! Content Cache Store (C1): typed key -> blob cache with TTL, hit/miss
//! stats, and invalidation primitives, backed by SQLite.

use super::decision::{plan_fetch, resolve_outcome, FetchPlan, Lookup};
use super::entry::{extract_item_count, extract_version, CacheRow};
use crate::error::{CoreError, CoreResult};
use crate::models::{CacheMeta, CacheType};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use sqlx::sqlite::SqlitePool;
use std::future::Future;
use std::time::Duration as StdDuration;
use tracing::warn;

/// Per-type hit/miss accounting, as exposed by `Stats()`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TypeStats {
    pub hits: i64,
    pub misses: i64,
    pub saved_provider_calls: i64,
    pub hit_rate: f64,
    pub last_hit: Option<DateTime<Utc>>,
    pub last_miss: Option<DateTime<Utc>>,
    pub entry_count: i64,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StatsReport {
    pub by_type: std::collections::HashMap<String, TypeStats>,
    pub total_hits: i64,
    pub total_misses: i64,
    pub total_saved_provider_calls: i64,
}

#[derive(Clone)]
pub struct CacheStore {
    pool: SqlitePool,
}

impl CacheStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// `Get(type, key)` per §4.1. Returns `None` on a miss.
    pub async fn get(&self, cache_type: CacheType, key: &str) -> CoreResult<Option<(Value, CacheMeta)>> {
        let row = self.fetch_row(cache_type, key).await?;

        match row {
            None => {
                self.record_miss(cache_type).await;
                Ok(None)
            }
            Some(row) => {
                let now = Utc::now();
                let stale = row.is_expired(now);
                self.record_hit(cache_type).await;
                let meta = if stale {
                    CacheMeta::stale_offline(row.cached_at, row.version.clone(), "expired".to_string())
                } else {
                    CacheMeta::fresh_from_cache(row.cached_at, row.version.clone())
                };
                Ok(Some((row.payload, meta)))
            }
        }
    }

    /// `Set(type, key, payload, ttl?)` per §4.1. `active_mode` selects
    /// the shortened ACTIVE-mode TTL table when no explicit `ttl` is given.
    pub async fn set(
        &self,
        cache_type: CacheType,
        key: &str,
        payload: Value,
        ttl: Option<StdDuration>,
        active_mode: bool,
    ) -> CoreResult<()> {
        let now = Utc::now();
        let ttl_secs = ttl
            .map(|d| d.as_secs() as i64)
            .unwrap_or_else(|| if active_mode { cache_type.active_ttl_secs() } else { cache_type.default_ttl_secs() });
        let expires_at = now + chrono::Duration::seconds(ttl_secs);
        let version = extract_version(&payload, now);
        let item_count = if cache_type.tracks_item_count() { extract_item_count(&payload) } else { None };
        let payload_text = serde_json::to_string(&payload)?;

        sqlx::query(
            "INSERT INTO cache_entries (type, key, payload, cached_at, expires_at, version, item_count)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(type, key) DO UPDATE SET
                payload = excluded.payload,
                cached_at = excluded.cached_at,
                expires_at = excluded.expires_at,
                version = excluded.version,
                item_count = excluded.item_count",
        )
        .bind(cache_type.as_str())
        .bind(key)
        .bind(payload_text)
        .bind(now.timestamp() as f64)
        .bind(expires_at.timestamp() as f64)
        .bind(&version)
        .bind(item_count)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// `GetOrFetch(type, key, fetcher, {ForWrite})` per §4.1's four-branch
    /// contract. The branching decision is delegated to the pure
    /// functions in `decision`; this method only performs the I/O they call for.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        cache_type: CacheType,
        key: &str,
        for_write: bool,
        active_mode: bool,
        fetcher: F,
    ) -> CoreResult<(Value, CacheMeta)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CoreResult<Value>>,
    {
        let existing_row = self.fetch_row(cache_type, key).await?;
        let lookup = Lookup::from_row(existing_row);
        let plan = plan_fetch(lookup, for_write);

        match plan {
            FetchPlan::ServeCached(row) => {
                self.record_hit(cache_type).await;
                self.record_saved_provider_call(cache_type).await;
                Ok((row.payload, CacheMeta::fresh_from_cache(row.cached_at, row.version)))
            }
            FetchPlan::MustFetch { existing } => {
                let fetch_result = fetcher().await.map(|payload| {
                    let version = extract_version(&payload, Utc::now());
                    (payload, version)
                });

                match &fetch_result {
                    Ok((payload, _)) => {
                        self.set(cache_type, key, payload.clone(), None, active_mode).await?;
                        if existing.is_none() {
                            self.record_miss(cache_type).await;
                        } else {
                            self.record_hit(cache_type).await;
                        }
                    }
                    Err(_) => {
                        if existing.is_some() {
                            self.record_hit(cache_type).await;
                        } else {
                            self.record_miss(cache_type).await;
                        }
                    }
                }

                resolve_outcome(existing, for_write, fetch_result)
            }
        }
    }

    /// `Invalidate(type, key?)`. Omitting `key` purges every entry of that
    /// type. For `tournaments_list`, invalidating `"list"` purges every
    /// list variant regardless of its parameterization.
    pub async fn invalidate(&self, cache_type: CacheType, key: Option<&str>) -> CoreResult<()> {
        match key {
            None => {
                sqlx::query("DELETE FROM cache_entries WHERE type = ?")
                    .bind(cache_type.as_str())
                    .execute(&self.pool)
                    .await?;
            }
            Some("list") if cache_type == CacheType::TournamentsList => {
                sqlx::query("DELETE FROM cache_entries WHERE type = ?")
                    .bind(cache_type.as_str())
                    .execute(&self.pool)
                    .await?;
            }
            Some(key) => {
                sqlx::query("DELETE FROM cache_entries WHERE type = ? AND key = ?")
                    .bind(cache_type.as_str())
                    .bind(key)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    /// `InvalidateTournament(tournament_id)`: shorthand invalidating
    /// matches, participants, stations, and details for one tournament id.
    pub async fn invalidate_tournament(&self, tournament_id: &str) -> CoreResult<()> {
        for cache_type in
            [CacheType::Matches, CacheType::Participants, CacheType::Stations, CacheType::TournamentDetails]
        {
            self.invalidate(cache_type, Some(tournament_id)).await?;
        }
        Ok(())
    }

    /// `CleanupExpired()`: delete rows past their `expires_at`.
    pub async fn cleanup_expired(&self) -> CoreResult<u64> {
        let now = Utc::now().timestamp() as f64;
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at < ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// `Stats()`: per-type and aggregate hit/miss counters.
    pub async fn stats(&self) -> CoreResult<StatsReport> {
        let rows = sqlx::query_as::<_, (String, i64, i64, i64, Option<f64>, Option<f64>)>(
            "SELECT type, hits, misses, saved_provider_calls, last_hit, last_miss FROM cache_stats",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut report = StatsReport::default();

        for (type_name, hits, misses, saved, last_hit, last_miss) in rows {
            let entry_count: i64 =
                sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM cache_entries WHERE type = ?")
                    .bind(&type_name)
                    .fetch_one(&self.pool)
                    .await
                    .map(|(c,)| c)
                    .unwrap_or(0);

            let total = hits + misses;
            let hit_rate = if total > 0 { hits as f64 / total as f64 } else { 0.0 };

            report.total_hits += hits;
            report.total_misses += misses;
            report.total_saved_provider_calls += saved;

            report.by_type.insert(
                type_name,
                TypeStats {
                    hits,
                    misses,
                    saved_provider_calls: saved,
                    hit_rate,
                    last_hit: last_hit.and_then(epoch_to_datetime),
                    last_miss: last_miss.and_then(epoch_to_datetime),
                    entry_count,
                },
            );
        }

        Ok(report)
    }

    async fn fetch_row(&self, cache_type: CacheType, key: &str) -> CoreResult<Option<CacheRow>> {
        let row = sqlx::query_as::<_, (String, f64, f64, String, Option<i64>)>(
            "SELECT payload, cached_at, expires_at, version, item_count FROM cache_entries WHERE type = ? AND key = ?",
        )
        .bind(cache_type.as_str())
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            None => None,
            Some((payload_text, cached_at, expires_at, version, item_count)) => {
                let payload: Value = serde_json::from_str(&payload_text)?;
                Some(CacheRow {
                    payload,
                    cached_at: epoch_to_datetime(cached_at).unwrap_or_else(Utc::now),
                    expires_at: epoch_to_datetime(expires_at).unwrap_or_else(Utc::now),
                    version,
                    item_count,
                })
            }
        })
    }

    /// Cache-layer statistics failures are logged and swallowed, never
    /// surfaced, per §4.1's failure semantics.
    async fn record_hit(&self, cache_type: CacheType) {
        let now = Utc::now().timestamp() as f64;
        if let Err(err) = sqlx::query(
            "INSERT INTO cache_stats (type, hits, misses, saved_provider_calls, last_hit, last_miss)
             VALUES (?, 1, 0, 0, ?, NULL)
             ON CONFLICT(type) DO UPDATE SET hits = hits + 1, last_hit = excluded.last_hit",
        )
        .bind(cache_type.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        {
            warn!(error = %err, cache_type = %cache_type, "dropping cache hit statistics update");
        }
    }

    async fn record_miss(&self, cache_type: CacheType) {
        let now = Utc::now().timestamp() as f64;
        if let Err(err) = sqlx::query(
            "INSERT INTO cache_stats (type, hits, misses, saved_provider_calls, last_hit, last_miss)
             VALUES (?, 0, 1, 0, NULL, ?)
             ON CONFLICT(type) DO UPDATE SET misses = misses + 1, last_miss = excluded.last_miss",
        )
        .bind(cache_type.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        {
            warn!(error = %err, cache_type = %cache_type, "dropping cache miss statistics update");
        }
    }

    async fn record_saved_provider_call(&self, cache_type: CacheType) {
        if let Err(err) = sqlx::query(
            "INSERT INTO cache_stats (type, hits, misses, saved_provider_calls, last_hit, last_miss)
             VALUES (?, 0, 0, 1, NULL, NULL)
             ON CONFLICT(type) DO UPDATE SET saved_provider_calls = saved_provider_calls + 1",
        )
        .bind(cache_type.as_str())
        .execute(&self.pool)
        .await
        {
            warn!(error = %err, cache_type = %cache_type, "dropping saved-provider-call statistics update");
        }
    }
}

fn epoch_to_datetime(epoch_secs: f64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(epoch_secs as i64, 0).single()
}
