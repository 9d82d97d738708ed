//! Pure decision functions driving `GetOrFetch`, per the "exception-for-
//! control-flow -> result values" design note: the stale-serving choice
//! is a pure function of `(cache_lookup, fetch_result)`, never something
//! discovered by catching an exception two layers up.

use super::entry::CacheRow;
use crate::error::CoreError;
use crate::models::CacheMeta;
use chrono::Utc;

/// What the cache held for this key, if anything.
#[derive(Debug, Clone)]
pub enum Lookup {
    Miss,
    Fresh(CacheRow),
    Stale(CacheRow),
}

/// Whether `GetOrFetch` needs to call the fetcher before it can answer.
#[derive(Debug)]
pub enum FetchPlan {
    /// Cache alone answers the call; no provider round trip needed.
    ServeCached(CacheRow),
    /// A fetch is required; `existing` is kept around so a failed fetch
    /// can still serve stale data.
    MustFetch { existing: Option<CacheRow> },
}

/// Step 1 of `GetOrFetch`: decide whether to consult the provider at all.
pub fn plan_fetch(lookup: Lookup, for_write: bool) -> FetchPlan {
    if for_write {
        return FetchPlan::MustFetch { existing: None };
    }

    match lookup {
        Lookup::Miss => FetchPlan::MustFetch { existing: None },
        Lookup::Fresh(row) => FetchPlan::ServeCached(row),
        Lookup::Stale(row) => FetchPlan::MustFetch { existing: Some(row) },
    }
}

/// Step 2: once a fetch has run (or been skipped), resolve what the
/// caller gets back. `fetch_result` is `None` when no fetch was made.
pub fn resolve_outcome(
    existing: Option<CacheRow>,
    for_write: bool,
    fetch_result: Result<(serde_json::Value, String), CoreError>,
) -> Result<(serde_json::Value, CacheMeta), CoreError> {
    match fetch_result {
        Ok((payload, version)) => {
            let meta = if for_write {
                CacheMeta::for_write(version)
            } else {
                CacheMeta::fresh_from_provider(version)
            };
            Ok((payload, meta))
        }
        Err(err) => {
            // Per §4.1: a stale entry is served only for reads whose
            // refresh failed; writes never fall back to cache.
            if for_write {
                return Err(err);
            }
            match existing {
                Some(row) => {
                    let meta = CacheMeta::stale_offline(row.cached_at, row.version.clone(), err.to_string());
                    Ok((row.payload, meta))
                }
                None => Err(CoreError::NotCachedAndProviderFailed(Box::new(err))),
            }
        }
    }
}

impl Lookup {
    pub fn from_row(row: Option<CacheRow>) -> Self {
        match row {
            None => Lookup::Miss,
            Some(row) => {
                if row.is_expired(Utc::now()) {
                    Lookup::Stale(row)
                } else {
                    Lookup::Fresh(row)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn row(age_secs: i64, ttl_secs: i64) -> CacheRow {
        let cached_at = Utc::now() - Duration::seconds(age_secs);
        CacheRow {
            payload: json!({"id": "T1"}),
            cached_at,
            expires_at: cached_at + Duration::seconds(ttl_secs),
            version: "v1".to_string(),
            item_count: None,
        }
    }

    #[test]
    fn for_write_always_fetches_even_when_fresh() {
        let plan = plan_fetch(Lookup::from_row(Some(row(1, 60))), true);
        assert!(matches!(plan, FetchPlan::MustFetch { existing: None }));
    }

    #[test]
    fn fresh_hit_serves_cached() {
        let plan = plan_fetch(Lookup::from_row(Some(row(1, 60))), false);
        assert!(matches!(plan, FetchPlan::ServeCached(_)));
    }

    #[test]
    fn stale_hit_must_fetch_but_keeps_existing() {
        let plan = plan_fetch(Lookup::from_row(Some(row(120, 60))), false);
        assert!(matches!(plan, FetchPlan::MustFetch { existing: Some(_) }));
    }

    #[test]
    fn miss_must_fetch_with_no_existing() {
        let plan = plan_fetch(Lookup::from_row(None), false);
        assert!(matches!(plan, FetchPlan::MustFetch { existing: None }));
    }

    #[test]
    fn failed_fetch_with_stale_existing_serves_stale_offline() {
        let existing = row(120, 60);
        let outcome = resolve_outcome(
            Some(existing.clone()),
            false,
            Err(CoreError::TransportError("boom".into())),
        );
        let (payload, meta) = outcome.expect("stale payload served");
        assert_eq!(payload, existing.payload);
        assert!(meta.stale);
        assert!(meta.offline);
        assert!(meta.error.is_some());
    }

    #[test]
    fn failed_fetch_with_no_existing_propagates_error() {
        let outcome = resolve_outcome(None, false, Err(CoreError::TransportError("boom".into())));
        assert!(matches!(outcome, Err(CoreError::NotCachedAndProviderFailed(_))));
    }

    #[test]
    fn failed_fetch_for_write_never_serves_stale() {
        let existing = row(120, 60);
        let outcome = resolve_outcome(Some(existing), true, Err(CoreError::TransportError("boom".into())));
        assert!(matches!(outcome, Err(CoreError::TransportError(_))));
    }

    #[test]
    fn successful_fetch_for_write_is_marked_for_write() {
        let outcome = resolve_outcome(None, true, Ok((json!({"id": "T1"}), "v2".to_string())));
        let (_, meta) = outcome.unwrap();
        assert!(meta.for_write);
        assert_eq!(meta.source, "provider");
    }
}
