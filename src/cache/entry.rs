//! Cache row shape and version extraction, per §3 and §4.1.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// One `(type, key)` row as stored in `cache_entries`.
#[derive(Debug, Clone)]
pub struct CacheRow {
    pub payload: Value,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub version: String,
    pub item_count: Option<i64>,
}

impl CacheRow {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Extract a version identifier from a provider payload, per §4.1:
/// 1. `updated_at`/`updatedAt` on the object.
/// 2. `timestamps.updated_at` nested.
/// 3. If an array, the maximum of the same fields across elements.
/// 4. Otherwise, "now".
pub fn extract_version(payload: &Value, now: DateTime<Utc>) -> String {
    if let Some(array) = payload.as_array() {
        let max = array
            .iter()
            .filter_map(|item| extract_direct(item))
            .max();
        return max.unwrap_or_else(|| now.to_rfc3339());
    }

    extract_direct(payload).unwrap_or_else(|| now.to_rfc3339())
}

fn extract_direct(value: &Value) -> Option<String> {
    value
        .get("updated_at")
        .or_else(|| value.get("updatedAt"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| {
            value
                .get("timestamps")
                .and_then(|t| t.get("updated_at"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
}

/// Length of the primary array, for cache types that track `item_count`.
pub fn extract_item_count(payload: &Value) -> Option<i64> {
    payload.as_array().map(|a| a.len() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn direct_updated_at() {
        let now = Utc::now();
        let payload = json!({"updated_at": "2024-03-01T10:00:00Z"});
        assert_eq!(extract_version(&payload, now), "2024-03-01T10:00:00Z");
    }

    #[test]
    fn camel_case_updated_at() {
        let now = Utc::now();
        let payload = json!({"updatedAt": "2024-03-01T10:00:00Z"});
        assert_eq!(extract_version(&payload, now), "2024-03-01T10:00:00Z");
    }

    #[test]
    fn nested_timestamps() {
        let now = Utc::now();
        let payload = json!({"timestamps": {"updated_at": "2024-03-01T10:00:00Z"}});
        assert_eq!(extract_version(&payload, now), "2024-03-01T10:00:00Z");
    }

    #[test]
    fn array_takes_max() {
        let now = Utc::now();
        let payload = json!([
            {"updated_at": "2024-03-01T10:00:00Z"},
            {"updated_at": "2024-05-01T10:00:00Z"},
        ]);
        assert_eq!(extract_version(&payload, now), "2024-05-01T10:00:00Z");
    }

    #[test]
    fn falls_back_to_now() {
        let now = Utc::now();
        let payload = json!({"foo": "bar"});
        assert_eq!(extract_version(&payload, now), now.to_rfc3339());
    }
}
