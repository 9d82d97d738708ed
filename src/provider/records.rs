//! JSON:API resource decoding: merges a `{id, type, attributes}` resource
//! object into one flat `Value` before handing it to `serde_json`, rather
//! than duck-typing the wire shape ad hoc at each call site.

use crate::error::{CoreError, CoreResult};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Flattens one JSON:API resource object into `{..attributes, id}`,
/// optionally stamping a `tournament_id` the resource's own attributes
/// don't carry (matches/participants/stations are fetched scoped to a
/// tournament, so the id is known from the request rather than the body).
fn flatten_resource(resource: &Value, tournament_id: Option<&str>) -> CoreResult<Value> {
    let id = resource.get("id").cloned().unwrap_or(Value::Null);
    let attributes = resource.get("attributes").and_then(Value::as_object).cloned().unwrap_or_default();

    let mut merged = Map::new();
    merged.insert("id".to_string(), id);
    if let Some(tid) = tournament_id {
        merged.insert("tournament_id".to_string(), Value::String(tid.to_string()));
    }
    for (key, value) in attributes {
        merged.insert(key, value);
    }

    Ok(Value::Object(merged))
}

/// Decode a single-resource JSON:API document (`{"data": {...}}`).
pub fn decode_single<T: DeserializeOwned>(payload: &Value, tournament_id: Option<&str>) -> CoreResult<T> {
    let data = payload.get("data").ok_or_else(|| {
        CoreError::ProviderError { status: 0, body: "JSON:API response missing `data`".to_string() }
    })?;
    let flattened = flatten_resource(data, tournament_id)?;
    Ok(serde_json::from_value(flattened)?)
}

/// Decode a resource-collection JSON:API document (`{"data": [...]}`).
pub fn decode_list<T: DeserializeOwned>(payload: &Value, tournament_id: Option<&str>) -> CoreResult<Vec<T>> {
    let data = payload.get("data").and_then(Value::as_array).ok_or_else(|| CoreError::ProviderError {
        status: 0,
        body: "JSON:API response missing `data` array".to_string(),
    })?;

    data.iter()
        .map(|resource| {
            let flattened = flatten_resource(resource, tournament_id)?;
            Ok(serde_json::from_value(flattened)?)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MatchRecord;
    use serde_json::json;

    #[test]
    fn decodes_single_resource_with_injected_tournament_id() {
        let payload = json!({
            "data": {
                "id": "42",
                "type": "matches",
                "attributes": {
                    "state": "open",
                    "participant1_id": 1,
                    "participant2_id": 2,
                }
            }
        });

        let record: MatchRecord = decode_single(&payload, Some("T1")).unwrap();
        assert_eq!(record.id, 42);
        assert_eq!(record.tournament_id, "T1");
        assert_eq!(record.participant1_id, Some(1));
    }

    #[test]
    fn decodes_list_resource() {
        let payload = json!({
            "data": [
                {"id": 1, "type": "matches", "attributes": {"state": "open"}},
                {"id": 2, "type": "matches", "attributes": {"state": "complete"}},
            ]
        });

        let records: Vec<MatchRecord> = decode_list(&payload, Some("T1")).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].state, "complete");
    }
}
