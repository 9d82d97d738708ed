//! End-to-end scenarios against a fake Challonge provider: cold read,
//! warm read, stale-but-offline serving, and mutation-triggered
//! invalidation, driving `AppCore` the way the teacher's integration
//! suite would drive `AppState` against a real SQLite file.

use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use tournament_core::config::Config;
use tournament_core::database::init_database;
use tournament_core::AppCore;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

static DB_COUNTER: AtomicU32 = AtomicU32::new(0);

async fn test_core(api_base: String) -> std::sync::Arc<AppCore> {
    let n = DB_COUNTER.fetch_add(1, Ordering::SeqCst);
    let db_file = std::env::temp_dir().join(format!("tournament_core_test_{n}.sqlite"));
    let _ = std::fs::remove_file(&db_file);
    let pool = init_database(db_file.to_str().unwrap()).await.expect("db init");

    let config = Config {
        database_file: db_file.to_string_lossy().to_string(),
        challonge_api_base: api_base,
        challonge_legacy_key: Some("test-legacy-key".to_string()),
        challonge_oauth_client_id: None,
        challonge_oauth_client_secret: None,
        challonge_oauth_redirect_uri: None,
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        mode_rate_idle: 600,
        mode_rate_upcoming: 600,
        mode_rate_active: 600,
        manual_cap: 600,
        check_interval: std::time::Duration::from_secs(3600),
        upcoming_window: std::time::Duration::from_secs(48 * 3600),
    };

    AppCore::new(&config, pool).expect("core assembly")
}

#[tokio::test]
async fn cold_read_fetches_from_provider_and_populates_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tournaments/T1/matches"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": 1, "type": "matches", "attributes": {"state": "open"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let core = test_core(server.uri()).await;
    let payload = core.provider.get("/tournaments/T1/matches").await.unwrap();
    core.cache.set(tournament_core::models::CacheType::Matches, "T1", payload.clone(), None, false).await.unwrap();

    let (cached, meta) = core.cache.get(tournament_core::models::CacheType::Matches, "T1").await.unwrap().unwrap();
    assert_eq!(cached, payload);
    assert!(!meta.stale);
}

#[tokio::test]
async fn warm_read_serves_cache_without_a_second_provider_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tournaments/T1/participants"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .expect(1)
        .mount(&server)
        .await;

    let core = test_core(server.uri()).await;
    let provider = core.provider.clone();

    let (first, _) = core
        .cache
        .get_or_fetch(tournament_core::models::CacheType::Participants, "T1", false, false, || {
            let provider = provider.clone();
            async move { provider.get("/tournaments/T1/participants").await }
        })
        .await
        .unwrap();

    let provider2 = core.provider.clone();
    let (second, meta) = core
        .cache
        .get_or_fetch(tournament_core::models::CacheType::Participants, "T1", false, false, || {
            let provider = provider2.clone();
            async move { provider.get("/tournaments/T1/participants").await }
        })
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(meta.source, "cache");
}

#[tokio::test]
async fn stale_entry_is_served_on_read_when_provider_refresh_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tournaments/T1/stations"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let core = test_core(server.uri()).await;
    let stale_payload = json!({"data": [{"id": 1, "type": "stations", "attributes": {"number": 1}}]});
    core.cache.set(tournament_core::models::CacheType::Stations, "T1", stale_payload.clone(), Some(std::time::Duration::from_secs(0)), false).await.unwrap();

    // give the zero-second TTL a moment to land in the past
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let provider = core.provider.clone();
    let (payload, meta) = core
        .cache
        .get_or_fetch(tournament_core::models::CacheType::Stations, "T1", false, false, || {
            let provider = provider.clone();
            async move { provider.get("/tournaments/T1/stations").await }
        })
        .await
        .unwrap();

    assert_eq!(payload, stale_payload);
    assert!(meta.stale);
    assert!(meta.offline);
}

#[tokio::test]
async fn stale_entry_is_never_served_for_a_write() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tournaments/T1/stations"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let core = test_core(server.uri()).await;
    core.cache.set(tournament_core::models::CacheType::Stations, "T1", json!({"data": []}), Some(std::time::Duration::from_secs(0)), false).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let provider = core.provider.clone();
    let result = core
        .cache
        .get_or_fetch(tournament_core::models::CacheType::Stations, "T1", true, false, || {
            let provider = provider.clone();
            async move { provider.get("/tournaments/T1/stations").await }
        })
        .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn mutation_invalidates_every_cache_entry_for_the_tournament() {
    let server = MockServer::start().await;
    Mock::given(method("GET")).and(path("/tournaments/T1/matches")).respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []}))).mount(&server).await;
    Mock::given(method("PUT")).and(path("/tournaments/T1/matches/5")).respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"id": "5", "type": "matches", "attributes": {"state": "complete"}}}))).mount(&server).await;

    let core = test_core(server.uri()).await;
    core.cache.set(tournament_core::models::CacheType::Matches, "T1", json!({"data": ["old"]}), None, false).await.unwrap();

    core.dispatcher.mark_underway("T1", 5).await.ok();
    // mark_underway issues change_state, not a PUT on .../matches/5, so seed the
    // exact mutation this test exercises instead: a score update.
    core.dispatcher
        .update_score("T1", 5, vec![tournament_core::dispatcher::wire::MatchParticipantEntry { participant_id: 1, score_set: Some("2-1".into()), rank: Some(1), advancing: Some(true) }])
        .await
        .unwrap();

    let cached = core.cache.get(tournament_core::models::CacheType::Matches, "T1").await.unwrap();
    assert!(cached.is_none(), "cache entry should have been invalidated by the mutation");
}

#[tokio::test]
async fn requests_dispatch_in_fifo_order_under_burst() {
    let server = MockServer::start().await;
    Mock::given(method("GET")).and(path("/tournaments")).respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []}))).mount(&server).await;

    let core = test_core(server.uri()).await;
    let mut handles = Vec::new();
    for _ in 0..5 {
        let provider = core.provider.clone();
        handles.push(tokio::spawn(async move { provider.get("/tournaments").await }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
}
