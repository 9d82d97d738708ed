use axum::routing::{get, patch, post, put};
use axum::Router;
use tournament_core::config::Config;
use tournament_core::database::init_database;
use tournament_core::handlers::{
    add_participant, assign_match_station, bulk_add_participants, cache_stats, change_match_state, check_in_participant,
    clear_cache, complete_tournament, create_tournament, delete_participant, delete_tournament, disable_dev_mode,
    enable_dev_mode, get_tournament, health_check, invalidate_cache, list_matches, list_participants, list_stations,
    list_tournaments, oauth_callback, randomize_participants, rate_status, reset_tournament, set_rate_mode, start_tournament,
    tournament_cache_status, trigger_rate_check, undo_check_in_participant, update_match_score, update_participant,
    update_tournament,
};
use tournament_core::websocket::{admin_ws_handler, ws_handler};
use tournament_core::AppCore;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env();

    info!(database_file = %config.database_file, "initializing database");
    let pool = init_database(&config.database_file).await?;

    let core = AppCore::new(&config, pool)?;
    core.spawn_background_tasks().await;

    let app = Router::new()
        .route("/tournaments", get(list_tournaments).post(create_tournament))
        .route("/tournaments/:id", get(get_tournament).patch(update_tournament).delete(delete_tournament))
        .route("/tournaments/:id/start", post(start_tournament))
        .route("/tournaments/:id/reset", post(reset_tournament))
        .route("/tournaments/:id/complete", post(complete_tournament))
        .route("/tournaments/:id/matches", get(list_matches))
        .route("/tournaments/:id/matches/:mid/state", put(change_match_state))
        .route("/tournaments/:id/matches/:mid", put(update_match_score))
        .route("/tournaments/:id/matches/:mid/station", post(assign_match_station))
        .route("/tournaments/:id/participants", get(list_participants).post(add_participant))
        .route("/tournaments/:id/participants/bulk", post(bulk_add_participants))
        .route("/tournaments/:id/participants/randomize", post(randomize_participants))
        .route(
            "/tournaments/:id/participants/:pid",
            patch(update_participant).delete(delete_participant),
        )
        .route("/tournaments/:id/participants/:pid/check_in", post(check_in_participant))
        .route("/tournaments/:id/participants/:pid/undo_check_in", post(undo_check_in_participant))
        .route("/tournaments/:id/stations", get(list_stations))
        .route("/admin/cache/stats", get(cache_stats))
        .route("/admin/cache/invalidate", post(invalidate_cache))
        .route("/admin/cache/clear", post(clear_cache))
        .route("/admin/cache/tournaments/:id", get(tournament_cache_status))
        .route("/admin/rate/status", get(rate_status))
        .route("/admin/rate/mode", post(set_rate_mode))
        .route("/admin/rate/dev-mode/enable", post(enable_dev_mode))
        .route("/admin/rate/dev-mode/disable", post(disable_dev_mode))
        .route("/admin/rate/check", post(trigger_rate_check))
        .route("/admin/ws", get(admin_ws_handler))
        .route("/ws", get(ws_handler))
        .route("/oauth/callback", get(oauth_callback))
        .route("/health", get(health_check))
        .with_state(core)
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = config.bind_addr;
    info!(%addr, "server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn not_found() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "error": "not found" }))
}
