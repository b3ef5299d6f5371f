//! REST surface of the hub.
//!
//! - `GET /api/player/{*operation}` forwards a raw operation to the primary
//!   player and returns its JSON reply.
//! - `POST /api/browser/command` runs one browser command.
//! - `GET /api/browser/search?q=...` proxies a video search.
//! - `GET /api/media?folder=...` lists a library directory (and pushes the
//!   listing to connected viewers).
//! - `GET /api/progress` dumps the view-progress store.

use axum::extract::{Path, Query, RawQuery, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use saloncontrol::{
    BrowserCommand, ControlError, ControlHub, MediaLibrary, ProgressState, ProgressStore,
};
use salonserver::Broadcaster;
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<ControlHub>,
    pub library: Arc<MediaLibrary>,
    pub progress: Arc<ProgressStore>,
    pub broadcaster: Broadcaster,
}

pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/player/{*operation}", get(player_command))
        .route("/browser/command", post(browser_command))
        .route("/browser/search", get(browser_search))
        .route("/media", get(media_listing))
        .route("/progress", get(progress_state))
        .with_state(state)
}

fn control_error_response(err: ControlError) -> (StatusCode, String) {
    warn!(error = %err, "Command failed");
    let status = match err {
        ControlError::BrowserNotConnected => StatusCode::CONFLICT,
        _ => StatusCode::BAD_GATEWAY,
    };
    (status, err.to_string())
}

async fn player_command(
    State(state): State<AppState>,
    Path(operation): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    // Player commands ride in the query string; reattach it to the raw
    // operation before forwarding.
    let operation = match query {
        Some(query) => format!("{operation}?{query}"),
        None => operation,
    };
    let reply = state
        .hub
        .player_command(&operation)
        .await
        .map_err(control_error_response)?;
    Ok(Json(reply))
}

async fn browser_command(
    State(state): State<AppState>,
    Json(command): Json<BrowserCommand>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .hub
        .browser_command(command)
        .await
        .map_err(control_error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: String,
}

async fn browser_search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let results = state
        .hub
        .browser_search(&query.q)
        .await
        .map_err(control_error_response)?;
    Ok(Json(results))
}

#[derive(Debug, Deserialize)]
struct MediaQuery {
    #[serde(default)]
    folder: String,
}

async fn media_listing(
    State(state): State<AppState>,
    Query(query): Query<MediaQuery>,
) -> Result<Json<saloncontrol::MediaListing>, (StatusCode, String)> {
    let listing = state
        .library
        .list(&query.folder)
        .await
        .map_err(|err| (StatusCode::NOT_FOUND, err.to_string()))?;
    // Keep connected viewers in step with what the requesting client sees.
    state.hub.publish_media(listing.clone());
    Ok(Json(listing))
}

async fn progress_state(State(state): State<AppState>) -> Json<ProgressState> {
    Json(state.progress.read().await)
}
