//! Collection sync control surface (§4.12): trigger a sync, accept the
//! proxied event-bus callback, and poll the current `SyncState` snapshot.

use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::sync::bus::ApiResponseEvent;
use crate::sync::SyncStatusSnapshot;
use crate::AppState;

use super::{not_found, AuthContext};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/trigger", post(trigger_handler))
        .route("/callback", post(callback_handler))
        .route("/status", get(status_handler))
}

/// §4.7 T0: starts (or restarts, discarding a stale state) a full collection
/// sync for the authenticated user.
async fn trigger_handler(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<serde_json::Value>> {
    let cancellation = CancellationToken::new();
    state
        .sync_coordinator
        .trigger(auth.user_id, &auth.token, &cancellation)
        .await?;
    Ok(Json(serde_json::json!({ "status": "accepted" })))
}

/// Inbound proxied Discogs API response, routed to T1 (folder pagination) or
/// T3 (release fetch) depending on the request id it answers.
async fn callback_handler(
    State(state): State<AppState>,
    Json(event): Json<ApiResponseEvent>,
) -> Result<Json<serde_json::Value>> {
    let cancellation = CancellationToken::new();
    state.sync_coordinator.handle_response(event, &cancellation).await?;
    Ok(Json(serde_json::json!({ "status": "processed" })))
}

async fn status_handler(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<SyncStatusSnapshot>> {
    let snapshot = state
        .sync_coordinator
        .status(auth.user_id)
        .await?
        .ok_or_else(|| not_found("sync_state"))?;
    Ok(Json(snapshot))
}
