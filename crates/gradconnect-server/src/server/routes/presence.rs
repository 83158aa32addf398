//! Presence lookups backed by the connection registry.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::server::AppState;

/// Create the presence router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/presence/:user_id", get(presence_handler))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct PresenceResponse {
    user_id: Uuid,
    online: bool,
    connections: usize,
}

/// GET /api/presence/:user_id
async fn presence_handler(
    Path(user_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Ok(user_id) = Uuid::parse_str(&user_id) else {
        debug!(user_id = %user_id, "Presence lookup with invalid user id");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "detail": "Invalid user ID format" })),
        )
            .into_response();
    };

    let connections = state.registry.connection_count(&user_id);
    Json(PresenceResponse {
        user_id,
        online: connections > 0,
        connections,
    })
    .into_response()
}
