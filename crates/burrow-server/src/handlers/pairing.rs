//! Pairing-code and connection-session handlers.

use super::{require_pairing_header, ApiError, ApiResponse};
use crate::server::AppState;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct PairRequest {
    pairing_code: String,
    client_app: Option<String>,
    database: Option<String>,
}

pub async fn get_pairing_code(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ApiResponse::ok(json!({ "pairing_code": state.pairing.current_code() }))
}

/// Rotate the code. Requires the current code: a client that cannot present
/// it has no business invalidating everyone else's.
pub async fn regenerate_pairing_code(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_pairing_header(&headers, &state.pairing)?;
    let new_code = state.pairing.regenerate();
    Ok(ApiResponse::ok(json!({ "pairing_code": new_code })))
}

/// Open a connection session; counts toward active connections until closed
/// or idle-timed-out.
pub async fn open_session(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PairRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let client_app = payload.client_app.as_deref().unwrap_or("unknown");
    let session = state.pairing.open_session(
        &payload.pairing_code,
        client_app,
        payload.database.as_deref(),
    )?;
    Ok(ApiResponse::created(session))
}

pub async fn close_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let closed = state.pairing.close_session(&id);
    ApiResponse::ok(json!({ "closed": closed }))
}
