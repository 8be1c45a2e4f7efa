//! Query execution handler: the one path that runs client SQL.

use super::{ApiError, ApiResponse};
use crate::server::AppState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use burrow_core::BurrowError;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    /// Target database, by name or id.
    database: String,
    /// Arbitrary SQL text; only the storage engine judges its shape.
    query: String,
    pairing_code: String,
    /// Optional session opened via `/api/pair`. A live session stays
    /// authorized across pairing-code rotation.
    session_id: Option<String>,
}

pub async fn execute_query(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<QueryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Authorization comes before any registry or engine work. A session
    // authorized before a rotation remains valid until it ends; everything
    // else must present the current code.
    let session_ok = payload
        .session_id
        .as_deref()
        .is_some_and(|id| state.pairing.touch_session(id));
    if !session_ok && !state.pairing.validate(&payload.pairing_code) {
        return Err(ApiError(BurrowError::Unauthorized));
    }

    let result = state.engine.execute(&payload.database, &payload.query).await?;
    Ok(ApiResponse::ok(result))
}
