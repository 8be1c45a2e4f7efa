//! Database management handlers.

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
pub struct CreateDatabaseRequest {
    name: String,
    client_app: Option<String>,
}

pub async fn list_databases(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ApiResponse::ok(state.registry.list().await)
}

pub async fn create_database(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateDatabaseRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let client_app = payload.client_app.as_deref().unwrap_or("unknown");
    let record = state.registry.create(&payload.name, client_app).await?;
    Ok(ApiResponse::created(record))
}

pub async fn get_database(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state.registry.get(&name).await?;
    Ok(ApiResponse::ok(record))
}

pub async fn delete_database(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_pairing_header(&headers, &state.pairing)?;
    state.registry.delete(&name).await?;
    Ok(ApiResponse::ok(json!({ "deleted": name })))
}
