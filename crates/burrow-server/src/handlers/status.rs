//! Status and connection-info handlers.

use super::ApiResponse;
use crate::server::AppState;
use axum::extract::State;
use axum::response::IntoResponse;
use std::sync::Arc;

pub async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ApiResponse::ok(state.status.snapshot().await)
}

pub async fn get_connection_info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ApiResponse::ok(state.status.connection_info())
}
