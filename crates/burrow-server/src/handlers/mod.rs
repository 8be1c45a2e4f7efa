//! REST handlers and the response envelope.
//!
//! Handlers translate requests into calls on the core components and map the
//! error taxonomy onto HTTP status codes. This is the only layer that turns a
//! `BurrowError` into a wire response.

pub mod databases;
pub mod pairing;
pub mod query;
pub mod status;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use burrow_core::BurrowError;
use serde::Serialize;
use tracing::error;

/// Header carrying the pairing code for mutating endpoints whose body is not
/// a query request.
pub const PAIRING_HEADER: &str = "x-pairing-code";

/// Uniform JSON envelope for every endpoint.
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiResponse {
    pub fn ok<T: Serialize>(data: T) -> (StatusCode, Json<Self>) {
        Self::with_status(StatusCode::OK, data)
    }

    pub fn created<T: Serialize>(data: T) -> (StatusCode, Json<Self>) {
        Self::with_status(StatusCode::CREATED, data)
    }

    fn with_status<T: Serialize>(status: StatusCode, data: T) -> (StatusCode, Json<Self>) {
        let value = serde_json::to_value(data).unwrap_or(serde_json::Value::Null);
        (
            status,
            Json(Self {
                success: true,
                data: Some(value),
                error: None,
            }),
        )
    }
}

/// Wrapper turning core errors into wire responses.
pub struct ApiError(pub BurrowError);

impl From<BurrowError> for ApiError {
    fn from(err: BurrowError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = error_status(&self.0);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("internal error serving request: {}", self.0);
        }
        (
            status,
            Json(ApiResponse {
                success: false,
                data: None,
                error: Some(self.0.to_string()),
            }),
        )
            .into_response()
    }
}

/// 1:1 mapping from the error taxonomy to HTTP status codes.
fn error_status(err: &BurrowError) -> StatusCode {
    match err {
        BurrowError::Unauthorized => StatusCode::UNAUTHORIZED,
        BurrowError::NotFound { .. } => StatusCode::NOT_FOUND,
        BurrowError::AlreadyExists { .. } | BurrowError::Constraint { .. } => StatusCode::CONFLICT,
        BurrowError::Syntax { .. } | BurrowError::InvalidName(_) => StatusCode::BAD_REQUEST,
        BurrowError::Busy { .. } => StatusCode::SERVICE_UNAVAILABLE,
        BurrowError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        BurrowError::Io { .. }
        | BurrowError::Database { .. }
        | BurrowError::Config { .. }
        | BurrowError::Discovery(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Enforce the pairing code on endpoints that take it via header.
pub fn require_pairing_header(
    headers: &HeaderMap,
    pairing: &burrow_core::PairingAuthority,
) -> Result<(), ApiError> {
    let presented = headers
        .get(PAIRING_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if pairing.validate(presented) {
        Ok(())
    } else {
        Err(ApiError(BurrowError::Unauthorized))
    }
}
