use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use leadflow_infra::{InboundError, ServiceError, StoreError, TickError};

pub fn service_error_to_response(err: ServiceError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        ServiceError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", message),
        ServiceError::CampaignNotLocked(_) => {
            json_error(StatusCode::BAD_REQUEST, "campaign_not_locked", message)
        }
        ServiceError::CampaignLocked(_) => json_error(StatusCode::CONFLICT, "campaign_locked", message),
        ServiceError::InvalidTransition { .. } => {
            json_error(StatusCode::CONFLICT, "invalid_transition", message)
        }
        ServiceError::Store(e) => store_error_to_response(e),
    }
}

pub fn tick_error_to_response(err: TickError) -> axum::response::Response {
    match err {
        TickError::Configuration(msg) => {
            error!(error = %msg, "tick aborted: outbound service not configured");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "not_configured", msg)
        }
        TickError::Store(e) => store_error_to_response(e),
    }
}

pub fn inbound_error_to_response(err: InboundError) -> axum::response::Response {
    match err {
        InboundError::Store(e) => store_error_to_response(e),
    }
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        StoreError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        StoreError::Storage(msg) => {
            error!(error = %msg, "storage failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Parse a path id, or a 400 naming the bad value.
pub fn parse_id<T>(raw: &str) -> Result<T, axum::response::Response>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e: T::Err| json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string()))
}
