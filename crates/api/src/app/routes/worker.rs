use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use tracing::{info, warn};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::OwnerContext;
use crate::middleware::cron_secret_matches;

/// Queue the owner's drafts and start the worker. The body is optional.
pub async fn start(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    body: Bytes,
) -> axum::response::Response {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        dto::StartRequest::default()
    } else {
        match serde_json::from_slice::<dto::StartRequest>(&body) {
            Ok(request) => request,
            Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_json", e.to_string()),
        }
    };

    match services.outbound.start(owner.owner_id(), request.campaign_id).await {
        Ok(result) => (StatusCode::OK, Json(dto::StartResponse::from(result))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// One worker pass. Driven by a scheduler holding the cron secret.
pub async fn tick(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
) -> axum::response::Response {
    if !cron_secret_matches(&headers, services.cron_secret.as_deref()) {
        warn!("tick rejected: bad or missing cron secret");
        return errors::json_error(StatusCode::UNAUTHORIZED, "unauthorized", "Unauthorized");
    }

    match services.engine.tick().await {
        Ok(report) => {
            info!(
                processed = report.processed,
                failed = report.failed,
                total = report.total,
                should_stop = report.should_stop,
                "tick complete"
            );
            (StatusCode::OK, Json(report)).into_response()
        }
        Err(e) => errors::tick_error_to_response(e),
    }
}

pub async fn status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(_owner): Extension<OwnerContext>,
) -> axum::response::Response {
    match services.outbound.lifecycle().status().await {
        Ok(state) => (StatusCode::OK, Json(dto::WorkerStatusResponse::from(state))).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
