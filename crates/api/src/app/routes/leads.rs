use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use leadflow_core::LeadId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::OwnerContext;

/// Manual override for a reply the webhook never saw.
pub async fn mark_replied(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let lead_id: LeadId = match errors::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.outbound.mark_replied(lead_id, owner.owner_id()).await {
        Ok(outcome) => (StatusCode::OK, Json(dto::MarkRepliedResponse::from(outcome))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
