use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use leadflow_core::CampaignId;
use leadflow_infra::ServiceError;
use leadflow_outbound::CampaignTemplate;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::OwnerContext;

pub async fn get_campaign(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let campaign_id: CampaignId = match errors::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    respond(services.outbound.campaign(campaign_id, owner.owner_id()).await)
}

/// One-way; sends from the campaign are held until it is locked.
pub async fn lock_campaign(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let campaign_id: CampaignId = match errors::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    respond(services.outbound.lock_campaign(campaign_id, owner.owner_id()).await)
}

pub async fn update_template(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateTemplateRequest>,
) -> axum::response::Response {
    let campaign_id: CampaignId = match errors::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if body.body.trim().is_empty() {
        return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", "template body is required");
    }
    respond(
        services
            .outbound
            .update_template(campaign_id, owner.owner_id(), body.subject, body.body)
            .await,
    )
}

fn respond(result: Result<CampaignTemplate, ServiceError>) -> axum::response::Response {
    match result {
        Ok(campaign) => (StatusCode::OK, Json(dto::CampaignResponse::from(campaign))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
