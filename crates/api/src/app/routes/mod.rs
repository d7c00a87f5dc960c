use axum::{
    routing::{get, patch, post, put},
    Router,
};

pub mod campaigns;
pub mod leads;
pub mod system;
pub mod webhooks;
pub mod worker;

/// Router for all owner-scoped endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/worker/outbound/start", post(worker::start))
        .route("/worker/outbound/status", get(worker::status))
        .route("/leads/:id/mark-replied", patch(leads::mark_replied))
        .route("/campaigns/:id", get(campaigns::get_campaign))
        .route("/campaigns/:id/lock", post(campaigns::lock_campaign))
        .route("/campaigns/:id/template", put(campaigns::update_template))
}

/// Endpoints authenticated by shared secret, or not at all.
pub fn public_router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/worker/outbound/tick", post(worker::tick))
        .route("/webhooks/resend", get(webhooks::describe).post(webhooks::receive))
}
