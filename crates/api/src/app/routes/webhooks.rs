//! Resend event webhook: replies, bounces and delivery delays.
//!
//! Signatures are HMAC-SHA256 over the raw body, hex encoded, optionally
//! prefixed with `sha256=`. Business "no match" results are still 200 so the
//! provider does not redeliver.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use tracing::{debug, error, info, warn};

use leadflow_infra::{BounceKind, InboundBounce, InboundReply, MatchOutcome};

use crate::app::dto::{BounceData, ReceivedData, WebhookEnvelope, WebhookResponse};
use crate::app::errors;
use crate::app::services::AppServices;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEADERS: [&str; 2] = ["svix-signature", "webhook-signature"];

pub async fn describe() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "endpoint": "/webhooks/resend",
        "description": "Resend inbound email webhook endpoint",
    }))
}

pub async fn receive(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let signature = SIGNATURE_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|v| v.to_str().ok());
    if !signature_is_valid(&body, signature, services.webhook_secret.as_deref()) {
        warn!(signed = signature.is_some(), "webhook signature rejected");
        return errors::json_error(StatusCode::UNAUTHORIZED, "invalid_signature", "Invalid signature");
    }

    let envelope: WebhookEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_json", e.to_string()),
    };
    debug!(event_type = %envelope.event_type, "webhook received");

    match envelope.event_type.as_str() {
        "email.received" => match serde_json::from_value(envelope.data) {
            Ok(data) => handle_received(&services, data).await,
            Err(e) => invalid_payload(e),
        },
        "email.bounced" | "email.delivery_delayed" => match serde_json::from_value(envelope.data) {
            Ok(data) => handle_bounce(&services, data, envelope.event_type == "email.bounced").await,
            Err(e) => invalid_payload(e),
        },
        _ => ok(WebhookResponse::ignored("event_type_not_relevant")),
    }
}

async fn handle_received(services: &AppServices, data: ReceivedData) -> axum::response::Response {
    let Some(from) = data.from.filter(|f| !f.trim().is_empty()) else {
        return ok(WebhookResponse::ignored("no_sender"));
    };
    let Some(email_id) = data.email_id.filter(|id| !id.trim().is_empty()) else {
        return ok(WebhookResponse::ignored("no_email_id"));
    };

    let reply = services
        .matcher
        .hydrate_reply(InboundReply {
            from,
            to: data.to,
            subject: data.subject.unwrap_or_default(),
            in_reply_to: None,
            provider_email_id: Some(email_id),
            text: None,
        })
        .await;

    match services.matcher.handle_reply(&reply).await {
        Ok(outcome) => {
            info!(processed = outcome.processed(), reason = outcome.reason(), "inbound reply handled");
            ok(WebhookResponse::from_outcome(&outcome))
        }
        Err(e) => {
            error!(error = %e, "inbound reply failed");
            errors::inbound_error_to_response(e)
        }
    }
}

async fn handle_bounce(services: &AppServices, data: BounceData, hard: bool) -> axum::response::Response {
    let kind = if hard {
        let detail = data.bounce.unwrap_or_default();
        BounceKind::Bounced {
            bounce_type: detail.bounce_type,
            message: detail.message,
        }
    } else {
        BounceKind::DeliveryDelayed
    };
    let bounce = InboundBounce {
        provider_email_id: data.email_id,
        kind,
        recipient: data.to.into_iter().next(),
    };

    match services.matcher.handle_bounce(&bounce).await {
        Ok(outcome) => {
            info!(processed = outcome.processed(), reason = outcome.reason(), "bounce handled");
            let response = WebhookResponse::from_outcome(&outcome);
            match (&outcome, &bounce.kind) {
                (MatchOutcome::Failed { .. }, BounceKind::Bounced { bounce_type, .. }) => {
                    ok(response.with_bounce_type(bounce_type.as_str()))
                }
                _ => ok(response),
            }
        }
        Err(e) => {
            error!(error = %e, "bounce handling failed");
            errors::inbound_error_to_response(e)
        }
    }
}

fn ok(body: WebhookResponse) -> axum::response::Response {
    (StatusCode::OK, Json(body)).into_response()
}

fn invalid_payload(err: serde_json::Error) -> axum::response::Response {
    errors::json_error(StatusCode::BAD_REQUEST, "invalid_payload", err.to_string())
}

/// Unsigned requests pass only when no secret is configured.
fn signature_is_valid(payload: &[u8], signature: Option<&str>, secret: Option<&str>) -> bool {
    let Some(secret) = secret else {
        return true;
    };
    let Some(signature) = signature else {
        return false;
    };
    let signature = signature.trim();
    let digest = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(expected) = hex::decode(digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(payload: &[u8], secret: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn no_secret_skips_verification() {
        assert!(signature_is_valid(b"{}", None, None));
        assert!(signature_is_valid(b"{}", Some("garbage"), None));
    }

    #[test]
    fn bare_and_prefixed_signatures_verify() {
        let body = br#"{"type":"email.received"}"#;
        let sig = sign(body, "whsec");
        assert!(signature_is_valid(body, Some(&sig), Some("whsec")));
        assert!(signature_is_valid(body, Some(&format!("sha256={sig}")), Some("whsec")));
    }

    #[test]
    fn wrong_or_missing_signature_fails() {
        let body = br#"{"type":"email.received"}"#;
        assert!(!signature_is_valid(body, None, Some("whsec")));
        assert!(!signature_is_valid(body, Some("not-hex"), Some("whsec")));
        assert!(!signature_is_valid(body, Some(&sign(body, "other")), Some("whsec")));
        assert!(!signature_is_valid(b"tampered", Some(&sign(body, "whsec")), Some("whsec")));
    }
}
