use std::time::Instant;

use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::info;

use leadflow_core::OwnerId;

use crate::context::OwnerContext;

pub const OWNER_HEADER: &str = "x-owner-id";

pub async fn owner_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let owner_id = extract_owner(req.headers())?;
    req.extensions_mut().insert(OwnerContext::new(owner_id));
    Ok(next.run(req).await)
}

fn extract_owner(headers: &HeaderMap) -> Result<OwnerId, StatusCode> {
    let header = headers.get(OWNER_HEADER).ok_or(StatusCode::UNAUTHORIZED)?;
    let header = header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;
    OwnerId::new(header).map_err(|_| StatusCode::UNAUTHORIZED)
}

pub async fn log_requests(req: axum::http::Request<axum::body::Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(req).await;
    info!(
        %method,
        %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}

/// `x-cron-secret` (or `cron-secret`) equals the configured secret.
/// With no secret configured nothing matches.
pub fn cron_secret_matches(headers: &HeaderMap, expected: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return false;
    };
    headers
        .get("x-cron-secret")
        .or_else(|| headers.get("cron-secret"))
        .and_then(|v| v.to_str().ok())
        .is_some_and(|given| constant_time_eq(given.as_bytes(), expected.as_bytes()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn owner_header_is_trimmed_and_required() {
        assert_eq!(
            extract_owner(&headers(&[(OWNER_HEADER, " user_1 ")])).unwrap().as_str(),
            "user_1"
        );
        assert_eq!(extract_owner(&headers(&[])), Err(StatusCode::UNAUTHORIZED));
        assert_eq!(
            extract_owner(&headers(&[(OWNER_HEADER, "  ")])),
            Err(StatusCode::UNAUTHORIZED)
        );
    }

    #[test]
    fn cron_secret_accepts_either_header() {
        assert!(cron_secret_matches(&headers(&[("x-cron-secret", "s3")]), Some("s3")));
        assert!(cron_secret_matches(&headers(&[("cron-secret", "s3")]), Some("s3")));
        assert!(!cron_secret_matches(&headers(&[("x-cron-secret", "nope")]), Some("s3")));
        assert!(!cron_secret_matches(&headers(&[]), Some("s3")));
    }

    #[test]
    fn no_configured_cron_secret_rejects_everything() {
        assert!(!cron_secret_matches(&headers(&[("x-cron-secret", "")]), None));
        assert!(!cron_secret_matches(&headers(&[("x-cron-secret", "anything")]), None));
    }
}
