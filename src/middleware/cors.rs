use axum::{
    extract::{Request, State},
    http::{HeaderValue, Method, header},
    middleware::Next,
    response::Response,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::db::AppState;
use crate::error::{AppError, Result};

/// Match an `Origin` header against the allow-list.
///
/// Entries are exact origins (`https://app.example.com`), `*` for any
/// origin, or a single leading wildcard label (`https://*.example.com`),
/// which matches exactly one subdomain label.
pub fn is_allowed_origin(origin: &str, allowed: &[String]) -> bool {
    let origin = origin.trim().trim_end_matches('/');
    allowed.iter().any(|pattern| {
        let pattern = pattern.trim().trim_end_matches('/');
        if pattern == "*" {
            return true;
        }
        match pattern.split_once("*.") {
            None => pattern.eq_ignore_ascii_case(origin),
            Some((scheme, domain)) => {
                let origin = origin.to_ascii_lowercase();
                let Some(rest) = origin.strip_prefix(&scheme.to_ascii_lowercase()) else {
                    return false;
                };
                let Some(label) = rest.strip_suffix(&domain.to_ascii_lowercase()) else {
                    return false;
                };
                let Some(label) = label.strip_suffix('.') else {
                    return false;
                };
                !label.is_empty() && !label.contains(['.', '/', ':'])
            }
        }
    })
}

/// An empty allow-list only admits browser origins in dev mode.
fn origin_permitted(origin: &str, allowed: &[String], dev_mode: bool) -> bool {
    if allowed.is_empty() {
        return dev_mode;
    }
    is_allowed_origin(origin, allowed)
}

/// Reject requests whose `Origin` is not on the allow-list. Requests without
/// an `Origin` header (server-to-server webhooks, curl) pass through.
pub async fn enforce_origin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    if let Some(origin) = request.headers().get(header::ORIGIN) {
        let origin = origin.to_str().unwrap_or_default();
        if !origin_permitted(origin, &state.config.allowed_origins, state.config.dev_mode) {
            tracing::warn!(origin, path = %request.uri().path(), "Rejected cross-origin request");
            return Err(AppError::Forbidden("Origin not allowed".into()));
        }
    }
    Ok(next.run(request).await)
}

pub fn cors_layer(allowed: Vec<String>, dev_mode: bool) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            origin
                .to_str()
                .map(|o| origin_permitted(o, &allowed, dev_mode))
                .unwrap_or(false)
        }))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}
