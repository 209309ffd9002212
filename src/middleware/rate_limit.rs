use std::net::SocketAddr;
use std::num::NonZeroU32;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter as Governor};

use crate::db::AppState;
use crate::error::{AppError, Result};

/// Per-client-IP request limiter for the public intake routes.
pub struct RateLimiter {
    inner: DefaultKeyedRateLimiter<String>,
    trust_proxy: bool,
}

impl RateLimiter {
    pub fn per_minute(requests: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(requests).unwrap_or(NonZeroU32::MIN));
        Self {
            inner: Governor::keyed(quota),
            trust_proxy: false,
        }
    }

    /// Key on proxy headers instead of the socket peer.
    pub fn trusting_proxy(mut self, trust: bool) -> Self {
        self.trust_proxy = trust;
        self
    }

    pub fn check(&self, key: &str) -> Result<()> {
        self.inner
            .check_key(&key.to_string())
            .map_err(|_| AppError::TooManyRequests)
    }

    /// Drop state for clients whose quota has fully replenished.
    pub fn shrink(&self) {
        self.inner.retain_recent();
        self.inner.shrink_to_fit();
    }
}

/// The hop our own proxy appended: `x-real-ip`, else the last
/// `x-forwarded-for` entry. Earlier entries are whatever the client sent.
fn proxied_ip(request: &Request) -> Option<String> {
    let headers = request.headers();
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    header("x-real-ip")
        .or_else(|| header("x-forwarded-for").and_then(|v| v.rsplit(',').next()))
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(String::from)
}

fn peer_ip(request: &Request) -> Option<String> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

fn client_key(request: &Request, trust_proxy: bool) -> String {
    let proxied = if trust_proxy { proxied_ip(request) } else { None };
    proxied
        .or_else(|| peer_ip(request))
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    let key = client_key(&request, state.limiter.trust_proxy);
    if let Err(e) = state.limiter.check(&key) {
        tracing::warn!(path = %request.uri().path(), "Rate limit exceeded");
        return Err(e);
    }
    Ok(next.run(request).await)
}
