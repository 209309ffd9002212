pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod extractors;
pub mod fanout;
pub mod handlers;
pub mod intake;
pub mod integrations;
pub mod middleware;
pub mod models;
pub mod payments;
pub mod pdf;
pub mod pricing;
pub mod retry;
pub mod util;

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::crypto::MasterKey;
use crate::db::{AppState, DbPool};
use crate::middleware::{RateLimiter, cors_layer, enforce_origin};
use crate::payments::StripeClient;

/// Assemble shared state from configuration and an initialized pool.
pub fn build_state(config: Config, db: DbPool) -> error::Result<AppState> {
    let master_key = match &config.phi_encryption_key {
        Some(key) => MasterKey::from_bytes(key)?,
        None => MasterKey::derive(&config.prefill_token_secret)?,
    };
    let stripe = StripeClient::new(&config.stripe);
    let sinks = integrations::build_sinks(&config);
    let limiter = RateLimiter::per_minute(config.rate_limit_per_minute)
        .trusting_proxy(config.trust_proxy_headers);

    Ok(AppState {
        db,
        config: Arc::new(config),
        master_key,
        stripe,
        sinks: Arc::new(sinks),
        limiter: Arc::new(limiter),
    })
}

pub fn app(state: AppState) -> Router {
    let api = Router::new()
        .merge(handlers::public::router())
        .merge(handlers::intake::router(state.clone()))
        .merge(handlers::checkout::router())
        .merge(handlers::payment::router())
        .merge(handlers::webhooks::router());

    Router::new()
        .nest("/api", api)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            enforce_origin,
        ))
        .layer(cors_layer(
            state.config.allowed_origins.clone(),
            state.config.dev_mode,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
