mod stripe;

pub use stripe::*;

use axum::{Router, routing::post};

use crate::db::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/webhooks/stripe", post(handle_stripe_webhook))
}
