use axum::{extract::State, http::HeaderMap};
use serde::Serialize;

use super::{CURRENCY, CheckoutRequest};
use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::payments::NewCheckoutSession;
use crate::util::append_query_params;

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub checkout_url: String,
    pub stripe_session_id: String,
    pub session_id: String,
}

/// Success URL with Stripe's literal `{CHECKOUT_SESSION_ID}` placeholder,
/// which must not be percent-encoded.
fn success_url(checkout_app_url: &str) -> String {
    let base = append_query_params(checkout_app_url, &[("status", "success")]);
    format!("{}&stripe_session={{CHECKOUT_SESSION_ID}}", base)
}

/// Start a Stripe-hosted checkout for the order.
pub async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CreateSessionResponse>> {
    let order = request.price(&headers)?;
    let metadata = order.metadata.to_pairs();
    let product_name = order.description();
    let success_url = success_url(&state.config.checkout_app_url);
    let cancel_url = append_query_params(&state.config.checkout_app_url, &[("status", "cancelled")]);

    let session = state
        .stripe
        .create_checkout_session(&NewCheckoutSession {
            product_name: &product_name,
            amount_cents: order.totals.total,
            currency: CURRENCY,
            customer_email: &order.customer().email,
            success_url: &success_url,
            cancel_url: &cancel_url,
            metadata: &metadata,
        })
        .await?;

    let checkout_url = session
        .url
        .ok_or_else(|| AppError::upstream("Stripe", "checkout session has no URL"))?;

    tracing::info!(
        session_id = %order.session_id,
        stripe_session = %session.id,
        "Hosted checkout session created"
    );

    Ok(Json(CreateSessionResponse {
        checkout_url,
        stripe_session_id: session.id,
        session_id: order.session_id,
    }))
}
