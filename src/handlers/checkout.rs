use axum::{Router, routing::post};
use serde::Serialize;

use crate::db::AppState;
use crate::error::Result;
use crate::extractors::Json;
use crate::models::OrderSelection;
use crate::pricing::{self, Cents, format_cents, lookup_promo};

#[derive(Debug, Serialize)]
pub struct QuoteResponse {
    pub subtotal_cents: Cents,
    pub shipping_cents: Cents,
    pub discount_cents: Cents,
    pub total_cents: Cents,
    /// Total formatted as dollars, e.g. `"229.00"`
    pub total: String,
    pub promo_applied: bool,
    pub recurring: bool,
}

/// Price a wizard selection. The browser shows this; payment endpoints
/// recompute it rather than trusting what the browser sends back.
pub async fn quote(Json(selection): Json<OrderSelection>) -> Result<Json<QuoteResponse>> {
    let totals = pricing::quote(&selection);
    let promo_applied = selection
        .promo_code
        .as_deref()
        .and_then(lookup_promo)
        .is_some();

    Ok(Json(QuoteResponse {
        subtotal_cents: totals.subtotal,
        shipping_cents: totals.shipping,
        discount_cents: totals.discount,
        total_cents: totals.total,
        total: format_cents(totals.total),
        promo_applied,
        recurring: selection.plan.is_recurring(),
    }))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/checkout/quote", post(quote))
}
