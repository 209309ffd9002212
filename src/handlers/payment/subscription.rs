use axum::{extract::State, http::HeaderMap};
use serde::Serialize;

use super::CheckoutRequest;
use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::extractors::Json;

#[derive(Debug, Serialize)]
pub struct CreateSubscriptionResponse {
    pub session_id: String,
    pub subscription_id: String,
    pub customer_id: String,
    pub status: String,
    pub payment_intent_id: String,
    pub client_secret: String,
}

/// Subscribe the customer to the recurring price for their medication and
/// plan. The browser confirms the first invoice's PaymentIntent.
pub async fn create_subscription(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CreateSubscriptionResponse>> {
    let order = request.price(&headers)?;
    let selection = &order.selection;

    if !selection.plan.is_recurring() {
        return Err(AppError::BadRequest("One-time plans cannot be subscribed to".into()));
    }
    let price_id = state
        .stripe
        .price_id(selection.medication.as_ref(), selection.plan.as_ref())
        .ok_or_else(|| {
            AppError::BadRequest(format!(
                "No subscription price configured for {} {}",
                selection.medication, selection.plan
            ))
        })?
        .to_string();

    let customer = order.customer();
    let stripe_customer = state
        .stripe
        .find_or_create_customer(&customer.email, &customer.full_name(), customer.phone.as_deref())
        .await?;

    let metadata = order.metadata.to_pairs();
    let idempotency_key = format!(
        "sub-{}",
        order
            .fingerprint
            .idempotency_key(&order.session_id)
            .trim_start_matches("pi-")
    );
    let subscription = state
        .stripe
        .create_subscription(&stripe_customer.id, &price_id, &metadata, &idempotency_key)
        .await?;

    let intent = subscription
        .latest_invoice
        .and_then(|invoice| invoice.payment_intent)
        .ok_or_else(|| AppError::upstream("Stripe", "subscription has no initial payment intent"))?;
    let client_secret = intent
        .client_secret
        .clone()
        .ok_or_else(|| AppError::upstream("Stripe", "payment intent has no client secret"))?;

    // Invoice intents start with empty metadata; the webhook needs the order
    // context to fan out.
    state
        .stripe
        .update_payment_intent_metadata(&intent.id, &metadata)
        .await?;

    tracing::info!(
        session_id = %order.session_id,
        subscription = %subscription.id,
        payment_intent = %intent.id,
        "Subscription created"
    );

    Ok(Json(CreateSubscriptionResponse {
        session_id: order.session_id,
        subscription_id: subscription.id,
        customer_id: stripe_customer.id,
        status: subscription.status,
        payment_intent_id: intent.id,
        client_secret,
    }))
}
