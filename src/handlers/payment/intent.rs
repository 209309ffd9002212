use axum::{extract::State, http::HeaderMap};
use serde::Serialize;

use super::{CURRENCY, CheckoutRequest};
use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::payments::NewPaymentIntent;
use crate::util::redact_email;

#[derive(Debug, Serialize)]
pub struct CreateIntentResponse {
    pub session_id: String,
    pub payment_intent_id: String,
    pub client_secret: String,
    pub amount_cents: i64,
    pub currency: &'static str,
    pub publishable_key: String,
    /// True when the session's existing intent was returned unchanged
    pub reused: bool,
}

/// Create (or reuse) the PaymentIntent for a checkout session.
///
/// The intent is keyed by a fingerprint of everything that affects the
/// charge. While the fingerprint is unchanged the stored intent is returned
/// and Stripe is not called. When it changes, a new intent is created and the
/// session's previous one is cancelled best-effort.
pub async fn create_intent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CreateIntentResponse>> {
    let order = request.price(&headers)?;
    let fingerprint = order.fingerprint.key();
    let now = queries::now();

    let existing = {
        let conn = state.db.get()?;
        queries::get_checkout_session(&conn, &order.session_id)?
    };

    if let Some(existing) = existing.as_ref().filter(|s| s.fingerprint == fingerprint) {
        let conn = state.db.get()?;
        queries::touch_checkout_session(&conn, &existing.id, now)?;
        tracing::debug!(session_id = %existing.id, "Fingerprint unchanged, reusing payment intent");
        return Ok(Json(CreateIntentResponse {
            session_id: existing.id.clone(),
            payment_intent_id: existing.payment_intent_id.clone(),
            client_secret: existing.client_secret.clone(),
            amount_cents: existing.amount_cents,
            currency: CURRENCY,
            publishable_key: state.config.stripe.publishable_key.clone(),
            reused: true,
        }));
    }

    let metadata = order.metadata.to_pairs();
    let description = order.description();
    // Scoped to the intent being replaced, so switching back to an earlier
    // order cannot replay the (since cancelled) intent created for it.
    let previous_id = existing.as_ref().map(|s| s.payment_intent_id.as_str()).unwrap_or("");
    let idempotency_key = order
        .fingerprint
        .idempotency_key(&format!("{}:{}", order.session_id, previous_id));
    let intent = state
        .stripe
        .create_payment_intent(
            &NewPaymentIntent {
                amount_cents: order.totals.total,
                currency: CURRENCY,
                receipt_email: &order.customer().email,
                description: &description,
                metadata: &metadata,
            },
            &idempotency_key,
        )
        .await?;

    let client_secret = intent
        .client_secret
        .clone()
        .ok_or_else(|| AppError::upstream("Stripe", "payment intent has no client secret"))?;

    {
        let conn = state.db.get()?;
        queries::upsert_checkout_session(
            &conn,
            &queries::CheckoutSessionRecord {
                id: order.session_id.clone(),
                fingerprint,
                payment_intent_id: intent.id.clone(),
                client_secret: client_secret.clone(),
                amount_cents: intent.amount,
                updated_at: now,
            },
        )?;
    }

    tracing::info!(
        session_id = %order.session_id,
        payment_intent = %intent.id,
        email = %redact_email(&order.customer().email),
        amount_cents = intent.amount,
        "Payment intent created"
    );

    if let Some(previous) = existing.filter(|s| s.payment_intent_id != intent.id) {
        if let Err(e) = state.stripe.cancel_payment_intent(&previous.payment_intent_id).await {
            tracing::warn!(
                payment_intent = %previous.payment_intent_id,
                "Failed to cancel superseded payment intent: {}",
                e
            );
        }
    }

    Ok(Json(CreateIntentResponse {
        session_id: order.session_id,
        payment_intent_id: intent.id,
        client_secret,
        amount_cents: intent.amount,
        currency: CURRENCY,
        publishable_key: state.config.stripe.publishable_key.clone(),
        reused: false,
    }))
}
