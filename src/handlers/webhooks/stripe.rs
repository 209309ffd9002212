use axum::{body::Bytes, extract::State, http::HeaderMap};
use serde::Serialize;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::fanout::{FanoutReport, fan_out};
use crate::models::PaidOrder;
use crate::payments::{StripeCheckoutSession, StripePaymentIntent, StripeWebhookEvent};
use crate::util::redact_email;

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub received: bool,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fanout: Option<FanoutReport>,
}

impl WebhookResponse {
    fn status(status: &'static str) -> Json<Self> {
        Json(Self {
            received: true,
            status,
            fanout: None,
        })
    }
}

fn parse_object<T: serde::de::DeserializeOwned>(event: &StripeWebhookEvent, what: &str) -> Result<T> {
    serde_json::from_value(event.data.object.clone()).map_err(|e| {
        tracing::error!(event_id = %event.id, "Failed to parse {}: {}", what, e);
        AppError::BadRequest(format!("Invalid {}", what))
    })
}

fn paid_at(event: &StripeWebhookEvent) -> i64 {
    if event.created > 0 {
        event.created
    } else {
        queries::now()
    }
}

/// `payment_intent.succeeded`
/// `payment_intent.succeeded`. Returns `None` for subscription renewals:
/// only the first invoice's intent carries order metadata, and renewals are
/// not fanned out again.
fn order_from_intent(event: &StripeWebhookEvent) -> Result<Option<PaidOrder>> {
    let intent: StripePaymentIntent = parse_object(event, "payment intent")?;
    let has_order_email = intent
        .metadata
        .get("email")
        .is_some_and(|e| !e.trim().is_empty());
    if intent.invoice.is_some() && !has_order_email {
        tracing::info!(
            event_id = %event.id,
            payment_intent = %intent.id,
            "Subscription renewal paid"
        );
        return Ok(None);
    }
    PaidOrder::from_metadata(
        &intent.id,
        intent.amount,
        &intent.currency,
        paid_at(event),
        &intent.metadata,
        intent.receipt_email.as_deref(),
    )
    .map(Some)
}

/// `checkout.session.completed`. Returns `None` while the session is unpaid
/// (e.g. delayed payment methods).
fn order_from_session(event: &StripeWebhookEvent) -> Result<Option<PaidOrder>> {
    let session: StripeCheckoutSession = parse_object(event, "checkout session")?;
    if session.payment_status != "paid" {
        return Ok(None);
    }
    let payment_id = session.payment_intent.as_deref().unwrap_or(&session.id);
    PaidOrder::from_metadata(
        payment_id,
        session.amount_total.unwrap_or_default(),
        session.currency.as_deref().unwrap_or("usd"),
        paid_at(event),
        &session.metadata,
        session.email(),
    )
    .map(Some)
}

pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>> {
    let signature = headers
        .get("stripe-signature")
        .ok_or_else(|| AppError::BadRequest("Missing stripe-signature header".into()))?
        .to_str()
        .map_err(|_| AppError::BadRequest("Invalid signature header".into()))?;

    if !state.stripe.verify_webhook_signature(&body, signature)? {
        tracing::warn!("Stripe webhook signature mismatch");
        return Err(AppError::Unauthorized("Invalid signature".into()));
    }

    let event: StripeWebhookEvent = serde_json::from_slice(&body).map_err(|e| {
        tracing::error!("Failed to parse Stripe webhook: {}", e);
        AppError::BadRequest("Invalid JSON".into())
    })?;

    // The order is built (and its email checked) before anything is recorded
    // or sent downstream.
    let order = match event.event_type.as_str() {
        "payment_intent.succeeded" => match order_from_intent(&event)? {
            Some(order) => order,
            None => return Ok(WebhookResponse::status("Event ignored")),
        },
        "checkout.session.completed" => match order_from_session(&event)? {
            Some(order) => order,
            None => return Ok(WebhookResponse::status("Payment not completed")),
        },
        "payment_intent.payment_failed" => {
            let intent: StripePaymentIntent = parse_object(&event, "payment intent")?;
            tracing::warn!(
                event_id = %event.id,
                payment_intent = %intent.id,
                amount_cents = intent.amount,
                "Payment failed"
            );
            return Ok(WebhookResponse::status("Payment failure logged"));
        }
        _ => return Ok(WebhookResponse::status("Event ignored")),
    };

    // Hosted checkouts emit both a session and an intent event for one
    // payment; both the event id and the payment id are deduplicated.
    let first_delivery = {
        let conn = state.db.get()?;
        let now = queries::now();
        queries::try_record_event(&conn, &event.id, &event.event_type, now)?
            && queries::try_record_event(
                &conn,
                &format!("payment:{}", order.payment_intent_id),
                &event.event_type,
                now,
            )?
    };
    if !first_delivery {
        tracing::info!(event_id = %event.id, "Duplicate Stripe event");
        return Ok(WebhookResponse::status("Already processed"));
    }

    tracing::info!(
        event_id = %event.id,
        payment_intent = %order.payment_intent_id,
        email = %redact_email(order.email()),
        amount_cents = order.amount_cents,
        "Payment succeeded, fanning out"
    );

    let report = fan_out(&state.sinks, &order).await;
    if !report.all_ok() {
        let failed: Vec<&str> = report.failed().map(|o| o.sink).collect();
        tracing::warn!(
            payment_intent = %order.payment_intent_id,
            "Fan-out finished with failures: {}",
            failed.join(", ")
        );
    }

    Ok(Json(WebhookResponse {
        received: true,
        status: "Processed",
        fanout: Some(report),
    }))
}
