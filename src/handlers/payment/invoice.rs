use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use subtle::ConstantTimeEq;

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::extractors::Query;
use crate::models::PaidOrder;
use crate::pdf;

#[derive(Debug, Deserialize)]
pub struct InvoiceQuery {
    #[serde(default)]
    pub client_secret: Option<String>,
}

/// Render an invoice PDF for a completed payment. The caller proves it owns
/// the payment by presenting the intent's client secret.
pub async fn download_invoice(
    State(state): State<AppState>,
    Path(payment_intent_id): Path<String>,
    Query(query): Query<InvoiceQuery>,
) -> Result<Response> {
    let provided = query
        .client_secret
        .ok_or_else(|| AppError::Unauthorized("client_secret is required".into()))?;

    let intent = state.stripe.retrieve_payment_intent(&payment_intent_id).await?;

    let expected = intent.client_secret.as_deref().unwrap_or_default();
    if expected.is_empty() || !bool::from(expected.as_bytes().ct_eq(provided.as_bytes())) {
        return Err(AppError::Forbidden("Invalid client secret".into()));
    }
    if intent.status != "succeeded" {
        return Err(AppError::BadRequest("Payment has not completed".into()));
    }

    let order = PaidOrder::from_metadata(
        &intent.id,
        intent.amount,
        &intent.currency,
        intent.created,
        &intent.metadata,
        intent.receipt_email.as_deref(),
    )?;
    let bytes = pdf::invoice(&order);

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"invoice-{}.pdf\"", intent.id),
            ),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
        bytes,
    )
        .into_response())
}
