use axum::{body::Bytes, extract::State, http::HeaderMap};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use subtle::ConstantTimeEq;

use super::checkout_redirect_url;
use crate::crypto::PrefillToken;
use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Query};
use crate::intake::parse_submission;
use crate::util::{redact_email, redact_phone};

#[derive(Debug, Deserialize)]
pub struct IntakeWebhookQuery {
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IntakeWebhookResponse {
    pub token: String,
    pub redirect_url: String,
    pub expires_at: i64,
}

fn check_shared_secret(expected: &str, headers: &HeaderMap, query: &IntakeWebhookQuery) -> Result<()> {
    let provided = headers
        .get("x-webhook-secret")
        .and_then(|v| v.to_str().ok())
        .or(query.secret.as_deref())
        .ok_or_else(|| AppError::Unauthorized("Missing webhook secret".into()))?;

    if !bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
        return Err(AppError::Unauthorized("Invalid webhook secret".into()));
    }
    Ok(())
}

/// Receive an intake form submission, store it encrypted and hand back a
/// signed prefill token.
pub async fn receive_intake(
    State(state): State<AppState>,
    Query(query): Query<IntakeWebhookQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<IntakeWebhookResponse>> {
    if let Some(expected) = &state.config.intake_webhook_secret {
        check_shared_secret(expected, &headers, &query)?;
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|_| AppError::BadRequest("Invalid JSON payload".into()))?;
    let now = Utc::now();
    let submission = parse_submission(&payload, now)?;

    let issued_at = now.timestamp();
    let token = PrefillToken::issue(&state.config.prefill_token_secret, issued_at)?;
    let encoded = token.encode();
    let expires_at = issued_at + state.config.prefill_ttl_secs;

    let ciphertext = state.master_key.encrypt(&serde_json::to_vec(&submission)?)?;
    let medication = submission.medication.map(|m| m.to_string());

    {
        let conn = state.db.get()?;
        queries::store_intake(
            &conn,
            &queries::NewIntakeRecord {
                token_id: &token.id,
                token: &encoded,
                submission_id: &submission.submission_id,
                ciphertext: &ciphertext,
                medication: medication.as_deref(),
                language: submission.language.as_deref(),
                created_at: issued_at,
                expires_at,
            },
        )?;
    }

    tracing::info!(
        submission_id = %submission.submission_id,
        email = %redact_email(&submission.email),
        phone = %submission.phone.as_deref().map(redact_phone).unwrap_or_default(),
        answers = submission.answers.len(),
        "Intake submission stored"
    );

    let redirect_url = checkout_redirect_url(
        &state.config.checkout_app_url,
        &encoded,
        medication.as_deref(),
        submission.language.as_deref(),
        &[],
    );

    Ok(Json(IntakeWebhookResponse {
        token: encoded,
        redirect_url,
        expires_at,
    }))
}
