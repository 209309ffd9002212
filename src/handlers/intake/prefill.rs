use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::crypto::PrefillToken;
use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Query};
use crate::models::IntakeSubmission;

#[derive(Debug, Deserialize)]
pub struct PrefillQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// Return the stored intake submission for a prefill token, exactly once.
pub async fn get_prefill(
    State(state): State<AppState>,
    Query(query): Query<PrefillQuery>,
) -> Result<Response> {
    let raw = query
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::BadRequest("token is required".into()))?;

    let now = queries::now();
    let token = PrefillToken::open(
        &raw,
        &state.config.prefill_token_secret,
        now,
        state.config.prefill_token_max_age_secs,
    )?;

    let ciphertext = {
        let conn = state.db.get()?;
        queries::take_intake(&conn, &token.id, now)?
    }
    .ok_or_else(|| AppError::NotFound("Prefill data not found or already used".into()))?;

    let plaintext = state.master_key.decrypt(&ciphertext)?;
    let submission: IntakeSubmission = serde_json::from_slice(&plaintext)?;

    Ok((
        [(header::CACHE_CONTROL, "no-store")],
        Json(submission),
    )
        .into_response())
}
