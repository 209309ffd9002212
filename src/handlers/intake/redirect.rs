use std::collections::BTreeMap;

use axum::{
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

use super::checkout_redirect_url;
use crate::crypto::PrefillToken;
use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::Query;

/// Send the browser from the intake form to the checkout app.
///
/// Accepts either `sid` (the form's submission id) or `token`. The token is
/// verified but not consumed; only `t`, `med`, `lang` and `utm_*` are put on
/// the checkout URL.
pub async fn redirect_to_checkout(
    State(state): State<AppState>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Result<Response> {
    let now = queries::now();
    let config = &state.config;

    let record = {
        let conn = state.db.get()?;
        if let Some(raw) = params.get("token").filter(|t| !t.is_empty()) {
            let token = PrefillToken::open(
                raw,
                &config.prefill_token_secret,
                now,
                config.prefill_token_max_age_secs,
            )?;
            queries::get_intake_by_token_id(&conn, &token.id, now)?
        } else if let Some(sid) = params.get("sid").filter(|s| !s.is_empty()) {
            queries::get_intake_by_submission(&conn, sid, now)?
        } else {
            return Err(AppError::BadRequest("sid or token is required".into()));
        }
    }
    .ok_or_else(|| AppError::NotFound("Submission not found".into()))?;

    // Lookups by submission id still have to present a live token.
    PrefillToken::open(
        &record.token,
        &config.prefill_token_secret,
        now,
        config.prefill_token_max_age_secs,
    )?;

    let utm: Vec<(String, String)> = params
        .iter()
        .filter(|(k, v)| k.starts_with("utm_") && !v.is_empty())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let url = checkout_redirect_url(
        &config.checkout_app_url,
        &record.token,
        record.medication.as_deref(),
        record.language.as_deref(),
        &utm,
    );

    Ok((StatusCode::FOUND, [(header::LOCATION, url)]).into_response())
}
