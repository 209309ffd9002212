mod prefill;
mod redirect;
mod webhook;

pub use prefill::*;
pub use redirect::*;
pub use webhook::*;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::db::AppState;
use crate::middleware::rate_limit;
use crate::util::append_query_params;

/// Checkout URL carrying only non-PHI parameters.
pub fn checkout_redirect_url(
    checkout_app_url: &str,
    token: &str,
    medication: Option<&str>,
    language: Option<&str>,
    utm: &[(String, String)],
) -> String {
    let mut params: Vec<(&str, &str)> = vec![("t", token)];
    if let Some(med) = medication {
        params.push(("med", med));
    }
    if let Some(lang) = language {
        params.push(("lang", lang));
    }
    for (key, value) in utm {
        params.push((key.as_str(), value.as_str()));
    }
    append_query_params(checkout_app_url, &params)
}

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/intake/webhook", post(receive_intake))
        .route("/intake/redirect", get(redirect_to_checkout))
        .route("/intake/prefill", get(get_prefill))
        .route_layer(middleware::from_fn_with_state(state, rate_limit))
}
