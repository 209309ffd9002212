mod intent;
mod invoice;
mod session;
mod subscription;

pub use intent::*;
pub use invoice::*;
pub use session::*;
pub use subscription::*;

use axum::{
    Router,
    http::HeaderMap,
    routing::{get, post},
};
use serde::Deserialize;

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::intake::normalize::{normalize_email, normalize_phone};
use crate::models::{Address, Attribution, Customer, IntentMetadata, OrderSelection};
use crate::payments::IntentFingerprint;
use crate::pricing::{self, OrderTotals};
use crate::util::extract_request_info;

/// Stripe refuses USD charges below 50 cents.
const MIN_CHARGE_CENTS: i64 = 50;
pub const CURRENCY: &str = "usd";

/// Body shared by the intent, hosted-session and subscription endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    /// Browser checkout session; a new one is assigned when absent
    #[serde(default)]
    pub session_id: Option<String>,
    pub order: OrderSelection,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub dob: Option<String>,
    #[serde(default)]
    pub shipping: Address,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub intake_id: Option<String>,
    #[serde(default)]
    pub fbp: Option<String>,
    #[serde(default)]
    pub fbc: Option<String>,
    #[serde(default)]
    pub event_source_url: Option<String>,
}

/// A checkout request validated and priced on the server.
#[derive(Debug, Clone)]
pub struct PricedOrder {
    pub session_id: String,
    pub selection: OrderSelection,
    pub totals: OrderTotals,
    pub metadata: IntentMetadata,
    pub fingerprint: IntentFingerprint,
}

impl PricedOrder {
    pub fn customer(&self) -> &Customer {
        &self.metadata.customer
    }

    /// Line item / intent description, e.g. "Compounded Semaglutide (Monthly)".
    pub fn description(&self) -> String {
        let selection = &self.selection;
        format!(
            "{} ({})",
            selection.medication.display_name(),
            selection.plan.display_name()
        )
    }
}

fn clean(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl CheckoutRequest {
    /// Validate the customer and recompute the amount from the catalog.
    /// Amounts sent by the browser are never used.
    pub fn price(self, headers: &HeaderMap) -> Result<PricedOrder> {
        let email = self
            .email
            .as_deref()
            .and_then(normalize_email)
            .ok_or_else(|| AppError::BadRequest("Email is required".into()))?;

        let totals = pricing::quote(&self.order);
        if totals.total < MIN_CHARGE_CENTS {
            return Err(AppError::BadRequest("Order total is below the minimum charge".into()));
        }

        let phone = clean(self.phone).map(|p| normalize_phone(&p).unwrap_or(p));
        let language = clean(self.language);
        let intake_id = clean(self.intake_id);
        let session_id = clean(self.session_id).unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let fingerprint = IntentFingerprint::new(
            totals.total,
            &email,
            phone.as_deref(),
            &self.shipping,
            &self.order,
            language.as_deref(),
            intake_id.as_deref(),
        );

        let (client_ip, user_agent) = extract_request_info(headers);
        let metadata = IntentMetadata {
            customer: Customer {
                email,
                first_name: self.first_name.trim().to_string(),
                last_name: self.last_name.trim().to_string(),
                phone,
                dob: clean(self.dob),
            },
            shipping: self.shipping,
            selection: Some(self.order.clone()),
            totals: Some(totals),
            line_prices: Some(pricing::line_prices(&self.order)),
            language,
            intake_id,
            checkout_session: Some(session_id.clone()),
            attribution: Attribution {
                fbp: clean(self.fbp),
                fbc: clean(self.fbc),
                client_ip,
                user_agent,
                event_source_url: clean(self.event_source_url),
            },
        };

        Ok(PricedOrder {
            session_id,
            selection: self.order,
            totals,
            metadata,
            fingerprint,
        })
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/payment/create-intent", post(create_intent))
        .route("/payment/create-session", post(create_session))
        .route("/payment/create-subscription", post(create_subscription))
        .route("/payment/invoice/{payment_intent_id}", get(download_invoice))
}
