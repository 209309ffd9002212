//! Request and response bodies of the rxcheckout HTTP API.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// What the patient picked in the wizard. Values are the server's
/// snake_case identifiers (`semaglutide`, `three_month`, `b12_boost`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub medication: String,
    pub plan: String,
    #[serde(default)]
    pub add_ons: Vec<String>,
    #[serde(default = "default_shipping_method")]
    pub shipping_method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promo_code: Option<String>,
}

fn default_shipping_method() -> String {
    "standard".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub line1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub zip: String,
    #[serde(default = "default_country")]
    pub country: String,
}

impl Default for Address {
    fn default() -> Self {
        Self {
            line1: String::new(),
            line2: None,
            city: String::new(),
            state: String::new(),
            zip: String::new(),
            country: default_country(),
        }
    }
}

fn default_country() -> String {
    "US".to_string()
}

/// Everything the payment endpoints need except the session id, which the
/// client manages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutDetails {
    pub order: Order,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dob: Option<String>,
    #[serde(default)]
    pub shipping: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intake_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fbp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fbc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_source_url: Option<String>,
}

#[derive(Serialize)]
struct FingerprintFields<'a> {
    order: &'a Order,
    email: String,
    phone: &'a Option<String>,
    shipping: &'a Address,
    language: &'a Option<String>,
    intake_id: &'a Option<String>,
}

impl CheckoutDetails {
    /// Key over the fields that change the PaymentIntent. Attribution and
    /// name-only edits do not require a new intent.
    pub fn fingerprint(&self) -> String {
        let mut order = self.order.clone();
        order.add_ons.sort();
        order.add_ons.dedup();
        let fields = FingerprintFields {
            order: &order,
            email: self.email.trim().to_lowercase(),
            phone: &self.phone,
            shipping: &self.shipping,
            language: &self.language,
            intake_id: &self.intake_id,
        };
        serde_json::to_string(&fields).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentIntent {
    pub session_id: String,
    pub payment_intent_id: String,
    pub client_secret: String,
    pub amount_cents: i64,
    pub currency: String,
    pub publishable_key: String,
    pub reused: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Quote {
    pub subtotal_cents: i64,
    pub shipping_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
    pub total: String,
    pub promo_applied: bool,
    pub recurring: bool,
}

/// Intake data handed over by the prefill endpoint (camelCase on the wire).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prefill {
    pub submission_id: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub dob: Option<String>,
    #[serde(default)]
    pub address: Address,
    #[serde(default)]
    pub medication: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub answers: BTreeMap<String, String>,
}

impl Prefill {
    /// Seed checkout details from the intake hand-off.
    pub fn to_details(&self, order: Order) -> CheckoutDetails {
        CheckoutDetails {
            order,
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            phone: self.phone.clone(),
            dob: self.dob.clone(),
            shipping: self.address.clone(),
            language: self.language.clone(),
            intake_id: Some(self.submission_id.clone()),
            ..Default::default()
        }
    }
}
