//! Payment-intent fingerprints.
//!
//! A fingerprint is the JSON serialization of everything that should force a
//! new PaymentIntent when it changes. Two orders are "the same intent" iff
//! their fingerprint strings are equal.

use serde::Serialize;

use crate::crypto::sha256_hex;
use crate::models::{AddOn, Address, OrderSelection};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntentFingerprint {
    pub amount_cents: i64,
    pub email: String,
    pub phone: Option<String>,
    pub shipping: Address,
    pub medication: String,
    pub plan: String,
    pub add_ons: Vec<AddOn>,
    pub shipping_method: String,
    pub promo_code: Option<String>,
    pub language: Option<String>,
    pub intake_id: Option<String>,
}

impl IntentFingerprint {
    pub fn new(
        amount_cents: i64,
        email: &str,
        phone: Option<&str>,
        shipping: &Address,
        selection: &OrderSelection,
        language: Option<&str>,
        intake_id: Option<&str>,
    ) -> Self {
        Self {
            amount_cents,
            email: email.trim().to_lowercase(),
            phone: phone.map(str::to_string),
            shipping: shipping.clone(),
            medication: selection.medication.to_string(),
            plan: selection.plan.to_string(),
            add_ons: selection.normalized_add_ons(),
            shipping_method: selection.shipping_method.to_string(),
            promo_code: selection
                .promo_code
                .as_deref()
                .map(|p| p.trim().to_ascii_uppercase())
                .filter(|p| !p.is_empty()),
            language: language.map(str::to_string),
            intake_id: intake_id.map(str::to_string),
        }
    }

    /// The comparison key.
    pub fn key(&self) -> String {
        // Plain structs of strings and integers always serialize.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Stable Stripe `Idempotency-Key` for this fingerprint within a session.
    pub fn idempotency_key(&self, session_id: &str) -> String {
        format!("pi-{}", &sha256_hex(&format!("{}:{}", session_id, self.key()))[..40])
    }
}
