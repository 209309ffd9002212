//! Order context carried through Stripe's metadata bag, and the paid order
//! rebuilt from it on the webhook side.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{AddOn, Address, Customer, OrderSelection};
use crate::error::{AppError, Result};
use crate::pricing::{LinePrices, OrderTotals};

/// Stripe rejects metadata values longer than this.
pub const METADATA_VALUE_MAX: usize = 500;

/// Ad-attribution context forwarded to the Meta Conversions API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
    #[serde(default)]
    pub fbp: Option<String>,
    #[serde(default)]
    pub fbc: Option<String>,
    #[serde(default)]
    pub client_ip: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub event_source_url: Option<String>,
}

/// Everything the webhook needs to fan a payment out downstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntentMetadata {
    pub customer: Customer,
    pub shipping: Address,
    pub selection: Option<OrderSelection>,
    pub totals: Option<OrderTotals>,
    /// Per-line amounts charged, so invoices never re-price from the catalog
    pub line_prices: Option<LinePrices>,
    pub language: Option<String>,
    pub intake_id: Option<String>,
    pub checkout_session: Option<String>,
    pub attribution: Attribution,
}

fn truncate(value: &str) -> String {
    if value.chars().count() <= METADATA_VALUE_MAX {
        return value.to_string();
    }
    value.chars().take(METADATA_VALUE_MAX).collect()
}

impl IntentMetadata {
    /// Flatten into Stripe metadata pairs. Empty values are dropped.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(&str, String)> = vec![
            ("email", self.customer.email.clone()),
            ("first_name", self.customer.first_name.clone()),
            ("last_name", self.customer.last_name.clone()),
            ("phone", self.customer.phone.clone().unwrap_or_default()),
            ("dob", self.customer.dob.clone().unwrap_or_default()),
            ("ship_line1", self.shipping.line1.clone()),
            ("ship_line2", self.shipping.line2.clone().unwrap_or_default()),
            ("ship_city", self.shipping.city.clone()),
            ("ship_state", self.shipping.state.clone()),
            ("ship_zip", self.shipping.zip.clone()),
            ("ship_country", self.shipping.country.clone()),
            ("language", self.language.clone().unwrap_or_default()),
            ("intake_id", self.intake_id.clone().unwrap_or_default()),
            ("checkout_session", self.checkout_session.clone().unwrap_or_default()),
            ("fbp", self.attribution.fbp.clone().unwrap_or_default()),
            ("fbc", self.attribution.fbc.clone().unwrap_or_default()),
            ("client_ip", self.attribution.client_ip.clone().unwrap_or_default()),
            ("user_agent", self.attribution.user_agent.clone().unwrap_or_default()),
            (
                "event_source_url",
                self.attribution.event_source_url.clone().unwrap_or_default(),
            ),
        ];

        if let Some(selection) = &self.selection {
            let add_ons: Vec<String> = selection
                .normalized_add_ons()
                .iter()
                .map(|a| a.to_string())
                .collect();
            pairs.push(("medication", selection.medication.to_string()));
            pairs.push(("plan", selection.plan.to_string()));
            pairs.push(("add_ons", add_ons.join(",")));
            pairs.push(("shipping_method", selection.shipping_method.to_string()));
            pairs.push(("promo_code", selection.promo_code.clone().unwrap_or_default()));
        }

        if let Some(totals) = &self.totals {
            pairs.push(("subtotal_cents", totals.subtotal.to_string()));
            pairs.push(("shipping_cents", totals.shipping.to_string()));
            pairs.push(("discount_cents", totals.discount.to_string()));
            pairs.push(("total_cents", totals.total.to_string()));
        }

        if let Some(lines) = &self.line_prices {
            let add_ons: Vec<String> = lines.add_ons.iter().map(|c| c.to_string()).collect();
            pairs.push(("plan_cents", lines.plan.to_string()));
            pairs.push(("add_on_cents", add_ons.join(",")));
        }

        pairs
            .into_iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| (k.to_string(), truncate(&v)))
            .collect()
    }

    /// Rebuild from a metadata bag. Unknown or unparseable order fields leave
    /// `selection`/`totals` unset rather than failing.
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        let get = |key: &str| {
            map.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let selection = match (
            get("medication").and_then(|m| m.parse().ok()),
            get("plan").and_then(|p| p.parse().ok()),
        ) {
            (Some(medication), Some(plan)) => Some(OrderSelection {
                medication,
                plan,
                add_ons: get("add_ons")
                    .map(|raw| {
                        raw.split(',')
                            .filter_map(|a| a.trim().parse::<AddOn>().ok())
                            .collect()
                    })
                    .unwrap_or_default(),
                shipping_method: get("shipping_method")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_default(),
                promo_code: get("promo_code"),
            }),
            _ => None,
        };

        let cents = |key: &str| get(key).and_then(|v| v.parse::<i64>().ok());
        let totals = match (
            cents("subtotal_cents"),
            cents("shipping_cents"),
            cents("discount_cents"),
            cents("total_cents"),
        ) {
            (Some(subtotal), Some(shipping), Some(discount), Some(total)) => Some(OrderTotals {
                subtotal,
                shipping,
                discount,
                total,
            }),
            _ => None,
        };

        let line_prices = cents("plan_cents").and_then(|plan| {
            let add_ons = match get("add_on_cents") {
                Some(raw) => raw
                    .split(',')
                    .map(|c| c.trim().parse::<i64>().ok())
                    .collect::<Option<Vec<_>>>()?,
                None => Vec::new(),
            };
            Some(LinePrices { plan, add_ons })
        });

        Self {
            customer: Customer {
                email: get("email").map(|e| e.to_lowercase()).unwrap_or_default(),
                first_name: get("first_name").unwrap_or_default(),
                last_name: get("last_name").unwrap_or_default(),
                phone: get("phone"),
                dob: get("dob"),
            },
            shipping: Address {
                line1: get("ship_line1").unwrap_or_default(),
                line2: get("ship_line2"),
                city: get("ship_city").unwrap_or_default(),
                state: get("ship_state").unwrap_or_default(),
                zip: get("ship_zip").unwrap_or_default(),
                country: get("ship_country").unwrap_or_else(|| "US".to_string()),
            },
            selection,
            totals,
            line_prices,
            language: get("language"),
            intake_id: get("intake_id"),
            checkout_session: get("checkout_session"),
            attribution: Attribution {
                fbp: get("fbp"),
                fbc: get("fbc"),
                client_ip: get("client_ip"),
                user_agent: get("user_agent"),
                event_source_url: get("event_source_url"),
            },
        }
    }
}

/// A successful payment, ready for downstream fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaidOrder {
    pub payment_intent_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub paid_at: i64,
    pub details: IntentMetadata,
}

impl PaidOrder {
    /// Build from a Stripe object's metadata. `fallback_email` is the
    /// receipt/customer email Stripe itself recorded, used when the metadata
    /// bag has none. Fails when no email can be found at all.
    pub fn from_metadata(
        payment_intent_id: &str,
        amount_cents: i64,
        currency: &str,
        paid_at: i64,
        metadata: &HashMap<String, String>,
        fallback_email: Option<&str>,
    ) -> Result<Self> {
        let mut details = IntentMetadata::from_map(metadata);

        if details.customer.email.is_empty() {
            if let Some(email) = fallback_email.map(str::trim).filter(|e| !e.is_empty()) {
                details.customer.email = email.to_lowercase();
            }
        }
        if details.customer.email.is_empty() || !details.customer.email.contains('@') {
            return Err(AppError::BadRequest("Payment is missing a customer email".into()));
        }

        Ok(Self {
            payment_intent_id: payment_intent_id.to_string(),
            amount_cents,
            currency: currency.to_lowercase(),
            paid_at,
            details,
        })
    }

    pub fn email(&self) -> &str {
        &self.details.customer.email
    }

    pub fn customer(&self) -> &Customer {
        &self.details.customer
    }
}
