//! Catalog prices and order totals.
//!
//! All amounts are integer cents. `compute_totals` is pure: identical inputs
//! always produce identical totals.

use serde::{Deserialize, Serialize};

use crate::models::{AddOn, Medication, OrderSelection, Plan, ShippingMethod};

pub type Cents = i64;

/// Price charged for one plan period (not per month).
pub fn plan_price(medication: Medication, plan: Plan) -> Cents {
    match (medication, plan) {
        (Medication::Semaglutide, Plan::Monthly) => 22_900,
        (Medication::Semaglutide, Plan::ThreeMonth) => 59_700,
        (Medication::Semaglutide, Plan::SixMonth) => 107_400,
        (Medication::Semaglutide, Plan::OneTime) => 24_900,
        (Medication::Tirzepatide, Plan::Monthly) => 32_900,
        (Medication::Tirzepatide, Plan::ThreeMonth) => 89_700,
        (Medication::Tirzepatide, Plan::SixMonth) => 167_400,
        (Medication::Tirzepatide, Plan::OneTime) => 34_900,
    }
}

pub fn add_on_price(add_on: AddOn) -> Cents {
    match add_on {
        AddOn::NauseaRelief => 3_900,
        AddOn::B12Boost => 4_900,
        AddOn::MetabolicSupport => 5_900,
    }
}

pub fn shipping_price(method: ShippingMethod) -> Cents {
    match method {
        ShippingMethod::Standard => 0,
        ShippingMethod::Expedited => 2_500,
        ShippingMethod::Overnight => 4_500,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Promo {
    /// Whole-number percent off the subtotal
    Percent(u8),
    /// Fixed amount off the subtotal
    Fixed(Cents),
}

/// Look up a promo code (case-insensitive). Unknown codes yield `None`.
pub fn lookup_promo(code: &str) -> Option<Promo> {
    match code.trim().to_ascii_uppercase().as_str() {
        "WELCOME50" => Some(Promo::Fixed(5_000)),
        "SAVE10" => Some(Promo::Percent(10)),
        "NEWYEAR20" => Some(Promo::Percent(20)),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: Cents,
    pub shipping: Cents,
    pub discount: Cents,
    pub total: Cents,
}

/// Compute order totals.
///
/// The promo discount applies to the subtotal only (never shipping) and is
/// capped at the subtotal. Percent discounts round half up to the cent.
pub fn compute_totals(
    plan_price: Cents,
    add_ons: &[Cents],
    shipping: Cents,
    promo: Option<Promo>,
) -> OrderTotals {
    let subtotal = plan_price + add_ons.iter().sum::<Cents>();
    let discount = match promo {
        Some(Promo::Percent(pct)) => (subtotal * pct.min(100) as Cents + 50) / 100,
        Some(Promo::Fixed(amount)) => amount.max(0),
        None => 0,
    }
    .min(subtotal);

    OrderTotals {
        subtotal,
        shipping,
        discount,
        total: subtotal - discount + shipping,
    }
}

/// What each line of an order was charged. `add_ons` follows
/// `OrderSelection::normalized_add_ons` order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinePrices {
    pub plan: Cents,
    pub add_ons: Vec<Cents>,
}

pub fn line_prices(selection: &OrderSelection) -> LinePrices {
    LinePrices {
        plan: plan_price(selection.medication, selection.plan),
        add_ons: selection
            .normalized_add_ons()
            .into_iter()
            .map(add_on_price)
            .collect(),
    }
}

/// Price a wizard selection against the catalog.
pub fn quote(selection: &OrderSelection) -> OrderTotals {
    let lines = line_prices(selection);
    let promo = selection.promo_code.as_deref().and_then(lookup_promo);

    compute_totals(
        lines.plan,
        &lines.add_ons,
        shipping_price(selection.shipping_method),
        promo,
    )
}

/// `22900` -> `"229.00"`
pub fn format_cents(cents: Cents) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}
