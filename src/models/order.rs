use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Medication {
    Semaglutide,
    Tirzepatide,
}

impl Medication {
    pub fn display_name(&self) -> &'static str {
        match self {
            Medication::Semaglutide => "Compounded Semaglutide",
            Medication::Tirzepatide => "Compounded Tirzepatide",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Plan {
    Monthly,
    #[serde(alias = "3-month", alias = "3_month", alias = "quarterly")]
    #[strum(to_string = "three_month", serialize = "3-month", serialize = "3_month", serialize = "quarterly")]
    ThreeMonth,
    #[serde(alias = "6-month", alias = "6_month")]
    #[strum(to_string = "six_month", serialize = "6-month", serialize = "6_month")]
    SixMonth,
    #[serde(alias = "one-time", alias = "onetime")]
    #[strum(to_string = "one_time", serialize = "one-time", serialize = "onetime")]
    OneTime,
}

impl Plan {
    pub fn is_recurring(&self) -> bool {
        !matches!(self, Plan::OneTime)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Plan::Monthly => "Monthly",
            Plan::ThreeMonth => "3-Month",
            Plan::SixMonth => "6-Month",
            Plan::OneTime => "One-Time",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum AddOn {
    NauseaRelief,
    B12Boost,
    MetabolicSupport,
}

impl AddOn {
    pub fn display_name(&self) -> &'static str {
        match self {
            AddOn::NauseaRelief => "Nausea Relief",
            AddOn::B12Boost => "B12 Boost",
            AddOn::MetabolicSupport => "Metabolic Support",
        }
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ShippingMethod {
    #[default]
    Standard,
    Expedited,
    Overnight,
}

/// What the patient picked in the checkout wizard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSelection {
    pub medication: Medication,
    pub plan: Plan,
    #[serde(default)]
    pub add_ons: Vec<AddOn>,
    #[serde(default)]
    pub shipping_method: ShippingMethod,
    #[serde(default)]
    pub promo_code: Option<String>,
}

impl OrderSelection {
    /// Add-ons sorted and deduplicated, so selection order never changes pricing
    /// or the intent fingerprint.
    pub fn normalized_add_ons(&self) -> Vec<AddOn> {
        let mut add_ons = self.add_ons.clone();
        add_ons.sort();
        add_ons.dedup();
        add_ons
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub line1: String,
    #[serde(default)]
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

fn default_country() -> String {
    "US".to_string()
}

impl Address {
    pub fn is_empty(&self) -> bool {
        self.line1.is_empty() && self.city.is_empty() && self.zip.is_empty()
    }

    pub fn single_line(&self) -> String {
        let mut parts = vec![self.line1.clone()];
        if let Some(line2) = self.line2.as_ref().filter(|l| !l.is_empty()) {
            parts.push(line2.clone());
        }
        parts.push(self.city.clone());
        parts.push(format!("{} {}", self.state, self.zip).trim().to_string());
        parts.retain(|p| !p.is_empty());
        parts.join(", ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub dob: Option<String>,
}

impl Customer {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}
