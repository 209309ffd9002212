use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Address, Customer, Medication};

/// A normalized intake form submission. Contains PHI: encrypt before storing,
/// never log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeSubmission {
    pub submission_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    /// ISO date, `YYYY-MM-DD`
    #[serde(default)]
    pub dob: Option<String>,
    #[serde(default)]
    pub address: Address,
    #[serde(default)]
    pub medication: Option<Medication>,
    #[serde(default)]
    pub language: Option<String>,
    /// Remaining answers (qualification questions, consents), keyed by the
    /// normalized field name.
    #[serde(default)]
    pub answers: BTreeMap<String, String>,
    pub submitted_at: i64,
}

impl IntakeSubmission {
    pub fn customer(&self) -> Customer {
        Customer {
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            phone: self.phone.clone(),
            dob: self.dob.clone(),
        }
    }
}
