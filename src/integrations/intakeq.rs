//! IntakeQ (EHR) client: patient record upsert plus the intake summary PDF.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};

use crate::config::IntakeqConfig;
use crate::error::Result;
use crate::fanout::FulfillmentSink;
use crate::models::PaidOrder;
use crate::pdf;
use crate::pricing::format_cents;
use crate::retry::{RetryPolicy, ensure_success, json_body, send_with_retry};

const SERVICE: &str = "IntakeQ";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomFieldValue {
    pub field_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IntakeqPatient {
    pub client_id: i64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub custom_fields: Vec<CustomFieldValue>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClientWrite {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<i64>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub street_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_short: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    pub country: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub custom_fields: Vec<CustomFieldValue>,
}

/// IntakeQ stores dates of birth as Unix milliseconds.
fn dob_millis(dob: &str) -> Option<i64> {
    chrono::NaiveDate::parse_from_str(dob, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

pub fn client_write(order: &PaidOrder, client_id: Option<i64>) -> ClientWrite {
    let customer = order.customer();
    let shipping = &order.details.shipping;
    ClientWrite {
        client_id,
        first_name: customer.first_name.clone(),
        last_name: customer.last_name.clone(),
        email: order.email().to_string(),
        phone: customer.phone.clone(),
        date_of_birth: customer.dob.as_deref().and_then(dob_millis),
        street_address: non_empty(&shipping.single_line()),
        city: non_empty(&shipping.city),
        state_short: non_empty(&shipping.state),
        postal_code: non_empty(&shipping.zip),
        country: shipping.country.clone(),
        custom_fields: Vec::new(),
    }
}

/// Custom field values keyed by the field label shown in IntakeQ.
pub fn custom_field_values(order: &PaidOrder) -> Vec<(&'static str, String)> {
    let mut values = vec![
        ("Payment Intent ID", order.payment_intent_id.clone()),
        ("Amount Paid", format!("${}", format_cents(order.amount_cents))),
    ];
    if let Some(selection) = &order.details.selection {
        values.push(("Medication", selection.medication.display_name().to_string()));
        values.push(("Plan", selection.plan.display_name().to_string()));
    }
    values
}

fn pdf_part(bytes: &[u8], file_name: &str) -> Part {
    let part = Part::bytes(bytes.to_vec()).file_name(file_name.to_string());
    match part.mime_str("application/pdf") {
        Ok(part) => part,
        Err(_) => Part::bytes(bytes.to_vec()).file_name(file_name.to_string()),
    }
}

pub struct IntakeqClient {
    client: Client,
    config: IntakeqConfig,
    retry: RetryPolicy,
    /// Lower-cased custom field label -> IntakeQ field id. Field ids are
    /// account-wide and never change, so they are learned once per process.
    field_ids: RwLock<HashMap<String, String>>,
}

impl IntakeqClient {
    pub fn new(config: IntakeqConfig) -> Self {
        Self {
            client: Client::new(),
            config,
            retry: RetryPolicy::default(),
            field_ids: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    fn learn_field_ids(&self, patient: &IntakeqPatient) {
        if patient.custom_fields.is_empty() {
            return;
        }
        if let Ok(mut cache) = self.field_ids.write() {
            for field in &patient.custom_fields {
                if let Some(label) = field.text.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
                    cache
                        .entry(label.to_lowercase())
                        .or_insert_with(|| field.field_id.clone());
                }
            }
        }
    }

    fn field_id(&self, label: &str) -> Option<String> {
        self.field_ids
            .read()
            .ok()
            .and_then(|cache| cache.get(&label.to_lowercase()).cloned())
    }

    pub async fn find_client(&self, email: &str) -> Result<Option<IntakeqPatient>> {
        let url = self.url("clients");
        let response = send_with_retry(&self.retry, SERVICE, || {
            self.client
                .get(&url)
                .header("X-Auth-Key", &self.config.api_key)
                .query(&[("search", email), ("includeProfile", "true")])
        })
        .await?;
        let matches: Vec<IntakeqPatient> = json_body(response, SERVICE).await?;
        Ok(matches.into_iter().find(|p| {
            p.email
                .as_deref()
                .is_some_and(|e| e.trim().eq_ignore_ascii_case(email))
        }))
    }

    /// Create or update a client. IntakeQ treats a body with `ClientId` as an
    /// update.
    async fn save_client(&self, body: &ClientWrite) -> Result<IntakeqPatient> {
        let url = self.url("clients");
        let response = send_with_retry(&self.retry, SERVICE, || {
            self.client
                .post(&url)
                .header("X-Auth-Key", &self.config.api_key)
                .json(body)
        })
        .await?;
        json_body(response, SERVICE).await
    }

    pub async fn upload_pdf(&self, client_id: i64, file_name: &str, bytes: &[u8]) -> Result<()> {
        let url = self.url(&format!("files/{}", client_id));
        let response = send_with_retry(&self.retry, SERVICE, || {
            let form = Form::new().part("file", pdf_part(bytes, file_name));
            self.client
                .post(&url)
                .header("X-Auth-Key", &self.config.api_key)
                .multipart(form)
        })
        .await?;
        ensure_success(response, SERVICE).await?;
        Ok(())
    }

    pub async fn sync_patient(&self, order: &PaidOrder) -> Result<i64> {
        let patient = match self.find_client(order.email()).await? {
            Some(existing) => existing,
            None => {
                tracing::debug!("Creating IntakeQ client");
                self.save_client(&client_write(order, None)).await?
            }
        };
        self.learn_field_ids(&patient);

        let mut update = client_write(order, Some(patient.client_id));
        for (label, value) in custom_field_values(order) {
            match self.field_id(label) {
                Some(field_id) => update.custom_fields.push(CustomFieldValue {
                    field_id,
                    text: None,
                    value: Some(value),
                }),
                None => tracing::debug!(label, "IntakeQ custom field not found, skipping"),
            }
        }
        self.save_client(&update).await?;

        Ok(patient.client_id)
    }
}

#[async_trait]
impl FulfillmentSink for IntakeqClient {
    fn name(&self) -> &'static str {
        SERVICE
    }

    async fn deliver(&self, order: &PaidOrder) -> Result<()> {
        let client_id = self.sync_patient(order).await?;
        let summary = pdf::intake_summary(order);
        let file_name = format!("intake-summary-{}.pdf", order.payment_intent_id);
        self.upload_pdf(client_id, &file_name, &summary).await
    }
}
