use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::config::AirtableConfig;
use crate::error::Result;
use crate::fanout::FulfillmentSink;
use crate::models::PaidOrder;
use crate::retry::{RetryPolicy, json_body, send_with_retry};

const SERVICE: &str = "Airtable";

#[derive(Debug, Deserialize)]
struct AirtableRecord {
    id: String,
}

#[derive(Debug, Deserialize)]
struct AirtableList {
    #[serde(default)]
    records: Vec<AirtableRecord>,
}

#[derive(Debug, Serialize)]
struct RecordWrite {
    fields: Map<String, Value>,
    typecast: bool,
}

/// `filterByFormula` matching a patient row by email. Quotes and backslashes
/// in the address are escaped so the value cannot break out of the string.
pub fn email_formula(email: &str) -> String {
    let escaped = email
        .trim()
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('\'', "\\'");
    format!("LOWER({{Email}}) = '{}'", escaped)
}

/// Payment columns written on the patient row.
pub fn payment_fields(order: &PaidOrder) -> Map<String, Value> {
    let customer = order.customer();
    let mut fields = Map::new();
    fields.insert("Email".into(), json!(order.email()));
    if !customer.first_name.is_empty() {
        fields.insert("First Name".into(), json!(customer.first_name));
    }
    if !customer.last_name.is_empty() {
        fields.insert("Last Name".into(), json!(customer.last_name));
    }
    if let Some(phone) = &customer.phone {
        fields.insert("Phone".into(), json!(phone));
    }
    fields.insert("Payment Status".into(), json!("Paid"));
    fields.insert("Payment Intent ID".into(), json!(order.payment_intent_id));
    fields.insert("Amount Paid".into(), json!(order.amount_cents as f64 / 100.0));
    if let Some(paid_at) = DateTime::from_timestamp(order.paid_at, 0) {
        fields.insert("Paid At".into(), json!(paid_at.to_rfc3339()));
    }
    if let Some(selection) = &order.details.selection {
        fields.insert("Medication".into(), json!(selection.medication.display_name()));
        fields.insert("Plan".into(), json!(selection.plan.display_name()));
    }
    fields
}

pub struct AirtableClient {
    client: Client,
    config: AirtableConfig,
    retry: RetryPolicy,
}

impl AirtableClient {
    pub fn new(config: AirtableConfig) -> Self {
        Self {
            client: Client::new(),
            config,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn table_url(&self) -> String {
        format!(
            "{}/{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.base_id,
            urlencoding::encode(&self.config.table)
        )
    }

    async fn find_record_id(&self, email: &str) -> Result<Option<String>> {
        let url = self.table_url();
        let formula = email_formula(email);
        let response = send_with_retry(&self.retry, SERVICE, || {
            self.client
                .get(&url)
                .bearer_auth(&self.config.api_key)
                .query(&[("filterByFormula", formula.as_str()), ("maxRecords", "1")])
        })
        .await?;
        let list: AirtableList = json_body(response, SERVICE).await?;
        Ok(list.records.into_iter().next().map(|r| r.id))
    }

    /// Update the patient's row with payment details, creating the row when
    /// the patient is not in the table yet.
    pub async fn record_payment(&self, order: &PaidOrder) -> Result<()> {
        let body = RecordWrite {
            fields: payment_fields(order),
            typecast: true,
        };

        let response = match self.find_record_id(order.email()).await? {
            Some(record_id) => {
                let url = format!("{}/{}", self.table_url(), record_id);
                send_with_retry(&self.retry, SERVICE, || {
                    self.client
                        .patch(&url)
                        .bearer_auth(&self.config.api_key)
                        .json(&body)
                })
                .await?
            }
            None => {
                let url = self.table_url();
                tracing::debug!("No Airtable row for order, creating one");
                send_with_retry(&self.retry, SERVICE, || {
                    self.client
                        .post(&url)
                        .bearer_auth(&self.config.api_key)
                        .json(&body)
                })
                .await?
            }
        };
        let _: AirtableRecord = json_body(response, SERVICE).await?;
        Ok(())
    }
}

#[async_trait]
impl FulfillmentSink for AirtableClient {
    fn name(&self) -> &'static str {
        SERVICE
    }

    async fn deliver(&self, order: &PaidOrder) -> Result<()> {
        self.record_payment(order).await
    }
}
