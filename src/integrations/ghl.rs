use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::GhlConfig;
use crate::error::Result;
use crate::fanout::FulfillmentSink;
use crate::models::PaidOrder;
use crate::retry::{RetryPolicy, json_body, send_with_retry};

const SERVICE: &str = "GoHighLevel";
const API_VERSION: &str = "2021-07-28";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactUpsert {
    pub location_id: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    pub country: String,
    pub tags: Vec<String>,
    pub source: &'static str,
}

#[derive(Debug, Deserialize)]
struct UpsertContact {
    id: String,
}

#[derive(Debug, Deserialize)]
struct UpsertResponse {
    contact: UpsertContact,
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// `paid`, `med-<medication>`, `plan-<plan>`.
pub fn order_tags(order: &PaidOrder) -> Vec<String> {
    let mut tags = vec!["paid".to_string()];
    if let Some(selection) = &order.details.selection {
        tags.push(format!("med-{}", selection.medication));
        tags.push(format!("plan-{}", selection.plan));
    }
    tags
}

pub fn contact_upsert(location_id: &str, order: &PaidOrder) -> ContactUpsert {
    let customer = order.customer();
    let shipping = &order.details.shipping;
    ContactUpsert {
        location_id: location_id.to_string(),
        email: order.email().to_string(),
        first_name: non_empty(&customer.first_name),
        last_name: non_empty(&customer.last_name),
        phone: customer.phone.clone(),
        address1: non_empty(&shipping.line1),
        city: non_empty(&shipping.city),
        state: non_empty(&shipping.state),
        postal_code: non_empty(&shipping.zip),
        country: shipping.country.clone(),
        tags: order_tags(order),
        source: "rxcheckout",
    }
}

pub struct GhlClient {
    client: Client,
    config: GhlConfig,
    retry: RetryPolicy,
}

impl GhlClient {
    pub fn new(config: GhlConfig) -> Self {
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

    /// Upsert the contact (matched by email within the location) and return
    /// its id.
    pub async fn upsert_contact(&self, order: &PaidOrder) -> Result<String> {
        let url = format!("{}/contacts/upsert", self.config.api_base.trim_end_matches('/'));
        let body = contact_upsert(&self.config.location_id, order);

        let response = send_with_retry(&self.retry, SERVICE, || {
            self.client
                .post(&url)
                .bearer_auth(&self.config.api_key)
                .header("Version", API_VERSION)
                .json(&body)
        })
        .await?;
        let upserted: UpsertResponse = json_body(response, SERVICE).await?;
        Ok(upserted.contact.id)
    }
}

#[async_trait]
impl FulfillmentSink for GhlClient {
    fn name(&self) -> &'static str {
        SERVICE
    }

    async fn deliver(&self, order: &PaidOrder) -> Result<()> {
        let contact_id = self.upsert_contact(order).await?;
        tracing::debug!(contact_id, "GoHighLevel contact upserted");
        Ok(())
    }
}
