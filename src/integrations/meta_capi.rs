//! Meta Conversions API `Purchase` events.
//!
//! User data is normalized then SHA-256 hashed as Meta requires. `event_id`
//! is the payment intent id so the browser pixel's event is deduplicated
//! against this one.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::MetaConfig;
use crate::crypto::sha256_hex;
use crate::error::{AppError, Result};
use crate::fanout::FulfillmentSink;
use crate::models::PaidOrder;
use crate::retry::{RetryPolicy, json_body, send_with_retry};

const SERVICE: &str = "Meta CAPI";

#[derive(Debug, Default, Serialize)]
pub struct UserData {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub em: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ph: Vec<String>,
    #[serde(rename = "fn", skip_serializing_if = "Vec::is_empty")]
    pub first_name: Vec<String>,
    #[serde(rename = "ln", skip_serializing_if = "Vec::is_empty")]
    pub last_name: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub db: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ct: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub st: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub zp: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub country: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub external_id: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fbp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fbc: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CustomData {
    pub currency: String,
    pub value: f64,
    pub content_type: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub content_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_name: Option<String>,
    pub num_items: u32,
    pub order_id: String,
}

#[derive(Debug, Serialize)]
pub struct ServerEvent {
    pub event_name: &'static str,
    pub event_time: i64,
    pub event_id: String,
    pub action_source: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_source_url: Option<String>,
    pub user_data: UserData,
    pub custom_data: CustomData,
}

#[derive(Debug, Serialize)]
struct EventBatch<'a> {
    data: [&'a ServerEvent; 1],
    access_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    test_event_code: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    events_received: u32,
}

/// Hash a normalized value; empty input yields no entry.
fn hashed(value: &str) -> Vec<String> {
    if value.is_empty() {
        Vec::new()
    } else {
        vec![sha256_hex(value)]
    }
}

fn lower_compact(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

pub fn purchase_event(order: &PaidOrder) -> ServerEvent {
    let details = &order.details;
    let customer = &details.customer;
    let shipping = &details.shipping;

    let phone_digits: String = customer
        .phone
        .as_deref()
        .unwrap_or_default()
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    // Meta wants dates of birth as YYYYMMDD.
    let dob: String = customer
        .dob
        .as_deref()
        .unwrap_or_default()
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    let zip: String = shipping.zip.chars().take(5).collect();

    let user_data = UserData {
        em: hashed(&customer.email.trim().to_lowercase()),
        ph: hashed(&phone_digits),
        first_name: hashed(&lower_compact(&customer.first_name)),
        last_name: hashed(&lower_compact(&customer.last_name)),
        db: hashed(&dob),
        ct: hashed(&lower_compact(&shipping.city)),
        st: hashed(&shipping.state.trim().to_lowercase()),
        zp: hashed(&zip),
        country: hashed(&shipping.country.trim().to_lowercase()),
        external_id: hashed(&customer.email.trim().to_lowercase()),
        client_ip_address: details.attribution.client_ip.clone(),
        client_user_agent: details.attribution.user_agent.clone(),
        fbp: details.attribution.fbp.clone(),
        fbc: details.attribution.fbc.clone(),
    };

    let selection = details.selection.as_ref();
    ServerEvent {
        event_name: "Purchase",
        event_time: order.paid_at,
        event_id: order.payment_intent_id.clone(),
        action_source: "website",
        event_source_url: details.attribution.event_source_url.clone(),
        user_data,
        custom_data: CustomData {
            currency: order.currency.to_uppercase(),
            value: order.amount_cents as f64 / 100.0,
            content_type: "product",
            content_ids: selection
                .map(|s| vec![s.medication.to_string()])
                .unwrap_or_default(),
            content_name: selection
                .map(|s| format!("{} ({})", s.medication.display_name(), s.plan.display_name())),
            num_items: 1,
            order_id: order.payment_intent_id.clone(),
        },
    }
}

pub struct MetaCapiClient {
    client: Client,
    config: MetaConfig,
    retry: RetryPolicy,
}

impl MetaCapiClient {
    pub fn new(config: MetaConfig) -> Self {
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

    pub async fn send_purchase(&self, order: &PaidOrder) -> Result<()> {
        let url = format!(
            "{}/{}/events",
            self.config.api_base.trim_end_matches('/'),
            self.config.pixel_id
        );
        let event = purchase_event(order);
        let batch = EventBatch {
            data: [&event],
            access_token: &self.config.access_token,
            test_event_code: self.config.test_event_code.as_deref(),
        };

        let response = send_with_retry(&self.retry, SERVICE, || {
            self.client.post(&url).json(&batch)
        })
        .await?;
        let result: EventsResponse = json_body(response, SERVICE).await?;
        if result.events_received == 0 {
            return Err(AppError::upstream(SERVICE, "event was not received"));
        }
        Ok(())
    }
}

#[async_trait]
impl FulfillmentSink for MetaCapiClient {
    fn name(&self) -> &'static str {
        SERVICE
    }

    async fn deliver(&self, order: &PaidOrder) -> Result<()> {
        self.send_purchase(order).await
    }
}
