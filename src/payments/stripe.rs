//! Minimal Stripe REST client: payment intents, hosted checkout sessions,
//! customers, subscriptions and webhook signature verification.

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::StripeConfig;
use crate::error::{AppError, Result};
use crate::retry::{RetryPolicy, json_body, send_with_retry};

type HmacSha256 = Hmac<Sha256>;

const SERVICE: &str = "Stripe";
/// Maximum age of a signed webhook before it is treated as a replay.
const WEBHOOK_TOLERANCE_SECS: u64 = 300;

#[derive(Debug, Clone, Deserialize)]
pub struct StripePaymentIntent {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub receipt_email: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub created: i64,
    /// Set on intents Stripe creates to pay a subscription invoice
    #[serde(default)]
    pub invoice: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeCustomerDetails {
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub payment_status: String,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_details: Option<StripeCustomerDetails>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl StripeCheckoutSession {
    pub fn email(&self) -> Option<&str> {
        self.customer_details
            .as_ref()
            .and_then(|d| d.email.as_deref())
            .or(self.customer_email.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeCustomer {
    pub id: String,
}

#[derive(Debug, Deserialize)]
struct StripeList<T> {
    data: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeInvoice {
    pub id: String,
    #[serde(default)]
    pub payment_intent: Option<StripePaymentIntent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub latest_invoice: Option<StripeInvoice>,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct StripeWebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: i64,
    pub data: StripeEventData,
}

/// Inputs for a new PaymentIntent.
#[derive(Debug, Clone)]
pub struct NewPaymentIntent<'a> {
    pub amount_cents: i64,
    pub currency: &'a str,
    pub receipt_email: &'a str,
    pub description: &'a str,
    pub metadata: &'a [(String, String)],
}

/// Inputs for a hosted Checkout Session with a single inline-priced line item.
#[derive(Debug, Clone)]
pub struct NewCheckoutSession<'a> {
    pub product_name: &'a str,
    pub amount_cents: i64,
    pub currency: &'a str,
    pub customer_email: &'a str,
    pub success_url: &'a str,
    pub cancel_url: &'a str,
    pub metadata: &'a [(String, String)],
}

fn push_metadata(form: &mut Vec<(String, String)>, prefix: &str, metadata: &[(String, String)]) {
    for (key, value) in metadata {
        form.push((format!("{}[{}]", prefix, key), value.clone()));
    }
}

#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
    webhook_secret: String,
    api_base: String,
    price_ids: HashMap<String, String>,
    retry: RetryPolicy,
}

impl StripeClient {
    pub fn new(config: &StripeConfig) -> Self {
        Self {
            client: Client::new(),
            secret_key: config.secret_key.clone(),
            webhook_secret: config.webhook_secret.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            price_ids: config.price_ids.clone(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Recurring price configured for `medication:plan`, if any.
    pub fn price_id(&self, medication: &str, plan: &str) -> Option<&str> {
        self.price_ids
            .get(&format!("{}:{}", medication, plan))
            .map(String::as_str)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.api_base, path)
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        form: &[(String, String)],
        idempotency_key: Option<&str>,
    ) -> Result<T> {
        if self.secret_key.is_empty() {
            return Err(AppError::Internal("Stripe secret key is not configured".into()));
        }
        let url = self.url(path);
        let response = send_with_retry(&self.retry, SERVICE, || {
            let mut request = self
                .client
                .post(&url)
                .basic_auth(&self.secret_key, Some(""))
                .form(form);
            if let Some(key) = idempotency_key {
                request = request.header("Idempotency-Key", key);
            }
            request
        })
        .await?;
        json_body(response, SERVICE).await
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        if self.secret_key.is_empty() {
            return Err(AppError::Internal("Stripe secret key is not configured".into()));
        }
        let url = self.url(path);
        let response = send_with_retry(&self.retry, SERVICE, || {
            self.client
                .get(&url)
                .basic_auth(&self.secret_key, Some(""))
                .query(query)
        })
        .await?;
        json_body(response, SERVICE).await
    }

    /// Create a PaymentIntent. `idempotency_key` makes Stripe return the same
    /// intent for a replayed request instead of creating a duplicate.
    pub async fn create_payment_intent(
        &self,
        intent: &NewPaymentIntent<'_>,
        idempotency_key: &str,
    ) -> Result<StripePaymentIntent> {
        let mut form = vec![
            ("amount".to_string(), intent.amount_cents.to_string()),
            ("currency".to_string(), intent.currency.to_string()),
            ("receipt_email".to_string(), intent.receipt_email.to_string()),
            ("description".to_string(), intent.description.to_string()),
            ("automatic_payment_methods[enabled]".to_string(), "true".to_string()),
        ];
        push_metadata(&mut form, "metadata", intent.metadata);

        self.post_form("payment_intents", &form, Some(idempotency_key)).await
    }

    pub async fn retrieve_payment_intent(&self, id: &str) -> Result<StripePaymentIntent> {
        self.get(&format!("payment_intents/{}", urlencoding::encode(id)), &[])
            .await
    }

    /// Merge metadata into an existing intent (e.g. the one Stripe creates for
    /// a subscription's first invoice).
    pub async fn update_payment_intent_metadata(
        &self,
        id: &str,
        metadata: &[(String, String)],
    ) -> Result<StripePaymentIntent> {
        let mut form = Vec::with_capacity(metadata.len());
        push_metadata(&mut form, "metadata", metadata);
        self.post_form(&format!("payment_intents/{}", urlencoding::encode(id)), &form, None)
            .await
    }

    pub async fn cancel_payment_intent(&self, id: &str) -> Result<StripePaymentIntent> {
        let form = vec![("cancellation_reason".to_string(), "abandoned".to_string())];
        self.post_form(
            &format!("payment_intents/{}/cancel", urlencoding::encode(id)),
            &form,
            None,
        )
        .await
    }

    /// Create a hosted Checkout Session in payment mode. The metadata is set on
    /// both the session and its PaymentIntent so either webhook carries it.
    pub async fn create_checkout_session(
        &self,
        session: &NewCheckoutSession<'_>,
    ) -> Result<StripeCheckoutSession> {
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), session.success_url.to_string()),
            ("cancel_url".to_string(), session.cancel_url.to_string()),
            ("customer_email".to_string(), session.customer_email.to_string()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            (
                "line_items[0][price_data][currency]".to_string(),
                session.currency.to_string(),
            ),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                session.amount_cents.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                session.product_name.to_string(),
            ),
        ];
        push_metadata(&mut form, "metadata", session.metadata);
        push_metadata(&mut form, "payment_intent_data[metadata]", session.metadata);

        self.post_form("checkout/sessions", &form, None).await
    }

    /// Find a customer by email, creating one if none exists. Stripe does not
    /// enforce unique emails; the first match wins.
    pub async fn find_or_create_customer(
        &self,
        email: &str,
        name: &str,
        phone: Option<&str>,
    ) -> Result<StripeCustomer> {
        let existing: StripeList<StripeCustomer> = self
            .get("customers", &[("email", email), ("limit", "1")])
            .await?;
        if let Some(customer) = existing.data.into_iter().next() {
            return Ok(customer);
        }

        let mut form = vec![
            ("email".to_string(), email.to_string()),
            ("name".to_string(), name.to_string()),
        ];
        if let Some(phone) = phone {
            form.push(("phone".to_string(), phone.to_string()));
        }
        self.post_form("customers", &form, None).await
    }

    /// Create an incomplete subscription whose first invoice is paid with the
    /// returned PaymentIntent.
    pub async fn create_subscription(
        &self,
        customer_id: &str,
        price_id: &str,
        metadata: &[(String, String)],
        idempotency_key: &str,
    ) -> Result<StripeSubscription> {
        let mut form = vec![
            ("customer".to_string(), customer_id.to_string()),
            ("items[0][price]".to_string(), price_id.to_string()),
            ("payment_behavior".to_string(), "default_incomplete".to_string()),
            (
                "payment_settings[save_default_payment_method]".to_string(),
                "on_subscription".to_string(),
            ),
            ("expand[]".to_string(), "latest_invoice.payment_intent".to_string()),
        ];
        push_metadata(&mut form, "metadata", metadata);

        self.post_form("subscriptions", &form, Some(idempotency_key)).await
    }

    /// Verify a `stripe-signature` header (`t=...,v1=...`).
    ///
    /// Returns `Err` when the header is malformed, `Ok(false)` when no `v1`
    /// signature matches or the timestamp is outside the tolerance window.
    pub fn verify_webhook_signature(&self, payload: &[u8], header: &str) -> Result<bool> {
        self.verify_webhook_signature_at(payload, header, chrono::Utc::now().timestamp())
    }

    pub fn verify_webhook_signature_at(&self, payload: &[u8], header: &str, now: i64) -> Result<bool> {
        let mut timestamp: Option<i64> = None;
        let mut signatures: Vec<&str> = Vec::new();

        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", t)) => {
                    timestamp = Some(
                        t.parse()
                            .map_err(|_| AppError::BadRequest("Invalid signature timestamp".into()))?,
                    )
                }
                Some(("v1", sig)) => signatures.push(sig),
                _ => {}
            }
        }

        let timestamp =
            timestamp.ok_or_else(|| AppError::BadRequest("Missing signature timestamp".into()))?;
        if signatures.is_empty() {
            return Err(AppError::BadRequest("Missing v1 signature".into()));
        }
        if self.webhook_secret.is_empty() {
            return Err(AppError::Internal("Stripe webhook secret is not configured".into()));
        }

        if now.abs_diff(timestamp) > WEBHOOK_TOLERANCE_SECS {
            return Ok(false);
        }

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| AppError::Internal("Invalid webhook secret".into()))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        let expected = hex::encode(mac.finalize().into_bytes());

        Ok(signatures
            .iter()
            .any(|sig| bool::from(expected.as_bytes().ct_eq(sig.as_bytes()))))
    }
}
