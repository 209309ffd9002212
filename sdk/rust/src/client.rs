use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{CheckoutError, Result, map_status_to_error_code};
use crate::storage::{StorageAdapter, keys, load_json, store_json};
use crate::sync::IntentRequester;
use crate::types::{CheckoutDetails, Order, PaymentIntent, Prefill, Quote};

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Serialize)]
struct IntentRequest<'a> {
    session_id: &'a str,
    #[serde(flatten)]
    details: &'a CheckoutDetails,
}

/// HTTP client for the checkout server.
///
/// The checkout session id lives in the storage adapter, so a reloaded
/// page or restarted app keeps reusing the same PaymentIntent.
#[derive(Clone)]
pub struct CheckoutClient {
    base_url: String,
    http: Client,
    storage: Arc<dyn StorageAdapter>,
}

impl CheckoutClient {
    pub fn new(base_url: impl Into<String>, storage: Arc<dyn StorageAdapter>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: Client::new(),
            storage,
        }
    }

    /// Current checkout session id, created on first use.
    pub fn session_id(&self) -> String {
        if let Some(id) = self.storage.get(keys::SESSION_ID) {
            return id;
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.storage.set(keys::SESSION_ID, &id);
        id
    }

    /// The order being built, as of the last quote or [`Self::save_draft`].
    pub fn draft(&self) -> Option<Order> {
        load_json(self.storage.as_ref(), keys::ORDER_DRAFT)
    }

    pub fn save_draft(&self, order: &Order) {
        store_json(self.storage.as_ref(), keys::ORDER_DRAFT, order);
    }

    /// Forget the session (after a completed payment).
    pub fn reset_session(&self) {
        self.storage.remove(keys::SESSION_ID);
        self.storage.remove(keys::ORDER_DRAFT);
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response, path: &str) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| CheckoutError::network(format!("Invalid response: {}", e)));
        }
        let message = response
            .json::<ErrorBody>()
            .await
            .map(|b| b.error)
            .unwrap_or_else(|_| status.to_string());
        Err(CheckoutError::with_status(
            map_status_to_error_code(status.as_u16(), path),
            message,
            status.as_u16(),
        ))
    }

    /// Fetch the intake hand-off for a prefill token. Works once per token.
    pub async fn fetch_prefill(&self, token: &str) -> Result<Prefill> {
        let path = "/api/intake/prefill";
        let response = self
            .http
            .get(format!("{}?token={}", self.url(path), urlencoding::encode(token)))
            .send()
            .await
            .map_err(|e| CheckoutError::network(e.to_string()))?;
        Self::decode(response, path).await
    }

    /// Price an order. The order is kept as the draft so a reload can
    /// restore the wizard.
    pub async fn quote(&self, order: &Order) -> Result<Quote> {
        self.save_draft(order);
        let path = "/api/checkout/quote";
        let response = self
            .http
            .post(self.url(path))
            .json(order)
            .send()
            .await
            .map_err(|e| CheckoutError::network(e.to_string()))?;
        Self::decode(response, path).await
    }

    pub async fn create_intent(&self, details: &CheckoutDetails) -> Result<PaymentIntent> {
        if details.email.trim().is_empty() {
            return Err(CheckoutError::validation("Email is required"));
        }
        let path = "/api/payment/create-intent";
        let session_id = self.session_id();
        let response = self
            .http
            .post(self.url(path))
            .json(&IntentRequest {
                session_id: &session_id,
                details,
            })
            .send()
            .await
            .map_err(|e| CheckoutError::network(e.to_string()))?;
        let intent: PaymentIntent = Self::decode(response, path).await?;

        if intent.session_id != session_id {
            self.storage.set(keys::SESSION_ID, &intent.session_id);
        }
        Ok(intent)
    }
}

#[async_trait]
impl IntentRequester for CheckoutClient {
    async fn request_intent(&self, details: &CheckoutDetails) -> Result<PaymentIntent> {
        self.create_intent(details).await
    }
}
