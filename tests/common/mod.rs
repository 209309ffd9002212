#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tempfile::TempDir;
use tower::ServiceExt;

use rxcheckout::config::{Config, StripeConfig};
use rxcheckout::crypto::MasterKey;
use rxcheckout::db::{self, AppState};
use rxcheckout::error::{AppError, Result};
use rxcheckout::fanout::FulfillmentSink;
use rxcheckout::middleware::RateLimiter;
use rxcheckout::models::PaidOrder;
use rxcheckout::payments::StripeClient;

pub const TOKEN_SECRET: &str = "test-prefill-secret-0123456789";
pub const WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const CHECKOUT_URL: &str = "https://checkout.example.com/start";

pub fn test_config(database_path: &str) -> Config {
    Config {
        host: "127.0.0.1".into(),
        port: 0,
        database_path: database_path.into(),
        dev_mode: false,
        checkout_app_url: CHECKOUT_URL.into(),
        allowed_origins: vec![
            "https://checkout.example.com".into(),
            "https://*.preview.example.com".into(),
        ],
        prefill_token_secret: TOKEN_SECRET.into(),
        phi_encryption_key: None,
        prefill_ttl_secs: 86_400,
        prefill_token_max_age_secs: 4 * 3600,
        intake_webhook_secret: None,
        rate_limit_per_minute: 1_000,
        trust_proxy_headers: false,
        stripe: StripeConfig {
            secret_key: "sk_test_123".into(),
            publishable_key: "pk_test_123".into(),
            webhook_secret: WEBHOOK_SECRET.into(),
            // Unroutable by default; tests that talk to Stripe point this at a stub.
            api_base: "http://127.0.0.1:9".into(),
            price_ids: HashMap::new(),
        },
        airtable: None,
        intakeq: None,
        ghl: None,
        meta: None,
    }
}

/// App state backed by a fresh SQLite file. Keep the `TestApp` alive for
/// the duration of the test; dropping it removes the database.
pub struct TestApp {
    pub state: AppState,
    _dir: TempDir,
}

impl TestApp {
    pub fn router(&self) -> Router {
        rxcheckout::app(self.state.clone())
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router().oneshot(request).await.unwrap()
    }
}

pub fn create_test_app() -> TestApp {
    create_test_app_with(|_| {}, Vec::new())
}

pub fn create_test_app_with(
    configure: impl FnOnce(&mut Config),
    sinks: Vec<Arc<dyn FulfillmentSink>>,
) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.db");
    let mut config = test_config(path.to_str().unwrap());
    configure(&mut config);

    let pool = db::create_pool(&config.database_path).unwrap();
    db::init_db(&pool.get().unwrap()).unwrap();

    let state = AppState {
        db: pool,
        master_key: MasterKey::derive(&config.prefill_token_secret).unwrap(),
        stripe: StripeClient::new(&config.stripe),
        sinks: Arc::new(sinks),
        limiter: Arc::new(
            RateLimiter::per_minute(config.rate_limit_per_minute)
                .trusting_proxy(config.trust_proxy_headers),
        ),
        config: Arc::new(config),
    };
    TestApp { state, _dir: dir }
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub fn json_request(method: &str, uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// `stripe-signature` header value for `payload` signed at `timestamp`.
pub fn stripe_signature(payload: &str, secret: &str, timestamp: i64) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{}.{}", timestamp, payload).as_bytes());
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

pub fn signed_webhook(payload: &serde_json::Value) -> Request<Body> {
    let body = payload.to_string();
    let signature = stripe_signature(&body, WEBHOOK_SECRET, chrono::Utc::now().timestamp());
    Request::builder()
        .method("POST")
        .uri("/api/webhooks/stripe")
        .header("content-type", "application/json")
        .header("stripe-signature", signature)
        .body(Body::from(body))
        .unwrap()
}

/// Records every order it receives, in the shared `log`, tagged with its
/// name. Fails when `fail` is set.
pub struct RecordingSink {
    pub name: &'static str,
    pub fail: bool,
    pub log: Arc<Mutex<Vec<(&'static str, String)>>>,
}

#[async_trait]
impl FulfillmentSink for RecordingSink {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn deliver(&self, order: &PaidOrder) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push((self.name, order.payment_intent_id.clone()));
        if self.fail {
            return Err(AppError::upstream(self.name, "HTTP 503: unavailable"));
        }
        Ok(())
    }
}

pub type SinkLog = Arc<Mutex<Vec<(&'static str, String)>>>;

/// Four recording sinks named like the real integrations; `failing` names
/// the ones that should error.
pub fn recording_sinks(failing: &[&str]) -> (Vec<Arc<dyn FulfillmentSink>>, SinkLog) {
    let log: SinkLog = Arc::new(Mutex::new(Vec::new()));
    let sinks = ["IntakeQ", "Airtable", "GoHighLevel", "Meta CAPI"]
        .into_iter()
        .map(|name| {
            Arc::new(RecordingSink {
                name,
                fail: failing.contains(&name),
                log: log.clone(),
            }) as Arc<dyn FulfillmentSink>
        })
        .collect();
    (sinks, log)
}

/// Serve `router` on an ephemeral local port and return its base URL.
pub async fn spawn_stub(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}
