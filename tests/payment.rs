//! Pricing, intent lifecycle, hosted checkout, invoices and CORS, with
//! Stripe replaced by a local stub.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::{Form, Path, Query, State};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

mod common;
use common::*;

#[derive(Default)]
struct StubLog {
    creates: u32,
    cancels: Vec<String>,
    idempotency_keys: Vec<String>,
    last_form: HashMap<String, String>,
    customer_lookups: Vec<String>,
    customer_creates: Vec<HashMap<String, String>>,
    subscription_keys: Vec<String>,
    metadata_updates: Vec<(String, HashMap<String, String>)>,
}

type Shared = Arc<Mutex<StubLog>>;

async fn create_intent_stub(
    State(log): State<Shared>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Json<Value> {
    let mut log = log.lock().unwrap();
    log.creates += 1;
    if let Some(key) = headers.get("idempotency-key").and_then(|v| v.to_str().ok()) {
        log.idempotency_keys.push(key.to_string());
    }
    let id = format!("pi_stub_{}", log.creates);
    let amount: i64 = form.get("amount").and_then(|a| a.parse().ok()).unwrap_or(0);
    log.last_form = form;
    Json(json!({
        "id": id,
        "amount": amount,
        "currency": "usd",
        "status": "requires_payment_method",
        "client_secret": format!("{}_secret_abc", id)
    }))
}

async fn cancel_intent_stub(State(log): State<Shared>, Path(id): Path<String>) -> Json<Value> {
    log.lock().unwrap().cancels.push(id.clone());
    Json(json!({ "id": id, "amount": 0, "currency": "usd", "status": "canceled" }))
}

async fn retrieve_intent_stub(Path(id): Path<String>) -> Json<Value> {
    let status = if id == "pi_pending" { "processing" } else { "succeeded" };
    Json(json!({
        "id": id,
        "amount": 22900,
        "currency": "usd",
        "status": status,
        "client_secret": format!("{}_secret_xyz", id),
        "created": 1_700_000_000,
        "metadata": {
            "email": "jane.doe@example.com",
            "first_name": "Jane",
            "last_name": "Doe",
            "medication": "semaglutide",
            "plan": "monthly"
        }
    }))
}

async fn create_session_stub(
    State(log): State<Shared>,
    Form(form): Form<HashMap<String, String>>,
) -> Json<Value> {
    log.lock().unwrap().last_form = form;
    Json(json!({
        "id": "cs_test_1",
        "url": "https://checkout.stripe.com/c/pay/cs_test_1",
        "payment_status": "unpaid"
    }))
}

async fn list_customers_stub(
    State(log): State<Shared>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let email = query.get("email").cloned().unwrap_or_default();
    log.lock().unwrap().customer_lookups.push(email.clone());
    let data = if email == "returning@example.com" {
        json!([{ "id": "cus_existing" }])
    } else {
        json!([])
    };
    Json(json!({ "object": "list", "data": data }))
}

async fn create_customer_stub(
    State(log): State<Shared>,
    Form(form): Form<HashMap<String, String>>,
) -> Json<Value> {
    log.lock().unwrap().customer_creates.push(form);
    Json(json!({ "id": "cus_new" }))
}

async fn create_subscription_stub(
    State(log): State<Shared>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Json<Value> {
    let mut log = log.lock().unwrap();
    if let Some(key) = headers.get("idempotency-key").and_then(|v| v.to_str().ok()) {
        log.subscription_keys.push(key.to_string());
    }
    let customer = form.get("customer").cloned().unwrap_or_default();
    log.last_form = form;
    Json(json!({
        "id": format!("sub_for_{}", customer),
        "status": "incomplete",
        "latest_invoice": {
            "id": "in_1",
            "payment_intent": {
                "id": "pi_invoice_1",
                "amount": 22900,
                "currency": "usd",
                "status": "requires_payment_method",
                "client_secret": "pi_invoice_1_secret_sub"
            }
        }
    }))
}

async fn update_intent_stub(
    State(log): State<Shared>,
    Path(id): Path<String>,
    Form(form): Form<HashMap<String, String>>,
) -> Json<Value> {
    log.lock().unwrap().metadata_updates.push((id.clone(), form));
    Json(json!({
        "id": id,
        "amount": 22900,
        "currency": "usd",
        "status": "requires_payment_method"
    }))
}

async fn stripe_stub() -> (String, Shared) {
    let log: Shared = Arc::new(Mutex::new(StubLog::default()));
    let router = Router::new()
        .route("/v1/payment_intents", post(create_intent_stub))
        .route(
            "/v1/payment_intents/{id}",
            get(retrieve_intent_stub).post(update_intent_stub),
        )
        .route("/v1/payment_intents/{id}/cancel", post(cancel_intent_stub))
        .route("/v1/checkout/sessions", post(create_session_stub))
        .route("/v1/customers", get(list_customers_stub).post(create_customer_stub))
        .route("/v1/subscriptions", post(create_subscription_stub))
        .with_state(log.clone());
    (spawn_stub(router).await, log)
}

async fn app_with_stripe() -> (TestApp, Shared) {
    let (base, log) = stripe_stub().await;
    let app = create_test_app_with(move |config| config.stripe.api_base = base, Vec::new());
    (app, log)
}

fn checkout_body(session_id: &str) -> Value {
    json!({
        "session_id": session_id,
        "order": { "medication": "semaglutide", "plan": "monthly" },
        "email": "Jane.Doe@Example.com",
        "first_name": "Jane",
        "last_name": "Doe",
        "phone": "(555) 123-4567",
        "shipping": {
            "line1": "12 Main St",
            "city": "Springfield",
            "state": "CA",
            "zip": "90210",
            "country": "US"
        },
        // Ignored: the server prices the order itself.
        "amount": 100
    })
}

#[tokio::test]
async fn test_health() {
    let app = create_test_app();
    let response = app.send(get_request("/api/health")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[tokio::test]
async fn test_quote_prices_from_catalog() {
    let app = create_test_app();

    let response = app
        .send(json_request(
            "POST",
            "/api/checkout/quote",
            &json!({ "medication": "semaglutide", "plan": "monthly" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["total_cents"], 22900);
    assert_eq!(body["total"], "229.00");
    assert_eq!(body["recurring"], true);
    assert_eq!(body["promo_applied"], false);

    let response = app
        .send(json_request(
            "POST",
            "/api/checkout/quote",
            &json!({
                "medication": "semaglutide",
                "plan": "one_time",
                "add_ons": ["b12_boost", "b12_boost"],
                "shipping_method": "expedited",
                "promo_code": "save10"
            }),
        ))
        .await;
    let body = body_json(response).await;
    // 249.00 + 49.00 = 298.00, 10% off = 29.80, plus 25.00 shipping
    assert_eq!(body["subtotal_cents"], 29800);
    assert_eq!(body["discount_cents"], 2980);
    assert_eq!(body["shipping_cents"], 2500);
    assert_eq!(body["total_cents"], 29320);
    assert_eq!(body["promo_applied"], true);
    assert_eq!(body["recurring"], false);
}

#[tokio::test]
async fn test_quote_rejects_unknown_medication() {
    let app = create_test_app();
    let response = app
        .send(json_request(
            "POST",
            "/api/checkout/quote",
            &json!({ "medication": "aspirin", "plan": "monthly" }),
        ))
        .await;
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_create_intent_uses_server_price() {
    let (app, log) = app_with_stripe().await;

    let response = app
        .send(json_request("POST", "/api/payment/create-intent", &checkout_body("sess-1")))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["session_id"], "sess-1");
    assert_eq!(body["payment_intent_id"], "pi_stub_1");
    assert_eq!(body["client_secret"], "pi_stub_1_secret_abc");
    assert_eq!(body["amount_cents"], 22900);
    assert_eq!(body["publishable_key"], "pk_test_123");
    assert_eq!(body["reused"], false);

    let log = log.lock().unwrap();
    assert_eq!(log.last_form["amount"], "22900");
    assert_eq!(log.last_form["receipt_email"], "jane.doe@example.com");
    assert_eq!(log.last_form["metadata[email]"], "jane.doe@example.com");
    assert_eq!(log.last_form["metadata[phone]"], "+15551234567");
    assert_eq!(log.last_form["metadata[medication]"], "semaglutide");
    assert_eq!(log.idempotency_keys.len(), 1);
}

#[tokio::test]
async fn test_unchanged_order_reuses_intent() {
    let (app, log) = app_with_stripe().await;

    let first = body_json(
        app.send(json_request("POST", "/api/payment/create-intent", &checkout_body("sess-1")))
            .await,
    )
    .await;

    // Names are not part of the fingerprint.
    let mut body = checkout_body("sess-1");
    body["first_name"] = json!("Janet");
    let second = body_json(
        app.send(json_request("POST", "/api/payment/create-intent", &body))
            .await,
    )
    .await;

    assert_eq!(second["reused"], true);
    assert_eq!(second["payment_intent_id"], first["payment_intent_id"]);
    assert_eq!(second["client_secret"], first["client_secret"]);

    let log = log.lock().unwrap();
    assert_eq!(log.creates, 1);
    assert!(log.cancels.is_empty());
}

#[tokio::test]
async fn test_changed_order_replaces_and_cancels_intent() {
    let (app, log) = app_with_stripe().await;

    app.send(json_request("POST", "/api/payment/create-intent", &checkout_body("sess-1")))
        .await;

    let mut body = checkout_body("sess-1");
    body["order"]["medication"] = json!("tirzepatide");
    let response = app
        .send(json_request("POST", "/api/payment/create-intent", &body))
        .await;
    let second = body_json(response).await;
    assert_eq!(second["reused"], false);
    assert_eq!(second["payment_intent_id"], "pi_stub_2");
    assert_eq!(second["amount_cents"], 32900);

    // Switching back creates a fresh intent rather than replaying the first.
    let third = body_json(
        app.send(json_request("POST", "/api/payment/create-intent", &checkout_body("sess-1")))
            .await,
    )
    .await;
    assert_eq!(third["payment_intent_id"], "pi_stub_3");

    let log = log.lock().unwrap();
    assert_eq!(log.creates, 3);
    assert_eq!(log.cancels, vec!["pi_stub_1".to_string(), "pi_stub_2".to_string()]);
    assert_ne!(log.idempotency_keys[0], log.idempotency_keys[2]);
}

#[tokio::test]
async fn test_separate_sessions_get_separate_intents() {
    let (app, log) = app_with_stripe().await;

    app.send(json_request("POST", "/api/payment/create-intent", &checkout_body("sess-a")))
        .await;
    app.send(json_request("POST", "/api/payment/create-intent", &checkout_body("sess-b")))
        .await;

    let log = log.lock().unwrap();
    assert_eq!(log.creates, 2);
    assert_ne!(log.idempotency_keys[0], log.idempotency_keys[1]);
}

#[tokio::test]
async fn test_create_intent_requires_email() {
    let (app, log) = app_with_stripe().await;

    let mut body = checkout_body("sess-1");
    body.as_object_mut().unwrap().remove("email");
    let response = app
        .send(json_request("POST", "/api/payment/create-intent", &body))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    body["email"] = json!("not-an-email");
    let response = app
        .send(json_request("POST", "/api/payment/create-intent", &body))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(log.lock().unwrap().creates, 0);
}

#[tokio::test]
async fn test_stripe_outage_is_reported_as_upstream_error() {
    // Default config points Stripe at a closed port.
    let app = create_test_app();
    let response = app
        .send(json_request("POST", "/api/payment/create-intent", &checkout_body("sess-1")))
        .await;
    assert!(response.status().is_server_error());
}

#[tokio::test]
async fn test_hosted_session_carries_metadata_and_placeholder() {
    let (app, log) = app_with_stripe().await;

    let response = app
        .send(json_request("POST", "/api/payment/create-session", &checkout_body("sess-1")))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["checkout_url"], "https://checkout.stripe.com/c/pay/cs_test_1");
    assert_eq!(body["stripe_session_id"], "cs_test_1");
    assert_eq!(body["session_id"], "sess-1");

    let log = log.lock().unwrap();
    let form = &log.last_form;
    assert_eq!(form["mode"], "payment");
    assert_eq!(form["line_items[0][price_data][unit_amount]"], "22900");
    assert!(form["success_url"].starts_with(CHECKOUT_URL));
    assert!(form["success_url"].ends_with("stripe_session={CHECKOUT_SESSION_ID}"));
    assert_eq!(form["metadata[email]"], "jane.doe@example.com");
    assert_eq!(form["payment_intent_data[metadata][email]"], "jane.doe@example.com");
}

#[tokio::test]
async fn test_subscription_rejects_one_time_plan() {
    let (app, _log) = app_with_stripe().await;

    let mut body = checkout_body("sess-1");
    body["order"]["plan"] = json!("one_time");
    let response = app
        .send(json_request("POST", "/api/payment/create-subscription", &body))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Recurring, but no Stripe price is configured for it.
    let response = app
        .send(json_request("POST", "/api/payment/create-subscription", &checkout_body("sess-1")))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

async fn app_with_subscription_prices() -> (TestApp, Shared) {
    let (base, log) = stripe_stub().await;
    let app = create_test_app_with(
        move |config| {
            config.stripe.api_base = base;
            config
                .stripe
                .price_ids
                .insert("semaglutide:monthly".into(), "price_sema_monthly".into());
        },
        Vec::new(),
    );
    (app, log)
}

#[tokio::test]
async fn test_subscription_creates_customer_and_tags_first_invoice_intent() {
    let (app, log) = app_with_subscription_prices().await;

    let response = app
        .send(json_request("POST", "/api/payment/create-subscription", &checkout_body("sess-1")))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["customer_id"], "cus_new");
    assert_eq!(body["subscription_id"], "sub_for_cus_new");
    assert_eq!(body["status"], "incomplete");
    assert_eq!(body["payment_intent_id"], "pi_invoice_1");
    assert_eq!(body["client_secret"], "pi_invoice_1_secret_sub");
    assert_eq!(body["session_id"], "sess-1");

    let log = log.lock().unwrap();
    assert_eq!(log.customer_lookups, vec!["jane.doe@example.com"]);
    assert_eq!(log.customer_creates.len(), 1);
    assert_eq!(log.customer_creates[0]["email"], "jane.doe@example.com");
    assert_eq!(log.customer_creates[0]["name"], "Jane Doe");

    let form = &log.last_form;
    assert_eq!(form["customer"], "cus_new");
    assert_eq!(form["items[0][price]"], "price_sema_monthly");
    assert_eq!(form["payment_behavior"], "default_incomplete");
    assert_eq!(form["expand[]"], "latest_invoice.payment_intent");
    assert_eq!(log.subscription_keys.len(), 1);
    assert!(log.subscription_keys[0].starts_with("sub-"));

    // The webhook only sees the order through the invoice intent's metadata.
    assert_eq!(log.metadata_updates.len(), 1);
    let (intent_id, update) = &log.metadata_updates[0];
    assert_eq!(intent_id, "pi_invoice_1");
    assert_eq!(update["metadata[email]"], "jane.doe@example.com");
    assert_eq!(update["metadata[medication]"], "semaglutide");
    assert_eq!(update["metadata[plan]"], "monthly");
    assert_eq!(update["metadata[total_cents]"], "22900");
    assert_eq!(update["metadata[plan_cents]"], "22900");
    assert_eq!(update["metadata[checkout_session]"], "sess-1");
    // No one-off intent is created for subscriptions.
    assert_eq!(log.creates, 0);
}

#[tokio::test]
async fn test_subscription_reuses_existing_customer() {
    let (app, log) = app_with_subscription_prices().await;

    let mut body = checkout_body("sess-2");
    body["email"] = json!("returning@example.com");
    let response = app
        .send(json_request("POST", "/api/payment/create-subscription", &body))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["customer_id"], "cus_existing");

    let log = log.lock().unwrap();
    assert!(log.customer_creates.is_empty());
    assert_eq!(log.last_form["customer"], "cus_existing");
    assert_eq!(log.metadata_updates[0].1["metadata[email]"], "returning@example.com");
}

#[tokio::test]
async fn test_invoice_requires_matching_client_secret() {
    let (app, _log) = app_with_stripe().await;

    let response = app.send(get_request("/api/payment/invoice/pi_paid")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .send(get_request("/api/payment/invoice/pi_paid?client_secret=pi_other_secret_xyz"))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .send(get_request("/api/payment/invoice/pi_pending?client_secret=pi_pending_secret_xyz"))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .send(get_request("/api/payment/invoice/pi_paid?client_secret=pi_paid_secret_xyz"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "application/pdf");
    assert_eq!(response.headers()["cache-control"], "no-store");
    let pdf = body_bytes(response).await;
    assert!(pdf.starts_with(b"%PDF-"));
    assert!(String::from_utf8_lossy(&pdf).contains("229.00"));
}

#[tokio::test]
async fn test_disallowed_origin_is_forbidden() {
    let app = create_test_app();
    let request = Request::builder()
        .method("GET")
        .uri("/api/health")
        .header("origin", "https://evil.example.net")
        .body(Body::empty())
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_allowed_origins_receive_cors_headers() {
    let app = create_test_app();

    for origin in ["https://checkout.example.com", "https://pr-42.preview.example.com"] {
        let request = Request::builder()
            .method("GET")
            .uri("/api/health")
            .header("origin", origin)
            .body(Body::empty())
            .unwrap();
        let response = app.send(request).await;
        assert_eq!(response.status(), StatusCode::OK, "origin {}", origin);
        assert_eq!(response.headers()["access-control-allow-origin"], origin);
    }
}

#[tokio::test]
async fn test_dev_mode_allows_any_origin_when_list_is_empty() {
    let app = create_test_app_with(
        |config| {
            config.dev_mode = true;
            config.allowed_origins.clear();
        },
        Vec::new(),
    );
    let request = Request::builder()
        .method("GET")
        .uri("/api/health")
        .header("origin", "http://localhost:5173")
        .body(Body::empty())
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
}
