//! Intake hand-off: webhook capture, redirect to checkout and one-time
//! prefill reads.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode, header};
use serde_json::json;

use rxcheckout::crypto::PrefillToken;
use rxcheckout::db::queries;

mod common;
use common::*;

fn heyflow_payload() -> serde_json::Value {
    json!({
        "flow_id": "weight-loss-v3",
        "submission_id": "sub-123",
        "fields": {
            "First Name": "jane",
            "Last Name": "DOE",
            "Email": " Jane.Doe@Example.com ",
            "Phone": "(555) 123-4567",
            "Date of Birth": "04/15/1985",
            "Address": {
                "street": "12 Main St",
                "city": "springfield",
                "state": "California",
                "zip": "90210-1234"
            },
            "Preferred Medication": "Semaglutide (Ozempic)",
            "Language": "ES",
            "Have you taken a GLP-1 before?": "No"
        }
    })
}

async fn submit_intake(app: &TestApp) -> String {
    let response = app
        .send(json_request("POST", "/api/intake/webhook", &heyflow_payload()))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    body["token"].as_str().unwrap().to_string()
}

/// Store a submission under a token issued at `issued_at`.
fn store_with_token(app: &TestApp, issued_at: i64) -> String {
    let token = PrefillToken::issue(TOKEN_SECRET, issued_at).unwrap();
    let encoded = token.encode();
    let ciphertext = app
        .state
        .master_key
        .encrypt(br#"{"submissionId":"old","firstName":"A","lastName":"B","email":"a@b.co","submittedAt":0}"#)
        .unwrap();
    let conn = app.state.db.get().unwrap();
    queries::store_intake(
        &conn,
        &queries::NewIntakeRecord {
            token_id: &token.id,
            token: &encoded,
            submission_id: "old",
            ciphertext: &ciphertext,
            medication: None,
            language: None,
            created_at: issued_at,
            expires_at: queries::now() + 3600,
        },
    )
    .unwrap();
    encoded
}

#[tokio::test]
async fn test_webhook_returns_token_and_redirect() {
    let app = create_test_app();
    let response = app
        .send(json_request("POST", "/api/intake/webhook", &heyflow_payload()))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let token = body["token"].as_str().unwrap();
    assert_eq!(token.split('.').count(), 3);
    let redirect = body["redirect_url"].as_str().unwrap();
    assert!(redirect.starts_with(&format!("{}?t={}", CHECKOUT_URL, token)));
    assert!(redirect.contains("med=semaglutide"));
    assert!(body["expires_at"].as_i64().unwrap() > queries::now());
}

#[tokio::test]
async fn test_webhook_without_email_is_rejected() {
    let app = create_test_app();
    let payload = json!({ "fields": { "First Name": "Jane", "Phone": "5551234567" } });
    let response = app
        .send(json_request("POST", "/api/intake/webhook", &payload))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_webhook_shared_secret() {
    let app = create_test_app_with(
        |c| c.intake_webhook_secret = Some("hook-secret".into()),
        Vec::new(),
    );

    let response = app
        .send(json_request("POST", "/api/intake/webhook", &heyflow_payload()))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .send(json_request(
            "POST",
            "/api/intake/webhook?secret=hook-secret",
            &heyflow_payload(),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_redirect_by_submission_id_carries_no_phi() {
    let app = create_test_app();
    let token = submit_intake(&app).await;

    let response = app
        .send(get_request(
            "/api/intake/redirect?sid=sub-123&utm_source=fb&utm_campaign=spring&email=leak@example.com",
        ))
        .await;
    assert_eq!(response.status(), StatusCode::FOUND);

    let location = response.headers()[header::LOCATION].to_str().unwrap();
    assert!(location.starts_with(CHECKOUT_URL));
    assert!(location.contains(&format!("t={}", token)));
    assert!(location.contains("med=semaglutide"));
    assert!(location.contains("lang=es"));
    assert!(location.contains("utm_source=fb"));
    assert!(location.contains("utm_campaign=spring"));
    assert!(!location.contains("leak"));
    assert!(!location.to_lowercase().contains("jane"));
}

#[tokio::test]
async fn test_redirect_unknown_submission_is_not_found() {
    let app = create_test_app();
    let response = app.send(get_request("/api/intake/redirect?sid=nope")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_redirect_does_not_consume_token() {
    let app = create_test_app();
    let token = submit_intake(&app).await;

    let response = app
        .send(get_request(&format!("/api/intake/redirect?token={}", token)))
        .await;
    assert_eq!(response.status(), StatusCode::FOUND);

    let response = app
        .send(get_request(&format!("/api/intake/prefill?token={}", token)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_prefill_returns_normalized_submission_once() {
    let app = create_test_app();
    let token = submit_intake(&app).await;
    let uri = format!("/api/intake/prefill?token={}", token);

    let response = app.send(get_request(&uri)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");

    let body = body_json(response).await;
    assert_eq!(body["submissionId"], "sub-123");
    assert_eq!(body["firstName"], "Jane");
    assert_eq!(body["lastName"], "Doe");
    assert_eq!(body["email"], "jane.doe@example.com");
    assert_eq!(body["phone"], "+15551234567");
    assert_eq!(body["dob"], "1985-04-15");
    assert_eq!(body["address"]["state"], "CA");
    assert_eq!(body["address"]["zip"], "90210-1234");
    assert_eq!(body["medication"], "semaglutide");
    assert_eq!(body["language"], "es");
    assert_eq!(body["answers"]["have_you_taken_a_glp_1_before"], "No");

    let second = app.send(get_request(&uri)).await;
    assert_eq!(second.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_prefill_token_older_than_four_hours_is_rejected() {
    let app = create_test_app();
    let token = store_with_token(&app, queries::now() - 4 * 3600 - 60);

    let response = app
        .send(get_request(&format!("/api/intake/prefill?token={}", token)))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_prefill_token_within_window_is_accepted() {
    let app = create_test_app();
    let token = store_with_token(&app, queries::now() - 3 * 3600);

    let response = app
        .send(get_request(&format!("/api/intake/prefill?token={}", token)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_prefill_rejects_tampered_and_malformed_tokens() {
    let app = create_test_app();
    let token = submit_intake(&app).await;

    let mut parts: Vec<&str> = token.split('.').collect();
    let forged_sig = "0000000000000000";
    parts[2] = forged_sig;
    let tampered = parts.join(".");
    let response = app
        .send(get_request(&format!("/api/intake/prefill?token={}", tampered)))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .send(get_request("/api/intake/prefill?token=not-a-token"))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.send(get_request("/api/intake/prefill")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // The real token still works after the failed attempts.
    let response = app
        .send(get_request(&format!("/api/intake/prefill?token={}", token)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_prefill_for_purged_record_is_not_found() {
    let app = create_test_app();
    let token = submit_intake(&app).await;
    {
        let conn = app.state.db.get().unwrap();
        let stats = queries::purge_expired(&conn, queries::now() + 86_400 + 1).unwrap();
        assert_eq!(stats.intake_submissions, 1);
    }

    let response = app
        .send(get_request(&format!("/api/intake/prefill?token={}", token)))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_intake_routes_are_rate_limited() {
    let app = create_test_app_with(|c| c.rate_limit_per_minute = 2, Vec::new());

    for _ in 0..2 {
        let response = app.send(get_request("/api/intake/redirect?sid=nope")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
    let response = app.send(get_request("/api/intake/redirect?sid=nope")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // Health is outside the limited routes.
    let response = app.send(get_request("/api/health")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

fn redirect_from(peer: &str, forwarded_for: &str) -> Request<Body> {
    let mut request = Request::builder()
        .uri("/api/intake/redirect?sid=nope")
        .header("x-forwarded-for", forwarded_for)
        .body(Body::empty())
        .unwrap();
    let addr: SocketAddr = peer.parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

#[tokio::test]
async fn test_rotating_forwarded_for_does_not_reset_the_limit() {
    let app = create_test_app_with(|c| c.rate_limit_per_minute = 1, Vec::new());

    let mut statuses = Vec::new();
    for i in 0..5 {
        let response = app
            .send(redirect_from("198.51.100.7:4000", &format!("10.0.0.{}", i)))
            .await;
        statuses.push(response.status());
    }
    assert_eq!(statuses[0], StatusCode::NOT_FOUND);
    assert!(statuses[1..].iter().all(|s| *s == StatusCode::TOO_MANY_REQUESTS));

    // Another peer has its own quota.
    let response = app.send(redirect_from("198.51.100.8:4000", "10.0.0.0")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_trusted_proxy_keys_on_the_appended_hop() {
    let app = create_test_app_with(
        |c| {
            c.rate_limit_per_minute = 1;
            c.trust_proxy_headers = true;
        },
        Vec::new(),
    );
    let proxy = "10.1.1.1:443";

    let response = app.send(redirect_from(proxy, "1.1.1.1, 203.0.113.9")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    // Spoofed leading hops do not change the key.
    let response = app.send(redirect_from(proxy, "2.2.2.2, 203.0.113.9")).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    // A different client behind the same proxy is limited separately.
    let response = app.send(redirect_from(proxy, "203.0.113.10")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
