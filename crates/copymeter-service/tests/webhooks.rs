//! Payment webhook integration tests.

mod common;

use common::TestHarness;
use serde_json::json;

/// Post a signed webhook body.
async fn post_webhook(harness: &TestHarness, body: &str) -> axum_test::TestResponse {
    harness
        .server
        .post("/webhooks/payment")
        .add_header("x-webhook-signature", harness.sign_webhook(body))
        .add_header("content-type", "application/json")
        .text(body.to_string())
        .await
}

#[tokio::test]
async fn payment_succeeded_grants_bonus_once() {
    let harness = TestHarness::new();
    harness.provision("free").await;

    let body = json!({
        "id": "evt_001",
        "type": "payment.succeeded",
        "data": {
            "user_id": harness.test_user_id.to_string(),
            "credits": 50,
        }
    })
    .to_string();

    let first = post_webhook(&harness, &body).await;
    first.assert_status_ok();
    let first_body: serde_json::Value = first.json();
    assert_eq!(first_body["received"], true);
    assert_eq!(first_body["replayed"], false);

    // Redelivery of the same event must not credit again.
    let second = post_webhook(&harness, &body).await;
    second.assert_status_ok();
    let second_body: serde_json::Value = second.json();
    assert_eq!(second_body["replayed"], true);

    let balance = harness
        .server
        .get("/v1/credits/balance")
        .add_header("authorization", harness.user_auth_header())
        .await;
    let body: serde_json::Value = balance.json();
    assert_eq!(body["credits"], 60); // 10 allowance + 50 bonus, once
    assert_eq!(body["bonus_credits"], 50);
}

#[tokio::test]
async fn subscription_updated_changes_tier_immediately() {
    let harness = TestHarness::new();
    harness.provision("free").await;

    let body = json!({
        "id": "evt_002",
        "type": "subscription.updated",
        "data": {
            "user_id": harness.test_user_id.to_string(),
            "tier": "professional",
        }
    })
    .to_string();

    post_webhook(&harness, &body).await.assert_status_ok();

    let balance = harness
        .server
        .get("/v1/credits/balance")
        .add_header("authorization", harness.user_auth_header())
        .await;
    let body: serde_json::Value = balance.json();
    assert_eq!(body["tier"], "professional");
    assert_eq!(body["credits"], 500);
}

#[tokio::test]
async fn invalid_signature_rejected() {
    let harness = TestHarness::new();

    let body = json!({
        "id": "evt_003",
        "type": "payment.succeeded",
        "data": { "user_id": harness.test_user_id.to_string(), "credits": 50 }
    })
    .to_string();

    let response = harness
        .server
        .post("/webhooks/payment")
        .add_header("x-webhook-signature", "deadbeef".to_string())
        .add_header("content-type", "application/json")
        .text(body)
        .await;

    response.assert_status_bad_request();
}

#[tokio::test]
async fn missing_signature_rejected() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/webhooks/payment")
        .add_header("content-type", "application/json")
        .text("{}".to_string())
        .await;

    response.assert_status_bad_request();
}

#[tokio::test]
async fn unknown_event_type_acknowledged() {
    let harness = TestHarness::new();

    let body = json!({
        "id": "evt_004",
        "type": "invoice.finalized",
        "data": {}
    })
    .to_string();

    let response = post_webhook(&harness, &body).await;
    response.assert_status_ok();
    let response_body: serde_json::Value = response.json();
    assert_eq!(response_body["received"], true);
}
