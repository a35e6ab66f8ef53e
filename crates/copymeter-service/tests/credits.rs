//! Credit balance, consumption, and refund integration tests.

mod common;

use axum::http::StatusCode;
use common::TestHarness;
use serde_json::json;

// ============================================================================
// Balance
// ============================================================================

#[tokio::test]
async fn get_balance_success() {
    let harness = TestHarness::new();
    harness.provision("starter").await;

    let response = harness
        .server
        .get("/v1/credits/balance")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["credits"], 100);
    assert_eq!(body["tier"], "starter");
    assert_eq!(body["is_unlimited"], false);
}

#[tokio::test]
async fn get_balance_without_account_fails() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .get("/v1/credits/balance")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_not_found();
}

#[tokio::test]
async fn get_balance_without_auth_fails() {
    let harness = TestHarness::new();

    let response = harness.server.get("/v1/credits/balance").await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn unlimited_balance_reports_sentinel() {
    let harness = TestHarness::new();
    harness.provision("agency").await;

    let response = harness
        .server
        .get("/v1/credits/balance")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["credits"], "unlimited");
    assert_eq!(body["monthly_allowance"], -1);
    assert_eq!(body["is_unlimited"], true);
}

// ============================================================================
// Provisioning
// ============================================================================

#[tokio::test]
async fn provision_requires_service_key() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/accounts")
        .json(&json!({ "user_id": harness.test_user_id.to_string() }))
        .await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn provision_unknown_tier_falls_back_to_free() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/accounts")
        .add_header("x-api-key", harness.service_api_key.clone())
        .json(&json!({
            "user_id": harness.test_user_id.to_string(),
            "tier": "platinum-legacy",
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["tier"], "free");
    assert_eq!(body["credits"], 10);
}

// ============================================================================
// Consume
// ============================================================================

#[tokio::test]
async fn consume_decrements_balance() {
    let harness = TestHarness::new();
    harness.provision("starter").await;

    let response = harness
        .server
        .post("/v1/credits/consume")
        .add_header("x-api-key", harness.service_api_key.clone())
        .json(&json!({
            "user_id": harness.test_user_id.to_string(),
            "operation": "FULL_ANALYSIS",
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["remaining"], 98);
    assert_eq!(body["consumed"], 2);
    assert_eq!(body["total_used"], 2);
}

#[tokio::test]
async fn consume_insufficient_returns_payment_required() {
    let harness = TestHarness::new();
    harness.provision("free").await;

    // Free tier has 10 credits; two report exports cost 10.
    for _ in 0..2 {
        harness
            .server
            .post("/v1/credits/consume")
            .add_header("x-api-key", harness.service_api_key.clone())
            .json(&json!({
                "user_id": harness.test_user_id.to_string(),
                "operation": "REPORT_EXPORT",
            }))
            .await
            .assert_status_ok();
    }

    let response = harness
        .server
        .post("/v1/credits/consume")
        .add_header("x-api-key", harness.service_api_key.clone())
        .json(&json!({
            "user_id": harness.test_user_id.to_string(),
            "operation": "BASIC_ANALYSIS",
        }))
        .await;

    response.assert_status(StatusCode::PAYMENT_REQUIRED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "insufficient_credits");
    assert_eq!(body["error"]["details"]["required"], 1);
    assert_eq!(body["error"]["details"]["available"], 0);
}

#[tokio::test]
async fn consume_unknown_account_returns_not_found() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/credits/consume")
        .add_header("x-api-key", harness.service_api_key.clone())
        .json(&json!({
            "user_id": copymeter_core::UserId::generate().to_string(),
            "operation": "BASIC_ANALYSIS",
        }))
        .await;

    response.assert_status_not_found();
}

#[tokio::test]
async fn consume_unlimited_account_never_runs_out() {
    let harness = TestHarness::new();
    harness.provision("agency").await;

    for _ in 0..20 {
        let response = harness
            .server
            .post("/v1/credits/consume")
            .add_header("x-api-key", harness.service_api_key.clone())
            .json(&json!({
                "user_id": harness.test_user_id.to_string(),
                "operation": "FULL_ANALYSIS",
            }))
            .await;

        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["remaining"], "unlimited");
    }
}

#[tokio::test]
async fn consume_with_idempotency_key_replays() {
    let harness = TestHarness::new();
    harness.provision("starter").await;

    let request = json!({
        "user_id": harness.test_user_id.to_string(),
        "operation": "FULL_ANALYSIS",
        "idempotency_key": "req_abc123",
    });

    let first = harness
        .server
        .post("/v1/credits/consume")
        .add_header("x-api-key", harness.service_api_key.clone())
        .json(&request)
        .await;
    first.assert_status_ok();

    // The retry returns the recorded response; no second debit happens.
    let second = harness
        .server
        .post("/v1/credits/consume")
        .add_header("x-api-key", harness.service_api_key.clone())
        .json(&request)
        .await;
    second.assert_status_ok();

    let first_body: serde_json::Value = first.json();
    let second_body: serde_json::Value = second.json();
    assert_eq!(first_body, second_body);

    let balance = harness
        .server
        .get("/v1/credits/balance")
        .add_header("authorization", harness.user_auth_header())
        .await;
    let body: serde_json::Value = balance.json();
    assert_eq!(body["credits"], 98);
}

#[tokio::test]
async fn consume_idempotency_key_conflict() {
    let harness = TestHarness::new();
    harness.provision("starter").await;

    harness
        .server
        .post("/v1/credits/consume")
        .add_header("x-api-key", harness.service_api_key.clone())
        .json(&json!({
            "user_id": harness.test_user_id.to_string(),
            "operation": "FULL_ANALYSIS",
            "idempotency_key": "req_abc123",
        }))
        .await
        .assert_status_ok();

    // Same key, different operation.
    let response = harness
        .server
        .post("/v1/credits/consume")
        .add_header("x-api-key", harness.service_api_key.clone())
        .json(&json!({
            "user_id": harness.test_user_id.to_string(),
            "operation": "REPORT_EXPORT",
            "idempotency_key": "req_abc123",
        }))
        .await;

    response.assert_status(StatusCode::CONFLICT);
}

// ============================================================================
// Refund
// ============================================================================

#[tokio::test]
async fn refund_restores_balance() {
    let harness = TestHarness::new();
    harness.provision("starter").await;

    harness
        .server
        .post("/v1/credits/consume")
        .add_header("x-api-key", harness.service_api_key.clone())
        .json(&json!({
            "user_id": harness.test_user_id.to_string(),
            "operation": "REPORT_EXPORT",
        }))
        .await
        .assert_status_ok();

    let response = harness
        .server
        .post("/v1/credits/refund")
        .add_header("x-api-key", harness.service_api_key.clone())
        .json(&json!({
            "user_id": harness.test_user_id.to_string(),
            "operation": "REPORT_EXPORT",
            "reason": "export pipeline failed",
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["amount"], 5);
    assert_eq!(body["new_balance"], 100);
}

#[tokio::test]
async fn refund_without_consumption_conflicts() {
    let harness = TestHarness::new();
    harness.provision("free").await;

    let response = harness
        .server
        .post("/v1/credits/refund")
        .add_header("x-api-key", harness.service_api_key.clone())
        .json(&json!({
            "user_id": harness.test_user_id.to_string(),
            "operation": "FULL_ANALYSIS",
            "reason": "bogus",
        }))
        .await;

    response.assert_status(StatusCode::CONFLICT);
}

// ============================================================================
// Bonus
// ============================================================================

#[tokio::test]
async fn bonus_adds_on_top_of_allowance() {
    let harness = TestHarness::new();
    harness.provision("free").await;

    let response = harness
        .server
        .post("/v1/credits/bonus")
        .add_header("x-api-key", harness.service_api_key.clone())
        .json(&json!({
            "user_id": harness.test_user_id.to_string(),
            "amount": 25,
            "description": "launch promo",
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["new_balance"], 35);

    let balance = harness
        .server
        .get("/v1/credits/balance")
        .add_header("authorization", harness.user_auth_header())
        .await;
    let body: serde_json::Value = balance.json();
    assert_eq!(body["bonus_credits"], 25);
}

#[tokio::test]
async fn bonus_rejects_non_positive_amount() {
    let harness = TestHarness::new();
    harness.provision("free").await;

    let response = harness
        .server
        .post("/v1/credits/bonus")
        .add_header("x-api-key", harness.service_api_key.clone())
        .json(&json!({
            "user_id": harness.test_user_id.to_string(),
            "amount": -5,
        }))
        .await;

    response.assert_status_bad_request();
}

// ============================================================================
// History
// ============================================================================

#[tokio::test]
async fn history_lists_newest_first() {
    let harness = TestHarness::new();
    harness.provision("starter").await;

    for operation in ["BASIC_ANALYSIS", "FULL_ANALYSIS", "REPORT_EXPORT"] {
        harness
            .server
            .post("/v1/credits/consume")
            .add_header("x-api-key", harness.service_api_key.clone())
            .json(&json!({
                "user_id": harness.test_user_id.to_string(),
                "operation": operation,
            }))
            .await
            .assert_status_ok();
    }

    let response = harness
        .server
        .get("/v1/credits/history")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let transactions = body["transactions"].as_array().unwrap();
    assert_eq!(transactions.len(), 3);
    assert_eq!(transactions[0]["operation"], "REPORT_EXPORT");
    assert_eq!(transactions[2]["operation"], "BASIC_ANALYSIS");
    assert_eq!(transactions[0]["balance_after"], 92);
    assert_eq!(body["has_more"], false);
}

#[tokio::test]
async fn history_pagination() {
    let harness = TestHarness::new();
    harness.provision("starter").await;

    for _ in 0..5 {
        harness
            .server
            .post("/v1/credits/consume")
            .add_header("x-api-key", harness.service_api_key.clone())
            .json(&json!({
                "user_id": harness.test_user_id.to_string(),
                "operation": "BASIC_ANALYSIS",
            }))
            .await
            .assert_status_ok();
    }

    let response = harness
        .server
        .get("/v1/credits/history?limit=2&offset=0")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["transactions"].as_array().unwrap().len(), 2);
    assert_eq!(body["has_more"], true);
}

// ============================================================================
// Costs
// ============================================================================

#[tokio::test]
async fn costs_endpoint_is_public() {
    let harness = TestHarness::new();

    let response = harness.server.get("/v1/credits/costs").await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let tiers = body["tiers"].as_array().unwrap();
    assert_eq!(tiers.len(), 4);

    let professional = tiers
        .iter()
        .find(|t| t["tier"] == "professional")
        .unwrap();
    assert_eq!(professional["monthly_allowance"], 500);
    assert_eq!(professional["costs"]["REPORT_EXPORT"], 4);

    let agency = tiers.iter().find(|t| t["tier"] == "agency").unwrap();
    assert_eq!(agency["is_unlimited"], true);
    assert_eq!(agency["monthly_allowance"], -1);
}
