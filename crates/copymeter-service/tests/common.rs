//! Common test utilities for copymeter integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::Router;
use axum_test::TestServer;
use serde_json::json;
use tempfile::TempDir;

use copymeter_core::UserId;
use copymeter_ledger::RocksStore;
use copymeter_service::{create_router, crypto, AppState, ServiceConfig};

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Temporary directory for the database (kept alive for test duration).
    pub _temp_dir: TempDir,
    /// A test user ID for authenticated requests.
    pub test_user_id: UserId,
    /// The service API key for service-to-service requests.
    pub service_api_key: String,
    /// The webhook signing secret.
    pub webhook_secret: String,
}

impl TestHarness {
    /// Create a new test harness with a fresh database.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = RocksStore::open(temp_dir.path()).expect("Failed to open store");

        let service_api_key = "test-service-key".to_string();
        let webhook_secret = "test-webhook-secret".to_string();

        let config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            data_dir: temp_dir.path().to_string_lossy().to_string(),
            service_api_key: Some(service_api_key.clone()),
            webhook_secret: Some(webhook_secret.clone()),
            rollover_fraction: 0.0,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
        };

        let state = AppState::new(Arc::new(store), config);
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");
        let test_user_id = UserId::generate();

        Self {
            server,
            _temp_dir: temp_dir,
            test_user_id,
            service_api_key,
            webhook_secret,
        }
    }

    /// Get the authorization header for user authentication.
    pub fn user_auth_header(&self) -> String {
        format!("Bearer test-token:{}", self.test_user_id)
    }

    /// Provision the test user's account on a tier via the service API.
    pub async fn provision(&self, tier: &str) {
        self.server
            .post("/v1/accounts")
            .add_header("x-api-key", self.service_api_key.clone())
            .json(&json!({
                "user_id": self.test_user_id.to_string(),
                "tier": tier,
            }))
            .await
            .assert_status_ok();
    }

    /// Sign a webhook body with the configured secret.
    pub fn sign_webhook(&self, body: &str) -> String {
        crypto::hmac_sha256_hex(&self.webhook_secret, body)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
