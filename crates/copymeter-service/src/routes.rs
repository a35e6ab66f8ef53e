//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{accounts, credits, health, maintenance, webhooks};
use crate::state::AppState;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
/// - `GET /v1/credits/costs` - Tier allowances and operation costs
///
/// ## User (bearer token auth)
/// - `GET /v1/accounts/me` - Get current user's account
/// - `GET /v1/credits/balance` - Get current balance
/// - `GET /v1/credits/history` - List transaction history
///
/// ## Service (API key auth)
/// - `POST /v1/accounts` - Provision an account
/// - `POST /v1/credits/consume` - Consume credits for an operation
/// - `POST /v1/credits/refund` - Refund a failed operation
/// - `POST /v1/credits/bonus` - Grant bonus credits
/// - `POST /v1/maintenance/reset-all` - Batch cycle reset
/// - `POST /v1/maintenance/sweep-idempotency` - Purge expired records
///
/// ## Webhooks (signature verification)
/// - `POST /webhooks/payment` - Payment provider events
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    Router::new()
        // Health (public)
        .route("/health", get(health::health))
        // Accounts
        .route("/v1/accounts", post(accounts::create_account))
        .route("/v1/accounts/me", get(accounts::get_account))
        // Credits
        .route("/v1/credits/balance", get(credits::get_balance))
        .route("/v1/credits/consume", post(credits::consume))
        .route("/v1/credits/refund", post(credits::refund))
        .route("/v1/credits/bonus", post(credits::add_bonus))
        .route("/v1/credits/history", get(credits::history))
        .route("/v1/credits/costs", get(credits::costs))
        // Webhooks
        .route("/webhooks/payment", post(webhooks::payment_webhook))
        // Maintenance (billing cron)
        .route("/v1/maintenance/reset-all", post(maintenance::reset_all))
        .route(
            "/v1/maintenance/sweep-idempotency",
            post(maintenance::sweep_idempotency),
        )
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
