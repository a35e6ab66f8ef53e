//! Payment provider webhook handler.
//!
//! The provider delivers events at-least-once; every side-effecting event
//! goes through the idempotency guard keyed on the provider event ID, so a
//! redelivered event credits an account exactly once.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use copymeter_core::{Tier, UserId};

use crate::crypto::{constant_time_eq, hmac_sha256_hex};
use crate::error::ApiError;
use crate::state::AppState;

/// Payment webhook envelope.
#[derive(Debug, Deserialize)]
pub struct PaymentWebhook {
    /// Provider event ID, used as the idempotency key.
    pub id: String,
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event payload.
    pub data: serde_json::Value,
}

/// Payload of a `payment.succeeded` event.
#[derive(Debug, Deserialize)]
struct PaymentSucceeded {
    user_id: String,
    credits: i64,
}

/// Payload of a `subscription.updated` event.
#[derive(Debug, Deserialize)]
struct SubscriptionUpdated {
    user_id: String,
    tier: String,
}

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was accepted.
    pub received: bool,
    /// Whether the event had already been processed.
    pub replayed: bool,
}

/// Handle payment provider webhooks.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    verify_signature(&state, &headers, &body)?;

    let webhook: PaymentWebhook =
        serde_json::from_str(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::info!(
        event_type = %webhook.event_type,
        event_id = %webhook.id,
        "Received payment webhook"
    );

    let replayed = match webhook.event_type.as_str() {
        "payment.succeeded" => handle_payment_succeeded(&state, &webhook)?,
        "subscription.updated" => handle_subscription_updated(&state, &webhook)?,
        _ => {
            tracing::debug!(event_type = %webhook.event_type, "Unhandled payment event");
            false
        }
    };

    Ok(Json(WebhookResponse {
        received: true,
        replayed,
    }))
}

/// Verify the webhook signature when a secret is configured.
fn verify_signature(state: &AppState, headers: &HeaderMap, body: &str) -> Result<(), ApiError> {
    let Some(secret) = &state.config.webhook_secret else {
        // No secret configured - skip verification (development mode)
        tracing::warn!("webhook secret not configured - skipping signature verification");
        return Ok(());
    };

    let signature = headers
        .get("x-webhook-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("missing webhook signature".into()))?;

    let expected = hmac_sha256_hex(secret, body);
    if !constant_time_eq(signature, &expected) {
        tracing::warn!("invalid webhook signature");
        return Err(ApiError::BadRequest("invalid webhook signature".into()));
    }

    Ok(())
}

/// A completed payment grants bonus credits, exactly once per event ID.
fn handle_payment_succeeded(state: &AppState, webhook: &PaymentWebhook) -> Result<bool, ApiError> {
    let payload: PaymentSucceeded = serde_json::from_value(webhook.data.clone())
        .map_err(|e| ApiError::BadRequest(format!("malformed payment.succeeded payload: {e}")))?;

    let user_id: UserId = payload
        .user_id
        .parse()
        .map_err(|_| ApiError::BadRequest("invalid user ID in webhook".into()))?;
    if payload.credits <= 0 {
        return Err(ApiError::BadRequest("credits must be positive".into()));
    }

    let fingerprint = format!("payment.succeeded:{user_id}:{}", payload.credits);
    let outcome = state.guard.execute_once(&webhook.id, &fingerprint, user_id, || {
        state.ledger.add_bonus(
            &user_id,
            payload.credits,
            format!("Credit purchase ({})", webhook.id),
        )
    })?;

    Ok(outcome.is_replay())
}

/// A subscription change moves the account to the new tier and re-grants
/// its allowance immediately, exactly once per event ID.
fn handle_subscription_updated(
    state: &AppState,
    webhook: &PaymentWebhook,
) -> Result<bool, ApiError> {
    let payload: SubscriptionUpdated = serde_json::from_value(webhook.data.clone())
        .map_err(|e| ApiError::BadRequest(format!("malformed subscription.updated payload: {e}")))?;

    let user_id: UserId = payload
        .user_id
        .parse()
        .map_err(|_| ApiError::BadRequest("invalid user ID in webhook".into()))?;
    let tier = Tier::parse_or_free(&payload.tier);

    let fingerprint = format!("subscription.updated:{user_id}:{tier}");
    let outcome = state.guard.execute_once(&webhook.id, &fingerprint, user_id, || {
        state.ledger.change_tier(&user_id, tier, chrono::Utc::now())
    })?;

    Ok(outcome.is_replay())
}
