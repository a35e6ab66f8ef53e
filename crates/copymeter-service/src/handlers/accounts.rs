//! Account provisioning handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use copymeter_core::{CreditSnapshot, Tier, UserId};

use crate::auth::{AuthUser, ServiceAuth};
use crate::error::ApiError;
use crate::state::AppState;

/// Account creation request.
#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    /// The user to provision.
    pub user_id: String,
    /// Tier label. Unknown labels fall back to the free tier.
    #[serde(default)]
    pub tier: Option<String>,
}

/// Account response.
#[derive(Debug, Serialize)]
pub struct AccountResponse {
    /// The user ID.
    pub user_id: String,
    /// Balance snapshot.
    #[serde(flatten)]
    pub snapshot: CreditSnapshot,
}

/// Provision an account (service auth). Idempotent: re-provisioning an
/// existing account returns it unchanged, never re-grants credits.
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<CreateAccountRequest>,
) -> Result<Json<AccountResponse>, ApiError> {
    let user_id: UserId = body
        .user_id
        .parse()
        .map_err(|_| ApiError::BadRequest("invalid user ID".into()))?;

    let tier = Tier::parse_or_free(body.tier.as_deref().unwrap_or("free"));

    tracing::info!(
        user_id = %user_id,
        tier = %tier,
        service = %auth.service_name,
        "Provisioning account"
    );

    let account = state.ledger.provision(user_id, tier)?;

    Ok(Json(AccountResponse {
        user_id: user_id.to_string(),
        snapshot: account.snapshot(),
    }))
}

/// Get the authenticated user's account.
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<AccountResponse>, ApiError> {
    let snapshot = state.ledger.balance(&auth.user_id)?;

    Ok(Json(AccountResponse {
        user_id: auth.user_id.to_string(),
        snapshot,
    }))
}
