//! Maintenance endpoints driven by the billing cron.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use copymeter_ledger::ResetSummary;

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Reset every account for the new billing cycle (service auth).
///
/// Idempotent: accounts already reset this cycle are skipped, so the cron
/// can safely re-run after a partial failure.
pub async fn reset_all(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
) -> Result<Json<ResetSummary>, ApiError> {
    tracing::info!(service = %auth.service_name, "Starting batch cycle reset");
    let summary = state.ledger.reset_all(chrono::Utc::now())?;
    Ok(Json(summary))
}

/// Sweep response.
#[derive(Debug, Serialize)]
pub struct SweepResponse {
    /// Number of expired idempotency records deleted.
    pub purged: usize,
}

/// Delete expired idempotency records (service auth).
pub async fn sweep_idempotency(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
) -> Result<Json<SweepResponse>, ApiError> {
    let purged = state.guard.sweep(chrono::Utc::now())?;
    Ok(Json(SweepResponse { purged }))
}
