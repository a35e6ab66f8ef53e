//! Credit balance, consumption, refund, and bonus handlers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use copymeter_core::{CreditSnapshot, CreditTransaction, Operation, UserId};
use copymeter_ledger::IdempotentOutcome;

use crate::auth::{AuthUser, ServiceAuth};
use crate::error::ApiError;
use crate::state::AppState;

/// Render an idempotent outcome: fresh results are serialized, replays
/// return the recorded response verbatim.
fn idempotent_json<T: Serialize>(
    outcome: IdempotentOutcome<T>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match outcome {
        IdempotentOutcome::Fresh(value) => serde_json::to_value(value)
            .map(Json)
            .map_err(|e| ApiError::Internal(e.to_string())),
        IdempotentOutcome::Replayed(recorded) => Ok(Json(recorded)),
    }
}

/// Get current credit balance.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<CreditSnapshot>, ApiError> {
    let snapshot = state.ledger.balance(&auth.user_id)?;
    Ok(Json(snapshot))
}

/// Consume request, reported by the analysis backend.
#[derive(Debug, Deserialize)]
pub struct ConsumeRequest {
    /// The user performing the operation.
    pub user_id: String,
    /// The billable operation.
    pub operation: Operation,
    /// How many units (default: 1).
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    /// Optional human-readable description for the transaction record.
    #[serde(default)]
    pub description: Option<String>,
    /// Optional idempotency key for retried requests.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

fn default_quantity() -> u32 {
    1
}

/// Consume response.
#[derive(Debug, Serialize)]
pub struct ConsumeResponse {
    /// Remaining balance (integer, or `"unlimited"`).
    pub remaining: copymeter_core::Remaining,
    /// Credits consumed.
    pub consumed: i64,
    /// Lifetime credits consumed.
    pub total_used: i64,
    /// The transaction record written.
    pub transaction_id: String,
}

/// Consume credits for an operation (service auth).
pub async fn consume(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Json(body): Json<ConsumeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id: UserId = body
        .user_id
        .parse()
        .map_err(|_| ApiError::BadRequest("invalid user ID".into()))?;
    if body.quantity == 0 {
        return Err(ApiError::BadRequest("quantity must be at least 1".into()));
    }

    let run = || -> copymeter_ledger::Result<ConsumeResponse> {
        let applied = state
            .ledger
            .consume(&user_id, body.operation, body.quantity, body.description.clone())?;
        Ok(ConsumeResponse {
            remaining: applied.remaining,
            consumed: applied.consumed,
            total_used: applied.total_used,
            transaction_id: applied.transaction_id.to_string(),
        })
    };

    match &body.idempotency_key {
        Some(key) => {
            let fingerprint =
                format!("consume:{user_id}:{}:{}", body.operation, body.quantity);
            let outcome = state.guard.execute_once(key, &fingerprint, user_id, run)?;
            idempotent_json(outcome)
        }
        None => idempotent_json(IdempotentOutcome::Fresh(run()?)),
    }
}

/// Refund request.
#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    /// The user to refund.
    pub user_id: String,
    /// The operation being refunded.
    pub operation: Operation,
    /// How many units (default: 1).
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    /// Why the refund is issued (e.g. "analysis pipeline failed").
    pub reason: String,
    /// Optional idempotency key for retried requests.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Refund response.
#[derive(Debug, Serialize)]
pub struct RefundResponse {
    /// Credits restored.
    pub amount: i64,
    /// Balance after the refund.
    pub new_balance: copymeter_core::Remaining,
    /// The transaction record written.
    pub transaction_id: String,
}

/// Refund a previously consumed operation (service auth).
pub async fn refund(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Json(body): Json<RefundRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id: UserId = body
        .user_id
        .parse()
        .map_err(|_| ApiError::BadRequest("invalid user ID".into()))?;
    if body.quantity == 0 {
        return Err(ApiError::BadRequest("quantity must be at least 1".into()));
    }

    let run = || -> copymeter_ledger::Result<RefundResponse> {
        let applied = state.ledger.refund(
            &user_id,
            body.operation,
            body.quantity,
            body.reason.clone(),
        )?;
        Ok(RefundResponse {
            amount: applied.amount,
            new_balance: applied.new_balance,
            transaction_id: applied.transaction_id.to_string(),
        })
    };

    match &body.idempotency_key {
        Some(key) => {
            let fingerprint =
                format!("refund:{user_id}:{}:{}", body.operation, body.quantity);
            let outcome = state.guard.execute_once(key, &fingerprint, user_id, run)?;
            idempotent_json(outcome)
        }
        None => idempotent_json(IdempotentOutcome::Fresh(run()?)),
    }
}

/// Bonus grant request.
#[derive(Debug, Deserialize)]
pub struct BonusRequest {
    /// The user to credit.
    pub user_id: String,
    /// Credits to grant (must be positive).
    pub amount: i64,
    /// Why the bonus is granted.
    #[serde(default)]
    pub description: Option<String>,
    /// Optional idempotency key for retried requests.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Grant bonus credits (service auth).
pub async fn add_bonus(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Json(body): Json<BonusRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id: UserId = body
        .user_id
        .parse()
        .map_err(|_| ApiError::BadRequest("invalid user ID".into()))?;
    if body.amount <= 0 {
        return Err(ApiError::BadRequest("amount must be positive".into()));
    }

    let description = body
        .description
        .clone()
        .unwrap_or_else(|| "Bonus credits".to_string());

    let run = || -> copymeter_ledger::Result<RefundResponse> {
        let applied = state
            .ledger
            .add_bonus(&user_id, body.amount, description.clone())?;
        Ok(RefundResponse {
            amount: applied.amount,
            new_balance: applied.new_balance,
            transaction_id: applied.transaction_id.to_string(),
        })
    };

    match &body.idempotency_key {
        Some(key) => {
            let fingerprint = format!("bonus:{user_id}:{}", body.amount);
            let outcome = state.guard.execute_once(key, &fingerprint, user_id, run)?;
            idempotent_json(outcome)
        }
        None => idempotent_json(IdempotentOutcome::Fresh(run()?)),
    }
}

/// Transaction list query parameters.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Maximum number of transactions to return (default: 50, max: 100).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

/// Transaction response.
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    /// Transaction ID.
    pub id: String,
    /// Operation label, e.g. `FULL_ANALYSIS` or `MONTHLY_RESET`.
    pub operation: String,
    /// Transaction kind.
    pub kind: copymeter_core::TransactionKind,
    /// Signed amount (negative = consumption, positive = credit).
    pub amount: i64,
    /// Balance after this transaction.
    pub balance_after: i64,
    /// Description.
    pub description: String,
    /// Timestamp.
    pub created_at: String,
}

impl From<&CreditTransaction> for TransactionResponse {
    fn from(tx: &CreditTransaction) -> Self {
        Self {
            id: tx.id.to_string(),
            operation: tx.operation.clone(),
            kind: tx.kind,
            amount: tx.amount,
            balance_after: tx.balance_after,
            description: tx.description.clone(),
            created_at: tx.created_at.to_rfc3339(),
        }
    }
}

/// Transaction history response.
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    /// Transactions (newest first).
    pub transactions: Vec<TransactionResponse>,
    /// Whether there are more transactions.
    pub has_more: bool,
}

/// List transaction history.
pub async fn history(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    // Verify the account exists so an unknown user gets 404, not an empty
    // list.
    state.ledger.balance(&auth.user_id)?;

    // Fetch one more than requested to determine has_more
    let limit = query.limit.min(100);
    let transactions = state.ledger.history(&auth.user_id, limit + 1, query.offset)?;

    let has_more = transactions.len() > limit;
    let transactions: Vec<_> = transactions
        .iter()
        .take(limit)
        .map(TransactionResponse::from)
        .collect();

    Ok(Json(HistoryResponse {
        transactions,
        has_more,
    }))
}

/// Per-tier cost table entry.
#[derive(Debug, Serialize)]
pub struct TierCosts {
    /// Tier label.
    pub tier: String,
    /// Monthly allowance (`-1` for unlimited tiers).
    pub monthly_allowance: i64,
    /// Whether the tier is unlimited.
    pub is_unlimited: bool,
    /// Credit cost per operation.
    pub costs: HashMap<Operation, i64>,
}

/// Cost table response.
#[derive(Debug, Serialize)]
pub struct CostsResponse {
    /// All tiers with their allowances and operation costs.
    pub tiers: Vec<TierCosts>,
}

/// Public cost table: allowances and per-operation costs for every tier.
pub async fn costs(State(state): State<Arc<AppState>>) -> Json<CostsResponse> {
    let tiers = state
        .ledger
        .catalog()
        .tiers()
        .into_iter()
        .map(|(tier, config)| TierCosts {
            tier: tier.to_string(),
            monthly_allowance: config.display_allowance(),
            is_unlimited: config.is_unlimited,
            costs: config.costs.clone(),
        })
        .collect();

    Json(CostsResponse { tiers })
}
