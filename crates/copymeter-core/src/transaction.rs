//! Credit transaction types.
//!
//! Every balance-affecting event appends exactly one transaction record. The
//! log is append-only: records are never mutated or deleted by the ledger
//! (retention is an external job). For a metered account, the balance always
//! equals the `balance_after` of its most recent transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{TransactionId, UserId};
use crate::tiers::Operation;

/// Operation label for bonus credit grants.
pub const BONUS_CREDITS_OPERATION: &str = "BONUS_CREDITS";

/// Operation label for monthly resets.
pub const MONTHLY_RESET_OPERATION: &str = "MONTHLY_RESET";

/// An append-only record of a single balance change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditTransaction {
    /// Unique transaction ID (ULID for time-ordering).
    pub id: TransactionId,

    /// The user whose balance was affected.
    pub user_id: UserId,

    /// Operation label, e.g. `FULL_ANALYSIS`, `REFUND_FULL_ANALYSIS`,
    /// `BONUS_CREDITS`, `MONTHLY_RESET`.
    pub operation: String,

    /// What kind of mutation produced this record.
    pub kind: TransactionKind,

    /// Signed amount: negative for consumption, positive for credit. Zero
    /// for audit records on unlimited accounts.
    pub amount: i64,

    /// Balance after this transaction was applied.
    pub balance_after: i64,

    /// Human-readable description.
    pub description: String,

    /// When the transaction was created.
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    /// Record a consumption. The amount is stored negated.
    #[must_use]
    pub fn consume(
        user_id: UserId,
        operation: Operation,
        cost: i64,
        balance_after: i64,
        description: String,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            user_id,
            operation: operation.as_str().to_string(),
            kind: TransactionKind::Consume,
            amount: -cost.abs(),
            balance_after,
            description,
            created_at: Utc::now(),
        }
    }

    /// Record a refund. The operation label is prefixed `REFUND_`.
    #[must_use]
    pub fn refund(
        user_id: UserId,
        operation: Operation,
        amount: i64,
        balance_after: i64,
        reason: String,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            user_id,
            operation: format!("REFUND_{}", operation.as_str()),
            kind: TransactionKind::Refund,
            amount: amount.abs(),
            balance_after,
            description: reason,
            created_at: Utc::now(),
        }
    }

    /// Record a bonus credit grant.
    #[must_use]
    pub fn bonus(user_id: UserId, amount: i64, balance_after: i64, description: String) -> Self {
        Self {
            id: TransactionId::generate(),
            user_id,
            operation: BONUS_CREDITS_OPERATION.to_string(),
            kind: TransactionKind::Bonus,
            amount: amount.abs(),
            balance_after,
            description,
            created_at: Utc::now(),
        }
    }

    /// Record a monthly reset. The amount is the signed delta between the
    /// balance before and after the reset.
    #[must_use]
    pub fn reset(user_id: UserId, delta: i64, balance_after: i64, description: String) -> Self {
        Self {
            id: TransactionId::generate(),
            user_id,
            operation: MONTHLY_RESET_OPERATION.to_string(),
            kind: TransactionKind::Reset,
            amount: delta,
            balance_after,
            description,
            created_at: Utc::now(),
        }
    }

    /// Zero-amount audit record for an operation on an unlimited account.
    #[must_use]
    pub fn unlimited_audit(
        user_id: UserId,
        operation: String,
        kind: TransactionKind,
        description: String,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            user_id,
            operation,
            kind,
            amount: 0,
            balance_after: 0,
            description,
            created_at: Utc::now(),
        }
    }
}

/// Kind of balance mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Credits deducted for a paid operation.
    Consume,

    /// Credits restored for a previously consumed operation.
    Refund,

    /// Promotional/bonus credits granted.
    Bonus,

    /// Monthly allowance reset.
    Reset,
}

impl TransactionKind {
    /// Whether this kind adds credits.
    #[must_use]
    pub const fn is_credit(&self) -> bool {
        matches!(self, Self::Refund | Self::Bonus)
    }

    /// Whether this kind removes credits.
    #[must_use]
    pub const fn is_debit(&self) -> bool {
        matches!(self, Self::Consume)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_amount_is_negative() {
        let tx = CreditTransaction::consume(
            UserId::generate(),
            Operation::FullAnalysis,
            2,
            8,
            "Full analysis".into(),
        );
        assert_eq!(tx.amount, -2);
        assert_eq!(tx.operation, "FULL_ANALYSIS");
        assert_eq!(tx.kind, TransactionKind::Consume);
        assert_eq!(tx.balance_after, 8);
    }

    #[test]
    fn refund_prefixes_operation_label() {
        let tx = CreditTransaction::refund(
            UserId::generate(),
            Operation::FullAnalysis,
            2,
            10,
            "analysis failed".into(),
        );
        assert_eq!(tx.amount, 2);
        assert_eq!(tx.operation, "REFUND_FULL_ANALYSIS");
        assert_eq!(tx.kind, TransactionKind::Refund);
    }

    #[test]
    fn bonus_and_reset_labels() {
        let user_id = UserId::generate();
        let bonus = CreditTransaction::bonus(user_id, 25, 35, "promo".into());
        assert_eq!(bonus.operation, BONUS_CREDITS_OPERATION);

        let reset = CreditTransaction::reset(user_id, 97, 100, "cycle reset".into());
        assert_eq!(reset.operation, MONTHLY_RESET_OPERATION);
        assert_eq!(reset.amount, 97);
    }

    #[test]
    fn unlimited_audit_has_zero_amount() {
        let tx = CreditTransaction::unlimited_audit(
            UserId::generate(),
            Operation::FullAnalysis.as_str().to_string(),
            TransactionKind::Consume,
            "Full analysis (unlimited)".into(),
        );
        assert_eq!(tx.amount, 0);
    }

    #[test]
    fn kind_credit_debit() {
        assert!(TransactionKind::Refund.is_credit());
        assert!(TransactionKind::Bonus.is_credit());
        assert!(!TransactionKind::Consume.is_credit());
        assert!(TransactionKind::Consume.is_debit());
        assert!(!TransactionKind::Reset.is_debit());
    }
}
