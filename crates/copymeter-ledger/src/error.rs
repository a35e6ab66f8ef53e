//! Error types for the ledger engine.

/// Result type for ledger and storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in ledger and storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Account not provisioned.
    #[error("unknown account: {user_id}")]
    UnknownAccount {
        /// The user ID with no account row.
        user_id: String,
    },

    /// Insufficient credits for a consume. Expected business outcome, not
    /// an internal failure.
    #[error("insufficient credits: required={required}, available={available}")]
    InsufficientCredits {
        /// Cost of the requested operation.
        required: i64,
        /// Balance at the time of the check.
        available: i64,
    },

    /// Refund would push the balance past the allowance + bonus cap.
    /// Indicates a caller bug; rejected, never clamped.
    #[error("refund exceeds cap: amount={amount}, balance={balance}, cap={cap}")]
    RefundExceedsCap {
        /// Refund amount requested.
        amount: i64,
        /// Balance at the time of the check.
        balance: i64,
        /// Maximum balance the refund may restore to.
        cap: i64,
    },

    /// Credit amount outside the accepted range. Grants must be positive;
    /// rejected, never clamped.
    #[error("invalid credit amount: {amount}")]
    InvalidAmount {
        /// The rejected amount.
        amount: i64,
    },

    /// Idempotency key presented with a different operation fingerprint.
    #[error("idempotency key reused with different fingerprint: {key}")]
    KeyConflict {
        /// The reused key.
        key: String,
    },
}

impl StoreError {
    /// Whether this error is an expected business outcome rather than a
    /// fault (callers surface these to end users without error logging).
    #[must_use]
    pub const fn is_business_outcome(&self) -> bool {
        matches!(self, Self::InsufficientCredits { .. })
    }
}
