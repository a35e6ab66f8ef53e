//! Column family definitions for the RocksDB backend.

/// Column family names.
pub mod cf {
    /// Primary account records, keyed by `user_id` bytes.
    pub const ACCOUNTS: &str = "accounts";

    /// Credit transactions, keyed by `transaction_id` (ULID bytes).
    pub const TRANSACTIONS: &str = "transactions";

    /// Index for listing transactions by user, keyed by
    /// `user_id || transaction_id`.
    pub const TRANSACTIONS_BY_USER: &str = "transactions_by_user";

    /// Idempotency records, keyed by the caller-supplied key string.
    pub const IDEMPOTENCY: &str = "idempotency";
}

/// All column families the database is opened with.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::ACCOUNTS,
        cf::TRANSACTIONS,
        cf::TRANSACTIONS_BY_USER,
        cf::IDEMPOTENCY,
    ]
}
