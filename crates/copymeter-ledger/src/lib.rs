//! Storage and ledger engine for copymeter.
//!
//! This crate owns everything with correctness stakes under concurrency: the
//! per-user credit balance, the append-only transaction log, and the
//! idempotency records that deduplicate externally-triggered operations.
//!
//! # Architecture
//!
//! State lives in `RocksDB` with the following column families:
//!
//! - `accounts`: primary account records, keyed by `user_id`
//! - `transactions`: credit transactions, keyed by `transaction_id` (ULID)
//! - `transactions_by_user`: index for listing transactions by user
//! - `idempotency`: idempotency records, keyed by the caller-supplied key
//!
//! Every mutating ledger operation is a single atomic unit: the store holds a
//! per-account lock for the duration of the read-check-mutate and commits the
//! account row together with its transaction record in one `WriteBatch`.
//! Reading the balance, deciding in application code, and writing in a second
//! round trip without the lock is exactly the race this crate exists to
//! prevent.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use copymeter_core::{Operation, Tier, TierCatalog, UserId};
//! use copymeter_ledger::{CreditLedger, ResetPolicy, RocksStore};
//!
//! let store = Arc::new(RocksStore::open("/tmp/copymeter-db").unwrap());
//! let ledger = CreditLedger::new(store, TierCatalog::default(), ResetPolicy::default());
//!
//! let user_id = UserId::generate();
//! ledger.provision(user_id, Tier::Starter).unwrap();
//! let receipt = ledger.consume(&user_id, Operation::FullAnalysis, 1, None).unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod idempotency;
pub mod keys;
pub mod ledger;
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use idempotency::{IdempotencyGuard, IdempotencyRecord, IdempotentOutcome, KEY_TTL_HOURS};
pub use ledger::{CreditLedger, ResetPolicy, ResetSummary};
pub use rocks::RocksStore;

use chrono::{DateTime, Utc};
use copymeter_core::{
    CreditAccount, CreditTransaction, Operation, Remaining, Tier, TierCatalog, TransactionId,
    UserId,
};

/// Outcome of a successful debit.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AppliedDebit {
    /// Remaining balance after the debit (`Unlimited` for unlimited
    /// accounts).
    pub remaining: Remaining,

    /// Credits consumed (the resolved cost; also advanced on unlimited
    /// accounts for analytics).
    pub consumed: i64,

    /// Lifetime credits consumed after this debit.
    pub total_used: i64,

    /// The transaction record written for this debit.
    pub transaction_id: TransactionId,
}

/// Outcome of a successful refund or bonus grant.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AppliedCredit {
    /// Credits added (zero for unlimited accounts).
    pub amount: i64,

    /// Balance after the credit.
    pub new_balance: Remaining,

    /// The transaction record written for this credit.
    pub transaction_id: TransactionId,
}

/// Outcome of a monthly reset.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AppliedReset {
    /// Balance after the reset (unchanged if the reset was skipped).
    pub new_balance: Remaining,

    /// Unused credits carried into the new cycle under the rollover policy.
    pub rollover: i64,

    /// False when the account was already reset this cycle and the call was
    /// a no-op.
    pub applied: bool,

    /// The transaction record, when a reset was applied.
    pub transaction_id: Option<TransactionId>,
}

/// The storage trait defining all database operations.
///
/// The compound operations are the ledger's atomicity boundary: each one is a
/// single conditional read-modify-write against the account row, serialized
/// per account, with the transaction log written in the same atomic unit.
pub trait Store: Send + Sync {
    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Insert or overwrite an account record.
    ///
    /// Bypasses the compound-operation protocol; intended for provisioning
    /// and tests, not for balance mutation.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_account(&self, account: &CreditAccount) -> Result<()>;

    /// Get an account by user ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_account(&self, user_id: &UserId) -> Result<Option<CreditAccount>>;

    /// List all account IDs (used by the monthly reset driver).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_account_ids(&self) -> Result<Vec<UserId>>;

    // =========================================================================
    // Transaction Log
    // =========================================================================

    /// Get a transaction by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_transaction(&self, transaction_id: &TransactionId) -> Result<Option<CreditTransaction>>;

    /// List transactions for a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_transactions_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>>;

    // =========================================================================
    // Compound Ledger Operations (atomic per account)
    // =========================================================================

    /// Consume credits: resolve the cost from the account's tier inside the
    /// critical section, check the balance, decrement, advance `total_used`,
    /// and append the transaction, all as one atomic unit.
    ///
    /// Unlimited accounts get a zero-amount audit transaction and an
    /// untouched balance.
    ///
    /// # Errors
    ///
    /// - `StoreError::UnknownAccount` if the account is not provisioned.
    /// - `StoreError::InsufficientCredits` if the balance cannot cover the
    ///   cost; no mutation is performed.
    fn debit_account(
        &self,
        user_id: &UserId,
        operation: Operation,
        quantity: u32,
        catalog: &TierCatalog,
        description: Option<String>,
    ) -> Result<AppliedDebit>;

    /// Refund a previously consumed operation: add the resolved cost back,
    /// capped so the balance never exceeds `monthly_allowance +
    /// bonus_credits`. Refunds restore, they do not mint.
    ///
    /// # Errors
    ///
    /// - `StoreError::UnknownAccount` if the account is not provisioned.
    /// - `StoreError::RefundExceedsCap` if the refund would exceed the cap;
    ///   no mutation is performed.
    fn refund_account(
        &self,
        user_id: &UserId,
        operation: Operation,
        quantity: u32,
        catalog: &TierCatalog,
        reason: String,
    ) -> Result<AppliedCredit>;

    /// Grant bonus credits: increment `bonus_credits` and the balance
    /// atomically and append a `BONUS_CREDITS` transaction.
    ///
    /// # Errors
    ///
    /// - `StoreError::UnknownAccount` if the account is not provisioned.
    /// - `StoreError::InvalidAmount` if `amount` is not positive.
    fn grant_bonus(
        &self,
        user_id: &UserId,
        amount: i64,
        description: String,
    ) -> Result<AppliedCredit>;

    /// Reset the account for a new billing cycle on the given tier.
    ///
    /// Idempotent per calendar cycle: if `last_reset` falls in the same
    /// cycle as `now` and `force` is false, the call is a no-op. `force` is
    /// for mid-cycle tier changes, which re-grant immediately.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UnknownAccount` if the account is not
    /// provisioned.
    #[allow(clippy::too_many_arguments)]
    fn reset_account(
        &self,
        user_id: &UserId,
        tier: Tier,
        catalog: &TierCatalog,
        rollover_fraction: f64,
        now: DateTime<Utc>,
        force: bool,
    ) -> Result<AppliedReset>;

    // =========================================================================
    // Idempotency Records
    // =========================================================================

    /// Get an idempotency record by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_idempotency(&self, key: &str) -> Result<Option<IdempotencyRecord>>;

    /// Insert or overwrite an idempotency record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_idempotency(&self, record: &IdempotencyRecord) -> Result<()>;

    /// Delete idempotency records whose `expires_at` is before `now`.
    /// Returns the number of records deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn purge_expired_idempotency(&self, now: DateTime<Utc>) -> Result<usize>;
}
