//! The credit ledger facade.
//!
//! `CreditLedger` is the API the rest of the system talks to. It owns the
//! tier catalog and the reset policy, and delegates every mutation to the
//! store's atomic compound operations. It never reads a balance, decides,
//! and writes in separate store calls.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use copymeter_core::{
    CreditAccount, CreditSnapshot, CreditTransaction, Operation, Tier, TierCatalog, UserId,
};

use crate::error::{Result, StoreError};
use crate::{AppliedCredit, AppliedDebit, AppliedReset, Store};

/// Policy for carrying unused credits across cycle resets.
#[derive(Debug, Clone, Copy)]
pub struct ResetPolicy {
    /// Fraction of the monthly allowance that may roll over. `0.0` means
    /// resets replace the balance outright.
    pub rollover_fraction: f64,
}

impl Default for ResetPolicy {
    fn default() -> Self {
        Self {
            rollover_fraction: 0.0,
        }
    }
}

/// Tally of a batch reset across all accounts.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct ResetSummary {
    /// Accounts whose cycle was reset.
    pub reset: usize,

    /// Accounts already reset this cycle (no-op).
    pub skipped: usize,

    /// Accounts whose reset errored. The batch continues past failures.
    pub failed: usize,
}

/// The credit ledger: per-user balances, consumption, refunds, bonus
/// grants, and cycle resets.
pub struct CreditLedger<S: Store> {
    store: Arc<S>,
    catalog: TierCatalog,
    reset_policy: ResetPolicy,
}

impl<S: Store> CreditLedger<S> {
    /// Create a ledger over the given store.
    pub fn new(store: Arc<S>, catalog: TierCatalog, reset_policy: ResetPolicy) -> Self {
        Self {
            store,
            catalog,
            reset_policy,
        }
    }

    /// The tier catalog this ledger prices against.
    #[must_use]
    pub const fn catalog(&self) -> &TierCatalog {
        &self.catalog
    }

    /// The underlying store, for the idempotency guard sharing it.
    #[must_use]
    pub fn store(&self) -> Arc<S> {
        Arc::clone(&self.store)
    }

    /// Provision an account on a tier with its starting allowance.
    ///
    /// Idempotent: if the account already exists it is returned unchanged,
    /// never re-granted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn provision(&self, user_id: UserId, tier: Tier) -> Result<CreditAccount> {
        if let Some(existing) = self.store.get_account(&user_id)? {
            return Ok(existing);
        }

        let account = CreditAccount::new(user_id, tier, self.catalog.resolve(tier));
        self.store.put_account(&account)?;
        info!(%user_id, %tier, credits = account.current_credits, "provisioned account");
        Ok(account)
    }

    /// Consume credits for an operation.
    ///
    /// # Errors
    ///
    /// - `StoreError::UnknownAccount` if the account is not provisioned.
    /// - `StoreError::InsufficientCredits` if the balance cannot cover the
    ///   cost.
    pub fn consume(
        &self,
        user_id: &UserId,
        operation: Operation,
        quantity: u32,
        description: Option<String>,
    ) -> Result<AppliedDebit> {
        let applied =
            self.store
                .debit_account(user_id, operation, quantity, &self.catalog, description)?;
        info!(
            %user_id,
            %operation,
            consumed = applied.consumed,
            remaining = ?applied.remaining,
            "consumed credits"
        );
        Ok(applied)
    }

    /// Refund a previously consumed operation.
    ///
    /// # Errors
    ///
    /// - `StoreError::UnknownAccount` if the account is not provisioned.
    /// - `StoreError::RefundExceedsCap` if the refund would push the balance
    ///   past the allowance + bonus cap.
    pub fn refund(
        &self,
        user_id: &UserId,
        operation: Operation,
        quantity: u32,
        reason: String,
    ) -> Result<AppliedCredit> {
        let applied = self
            .store
            .refund_account(user_id, operation, quantity, &self.catalog, reason)
            .map_err(|e| {
                // Indicates a caller bug, worth surfacing even though the
                // call fails cleanly.
                if matches!(e, StoreError::RefundExceedsCap { .. }) {
                    warn!(%user_id, error = %e, "refund rejected");
                }
                e
            })?;
        info!(%user_id, %operation, amount = applied.amount, "refunded credits");
        Ok(applied)
    }

    /// Grant bonus credits on top of the monthly allowance.
    ///
    /// # Errors
    ///
    /// - `StoreError::UnknownAccount` if the account is not provisioned.
    /// - `StoreError::InvalidAmount` if `amount` is not positive.
    pub fn add_bonus(
        &self,
        user_id: &UserId,
        amount: i64,
        description: String,
    ) -> Result<AppliedCredit> {
        let applied = self.store.grant_bonus(user_id, amount, description)?;
        info!(%user_id, amount = applied.amount, "granted bonus credits");
        Ok(applied)
    }

    /// Get the account's balance snapshot.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UnknownAccount` if the account is not
    /// provisioned.
    pub fn balance(&self, user_id: &UserId) -> Result<CreditSnapshot> {
        let account =
            self.store
                .get_account(user_id)?
                .ok_or_else(|| StoreError::UnknownAccount {
                    user_id: user_id.to_string(),
                })?;
        Ok(account.snapshot())
    }

    /// List the account's transactions, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn history(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        self.store.list_transactions_by_user(user_id, limit, offset)
    }

    /// Reset one account for a new cycle on its current tier. Idempotent
    /// per calendar cycle.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UnknownAccount` if the account is not
    /// provisioned.
    pub fn reset_monthly(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<AppliedReset> {
        let account =
            self.store
                .get_account(user_id)?
                .ok_or_else(|| StoreError::UnknownAccount {
                    user_id: user_id.to_string(),
                })?;

        let applied = self.store.reset_account(
            user_id,
            account.tier,
            &self.catalog,
            self.reset_policy.rollover_fraction,
            now,
            false,
        )?;
        if applied.applied {
            info!(%user_id, tier = %account.tier, rollover = applied.rollover, "cycle reset");
        }
        Ok(applied)
    }

    /// Move an account to a new tier and re-grant its allowance
    /// immediately, even mid-cycle.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UnknownAccount` if the account is not
    /// provisioned.
    pub fn change_tier(
        &self,
        user_id: &UserId,
        tier: Tier,
        now: DateTime<Utc>,
    ) -> Result<AppliedReset> {
        let applied = self.store.reset_account(
            user_id,
            tier,
            &self.catalog,
            self.reset_policy.rollover_fraction,
            now,
            true,
        )?;
        info!(%user_id, %tier, "tier changed, allowance re-granted");
        Ok(applied)
    }

    /// Reset every account for the new cycle. One account failing does not
    /// stop the batch.
    ///
    /// # Errors
    ///
    /// Returns an error only if the account listing itself fails.
    pub fn reset_all(&self, now: DateTime<Utc>) -> Result<ResetSummary> {
        let mut summary = ResetSummary::default();

        for user_id in self.store.list_account_ids()? {
            match self.reset_monthly(&user_id, now) {
                Ok(applied) if applied.applied => summary.reset += 1,
                Ok(_) => summary.skipped += 1,
                Err(e) => {
                    error!(%user_id, error = %e, "cycle reset failed");
                    summary.failed += 1;
                }
            }
        }

        if summary.failed > 0 {
            warn!(
                reset = summary.reset,
                skipped = summary.skipped,
                failed = summary.failed,
                "batch reset finished with failures"
            );
        } else {
            info!(reset = summary.reset, skipped = summary.skipped, "batch reset finished");
        }

        Ok(summary)
    }
}
