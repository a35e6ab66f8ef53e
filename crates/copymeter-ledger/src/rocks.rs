//! RocksDB storage implementation.
//!
//! `RocksStore` serializes every compound ledger operation through a
//! per-account lock, so the balance check and the mutation are observed as
//! one step. The account row and its transaction record are committed in a
//! single `WriteBatch`; a mutation that cannot be logged is never applied.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Datelike, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};

use copymeter_core::{
    CreditAccount, CreditTransaction, Operation, Remaining, Tier, TierCatalog, TransactionId,
    TransactionKind, UserId,
};

use crate::error::{Result, StoreError};
use crate::idempotency::IdempotencyRecord;
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{AppliedCredit, AppliedDebit, AppliedReset, Store};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    account_locks: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            account_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Get (or create) the lock serializing mutations to one account.
    ///
    /// Idle entries are dropped on each acquisition, so the map holds only
    /// the locks of in-flight operations rather than every account ever
    /// touched. An entry referenced solely by the map has no holder; a
    /// fresh entry for the same account serializes just as well.
    fn account_lock(&self, user_id: &UserId) -> Arc<Mutex<()>> {
        let mut locks = self
            .account_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(*user_id).or_default().clone()
    }

    /// Load the account inside a critical section, mapping absence to
    /// `UnknownAccount`.
    fn load_account(&self, user_id: &UserId) -> Result<CreditAccount> {
        self.get_account(user_id)?
            .ok_or_else(|| StoreError::UnknownAccount {
                user_id: user_id.to_string(),
            })
    }

    /// Commit an updated account and its transaction record atomically.
    fn commit(&self, account: &CreditAccount, transaction: &CreditTransaction) -> Result<()> {
        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let cf_tx = self.cf(cf::TRANSACTIONS)?;
        let cf_tx_by_user = self.cf(cf::TRANSACTIONS_BY_USER)?;

        let account_key = keys::account_key(&account.user_id);
        let tx_key = keys::transaction_key(&transaction.id);
        let user_tx_key = keys::user_transaction_key(&account.user_id, &transaction.id);

        let account_value = Self::serialize(account)?;
        let tx_value = Self::serialize(transaction)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_accounts, &account_key, &account_value);
        batch.put_cf(&cf_tx, &tx_key, &tx_value);
        batch.put_cf(&cf_tx_by_user, &user_tx_key, []); // Index entry (empty value)

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

/// Whether two instants fall in the same billing cycle (calendar month).
fn same_cycle(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.year() == b.year() && a.month() == b.month()
}

impl Store for RocksStore {
    // =========================================================================
    // Account Operations
    // =========================================================================

    fn put_account(&self, account: &CreditAccount) -> Result<()> {
        let cf = self.cf(cf::ACCOUNTS)?;
        let key = keys::account_key(&account.user_id);
        let value = Self::serialize(account)?;

        self.db
            .put_cf(&cf, key, value)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn get_account(&self, user_id: &UserId) -> Result<Option<CreditAccount>> {
        let cf = self.cf(cf::ACCOUNTS)?;
        let key = keys::account_key(user_id);

        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn list_account_ids(&self) -> Result<Vec<UserId>> {
        let cf = self.cf(cf::ACCOUNTS)?;
        let mut ids = Vec::new();

        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            ids.push(keys::extract_user_id_from_account_key(&key));
        }

        Ok(ids)
    }

    // =========================================================================
    // Transaction Log
    // =========================================================================

    fn get_transaction(&self, transaction_id: &TransactionId) -> Result<Option<CreditTransaction>> {
        let cf = self.cf(cf::TRANSACTIONS)?;
        let key = keys::transaction_key(transaction_id);

        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn list_transactions_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        let cf_by_user = self.cf(cf::TRANSACTIONS_BY_USER)?;
        let prefix = keys::user_transactions_prefix(user_id);

        // ULIDs are time-ordered, so the index iterates oldest first;
        // collect and reverse for newest-first listing.
        let iter = self.db.iterator_cf(
            &cf_by_user,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        let mut all_keys: Vec<Vec<u8>> = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            if !key.starts_with(&prefix) {
                break;
            }

            all_keys.push(key.to_vec());
        }

        all_keys.reverse();

        let mut transactions = Vec::new();
        for key in all_keys.into_iter().skip(offset) {
            if transactions.len() >= limit {
                break;
            }

            let tx_id = keys::extract_transaction_id_from_user_key(&key);
            if let Some(tx) = self.get_transaction(&tx_id)? {
                transactions.push(tx);
            }
        }

        Ok(transactions)
    }

    // =========================================================================
    // Compound Ledger Operations
    // =========================================================================

    fn debit_account(
        &self,
        user_id: &UserId,
        operation: Operation,
        quantity: u32,
        catalog: &TierCatalog,
        description: Option<String>,
    ) -> Result<AppliedDebit> {
        let lock = self.account_lock(user_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut account = self.load_account(user_id)?;

        // Cost is resolved inside the critical section so a concurrent tier
        // change cannot be observed between the check and the mutation.
        let config = catalog.resolve(account.tier);
        let cost = config.cost_of(operation) * i64::from(quantity);
        let description =
            description.unwrap_or_else(|| format!("{operation} x{quantity}"));

        if account.is_unlimited {
            account.total_used += cost;
            account.updated_at = Utc::now();

            let tx = CreditTransaction::unlimited_audit(
                *user_id,
                operation.as_str().to_string(),
                TransactionKind::Consume,
                description,
            );
            self.commit(&account, &tx)?;

            return Ok(AppliedDebit {
                remaining: Remaining::Unlimited,
                consumed: cost,
                total_used: account.total_used,
                transaction_id: tx.id,
            });
        }

        if account.current_credits < cost {
            return Err(StoreError::InsufficientCredits {
                required: cost,
                available: account.current_credits,
            });
        }

        account.current_credits -= cost;
        account.total_used += cost;
        account.updated_at = Utc::now();

        let tx = CreditTransaction::consume(
            *user_id,
            operation,
            cost,
            account.current_credits,
            description,
        );
        self.commit(&account, &tx)?;

        Ok(AppliedDebit {
            remaining: Remaining::Credits(account.current_credits),
            consumed: cost,
            total_used: account.total_used,
            transaction_id: tx.id,
        })
    }

    fn refund_account(
        &self,
        user_id: &UserId,
        operation: Operation,
        quantity: u32,
        catalog: &TierCatalog,
        reason: String,
    ) -> Result<AppliedCredit> {
        let lock = self.account_lock(user_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut account = self.load_account(user_id)?;

        let config = catalog.resolve(account.tier);
        let amount = config.cost_of(operation) * i64::from(quantity);

        if account.is_unlimited {
            account.updated_at = Utc::now();

            let tx = CreditTransaction::unlimited_audit(
                *user_id,
                format!("REFUND_{}", operation.as_str()),
                TransactionKind::Refund,
                reason,
            );
            self.commit(&account, &tx)?;

            return Ok(AppliedCredit {
                amount: 0,
                new_balance: Remaining::Unlimited,
                transaction_id: tx.id,
            });
        }

        // Refunds restore, they do not mint: the balance may never exceed
        // the tier allowance plus unspent bonus credits.
        let cap = account.monthly_allowance + account.bonus_credits;
        if account.current_credits + amount > cap {
            return Err(StoreError::RefundExceedsCap {
                amount,
                balance: account.current_credits,
                cap,
            });
        }

        account.current_credits += amount;
        account.updated_at = Utc::now();

        let tx = CreditTransaction::refund(
            *user_id,
            operation,
            amount,
            account.current_credits,
            reason,
        );
        self.commit(&account, &tx)?;

        Ok(AppliedCredit {
            amount,
            new_balance: Remaining::Credits(account.current_credits),
            transaction_id: tx.id,
        })
    }

    fn grant_bonus(
        &self,
        user_id: &UserId,
        amount: i64,
        description: String,
    ) -> Result<AppliedCredit> {
        if amount <= 0 {
            return Err(StoreError::InvalidAmount { amount });
        }

        let lock = self.account_lock(user_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut account = self.load_account(user_id)?;

        account.bonus_credits += amount;
        account.updated_at = Utc::now();

        let (new_balance, balance_after) = if account.is_unlimited {
            (Remaining::Unlimited, 0)
        } else {
            account.current_credits += amount;
            (
                Remaining::Credits(account.current_credits),
                account.current_credits,
            )
        };

        let tx = CreditTransaction::bonus(*user_id, amount, balance_after, description);
        self.commit(&account, &tx)?;

        Ok(AppliedCredit {
            amount,
            new_balance,
            transaction_id: tx.id,
        })
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn reset_account(
        &self,
        user_id: &UserId,
        tier: Tier,
        catalog: &TierCatalog,
        rollover_fraction: f64,
        now: DateTime<Utc>,
        force: bool,
    ) -> Result<AppliedReset> {
        let lock = self.account_lock(user_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut account = self.load_account(user_id)?;

        if !force && same_cycle(account.last_reset, now) {
            let new_balance = if account.is_unlimited {
                Remaining::Unlimited
            } else {
                Remaining::Credits(account.current_credits)
            };
            return Ok(AppliedReset {
                new_balance,
                rollover: 0,
                applied: false,
                transaction_id: None,
            });
        }

        let config = catalog.resolve(tier);

        // Bonus credits do not expire: the unspent bonus remainder carries
        // into the new cycle. Consumption is treated as draining the monthly
        // pool first.
        let (bonus_remaining, unused_monthly) = if account.is_unlimited {
            (account.bonus_credits.max(0), 0)
        } else {
            let bonus_remaining = account.bonus_credits.min(account.current_credits).max(0);
            (bonus_remaining, account.current_credits - bonus_remaining)
        };

        let old_balance = account.current_credits;
        account.tier = tier;
        account.is_unlimited = config.is_unlimited;
        account.monthly_allowance = config.display_allowance();
        account.bonus_credits = bonus_remaining;
        account.last_reset = now;
        account.updated_at = now;

        if config.is_unlimited {
            account.current_credits = 0;

            let tx = CreditTransaction::reset(
                *user_id,
                0,
                0,
                format!("Cycle reset to {tier} (unlimited)"),
            );
            self.commit(&account, &tx)?;

            return Ok(AppliedReset {
                new_balance: Remaining::Unlimited,
                rollover: 0,
                applied: true,
                transaction_id: Some(tx.id),
            });
        }

        let rollover_cap = (config.monthly_allowance as f64 * rollover_fraction).floor() as i64;
        let rollover = unused_monthly.min(rollover_cap).max(0);

        account.current_credits = config.monthly_allowance + rollover + bonus_remaining;

        let delta = account.current_credits - old_balance;
        let tx = CreditTransaction::reset(
            *user_id,
            delta,
            account.current_credits,
            format!("Cycle reset to {tier}, rollover {rollover}"),
        );
        self.commit(&account, &tx)?;

        Ok(AppliedReset {
            new_balance: Remaining::Credits(account.current_credits),
            rollover,
            applied: true,
            transaction_id: Some(tx.id),
        })
    }

    // =========================================================================
    // Idempotency Records
    // =========================================================================

    fn get_idempotency(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let cf = self.cf(cf::IDEMPOTENCY)?;
        let record_key = keys::idempotency_key(key);

        self.db
            .get_cf(&cf, record_key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn put_idempotency(&self, record: &IdempotencyRecord) -> Result<()> {
        let cf = self.cf(cf::IDEMPOTENCY)?;
        let record_key = keys::idempotency_key(&record.key);
        let value = Self::serialize(record)?;

        self.db
            .put_cf(&cf, record_key, value)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn purge_expired_idempotency(&self, now: DateTime<Utc>) -> Result<usize> {
        let cf = self.cf(cf::IDEMPOTENCY)?;

        let mut expired: Vec<Vec<u8>> = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let record: IdempotencyRecord = Self::deserialize(&value)?;
            if record.expires_at < now {
                expired.push(key.to_vec());
            }
        }

        let count = expired.len();
        let mut batch = WriteBatch::default();
        for key in expired {
            batch.delete_cf(&cf, key);
        }
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(count)
    }
}
