//! Idempotency guard for externally-triggered operations.
//!
//! Payment providers deliver webhooks at-least-once, and HTTP clients retry.
//! The guard makes a side-effecting operation run exactly once per key: the
//! first caller executes and records the response, replays get the recorded
//! response back without re-executing, and a key reused with a different
//! operation fingerprint is rejected outright.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use copymeter_core::UserId;

use crate::error::{Result, StoreError};
use crate::Store;

/// Hours an idempotency record stays authoritative before it may be purged.
pub const KEY_TTL_HOURS: i64 = 24;

/// Lifecycle state of an idempotency record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    /// The operation is claimed but its response is not yet recorded. A
    /// pending record whose holder released the key lock means the holder
    /// died mid-operation; the next caller retries.
    Pending,

    /// The operation ran to completion and `response` holds its result.
    Completed,
}

/// A persisted idempotency record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// The caller-supplied key (e.g. a provider event ID).
    pub key: String,

    /// Fingerprint of the operation the key was first presented with. A
    /// replay must match it.
    pub fingerprint: String,

    /// The account the operation targets.
    pub user_id: UserId,

    /// Lifecycle state.
    pub state: RecordState,

    /// The recorded response, present once `state` is `Completed`.
    pub response: Option<serde_json::Value>,

    /// When the key was first claimed.
    pub created_at: DateTime<Utc>,

    /// When the record stops being authoritative. An expired record is
    /// treated as absent.
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Claim a key: a pending record with the standard TTL.
    #[must_use]
    pub fn pending(
        key: impl Into<String>,
        fingerprint: impl Into<String>,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            fingerprint: fingerprint.into(),
            user_id,
            state: RecordState::Pending,
            response: None,
            created_at: now,
            expires_at: now + Duration::hours(KEY_TTL_HOURS),
        }
    }

    /// Mark the record completed with the operation's response.
    #[must_use]
    pub fn completed(mut self, response: serde_json::Value) -> Self {
        self.state = RecordState::Completed;
        self.response = Some(response);
        self
    }

    /// Whether the record has aged out.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Outcome of an [`IdempotencyGuard::execute_once`] call.
#[derive(Debug)]
pub enum IdempotentOutcome<T> {
    /// The operation executed for the first time.
    Fresh(T),

    /// The key was seen before; the recorded response is returned and the
    /// operation did not run.
    Replayed(serde_json::Value),
}

impl<T> IdempotentOutcome<T> {
    /// Whether this outcome is a replay.
    #[must_use]
    pub const fn is_replay(&self) -> bool {
        matches!(self, Self::Replayed(_))
    }
}

/// Runs side-effecting operations exactly once per key.
///
/// Concurrency: callers presenting the same key serialize on a per-key lock.
/// The winner holds the lock through its operation, so the loser observes
/// either the completed record (replay) or a pending record with the lock
/// released (crashed holder, retried).
pub struct IdempotencyGuard<S: Store> {
    store: Arc<S>,
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<S: Store> IdempotencyGuard<S> {
    /// Create a guard over the given store.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Get (or create) the lock for one key, dropping idle entries as a side
    /// effect. An entry referenced solely by the map has no holder, so
    /// removing it cannot break mutual exclusion; without the pruning the
    /// map would retain one entry per key ever presented.
    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .key_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(key.to_string()).or_default().clone()
    }

    /// Execute `operation` at most once for `key`.
    ///
    /// The fingerprint binds the key to the operation's parameters: a replay
    /// with a matching fingerprint returns the recorded response, a replay
    /// with a different fingerprint is a caller bug and is rejected.
    ///
    /// A failed operation leaves the key retryable: the pending record stays
    /// behind, and the next caller holding the key lock runs the operation
    /// again.
    ///
    /// # Errors
    ///
    /// - `StoreError::KeyConflict` if the key was first presented with a
    ///   different fingerprint.
    /// - Any error from `operation` itself, or from the underlying store.
    pub fn execute_once<T, F>(
        &self,
        key: &str,
        fingerprint: &str,
        user_id: UserId,
        operation: F,
    ) -> Result<IdempotentOutcome<T>>
    where
        T: Serialize,
        F: FnOnce() -> Result<T>,
    {
        let lock = self.key_lock(key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let now = Utc::now();

        if let Some(record) = self.store.get_idempotency(key)? {
            if !record.is_expired(now) {
                if record.fingerprint != fingerprint {
                    warn!(key, "idempotency key reused with different fingerprint");
                    return Err(StoreError::KeyConflict {
                        key: key.to_string(),
                    });
                }

                match record.state {
                    RecordState::Completed => {
                        debug!(key, "replaying recorded response");
                        let response = record.response.unwrap_or(serde_json::Value::Null);
                        return Ok(IdempotentOutcome::Replayed(response));
                    }
                    RecordState::Pending => {
                        // We hold the key lock, so the previous claimant is
                        // gone without completing. Retry below.
                        debug!(key, "retrying abandoned pending operation");
                    }
                }
            }
        }

        let pending = IdempotencyRecord::pending(key, fingerprint, user_id, now);
        self.store.put_idempotency(&pending)?;

        let result = operation()?;

        let response = serde_json::to_value(&result)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.store.put_idempotency(&pending.completed(response))?;

        Ok(IdempotentOutcome::Fresh(result))
    }

    /// Delete all expired records. Returns the number purged.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let purged = self.store.purge_expired_idempotency(now)?;

        // Also release key locks with no in-flight holder.
        self.key_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, lock| Arc::strong_count(lock) > 1);

        if purged > 0 {
            debug!(purged, "swept expired idempotency records");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rocks::RocksStore;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    fn create_guard() -> (Arc<IdempotencyGuard<RocksStore>>, Arc<RocksStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        (Arc::new(IdempotencyGuard::new(Arc::clone(&store))), store, dir)
    }

    #[test]
    fn fresh_key_executes() {
        let (guard, _store, _dir) = create_guard();
        let user_id = UserId::generate();

        let outcome = guard
            .execute_once("evt_1", "grant:10", user_id, || Ok(42_i64))
            .unwrap();
        assert!(matches!(outcome, IdempotentOutcome::Fresh(42)));
    }

    #[test]
    fn replay_returns_recorded_response_without_executing() {
        let (guard, _store, _dir) = create_guard();
        let user_id = UserId::generate();
        let calls = AtomicU32::new(0);

        let run = || {
            guard.execute_once("evt_1", "grant:10", user_id, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(42_i64)
            })
        };

        run().unwrap();
        let replay = run().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match replay {
            IdempotentOutcome::Replayed(response) => assert_eq!(response, serde_json::json!(42)),
            IdempotentOutcome::Fresh(_) => panic!("expected replay"),
        }
    }

    #[test]
    fn mismatched_fingerprint_is_conflict() {
        let (guard, _store, _dir) = create_guard();
        let user_id = UserId::generate();

        guard
            .execute_once("evt_1", "grant:10", user_id, || Ok(()))
            .unwrap();

        let result = guard.execute_once("evt_1", "grant:999", user_id, || Ok(()));
        assert!(matches!(result, Err(StoreError::KeyConflict { .. })));
    }

    #[test]
    fn expired_record_is_treated_as_absent() {
        let (guard, store, _dir) = create_guard();
        let user_id = UserId::generate();

        let mut record = IdempotencyRecord::pending("evt_1", "grant:10", user_id, Utc::now());
        record = record.completed(serde_json::json!("stale"));
        record.expires_at = Utc::now() - Duration::hours(1);
        store.put_idempotency(&record).unwrap();

        let outcome = guard
            .execute_once("evt_1", "grant:10", user_id, || Ok("fresh"))
            .unwrap();
        assert!(matches!(outcome, IdempotentOutcome::Fresh("fresh")));
    }

    #[test]
    fn failed_operation_leaves_key_retryable() {
        let (guard, _store, _dir) = create_guard();
        let user_id = UserId::generate();

        let result: Result<IdempotentOutcome<()>> =
            guard.execute_once("evt_1", "grant:10", user_id, || {
                Err(StoreError::Database("disk full".into()))
            });
        assert!(result.is_err());

        let outcome = guard
            .execute_once("evt_1", "grant:10", user_id, || Ok(7_i64))
            .unwrap();
        assert!(matches!(outcome, IdempotentOutcome::Fresh(7)));
    }

    #[test]
    fn concurrent_same_key_executes_once() {
        let (guard, _store, _dir) = create_guard();
        let user_id = UserId::generate();
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let guard = Arc::clone(&guard);
            let calls = Arc::clone(&calls);
            handles.push(std::thread::spawn(move || {
                guard.execute_once("evt_1", "grant:10", user_id, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("done")
                })
            }));
        }

        let mut fresh = 0;
        let mut replayed = 0;
        for handle in handles {
            match handle.join().unwrap().unwrap() {
                IdempotentOutcome::Fresh(_) => fresh += 1,
                IdempotentOutcome::Replayed(_) => replayed += 1,
            }
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(fresh, 1);
        assert_eq!(replayed, 7);
    }

    #[test]
    fn key_locks_do_not_accumulate() {
        let (guard, _store, _dir) = create_guard();
        let user_id = UserId::generate();

        for i in 0..5 {
            guard
                .execute_once(&format!("evt_{i}"), "f", user_id, || Ok(i))
                .unwrap();
        }

        // Pruning on acquisition keeps the map near-empty even without a
        // sweep; the sweep clears the last released entry.
        assert!(guard.key_locks.lock().unwrap().len() <= 1);
        guard.sweep(Utc::now()).unwrap();
        assert!(guard.key_locks.lock().unwrap().is_empty());
    }

    #[test]
    fn sweep_removes_only_expired() {
        let (guard, store, _dir) = create_guard();
        let user_id = UserId::generate();

        let live = IdempotencyRecord::pending("evt_live", "f", user_id, Utc::now());
        let mut old = IdempotencyRecord::pending("evt_old", "f", user_id, Utc::now());
        old.expires_at = Utc::now() - Duration::hours(2);
        store.put_idempotency(&live).unwrap();
        store.put_idempotency(&old).unwrap();

        assert_eq!(guard.sweep(Utc::now()).unwrap(), 1);
        assert!(store.get_idempotency("evt_old").unwrap().is_none());
        assert!(store.get_idempotency("evt_live").unwrap().is_some());
    }
}
