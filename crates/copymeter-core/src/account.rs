//! Account types for the copymeter ledger.
//!
//! A `CreditAccount` is the single mutable shared resource in the system: one
//! row per user, owned exclusively by the ledger, mutated only under the
//! store's per-account lock.

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

use crate::ids::UserId;
use crate::tiers::{Tier, TierConfig, UNLIMITED_ALLOWANCE_SENTINEL};

/// A per-user credit account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditAccount {
    /// The user this account belongs to.
    pub user_id: UserId,

    /// Spendable credit balance. Non-negative for metered accounts;
    /// display-only (ignored) when `is_unlimited` is true.
    pub current_credits: i64,

    /// Credits granted each monthly reset cycle. `-1` means "unlimited"
    /// for display purposes only; `is_unlimited` is the authority.
    pub monthly_allowance: i64,

    /// Promotional credits still unspent. Does not expire on reset.
    pub bonus_credits: i64,

    /// Lifetime credits consumed. Monotonic, analytics only; never read by
    /// the consume/refund protocol.
    pub total_used: i64,

    /// Current subscription tier.
    pub tier: Tier,

    /// When true, consume/refund are no-ops on the balance; usage is still
    /// logged for audit.
    pub is_unlimited: bool,

    /// Timestamp of the last successful monthly reset.
    pub last_reset: DateTime<Utc>,

    /// When the account was created.
    pub created_at: DateTime<Utc>,

    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl CreditAccount {
    /// Create a new account on a tier with its starting allowance.
    #[must_use]
    pub fn new(user_id: UserId, tier: Tier, config: &TierConfig) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            current_credits: if config.is_unlimited {
                0
            } else {
                config.monthly_allowance
            },
            monthly_allowance: config.display_allowance(),
            bonus_credits: 0,
            total_used: 0,
            tier,
            is_unlimited: config.is_unlimited,
            last_reset: now,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check whether the account can cover a cost. Always true for
    /// unlimited accounts.
    #[must_use]
    pub fn has_sufficient_credits(&self, cost: i64) -> bool {
        self.is_unlimited || self.current_credits >= cost
    }

    /// Build the read-only snapshot returned by balance queries.
    #[must_use]
    pub fn snapshot(&self) -> CreditSnapshot {
        CreditSnapshot {
            credits: if self.is_unlimited {
                Remaining::Unlimited
            } else {
                Remaining::Credits(self.current_credits)
            },
            monthly_allowance: if self.is_unlimited {
                UNLIMITED_ALLOWANCE_SENTINEL
            } else {
                self.monthly_allowance
            },
            bonus_credits: self.bonus_credits,
            total_used: self.total_used,
            tier: self.tier,
            is_unlimited: self.is_unlimited,
            last_reset: self.last_reset,
        }
    }
}

/// Read-only balance projection returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditSnapshot {
    /// Remaining credits, or the `"unlimited"` sentinel.
    pub credits: Remaining,

    /// Monthly allowance (`-1` for unlimited tiers, display only).
    pub monthly_allowance: i64,

    /// Unspent promotional credits.
    pub bonus_credits: i64,

    /// Lifetime credits consumed.
    pub total_used: i64,

    /// Current subscription tier.
    pub tier: Tier,

    /// Whether balance checks are bypassed.
    pub is_unlimited: bool,

    /// Timestamp of the last monthly reset.
    pub last_reset: DateTime<Utc>,
}

/// A remaining balance: a concrete credit count, or unlimited.
///
/// Serializes as a plain integer or the string `"unlimited"` so clients never
/// have to interpret a sentinel number as "no limit".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remaining {
    /// A metered balance.
    Credits(i64),

    /// Balance checks are bypassed for this account.
    Unlimited,
}

impl Serialize for Remaining {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Credits(n) => serializer.serialize_i64(*n),
            Self::Unlimited => serializer.serialize_str("unlimited"),
        }
    }
}

impl<'de> Deserialize<'de> for Remaining {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RemainingVisitor;

        impl Visitor<'_> for RemainingVisitor {
            type Value = Remaining;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("an integer credit count or the string \"unlimited\"")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Remaining, E> {
                Ok(Remaining::Credits(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Remaining, E> {
                i64::try_from(v)
                    .map(Remaining::Credits)
                    .map_err(|_| E::custom("credit count out of range"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Remaining, E> {
                if v == "unlimited" {
                    Ok(Remaining::Unlimited)
                } else {
                    Err(E::custom(format!("unexpected balance string: {v}")))
                }
            }
        }

        deserializer.deserialize_any(RemainingVisitor)
    }
}
