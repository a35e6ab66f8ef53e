//! Core types for the copymeter credit ledger.
//!
//! This crate provides the foundational types shared by the ledger engine and
//! the HTTP service:
//!
//! - **Identifiers**: `UserId`, `TransactionId`
//! - **Accounts**: `CreditAccount`, `CreditSnapshot`, `Remaining`
//! - **Transactions**: `CreditTransaction`, `TransactionKind`
//! - **Tiers**: `Tier`, `TierConfig`, `TierCatalog`, `Operation`
//!
//! # Credits
//!
//! A credit is the atomic unit of paid usage: one billable operation consumes
//! an integer number of credits, resolved from the account's subscription
//! tier. Balances are stored as `i64` and are never fractional. For accounts
//! flagged `is_unlimited`, the stored balance is display-only and must never
//! be trusted as a real balance; the boolean flag is the sole authority.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod ids;
pub mod tiers;
pub mod transaction;

pub use account::{CreditAccount, CreditSnapshot, Remaining};
pub use ids::{IdError, TransactionId, UserId};
pub use tiers::{Operation, Tier, TierCatalog, TierConfig, UnknownTier};
pub use transaction::{CreditTransaction, TransactionKind};
