//! HTTP API service for the copymeter credit ledger.
//!
//! Thin boundary over `copymeter-ledger`: authentication, request/response
//! shapes, webhook signature verification, and error mapping. All balance
//! decisions happen inside the ledger's atomic operations, never here.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::ServiceConfig;
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
