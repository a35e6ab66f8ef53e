//! Application state.

use std::sync::Arc;

use copymeter_core::TierCatalog;
use copymeter_ledger::{CreditLedger, IdempotencyGuard, ResetPolicy, RocksStore};

use crate::config::ServiceConfig;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The credit ledger.
    pub ledger: Arc<CreditLedger<RocksStore>>,

    /// Idempotency guard for webhook and grant deduplication.
    pub guard: Arc<IdempotencyGuard<RocksStore>>,

    /// Service configuration.
    pub config: ServiceConfig,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(store: Arc<RocksStore>, config: ServiceConfig) -> Self {
        if config.webhook_secret.is_none() {
            tracing::warn!("webhook secret not configured - webhook signatures will not be verified");
        }
        if config.service_api_key.is_none() {
            tracing::warn!("service API key not configured - service endpoints will reject all requests");
        }

        let reset_policy = ResetPolicy {
            rollover_fraction: config.rollover_fraction,
        };
        let ledger = Arc::new(CreditLedger::new(
            Arc::clone(&store),
            TierCatalog::default(),
            reset_policy,
        ));
        let guard = Arc::new(IdempotencyGuard::new(store));

        Self {
            ledger,
            guard,
            config,
        }
    }
}
