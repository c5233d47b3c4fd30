//! Shared application state handed to every handler.

use std::sync::Arc;

use crate::{
    services::{retry::RetryPolicy, transfer_service::TransferEngine},
    store::{AccountStore, TransferLedger, memory::MemoryStore, postgres::PgStore},
};

/// Process-wide store handles plus the engine built on them.
///
/// Cloned per request by axum; all fields are reference counted.
#[derive(Clone)]
pub struct AppState {
    pub accounts: Arc<dyn AccountStore>,
    pub ledger: Arc<dyn TransferLedger>,
    pub engine: Arc<TransferEngine>,
}

impl AppState {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        ledger: Arc<dyn TransferLedger>,
        policy: RetryPolicy,
    ) -> Self {
        let engine = Arc::new(TransferEngine::new(accounts.clone(), ledger.clone(), policy));
        Self {
            accounts,
            ledger,
            engine,
        }
    }

    /// State backed by PostgreSQL.
    pub fn postgres(store: PgStore, policy: RetryPolicy) -> Self {
        let store = Arc::new(store);
        Self::new(store.clone(), store, policy)
    }

    /// State backed by process memory.
    pub fn in_memory(store: Arc<MemoryStore>, policy: RetryPolicy) -> Self {
        Self::new(store.clone(), store, policy)
    }
}
