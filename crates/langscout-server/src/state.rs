use langscout_client::ReqwestNotifier;
use langscout_core::{ProxyPool, ResultTracker};
use langscout_db::Database;

/// Shared application state, available to all route handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub db: Database,
    /// Live batch results. Consulted before the persisted batch records.
    pub tracker: ResultTracker,
    /// The pool the scheduler leases from; reloaded after proxy writes.
    pub proxy_pool: ProxyPool,
    pub notifier: ReqwestNotifier,
    /// API key required on every `/v1` route.
    pub api_key: String,
}
