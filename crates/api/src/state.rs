//! Shared handler state.

use std::sync::Arc;

use tokenbridge_core::{AuthorizationService, RefreshCoordinator, RevocationService};
use tokenbridge_infra::DbManager;

/// Everything the HTTP handlers need. The credential cipher is deliberately
/// absent: it lives inside the three services and never reaches a handler.
#[derive(Clone)]
pub struct AppState {
    pub authorization: Arc<AuthorizationService>,
    pub refresh: Arc<RefreshCoordinator>,
    pub revocation: Arc<RevocationService>,
    pub db: Arc<DbManager>,
    /// Provider path segment the routes answer under.
    pub provider_name: String,
}
