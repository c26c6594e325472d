//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use library_core::{AggregateLoader, LibraryRepository, PatchCoordinator, QuotaDefaults, QuotaEnforcer};
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn LibraryRepository>,
    pub quota: QuotaEnforcer,
    pub loader: AggregateLoader,
    pub patcher: PatchCoordinator,
}

impl AppState {
    /// Wires the core services on top of a single repository.
    pub fn new(repo: Arc<dyn LibraryRepository>, quota_defaults: QuotaDefaults) -> Self {
        let quota = QuotaEnforcer::new(repo.clone(), quota_defaults);
        let loader = AggregateLoader::new(repo.clone());
        let patcher = PatchCoordinator::new(repo.clone(), quota.clone());
        Self { repo, quota, loader, patcher }
    }
}
