//! Shared state behind the admin routes.

use intake_engine::IngestionEngine;

/// Application state: the engine handle.
pub struct AppState {
    /// The running ingestion engine
    pub engine: IngestionEngine,
}
