//! # Intake Server
//!
//! The admin HTTP surface over the ingestion engine, the service
//! configuration loader, and the `intake` binary. Transport is a thin
//! layer: every route delegates to one engine method and maps the error
//! taxonomy onto HTTP statuses.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::ServiceConfig;
pub use routes::router;
pub use state::AppState;
