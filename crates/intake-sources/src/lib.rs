//! # Intake Sources
//!
//! Source adapters pull bounded pages of raw records from external systems.
//! Three variants exist behind one capability trait: [`RestSource`] for
//! HTTP/REST APIs, [`WebSource`] for HTML pages, and [`SqlSource`] for SQL
//! databases. Adapters manage transport-level auth, pagination, rate
//! limiting and connectivity probes; they are stateless across calls apart
//! from connection pools and shared HTTP clients, and never retain a
//! previously fetched page.

pub mod auth;
pub mod http;
pub mod rate_limit;
pub mod rest;
pub mod sql;
pub mod web;

use async_trait::async_trait;
use intake_core::{RawRecord, Result};

pub use auth::AuthState;
pub use rate_limit::TokenBucket;
pub use rest::RestSource;
pub use sql::SqlSource;
pub use web::WebSource;

/// One bounded page of raw records.
///
/// A `next_cursor` of `None` is terminal; a returned cursor always advances
/// strictly, so feeding a page's cursor back can never re-fetch that page.
#[derive(Debug, Clone)]
pub struct FetchPage {
    /// Records in source order
    pub records:     Vec<RawRecord>,
    /// Cursor for the next page, or `None` when this page was the last
    pub next_cursor: Option<String>,
}

impl FetchPage {
    /// A terminal page with no records.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            records:     Vec::new(),
            next_cursor: None,
        }
    }
}

/// Capability abstraction over the three source variants.
///
/// Implementations must be cancel-safe between calls: the coordinator may
/// stop fetching at any page boundary and call [`disconnect`] afterwards.
///
/// [`disconnect`]: SourceAdapter::disconnect
#[async_trait]
pub trait SourceAdapter: Send {
    /// The source this adapter serves.
    fn source_id(&self) -> &str;

    /// Establish connectivity and run the variant's probe.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the probe fails; the coordinator maps
    /// it onto the backoff/breaker logic.
    async fn connect(&mut self) -> Result<()>;

    /// Release connections. Idempotent.
    async fn disconnect(&mut self);

    /// Fetch one page of records.
    ///
    /// # Errors
    ///
    /// `NotConnected` before a successful [`connect`](SourceAdapter::connect);
    /// otherwise the typed transport, parse and rate-limit errors of the
    /// variant.
    async fn fetch_page(&mut self, cursor: Option<&str>) -> Result<FetchPage>;
}
