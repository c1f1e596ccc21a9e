//! REST source adapter.

use std::time::Duration;

use async_trait::async_trait;
use intake_core::config::{PaginationConfig, RestSourceConfig};
use intake_core::{IntakeError, RawRecord, Result};
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::auth::AuthState;
use crate::http::{build_client, check_status, link_header_next, transport_error};
use crate::rate_limit::TokenBucket;
use crate::{FetchPage, SourceAdapter};

/// Adapter for JSON-over-HTTP APIs with configurable auth and pagination.
pub struct RestSource {
    source_id: String,
    config:    RestSourceConfig,
    client:    Client,
    auth:      AuthState,
    limiter:   TokenBucket,
    connected: bool,
}

impl RestSource {
    /// Build the adapter from source configuration.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when the HTTP client cannot be constructed or the
    /// method is not GET/POST.
    pub fn new(
        source_id: impl Into<String>,
        config: RestSourceConfig,
        rate_limit: &intake_core::config::RateLimitConfig,
    ) -> Result<Self> {
        let method = config.method.to_ascii_uppercase();
        if method != "GET" && method != "POST" {
            return Err(IntakeError::InvalidConfig {
                message: format!("unsupported HTTP method: {}", config.method),
            });
        }
        let client = build_client(
            Duration::from_millis(config.timeout_ms),
            concat!("intake/", env!("CARGO_PKG_VERSION")),
        )?;
        Ok(Self {
            source_id: source_id.into(),
            auth: AuthState::new(config.auth.clone()),
            limiter: TokenBucket::new(rate_limit),
            config,
            client,
            connected: false,
        })
    }

    /// Reuse an existing HTTP client (adapters share one per engine).
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    fn request_url(&self, cursor: Option<&str>) -> String {
        match (&self.config.pagination, cursor) {
            // Link-header pagination carries the whole next URL in the cursor.
            (PaginationConfig::LinkHeader, Some(url)) => url.to_string(),
            _ => self.config.url.clone(),
        }
    }

    fn page_params(&self, cursor: Option<&str>) -> Vec<(String, String)> {
        let size = self.config.page_size.to_string();
        match &self.config.pagination {
            PaginationConfig::None | PaginationConfig::LinkHeader => Vec::new(),
            PaginationConfig::OffsetLimit {
                offset_param,
                limit_param,
            } => {
                let offset = cursor.and_then(|c| c.parse::<u64>().ok()).unwrap_or(0);
                vec![
                    (offset_param.clone(), offset.to_string()),
                    (limit_param.clone(), size),
                ]
            },
            PaginationConfig::PageNumber {
                page_param,
                size_param,
            } => {
                let page = cursor.and_then(|c| c.parse::<u64>().ok()).unwrap_or(1);
                vec![(page_param.clone(), page.to_string()), (size_param.clone(), size)]
            },
            PaginationConfig::Cursor { cursor_param, .. } => match cursor {
                Some(token) => vec![(cursor_param.clone(), token.to_string())],
                None => Vec::new(),
            },
        }
    }

    fn next_cursor(
        &self,
        cursor: Option<&str>,
        records_on_page: usize,
        body: &Value,
        link_next: Option<String>,
    ) -> Option<String> {
        // An empty page is always terminal.
        if records_on_page == 0 {
            return None;
        }
        let full_page = records_on_page >= self.config.page_size as usize;
        match &self.config.pagination {
            PaginationConfig::None => None,
            PaginationConfig::OffsetLimit { .. } => {
                let offset = cursor.and_then(|c| c.parse::<u64>().ok()).unwrap_or(0);
                full_page.then(|| (offset + records_on_page as u64).to_string())
            },
            PaginationConfig::PageNumber { .. } => {
                let page = cursor.and_then(|c| c.parse::<u64>().ok()).unwrap_or(1);
                full_page.then(|| (page + 1).to_string())
            },
            PaginationConfig::Cursor { next_path, .. } => {
                match navigate(body, next_path) {
                    Some(Value::String(token)) if !token.is_empty() => Some(token.clone()),
                    _ => None,
                }
            },
            PaginationConfig::LinkHeader => link_next,
        }
    }

    fn extract_records(&self, body: &Value) -> Result<Vec<Value>> {
        let target = match &self.config.extract {
            Some(path) => navigate(body, path).ok_or_else(|| IntakeError::Parse {
                reason: format!("extract path '{path}' not found in response"),
            })?,
            None => body,
        };
        Ok(match target {
            Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        })
    }
}

/// Descend a `/`-separated path of object keys.
fn navigate<'a>(body: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = body;
    for key in path.split('/').filter(|k| !k.is_empty()) {
        current = current.get(key)?;
    }
    Some(current)
}

#[async_trait]
impl SourceAdapter for RestSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn connect(&mut self) -> Result<()> {
        // The OAuth2 token fetch doubles as the connectivity probe; the
        // static modes have nothing to verify up front.
        if self.auth.needs_token() {
            self.auth.current_token(&self.client).await?;
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }

    async fn fetch_page(&mut self, cursor: Option<&str>) -> Result<FetchPage> {
        if !self.connected {
            return Err(IntakeError::NotConnected);
        }
        self.limiter.acquire().await;

        let url = self.request_url(cursor);
        let params = self.page_params(cursor);
        let mut request = if self.config.method.eq_ignore_ascii_case("POST") {
            let mut r = self.client.post(&url);
            if let Some(body) = &self.config.body {
                r = r.json(body);
            }
            r
        } else {
            self.client.get(&url)
        };
        for (name, value) in &self.config.headers {
            request = request.header(name, value);
        }
        if !params.is_empty() {
            request = request.query(&params);
        }
        request = self.auth.apply(request, &self.client).await?;

        debug!(source_id = %self.source_id, %url, ?cursor, "fetching page");
        let response = request.send().await.map_err(|e| transport_error(&e))?;
        let response = check_status(response)?;
        let link_next = link_header_next(response.headers());

        let body: Value = response.json().await.map_err(|e| IntakeError::Parse {
            reason: format!("response body: {e}"),
        })?;

        let raw_values = self.extract_records(&body)?;
        let next_cursor = self.next_cursor(cursor, raw_values.len(), &body, link_next);

        let records = raw_values
            .into_iter()
            .map(|payload| {
                let record = RawRecord::new(self.source_id.clone(), payload);
                match cursor {
                    Some(c) => record.with_cursor(c),
                    None => record,
                }
            })
            .collect();

        Ok(FetchPage {
            records,
            next_cursor,
        })
    }
}
