//! Web (HTML) source adapter.
//!
//! Pages are fetched with a per-host crawl delay and an optional robots
//! policy; records are extracted with a configured regex selector whose
//! named capture groups become record fields.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use intake_core::config::WebSourceConfig;
use intake_core::{IntakeError, RawRecord, Result};
use regex::Regex;
use reqwest::{Client, Url};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::http::{build_client, check_status, transport_error};
use crate::{FetchPage, SourceAdapter};

/// Parsed robots.txt policy for one host: the Disallow prefixes that apply
/// to our user-agent (or to `*`).
#[derive(Debug, Default, Clone)]
struct RobotsPolicy {
    disallow: Vec<String>,
}

impl RobotsPolicy {
    fn parse(body: &str, user_agent: &str) -> Self {
        let product = user_agent
            .split('/')
            .next()
            .unwrap_or(user_agent)
            .to_ascii_lowercase();
        let mut disallow = Vec::new();
        let mut group_matches = false;
        let mut in_agent_list = false;

        for line in body.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let field = field.trim().to_ascii_lowercase();
            let value = value.trim();
            match field.as_str() {
                "user-agent" => {
                    if !in_agent_list {
                        group_matches = false;
                    }
                    in_agent_list = true;
                    let agent = value.to_ascii_lowercase();
                    if agent == "*" || agent.contains(&product) {
                        group_matches = true;
                    }
                },
                "disallow" => {
                    in_agent_list = false;
                    if group_matches && !value.is_empty() {
                        disallow.push(value.to_string());
                    }
                },
                _ => {
                    in_agent_list = false;
                },
            }
        }
        Self { disallow }
    }

    fn allows(&self, path: &str) -> bool {
        !self.disallow.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }
}

/// Adapter for HTML pages with selector-based extraction.
pub struct WebSource {
    source_id: String,
    config:    WebSourceConfig,
    client:    Client,
    record_re: Regex,
    next_re:   Option<Regex>,
    robots:    Option<RobotsPolicy>,
    last_hit:  Option<Instant>,
    connected: bool,
}

impl WebSource {
    /// Build the adapter from source configuration.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when a selector regex does not compile or the client
    /// cannot be constructed.
    pub fn new(source_id: impl Into<String>, config: WebSourceConfig) -> Result<Self> {
        let record_re = Regex::new(&config.record_selector).map_err(|e| {
            IntakeError::InvalidConfig {
                message: format!("record_selector: {e}"),
            }
        })?;
        let next_re = config
            .next_selector
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| IntakeError::InvalidConfig {
                message: format!("next_selector: {e}"),
            })?;
        let client = build_client(Duration::from_secs(30), &config.user_agent)?;
        Ok(Self {
            source_id: source_id.into(),
            config,
            client,
            record_re,
            next_re,
            robots: None,
            last_hit: None,
            connected: false,
        })
    }

    async fn honor_crawl_delay(&mut self) {
        let delay = Duration::from_millis(self.config.crawl_delay_ms);
        if let Some(last) = self.last_hit {
            let since = last.elapsed();
            if since < delay {
                tokio::time::sleep(delay - since).await;
            }
        }
        self.last_hit = Some(Instant::now());
    }

    fn check_robots(&self, url: &Url) -> Result<()> {
        if let Some(policy) = &self.robots {
            if !policy.allows(url.path()) {
                return Err(IntakeError::PermanentTransport {
                    reason: format!("robots.txt disallows {}", url.path()),
                });
            }
        }
        Ok(())
    }

    fn extract_records(&self, html: &str, cursor: Option<&str>) -> Result<Vec<RawRecord>> {
        let mut records = Vec::new();
        for captures in self.record_re.captures_iter(html) {
            let mut fields = Map::new();
            for name in self.record_re.capture_names().flatten() {
                if let Some(group) = captures.name(name) {
                    fields.insert(name.to_string(), Value::String(group.as_str().to_string()));
                }
            }
            let record = RawRecord::new(self.source_id.clone(), Value::Object(fields));
            records.push(match cursor {
                Some(c) => record.with_cursor(c),
                None => record,
            });
        }
        if records.is_empty() {
            // A selector that matches nothing means the markup changed out
            // from under us, not an empty result set.
            return Err(IntakeError::Parse {
                reason: "record selector matched nothing".to_string(),
            });
        }
        Ok(records)
    }

    fn next_url(&self, html: &str, base: &Url) -> Option<String> {
        let re = self.next_re.as_ref()?;
        let captures = re.captures(html)?;
        let target = captures.get(1)?.as_str();
        match base.join(target) {
            Ok(url) => Some(url.to_string()),
            Err(e) => {
                warn!(target, error = %e, "next-page selector produced an unjoinable URL");
                None
            },
        }
    }
}

#[async_trait]
impl SourceAdapter for WebSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn connect(&mut self) -> Result<()> {
        if self.config.respect_robots {
            let base = Url::parse(&self.config.url).map_err(|e| IntakeError::InvalidConfig {
                message: format!("url: {e}"),
            })?;
            let robots_url = base.join("/robots.txt").map_err(|e| IntakeError::InvalidConfig {
                message: format!("robots.txt url: {e}"),
            })?;
            let response = self
                .client
                .get(robots_url)
                .send()
                .await
                .map_err(|e| transport_error(&e))?;
            self.robots = if response.status().is_success() {
                let body = response.text().await.unwrap_or_default();
                Some(RobotsPolicy::parse(&body, &self.config.user_agent))
            } else {
                // No robots.txt means no restrictions.
                Some(RobotsPolicy::default())
            };
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
        let url_str = cursor.unwrap_or(self.config.url.as_str()).to_string();
        let url = Url::parse(&url_str).map_err(|e| IntakeError::Parse {
            reason: format!("page url '{url_str}': {e}"),
        })?;
        self.check_robots(&url)?;
        self.honor_crawl_delay().await;

        let mut request = self.client.get(url.clone());
        for (name, value) in &self.config.headers {
            request = request.header(name, value);
        }
        if !self.config.cookies.is_empty() {
            let cookie_header = self
                .config
                .cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; ");
            request = request.header(reqwest::header::COOKIE, cookie_header);
        }

        debug!(source_id = %self.source_id, %url, "fetching page");
        let response = request.send().await.map_err(|e| transport_error(&e))?;
        let response = check_status(response)?;
        let html = response.text().await.map_err(|e| IntakeError::Parse {
            reason: format!("response body: {e}"),
        })?;

        let records = self.extract_records(&html, cursor)?;
        let next_cursor = self.next_url(&html, &url).filter(|next| *next != url_str);

        Ok(FetchPage {
            records,
            next_cursor,
        })
    }
}

#[cfg(test)]
mod tests {
    use intake_core::IntakeErrorCode;
    use serde_json::json;
    use std::collections::HashMap;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn web_config(url: String) -> WebSourceConfig {
        WebSourceConfig {
            url,
            headers: HashMap::new(),
            cookies: HashMap::new(),
            record_selector: r#"<li data-id="(?P<id>\d+)">(?P<name>[^<]+)</li>"#.to_string(),
            next_selector: Some(r#"<a rel="next" href="([^"]+)""#.to_string()),
            crawl_delay_ms: 10,
            respect_robots: true,
            user_agent: "intake/2.1".to_string(),
        }
    }

    async fn serve_robots(server: &MockServer, body: &str) {
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body.to_string()))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn named_groups_become_record_fields() {
        let server = MockServer::start().await;
        serve_robots(&server, "").await;
        Mock::given(method("GET"))
            .and(path("/notices"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<ul><li data-id="4">Alpha</li><li data-id="5">Beta</li></ul>"#,
            ))
            .mount(&server)
            .await;

        let mut source =
            WebSource::new("notices", web_config(format!("{}/notices", server.uri())))
                .expect("adapter");
        source.connect().await.expect("connect");

        let page = source.fetch_page(None).await.expect("page");
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[0].payload, json!({"id": "4", "name": "Alpha"}));
        assert_eq!(page.next_cursor, None);
    }

    #[tokio::test]
    async fn next_selector_yields_an_absolute_cursor() {
        let server = MockServer::start().await;
        serve_robots(&server, "").await;
        Mock::given(method("GET"))
            .and(path("/notices"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<li data-id="1">A</li><a rel="next" href="/notices?page=2">more</a>"#,
            ))
            .mount(&server)
            .await;

        let mut source =
            WebSource::new("notices", web_config(format!("{}/notices", server.uri())))
                .expect("adapter");
        source.connect().await.expect("connect");

        let page = source.fetch_page(None).await.expect("page");
        assert_eq!(
            page.next_cursor,
            Some(format!("{}/notices?page=2", server.uri()))
        );
    }

    #[tokio::test]
    async fn robots_disallow_is_permanent() {
        let server = MockServer::start().await;
        serve_robots(&server, "User-agent: *\nDisallow: /notices\n").await;

        let mut source =
            WebSource::new("notices", web_config(format!("{}/notices", server.uri())))
                .expect("adapter");
        source.connect().await.expect("connect");

        let err = source.fetch_page(None).await.expect_err("must refuse");
        assert_eq!(err.code(), IntakeErrorCode::PermanentTransport);
    }

    #[tokio::test]
    async fn selector_matching_nothing_is_a_parse_error() {
        let server = MockServer::start().await;
        serve_robots(&server, "").await;
        Mock::given(method("GET"))
            .and(path("/notices"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>redesigned</html>"))
            .mount(&server)
            .await;

        let mut source =
            WebSource::new("notices", web_config(format!("{}/notices", server.uri())))
                .expect("adapter");
        source.connect().await.expect("connect");

        let err = source.fetch_page(None).await.expect_err("must fail");
        assert_eq!(err.code(), IntakeErrorCode::Parse);
    }

    #[test]
    fn robots_groups_apply_per_agent() {
        let body = "User-agent: otherbot\nDisallow: /private\n\nUser-agent: intake\nDisallow: /admin\n";
        let policy = RobotsPolicy::parse(body, "intake/2.1");
        assert!(policy.allows("/private"));
        assert!(!policy.allows("/admin"));

        let wildcard = RobotsPolicy::parse("User-agent: *\nDisallow: /\n", "intake/2.1");
        assert!(!wildcard.allows("/anything"));
    }

    #[tokio::test]
    async fn crawl_delay_spaces_successive_fetches() {
        let server = MockServer::start().await;
        serve_robots(&server, "").await;
        Mock::given(method("GET"))
            .and(path("/notices"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"<li data-id="1">A</li>"#),
            )
            .mount(&server)
            .await;

        let mut config = web_config(format!("{}/notices", server.uri()));
        config.crawl_delay_ms = 80;
        let mut source = WebSource::new("notices", config).expect("adapter");
        source.connect().await.expect("connect");

        source.fetch_page(None).await.expect("first");
        let start = Instant::now();
        source.fetch_page(None).await.expect("second");
        assert!(start.elapsed() >= Duration::from_millis(60));
    }
}
