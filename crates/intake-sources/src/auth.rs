//! Authentication for HTTP-based adapters.
//!
//! Static modes (api key, basic, bearer) decorate the request directly.
//! The OAuth2 client-credentials mode fetches a token from the configured
//! endpoint and caches it until shortly before expiry.

use std::time::{Duration, Instant};

use intake_core::config::AuthConfig;
use intake_core::{IntakeError, Result};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use tracing::debug;

/// Expiry safety margin: refresh this long before the token actually lapses.
const TOKEN_SKEW: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at:   Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in:   u64,
}

const fn default_expires_in() -> u64 {
    3600
}

/// Per-adapter auth state: the configured mode plus a cached OAuth2 token.
#[derive(Debug)]
pub struct AuthState {
    config: AuthConfig,
    cached: Option<CachedToken>,
}

impl AuthState {
    /// Wrap an auth configuration.
    #[must_use]
    pub const fn new(config: AuthConfig) -> Self {
        Self {
            config,
            cached: None,
        }
    }

    /// Whether this mode needs a network round-trip before the first request.
    #[must_use]
    pub const fn needs_token(&self) -> bool {
        matches!(self.config, AuthConfig::Oauth2ClientCredentials { .. })
    }

    /// Decorate a request with credentials, fetching a token first if the
    /// mode requires one and the cache is stale.
    ///
    /// # Errors
    ///
    /// `PermanentTransport` when the token endpoint rejects the credentials;
    /// `TransientTransport` when it is unreachable.
    pub async fn apply(
        &mut self,
        request: RequestBuilder,
        client: &Client,
    ) -> Result<RequestBuilder> {
        match &self.config {
            AuthConfig::None => Ok(request),
            AuthConfig::ApiKey { header, key } => Ok(request.header(header, key)),
            AuthConfig::Basic { username, password } => {
                Ok(request.basic_auth(username, Some(password)))
            },
            AuthConfig::Bearer { token } => Ok(request.bearer_auth(token)),
            AuthConfig::Oauth2ClientCredentials { .. } => {
                let token = self.current_token(client).await?;
                Ok(request.bearer_auth(token))
            },
        }
    }

    /// Fetch (or reuse) the OAuth2 access token.
    ///
    /// # Errors
    ///
    /// See [`apply`](AuthState::apply).
    pub async fn current_token(&mut self, client: &Client) -> Result<String> {
        if let Some(cached) = &self.cached {
            if cached.expires_at > Instant::now() {
                return Ok(cached.access_token.clone());
            }
        }
        let AuthConfig::Oauth2ClientCredentials {
            token_url,
            client_id,
            client_secret,
            scope,
        } = &self.config
        else {
            return Err(IntakeError::InvalidConfig {
                message: "current_token called without an oauth2 configuration".to_string(),
            });
        };

        debug!(%token_url, "fetching oauth2 client-credentials token");
        let mut form = vec![("grant_type", "client_credentials".to_string())];
        if let Some(scope) = scope {
            form.push(("scope", scope.clone()));
        }
        let response = client
            .post(token_url)
            .basic_auth(client_id, Some(client_secret))
            .form(&form)
            .send()
            .await
            .map_err(|e| crate::http::transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            // A rejected credential is not going to heal on retry.
            return Err(IntakeError::PermanentTransport {
                reason: format!("token endpoint returned HTTP {status}"),
            });
        }
        let token: TokenResponse = response.json().await.map_err(|e| IntakeError::Parse {
            reason: format!("token response: {e}"),
        })?;

        let expires_at = Instant::now()
            + Duration::from_secs(token.expires_in).saturating_sub(TOKEN_SKEW);
        self.cached = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at,
        });
        Ok(token.access_token)
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn oauth_config(server_url: &str) -> AuthConfig {
        AuthConfig::Oauth2ClientCredentials {
            token_url:     format!("{server_url}/token"),
            client_id:     "intake".to_string(),
            client_secret: "s3cret".to_string(),
            scope:         Some("read".to_string()),
        }
    }

    #[tokio::test]
    async fn oauth2_token_is_fetched_and_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok-1",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = Client::new();
        let mut auth = AuthState::new(oauth_config(&server.uri()));

        assert_eq!(auth.current_token(&client).await.expect("token"), "tok-1");
        // Second call must hit the cache: the mock expects exactly one call.
        assert_eq!(auth.current_token(&client).await.expect("token"), "tok-1");
    }

    #[tokio::test]
    async fn rejected_credentials_are_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = Client::new();
        let mut auth = AuthState::new(oauth_config(&server.uri()));
        let err = auth.current_token(&client).await.expect_err("must fail");
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn static_modes_do_not_touch_the_network() {
        let client = Client::new();
        let mut auth = AuthState::new(AuthConfig::ApiKey {
            header: "X-Api-Key".to_string(),
            key:    "k".to_string(),
        });
        let request = client.get("http://localhost/never-sent");
        // Just exercising the decoration path; nothing is sent.
        let _decorated = auth.apply(request, &client).await.expect("decorate");
        assert!(!auth.needs_token());
    }
}
