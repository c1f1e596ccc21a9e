//! Shared HTTP plumbing for the REST and Web adapters.

use std::time::Duration;

use intake_core::{IntakeError, Result};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};

/// Build the shared HTTP client used by REST and Web adapters.
///
/// # Errors
///
/// Returns `InvalidConfig` when the client cannot be constructed (malformed
/// TLS or proxy environment).
pub fn build_client(timeout: Duration, user_agent: &str) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .build()
        .map_err(|e| IntakeError::InvalidConfig {
            message: format!("failed to build HTTP client: {e}"),
        })
}

/// Parse a `Retry-After` header. Only the delta-seconds form is honored.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Map a non-success status onto the error taxonomy.
///
/// 429 carries the server-suggested delay, 5xx is transient (with the delay
/// when one was sent), everything else in 4xx is permanent.
///
/// # Errors
///
/// Always returns an error; callers invoke this only for non-success codes.
pub fn status_error(status: StatusCode, headers: &HeaderMap) -> IntakeError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return IntakeError::RateLimited {
            retry_after: parse_retry_after(headers).unwrap_or(Duration::from_secs(1)),
        };
    }
    if status.is_server_error() {
        return IntakeError::TransientTransport {
            reason:      format!("HTTP {status}"),
            retry_after: parse_retry_after(headers),
        };
    }
    IntakeError::PermanentTransport {
        reason: format!("HTTP {status}"),
    }
}

/// Check a response status, returning the response on success.
///
/// # Errors
///
/// See [`status_error`].
pub fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(status_error(status, response.headers()))
    }
}

/// Map a reqwest transport error onto the taxonomy. Timeouts and connection
/// failures are transient; malformed requests are permanent.
#[must_use]
pub fn transport_error(err: &reqwest::Error) -> IntakeError {
    if err.is_timeout() || err.is_connect() {
        IntakeError::TransientTransport {
            reason:      err.to_string(),
            retry_after: None,
        }
    } else if err.is_builder() || err.is_request() {
        IntakeError::PermanentTransport {
            reason: err.to_string(),
        }
    } else {
        IntakeError::TransientTransport {
            reason:      err.to_string(),
            retry_after: None,
        }
    }
}

/// Extract the `rel="next"` target from an RFC 5988 `Link` header.
#[must_use]
pub fn link_header_next(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(reqwest::header::LINK)?.to_str().ok()?;
    for part in value.split(',') {
        let mut sections = part.split(';');
        let target = sections.next()?.trim();
        let is_next = sections
            .any(|s| s.trim().eq_ignore_ascii_case(r#"rel="next""#) || s.trim() == "rel=next");
        if is_next && target.starts_with('<') && target.ends_with('>') {
            return Some(target[1..target.len() - 1].to_string());
        }
    }
    None
}
