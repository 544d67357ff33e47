//! HTTP client construction and retry-with-backoff for every outbound request.

use std::time::Duration;

use civicetl_shared::{CivicError, HttpConfig, Result};
use reqwest::redirect::Policy;
use reqwest::{Client, RequestBuilder, Response};
use tracing::warn;
use url::Origin;

/// Maximum number of redirects any source may issue.
const MAX_REDIRECTS: usize = 3;

/// User-Agent string for catalog and dataset requests.
pub(crate) const USER_AGENT: &str = concat!("civicetl/", env!("CARGO_PKG_VERSION"));

/// Build a reqwest client with the configured per-request timeout.
pub(crate) fn build_client(http: &HttpConfig) -> Result<Client> {
    client_with_policy(http, Policy::limited(MAX_REDIRECTS))
}

/// Build a client that never follows a redirect off `origin`.
///
/// A cross-origin hop stops the redirect chain, so the caller sees the 3xx
/// response itself rather than the foreign body.
pub(crate) fn build_pinned_client(http: &HttpConfig, origin: Origin) -> Result<Client> {
    let policy = Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else if attempt.url().origin() != origin {
            warn!(location = %attempt.url(), "refusing cross-origin redirect");
            attempt.stop()
        } else {
            attempt.follow()
        }
    });
    client_with_policy(http, policy)
}

fn client_with_policy(http: &HttpConfig, policy: Policy) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(policy)
        .timeout(Duration::from_secs(http.timeout_secs))
        .build()
        .map_err(|e| CivicError::SourceUnavailable(format!("failed to build HTTP client: {e}")))
}

/// Send a request, retrying transient failures with exponential backoff.
///
/// `build` is called once per attempt. 5xx responses, timeouts and connection
/// errors are retried up to `max_retries` times; anything else is returned to
/// the caller as-is, including the final 5xx response once retries run out.
pub(crate) async fn send_with_retry<F>(
    http: &HttpConfig,
    build: F,
) -> std::result::Result<Response, reqwest::Error>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt = 0;
    loop {
        let outcome = build().send().await;
        let transient = match &outcome {
            Ok(response) => response.status().is_server_error(),
            Err(e) => e.is_timeout() || e.is_connect(),
        };
        if !transient || attempt >= http.max_retries {
            return outcome;
        }

        let backoff_ms = backoff_ms(http, attempt);
        match &outcome {
            Ok(response) => warn!(
                attempt = attempt + 1,
                max = http.max_retries,
                backoff_ms,
                status = %response.status(),
                "retrying after server error"
            ),
            Err(e) => warn!(
                attempt = attempt + 1,
                max = http.max_retries,
                backoff_ms,
                error = %e,
                "retrying after transport error"
            ),
        }
        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        attempt += 1;
    }
}

/// Exponential backoff capped at `max_backoff_ms`.
fn backoff_ms(http: &HttpConfig, attempt: u32) -> u64 {
    let factor = 1u64 << attempt.min(16);
    http.initial_backoff_ms
        .saturating_mul(factor)
        .min(http.max_backoff_ms)
}
