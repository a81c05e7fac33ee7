//! Outbound HTTP plumbing shared by the payment rail and airtime clients.
//!
//! Retrying is opt-in per call. Token grants and other lookups are safe to
//! repeat; a push, dispatch or reversal that reaches the upstream twice
//! can move money twice, so those run exactly once and surface the
//! failure to the lifecycle engine instead of papering over it.

use crate::payments::error::{PaymentError, PaymentResult};
use reqwest::header::{ACCEPT, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

const BASE_BACKOFF_MS: u64 = 400;
const MAX_BACKOFF_MS: u64 = 8_000;
const MAX_DETAIL_CHARS: usize = 512;

/// Whether a request may be re-sent after a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idempotency {
    /// Safe to repeat: token grants, lookups.
    Retryable,
    /// Must reach the upstream at most once: pushes, dispatches,
    /// reversals.
    OneShot,
}

/// Authentication for a single call.
#[derive(Debug, Clone, Copy)]
pub enum Auth<'a> {
    None,
    Bearer(&'a str),
    /// Pre-encoded `user:secret` credentials.
    Basic(&'a str),
    /// Named header carrying a raw key (aggregator style).
    ApiKey(&'a str, &'a str),
}

#[derive(Clone)]
pub struct UpstreamClient {
    client: Client,
    max_attempts: u32,
}

impl UpstreamClient {
    pub fn new(timeout: Duration, max_retries: u32) -> PaymentResult<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            PaymentError::RailUnavailable {
                message: format!("cannot build HTTP client: {e}"),
            }
        })?;
        Ok(Self {
            client,
            max_attempts: max_retries.saturating_add(1),
        })
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        upstream: &str,
        url: &str,
        auth: Auth<'_>,
    ) -> PaymentResult<T> {
        self.send_json(
            Method::GET,
            upstream,
            url,
            auth,
            None::<&()>,
            Idempotency::Retryable,
        )
        .await
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        upstream: &str,
        url: &str,
        auth: Auth<'_>,
        body: &B,
        idempotency: Idempotency,
    ) -> PaymentResult<T> {
        self.send_json(Method::POST, upstream, url, auth, Some(body), idempotency)
            .await
    }

    async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        upstream: &str,
        url: &str,
        auth: Auth<'_>,
        body: Option<&B>,
        idempotency: Idempotency,
    ) -> PaymentResult<T> {
        let allowed = attempts_allowed(self.max_attempts, idempotency);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .send_once(method.clone(), upstream, url, auth, body)
                .await
            {
                Ok(value) => return Ok(value),
                Err(err) if attempt < allowed && err.is_retryable() => {
                    let delay = retry_delay(attempt, &err);
                    warn!(
                        upstream,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "upstream call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn send_once<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        upstream: &str,
        url: &str,
        auth: Auth<'_>,
        body: Option<&B>,
    ) -> PaymentResult<T> {
        let mut request = self
            .client
            .request(method, url)
            .header(ACCEPT, "application/json");
        request = match auth {
            Auth::None => request,
            Auth::Bearer(token) => request.bearer_auth(token),
            Auth::Basic(encoded) => request.header(AUTHORIZATION, format!("Basic {encoded}")),
            Auth::ApiKey(name, value) => request.header(name, value),
        };
        if let Some(payload) = body {
            request = request.json(payload);
        }

        let response =
            request
                .send()
                .await
                .map_err(|e| PaymentError::RailUnavailable {
                    message: format!("{upstream}: {e}"),
                })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(PaymentError::Throttled {
                retry_after: parse_retry_after(&response),
            });
        }

        let text = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            return Err(PaymentError::RailUnavailable {
                message: format!("{upstream} answered HTTP {status}"),
            });
        }
        if !status.is_success() {
            return Err(PaymentError::UnexpectedResponse {
                upstream: upstream.to_string(),
                detail: format!("HTTP {status}: {}", truncate(&text)),
            });
        }

        serde_json::from_str::<T>(&text).map_err(|e| PaymentError::UnexpectedResponse {
            upstream: upstream.to_string(),
            detail: format!("undecodable body ({e}): {}", truncate(&text)),
        })
    }
}

fn attempts_allowed(max_attempts: u32, idempotency: Idempotency) -> u32 {
    match idempotency {
        Idempotency::Retryable => max_attempts.max(1),
        Idempotency::OneShot => 1,
    }
}

/// Exponential backoff from a sub-second base, capped; an upstream
/// `Retry-After` wins when present.
fn retry_delay(attempt: u32, err: &PaymentError) -> Duration {
    if let PaymentError::Throttled {
        retry_after: Some(secs),
    } = err
    {
        return Duration::from_secs((*secs).min(MAX_BACKOFF_MS / 1000));
    }
    let exponent = attempt.saturating_sub(1).min(8);
    let ms = BASE_BACKOFF_MS.saturating_mul(1 << exponent).min(MAX_BACKOFF_MS);
    Duration::from_millis(ms)
}

fn parse_retry_after(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_DETAIL_CHARS {
        text.to_string()
    } else {
        text.chars().take(MAX_DETAIL_CHARS).collect()
    }
}
