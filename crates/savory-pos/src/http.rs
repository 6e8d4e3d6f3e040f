//! # Rate-Limited Provider Client
//!
//! The single outbound HTTP path to a POS provider, scoped to one
//! tenant+provider call batch.
//!
//! ## Retry Behavior
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Response Handling                                   │
//! │                                                                         │
//! │  2xx        → parse JSON, return                                       │
//! │  429        → sleep backoff(attempt) and retry, at most 5 attempts:    │
//! │               1s → 2s → 4s → 8s → 16s   (doubling, capped at 30s,      │
//! │               plus up to 10% random jitter); then RateLimited          │
//! │  401        → AuthFailed — a typed signal. No inline token refresh     │
//! │               here: refresh is the OAuth lifecycle manager's job,      │
//! │               done proactively before a call batch. The caller         │
//! │               reports the signal so the lifecycle manager can degrade  │
//! │               the tenant's connection.                                 │
//! │  other non-2xx → Http { status, body } with the body preserved         │
//! │                                                                         │
//! │  Every call carries a fixed 15-second timeout.                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use rand::Rng;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{PosError, PosResult};
use savory_core::Provider;

/// Per-call timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Maximum attempts for a rate-limited call (first try included).
pub const MAX_ATTEMPTS: u32 = 5;

/// First backoff delay.
const BASE_BACKOFF: Duration = Duration::from_secs(1);

/// Backoff ceiling.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

// =============================================================================
// Backoff Schedule
// =============================================================================

/// Deterministic part of the backoff schedule: `1s · 2^attempt`, capped.
///
/// `attempt` is zero-based (the delay before retry N+1).
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = attempt.min(16);
    let delay = BASE_BACKOFF.saturating_mul(1u32 << exp);
    delay.min(MAX_BACKOFF)
}

/// Backoff with up to 10% random jitter added.
pub fn backoff_delay_with_jitter(attempt: u32) -> Duration {
    let base = backoff_delay(attempt);
    let jitter_cap = (base.as_millis() as u64 / 10).max(1);
    let jitter = rand::thread_rng().gen_range(0..=jitter_cap);
    base + Duration::from_millis(jitter)
}

// =============================================================================
// Provider Client
// =============================================================================

/// HTTP client for one tenant+provider, with the provider's required
/// headers injected on every call.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    http: reqwest::Client,
    provider: Provider,
    base_url: String,
    access_token: String,
    /// Provider API-version header (Square only).
    api_version: Option<String>,
}

impl ProviderClient {
    /// Creates a client for one provider call batch.
    pub fn new(
        provider: Provider,
        base_url: impl Into<String>,
        access_token: impl Into<String>,
        api_version: Option<String>,
    ) -> PosResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(ProviderClient {
            http,
            provider,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            api_version,
        })
    }

    /// GET a provider resource.
    pub async fn get(&self, path: &str) -> PosResult<Value> {
        self.request(Method::GET, path, None).await
    }

    /// POST a JSON body to a provider resource.
    pub async fn post(&self, path: &str, body: &Value) -> PosResult<Value> {
        self.request(Method::POST, path, Some(body)).await
    }

    /// Performs one logical call with bounded rate-limit retries.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> PosResult<Value> {
        let url = format!("{}{}", self.base_url, path);

        for attempt in 0..MAX_ATTEMPTS {
            let mut request = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&self.access_token);
            if let Some(version) = &self.api_version {
                request = request.header("Square-Version", version);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                // Last attempt exhausted: surface the failure instead of
                // retrying forever.
                if attempt + 1 == MAX_ATTEMPTS {
                    warn!(
                        provider = %self.provider,
                        url = %url,
                        attempts = MAX_ATTEMPTS,
                        "Rate limit persisted, giving up"
                    );
                    return Err(PosError::RateLimited { attempts: MAX_ATTEMPTS });
                }
                let delay = backoff_delay_with_jitter(attempt);
                debug!(
                    provider = %self.provider,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited, backing off"
                );
                sleep(delay).await;
                continue;
            }

            if status == StatusCode::UNAUTHORIZED {
                warn!(provider = %self.provider, url = %url, "Provider rejected credentials");
                return Err(PosError::AuthFailed { provider: self.provider });
            }

            let body_text = response.text().await.unwrap_or_default();

            if !status.is_success() {
                warn!(
                    provider = %self.provider,
                    url = %url,
                    status = status.as_u16(),
                    body = %body_text,
                    "Provider returned error response"
                );
                return Err(PosError::Http {
                    status: status.as_u16(),
                    body: body_text,
                });
            }

            if body_text.is_empty() {
                return Ok(Value::Null);
            }
            return Ok(serde_json::from_str(&body_text)?);
        }

        // Loop always returns from the final attempt.
        Err(PosError::RateLimited { attempts: MAX_ATTEMPTS })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
