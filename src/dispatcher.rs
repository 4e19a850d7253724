use crate::config::{Config, RetryPolicy};
use crate::error::{Error, Result};
use crate::http::rate_limit::{sleep_or_cancel, RateLimiter};
use crate::http::{HttpResponse, HttpTransport};
use log::{debug, warn};
use reqwest::header::RETRY_AFTER;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Routes requests through the transport, throttling and retrying calls to the API host.
///
/// Calls to any other host (pre-signed download links) go straight through:
/// no `Api-Key`, no rate accounting, no retries.
#[derive(Debug, Clone)]
pub struct RequestHandler {
    transport: HttpTransport,
    limiter: Arc<RateLimiter>,
    api_key: Option<String>,
    base_url: String,
    retry: RetryPolicy,
}

impl RequestHandler {
    pub fn new(transport: HttpTransport, limiter: Arc<RateLimiter>, cfg: &Config) -> Self {
        Self {
            transport,
            limiter,
            api_key: cfg.api_key.clone(),
            base_url: cfg.api_url.trim_end_matches('/').to_string(),
            retry: cfg.retry.clone(),
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let transport = HttpTransport::from_config(cfg)?;
        let limiter = Arc::new(RateLimiter::new(cfg.rate_limit.clone()));
        Ok(Self::new(transport, limiter, cfg))
    }

    /// Same transport and rate limiter, different API key.
    pub fn with_api_key(&self, api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..self.clone()
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn resolve(&self, endpoint: &str) -> String {
        if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            endpoint.to_string()
        }
    }

    fn is_api_url(&self, url: &str) -> bool {
        url.starts_with(&self.base_url)
    }

    pub async fn send_request(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<&Value>,
        headers: Option<&HashMap<String, String>>,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        let url = self.resolve(endpoint);
        let is_api = self.is_api_url(&url);
        let mut headers = headers.cloned().unwrap_or_default();

        if is_api {
            let key = self
                .api_key
                .as_deref()
                .filter(|k| !k.trim().is_empty())
                .ok_or(Error::MissingApiKey)?;
            if !headers.keys().any(|k| k.eq_ignore_ascii_case("api-key")) {
                headers.insert("Api-Key".to_string(), key.to_string());
            }
        }

        let mut attempt: u32 = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if is_api {
                self.limiter.acquire(cancel).await?;
            }

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                res = self.transport.send(&url, &method, body, &headers) => res?,
            };

            if !is_api {
                return Ok(response);
            }

            self.limiter.record(&response.headers).await;
            let status = response.status;
            debug!("{} {} -> {} (attempt {})", method, url, status, attempt);

            if status == StatusCode::TOO_MANY_REQUESTS && attempt < self.retry.max_attempts {
                let backoff = self.throttle_backoff(&response).await;
                warn!(
                    "{} {} throttled (attempt {}/{}), backoff {:?}",
                    method, url, attempt, self.retry.max_attempts, backoff
                );
                sleep_or_cancel(backoff, cancel).await?;
                attempt += 1;
                continue;
            }

            if status == StatusCode::BAD_GATEWAY && attempt < self.retry.max_bad_gateway_attempts {
                warn!(
                    "{} {} bad gateway (attempt {}/{}), backoff {:?}",
                    method, url, attempt, self.retry.max_bad_gateway_attempts, self.retry.bad_gateway_delay
                );
                sleep_or_cancel(self.retry.bad_gateway_delay, cancel).await?;
                attempt += 1;
                continue;
            }

            if status.is_client_error() {
                if let Some(reason) = response.reason() {
                    debug!("{} {} rejected: {}", method, url, reason);
                }
                sleep_or_cancel(self.retry.client_error_delay, cancel).await?;
            }

            return Ok(response);
        }
    }

    /// Server reset hint first, then `retry-after`, then the configured fallback.
    async fn throttle_backoff(&self, response: &HttpResponse) -> Duration {
        if let Some(reset) = self.limiter.reset_seconds().await {
            return Duration::from_secs(reset);
        }
        response
            .header(RETRY_AFTER.as_str())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(self.limiter.settings().fallback_reset)
    }
}
