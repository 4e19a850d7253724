//! Client-side approximation of the API's rate limits.
//!
//! Two limits are tracked: the per-second budget reported through response
//! headers, and a local count of requests inside a fixed 10 second window
//! (40 requests per window on the public API).

use crate::config::RateLimitSettings;
use crate::error::{Error, Result};
use log::debug;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const REMAINING_SECOND_HEADER: &str = "x-ratelimit-remaining-second";
pub const RESET_HEADER: &str = "ratelimit-reset";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitState {
    /// Last `x-ratelimit-remaining-second`; `None` when unknown.
    pub remaining_per_second: Option<i64>,
    /// Last `ratelimit-reset` in seconds; `None` when unknown.
    pub reset_seconds: Option<u64>,
    pub window_start: Option<Instant>,
    pub requests_in_window: u32,
}

impl RateLimitState {
    /// Fold rate limit headers into the state. Missing or non-numeric values keep what we had.
    pub fn apply_headers(&mut self, headers: &HashMap<String, String>) {
        if let Some(remaining) = parse_header::<i64>(headers, REMAINING_SECOND_HEADER) {
            self.remaining_per_second = Some(remaining);
        }
        if let Some(reset) = parse_header::<u64>(headers, RESET_HEADER) {
            self.reset_seconds = Some(reset);
        }
    }

    fn forget_server_hints(&mut self) {
        self.remaining_per_second = None;
        self.reset_seconds = None;
    }
}

fn parse_header<T: std::str::FromStr>(headers: &HashMap<String, String>, name: &str) -> Option<T> {
    headers.get(name).and_then(|v| v.trim().parse::<T>().ok())
}

/// Sleep for `duration` unless `cancel` fires first.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    if duration.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<RateLimitState>,
    settings: RateLimitSettings,
}

impl RateLimiter {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            state: Mutex::new(RateLimitState::default()),
            settings,
        }
    }

    pub fn settings(&self) -> &RateLimitSettings {
        &self.settings
    }

    /// Wait until a request may be sent, then count it against the current window.
    ///
    /// The lock is held while waiting so concurrent callers queue up behind the
    /// throttled one instead of all firing once the wait ends.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<()> {
        let mut state = self.state.lock().await;

        if state.remaining_per_second == Some(0) {
            let wait = state
                .reset_seconds
                .map(Duration::from_secs)
                .unwrap_or(self.settings.fallback_reset);
            debug!("per-second budget exhausted, waiting {:?}", wait);
            sleep_or_cancel(wait, cancel).await?;
            state.forget_server_hints();
        }

        if state.requests_in_window >= self.settings.max_requests_per_window {
            if let Some(start) = state.window_start {
                let elapsed = start.elapsed();
                if elapsed < self.settings.window {
                    let wait = self.settings.window - elapsed;
                    debug!(
                        "{} requests in current window, waiting {:?}",
                        state.requests_in_window, wait
                    );
                    sleep_or_cancel(wait, cancel).await?;
                    state.forget_server_hints();
                }
            }
        }

        let now = Instant::now();
        let window_open = state
            .window_start
            .is_some_and(|start| now.duration_since(start) < self.settings.window);
        if !window_open {
            state.window_start = Some(now);
            state.requests_in_window = 0;
        }
        state.requests_in_window += 1;
        Ok(())
    }

    pub async fn record(&self, headers: &HashMap<String, String>) {
        self.state.lock().await.apply_headers(headers);
    }

    pub async fn reset_seconds(&self) -> Option<u64> {
        self.state.lock().await.reset_seconds
    }

    pub async fn snapshot(&self) -> RateLimitState {
        self.state.lock().await.clone()
    }
}
