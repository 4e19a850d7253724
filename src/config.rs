use crate::error::{Error, Result};
use reqwest::StatusCode;
use std::env;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.opensubtitles.com/api/v1";

/// Which status codes count as a successful API response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OkPolicy {
    /// 200..=299
    #[default]
    Success2xx,
    /// Anything below 400, redirects included.
    Below400,
}

impl OkPolicy {
    pub fn is_ok(self, status: StatusCode) -> bool {
        match self {
            OkPolicy::Success2xx => status.is_success(),
            OkPolicy::Below400 => status.as_u16() < 400,
        }
    }
}

/// What a paginated search returns when a later page fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartialPages {
    #[default]
    Discard,
    Keep,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts (first try included) for 429 responses.
    pub max_attempts: u32,
    /// Total attempts (first try included) for 502 responses.
    pub max_bad_gateway_attempts: u32,
    pub bad_gateway_delay: Duration,
    /// Cool-down applied before handing a 4xx response back to the caller.
    pub client_error_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_bad_gateway_attempts: 4,
            bad_gateway_delay: Duration::from_millis(500),
            client_error_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitSettings {
    pub window: Duration,
    pub max_requests_per_window: u32,
    /// Used when the server has not told us when the current limit resets.
    pub fallback_reset: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(10),
            max_requests_per_window: 40,
            fallback_reset: Duration::from_secs(5),
        }
    }
}

/// Runtime configuration for the OpenSubtitles client.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: Option<String>,
    pub api_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub user_agent: String,
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
    pub rate_limit: RateLimitSettings,
    pub ok_policy: OkPolicy,
    pub partial_pages: PartialPages,
}

pub fn default_user_agent() -> String {
    format!("opensubtitles-client/{}", env!("CARGO_PKG_VERSION"))
}

impl Config {
    /// Defaults against the public API with the given key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            api_url: DEFAULT_API_URL.to_string(),
            username: None,
            password: None,
            user_agent: default_user_agent(),
            timeout_secs: 30,
            retry: RetryPolicy::default(),
            rate_limit: RateLimitSettings::default(),
            ok_policy: OkPolicy::default(),
            partial_pages: PartialPages::default(),
        }
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Load configuration from environment.
    ///
    /// Env vars:
    /// - OPENSUBTITLES_API_KEY (checked when an API request is made)
    /// - OPENSUBTITLES_API_URL (default: https://api.opensubtitles.com/api/v1)
    /// - OPENSUBTITLES_USERNAME / OPENSUBTITLES_PASSWORD
    /// - OPENSUBTITLES_USER_AGENT (default: opensubtitles-client/<version>)
    /// - OPENSUBTITLES_HTTP_TIMEOUT_SECS (default: 30)
    /// - OPENSUBTITLES_MAX_ATTEMPTS (default: 5)
    /// - OPENSUBTITLES_MAX_BAD_GATEWAY_ATTEMPTS (default: 4)
    /// - OPENSUBTITLES_FALLBACK_RESET_SECS (default: 5)
    /// - OPENSUBTITLES_BAD_GATEWAY_DELAY_MS (default: 500)
    /// - OPENSUBTITLES_CLIENT_ERROR_DELAY_MS (default: 1000)
    /// - OPENSUBTITLES_OK_BELOW_400 (default: false)
    /// - OPENSUBTITLES_KEEP_PARTIAL_PAGES (default: false)
    pub fn from_env() -> Result<Self> {
        let api_key = non_empty_var("OPENSUBTITLES_API_KEY");
        let api_url = non_empty_var("OPENSUBTITLES_API_URL")
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let user_agent = non_empty_var("OPENSUBTITLES_USER_AGENT").unwrap_or_else(default_user_agent);

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: parse_var("OPENSUBTITLES_MAX_ATTEMPTS")?.unwrap_or(defaults.max_attempts),
            max_bad_gateway_attempts: parse_var("OPENSUBTITLES_MAX_BAD_GATEWAY_ATTEMPTS")?
                .unwrap_or(defaults.max_bad_gateway_attempts),
            bad_gateway_delay: parse_var("OPENSUBTITLES_BAD_GATEWAY_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.bad_gateway_delay),
            client_error_delay: parse_var("OPENSUBTITLES_CLIENT_ERROR_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.client_error_delay),
        };
        let rate_limit = RateLimitSettings {
            fallback_reset: parse_var("OPENSUBTITLES_FALLBACK_RESET_SECS")?
                .map(Duration::from_secs)
                .unwrap_or_else(|| RateLimitSettings::default().fallback_reset),
            ..RateLimitSettings::default()
        };
        let ok_policy = if flag_var("OPENSUBTITLES_OK_BELOW_400") {
            OkPolicy::Below400
        } else {
            OkPolicy::Success2xx
        };
        let partial_pages = if flag_var("OPENSUBTITLES_KEEP_PARTIAL_PAGES") {
            PartialPages::Keep
        } else {
            PartialPages::Discard
        };

        Ok(Self {
            api_key,
            api_url,
            username: non_empty_var("OPENSUBTITLES_USERNAME"),
            password: non_empty_var("OPENSUBTITLES_PASSWORD"),
            user_agent,
            timeout_secs: parse_var("OPENSUBTITLES_HTTP_TIMEOUT_SECS")?.unwrap_or(30),
            retry,
            rate_limit,
            ok_policy,
            partial_pages,
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn flag_var(key: &str) -> bool {
    matches!(
        non_empty_var(key).map(|s| s.to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes")
    )
}

fn parse_var<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match non_empty_var(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{key} must be a non-negative integer, got {raw:?}"))),
    }
}
