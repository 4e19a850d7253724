use chrono::{DateTime, Utc};
use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("provided API key is blank")]
    MissingApiKey,

    #[error("account username and/or password are not set up")]
    MissingCredentials,

    #[error("no session token, log in first")]
    MissingToken,

    #[error("authentication to OpenSubtitles failed: {code} - {message}")]
    Authentication {
        code: StatusCode,
        message: String,
        /// The server rejected the credentials themselves; retrying with the same ones is futile.
        credentials_invalid: bool,
    },

    #[error("OpenSubtitles download limit reached")]
    RateLimitExceeded { reset_at: Option<DateTime<Utc>> },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("request failed ({context}): {code} - {body}")]
    RequestFailed {
        context: String,
        code: StatusCode,
        body: String,
    },

    #[error("failed to parse response, code: {code}, context: {context}, body: {body}")]
    Parse {
        code: StatusCode,
        context: String,
        body: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid subtitle id format: {0}")]
    InvalidSubtitleId(String),

    #[error("language '{language}' is not supported ({media})")]
    UnsupportedLanguage { language: String, media: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

const MAX_BODY_CHARS: usize = 512;

/// Shorten a response body for inclusion in an error message.
pub fn truncate_body(body: &str) -> String {
    if body.trim().is_empty() {
        return "\"\"".to_string();
    }
    if body.to_ascii_lowercase().contains("<html") {
        return "[html]".to_string();
    }
    let mut out: String = body.chars().take(MAX_BODY_CHARS).collect();
    if body.chars().count() > MAX_BODY_CHARS {
        out.push_str("...");
    }
    out
}
