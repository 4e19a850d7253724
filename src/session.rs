use crate::types::UserInfo;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of `POST /login`. The token is a JWT whose `exp` claim bounds the session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoginInfo {
    #[serde(default)]
    pub user: Option<UserInfo>,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Deserialize)]
struct JwtPayload {
    #[serde(default)]
    exp: i64,
}

impl LoginInfo {
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.trim().is_empty())
    }

    /// `None` when there is no token or its payload cannot be decoded.
    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        self.token().and_then(token_expiration)
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration().is_some_and(|exp| now < exp)
    }

    pub fn remaining_downloads(&self) -> Option<i64> {
        self.user.as_ref().and_then(|u| u.remaining_downloads)
    }
}

/// Read the `exp` claim of a JWT without verifying its signature.
pub fn token_expiration(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let payload = payload.trim_end_matches('=');
    // Tokens are base64url, but tolerate the standard alphabet too.
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| base64::engine::general_purpose::STANDARD_NO_PAD.decode(payload))
        .ok()?;
    let claims: JwtPayload = serde_json::from_slice(&bytes).ok()?;
    DateTime::<Utc>::from_timestamp(claims.exp, 0)
}

#[cfg(test)]
pub(crate) fn fake_jwt(exp: i64) -> String {
    let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let header = engine.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = engine.encode(format!(r#"{{"sub":"u","exp":{}}}"#, exp));
    format!("{}.{}.sig", header, payload)
}
