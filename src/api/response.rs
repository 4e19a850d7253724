use crate::config::OkPolicy;
use crate::error::{truncate_body, Error, Result};
use crate::http::HttpResponse;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

/// A decoded API reply. `data` is only populated for ok responses.
#[derive(Debug, Clone)]
pub struct ApiResponse<T> {
    pub data: Option<T>,
    pub body: String,
    pub code: StatusCode,
    ok: bool,
}

impl<T> ApiResponse<T> {
    /// Wrap already decoded data (aggregated search pages) with the status of `response`.
    pub fn with_data(data: T, response: &HttpResponse, policy: OkPolicy) -> Self {
        let mut out = Self::without_data(response, policy);
        out.data = Some(data);
        out
    }

    pub fn without_data(response: &HttpResponse, policy: OkPolicy) -> Self {
        let ok = policy.is_ok(response.status);
        let mut body = response.body.clone();
        if !ok && body.trim().is_empty() {
            if let Some(reason) = response.reason() {
                body = reason.to_string();
            }
        }
        Self {
            data: None,
            body,
            code: response.status,
            ok,
        }
    }

    pub fn ok(&self) -> bool {
        self.ok
    }

    /// Data of an ok response, or a typed error describing why there is none.
    pub fn into_data(self, context: &str) -> Result<T> {
        if !self.ok {
            return Err(Error::RequestFailed {
                context: context.to_string(),
                code: self.code,
                body: truncate_body(&self.body),
            });
        }
        self.data
            .ok_or_else(|| Error::NotFound(format!("{context}: empty response")))
    }
}

impl<T: DeserializeOwned> ApiResponse<T> {
    /// Decode `response`, skipping the body entirely when the status is not ok.
    pub fn from_response(response: &HttpResponse, policy: OkPolicy, context: &str) -> Result<Self> {
        let mut out = Self::without_data(response, policy);
        if !out.ok {
            return Ok(out);
        }
        let data = serde_json::from_str::<Option<T>>(&out.body).map_err(|source| Error::Parse {
            code: out.code,
            context: context.to_string(),
            body: truncate_body(&out.body),
            source,
        })?;
        out.data = data;
        Ok(out)
    }

    /// Best-effort decode of the body regardless of status; error payloads sometimes carry data.
    pub fn parse_body(&self) -> Option<T> {
        serde_json::from_str(&self.body).ok()
    }
}
