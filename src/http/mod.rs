pub mod rate_limit;

use crate::config::Config;
use crate::error::{Error, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// One HTTP exchange as seen by the dispatcher.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: String,
    /// Lower-cased header names, first value wins.
    pub headers: HashMap<String, String>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Server supplied diagnostic (`x-reason`), if any.
    pub fn reason(&self) -> Option<&str> {
        self.header("x-reason").filter(|s| !s.trim().is_empty())
    }
}

pub fn build_client(cfg: &Config) -> Result<Client> {
    let mut default_headers = HeaderMap::new();
    let user_agent = HeaderValue::from_str(&cfg.user_agent)
        .map_err(|e| Error::Config(format!("invalid user agent {:?}: {}", cfg.user_agent, e)))?;
    default_headers.insert(USER_AGENT, user_agent);
    default_headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    // Request level headers override these defaults.
    let client = Client::builder()
        .default_headers(default_headers)
        .timeout(Duration::from_secs(cfg.timeout_secs))
        .use_rustls_tls()
        .build()?;
    Ok(client)
}

/// Performs single requests: no retries, no interpretation of the status code.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Ok(Self::new(build_client(cfg)?))
    }

    pub async fn send(
        &self,
        url: &str,
        method: &Method,
        body: Option<&Value>,
        headers: &HashMap<String, String>,
    ) -> reqwest::Result<HttpResponse> {
        let mut request = self.client.request(method.clone(), url);
        if *method != Method::GET {
            if let Some(body) = body {
                request = request.json(body);
            }
        }
        for (key, value) in headers {
            if key.eq_ignore_ascii_case("authorization") {
                request = request.bearer_auth(value);
            } else {
                request = request.header(key.as_str(), value.as_str());
            }
        }

        let res = request.send().await?;
        let status = res.status();
        let headers = normalize_headers(res.headers());
        let body = res.text().await?;
        Ok(HttpResponse {
            status,
            body,
            headers,
        })
    }
}

pub fn normalize_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut out = HashMap::with_capacity(headers.len());
    for (name, value) in headers {
        let Ok(value) = value.to_str() else { continue };
        out.entry(name.as_str().to_ascii_lowercase())
            .or_insert_with(|| value.to_string());
    }
    out
}

/// Append query parameters to `path`, keys sorted, values form-encoded.
pub fn add_query_string(path: &str, params: &HashMap<String, String>) -> String {
    if params.is_empty() {
        return path.to_string();
    }
    let mut pairs: Vec<(&String, &String)> = params.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    let query = pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", form_encode(k), form_encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}?{}", path, query)
}

fn form_encode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}
