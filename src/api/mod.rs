//! Typed calls to the OpenSubtitles REST endpoints.

mod response;

pub use response::ApiResponse;

use crate::config::{Config, OkPolicy, PartialPages};
use crate::dispatcher::RequestHandler;
use crate::error::{Error, Result};
use crate::http::{add_query_string, HttpResponse};
use crate::session::LoginInfo;
use crate::types::{
    EncapsulatedLanguageList, EncapsulatedUserInfo, ResponseData, SearchResult, SubtitleDownloadInfo,
};
use log::{debug, warn};
use reqwest::Method;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct OpenSubtitlesApi {
    handler: RequestHandler,
    ok_policy: OkPolicy,
    partial_pages: PartialPages,
}

fn bearer(login: &LoginInfo) -> Result<HashMap<String, String>> {
    let token = login.token().ok_or(Error::MissingToken)?;
    Ok(HashMap::from([("Authorization".to_string(), token.to_string())]))
}

impl OpenSubtitlesApi {
    pub fn new(handler: RequestHandler, cfg: &Config) -> Self {
        Self {
            handler,
            ok_policy: cfg.ok_policy,
            partial_pages: cfg.partial_pages,
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Ok(Self::new(RequestHandler::from_config(cfg)?, cfg))
    }

    /// Same client and rate limiter, different API key.
    pub fn with_api_key(&self, api_key: impl Into<String>) -> Self {
        Self {
            handler: self.handler.with_api_key(api_key),
            ..self.clone()
        }
    }

    pub fn handler(&self) -> &RequestHandler {
        &self.handler
    }

    pub fn ok_policy(&self) -> OkPolicy {
        self.ok_policy
    }

    pub async fn login(
        &self,
        username: &str,
        password: &str,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse<LoginInfo>> {
        let body = serde_json::json!({ "username": username, "password": password });
        let response = self
            .handler
            .send_request("/login", Method::POST, Some(&body), None, cancel)
            .await?;
        ApiResponse::from_response(&response, self.ok_policy, "login")
    }

    pub async fn logout(&self, login: &LoginInfo, cancel: &CancellationToken) -> Result<bool> {
        let headers = bearer(login)?;
        let response = self
            .handler
            .send_request("/logout", Method::DELETE, None, Some(&headers), cancel)
            .await?;
        Ok(self.ok_policy.is_ok(response.status))
    }

    pub async fn user_info(
        &self,
        login: &LoginInfo,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse<EncapsulatedUserInfo>> {
        let headers = bearer(login)?;
        let response = self
            .handler
            .send_request("/infos/user", Method::GET, None, Some(&headers), cancel)
            .await?;
        ApiResponse::from_response(&response, self.ok_policy, "user info")
    }

    /// Ask for a download link; this consumes one download from the daily quota.
    pub async fn subtitle_link(
        &self,
        file_id: u64,
        format: &str,
        login: &LoginInfo,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse<SubtitleDownloadInfo>> {
        let headers = bearer(login)?;
        let body = serde_json::json!({ "file_id": file_id, "sub_format": format });
        let response = self
            .handler
            .send_request("/download", Method::POST, Some(&body), Some(&headers), cancel)
            .await?;
        ApiResponse::from_response(&response, self.ok_policy, &format!("file id: {file_id}"))
    }

    /// Fetch a pre-signed subtitle link. Not an API call: no key, no throttling.
    pub async fn download_subtitle(&self, url: &str, cancel: &CancellationToken) -> Result<HttpResponse> {
        self.handler
            .send_request(url, Method::GET, None, None, cancel)
            .await
    }

    pub async fn languages(&self, cancel: &CancellationToken) -> Result<ApiResponse<EncapsulatedLanguageList>> {
        let response = self
            .handler
            .send_request("/infos/languages", Method::GET, None, None, cancel)
            .await?;
        ApiResponse::from_response(&response, self.ok_policy, "languages")
    }

    /// Run a search and fold every page into one list, in page order.
    ///
    /// Stops on an empty page, on `total_pages == 0`, or once the page after the
    /// last reported one would be requested. The page count is taken from the
    /// first page.
    pub async fn search_subtitles(
        &self,
        options: &HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse<Vec<ResponseData>>> {
        let mut options = options.clone();
        let mut collected: Vec<ResponseData> = Vec::new();
        let mut total_pages: Option<u32> = None;
        let mut current: u32 = 1;
        let mut last_ok: Option<HttpResponse> = None;

        let last = loop {
            options.insert("page".to_string(), current.to_string());
            let url = add_query_string("/subtitles", &options);
            let response = self
                .handler
                .send_request(&url, Method::GET, None, None, cancel)
                .await?;
            let page: ApiResponse<SearchResult> =
                ApiResponse::from_response(&response, self.ok_policy, &format!("url: {url}, page: {current}"))?;

            if !page.ok() {
                return Ok(self.on_failed_page(collected, last_ok, &response, current));
            }
            let result = page.data.unwrap_or_default();
            if result.total_pages == 0 || result.data.is_empty() {
                debug!("search page {} empty, stopping", current);
                break response;
            }

            let total = *total_pages.get_or_insert(result.total_pages);
            debug!("search page {}/{}: {} items", result.page, total, result.data.len());
            collected.extend(result.data);
            match result.page.max(current).checked_add(1) {
                Some(next) if next <= total => current = next,
                _ => break response,
            }
            last_ok = Some(response);
        };

        Ok(ApiResponse::with_data(collected, &last, self.ok_policy))
    }

    fn on_failed_page(
        &self,
        collected: Vec<ResponseData>,
        last_ok: Option<HttpResponse>,
        failed: &HttpResponse,
        page: u32,
    ) -> ApiResponse<Vec<ResponseData>> {
        match (self.partial_pages, last_ok) {
            (PartialPages::Keep, Some(last)) => {
                warn!(
                    "search page {} failed with {}, keeping {} results from earlier pages",
                    page,
                    failed.status,
                    collected.len()
                );
                ApiResponse::with_data(collected, &last, self.ok_policy)
            }
            _ => {
                warn!("search page {} failed with {}", page, failed.status);
                ApiResponse::without_data(failed, self.ok_policy)
            }
        }
    }
}
