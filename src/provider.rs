//! Subtitle provider built on top of [`OpenSubtitlesApi`].
//!
//! Owns the session (login token, daily download quota, language list, broken
//! file ids) and turns media descriptions into searches and downloads.

use crate::api::OpenSubtitlesApi;
use crate::config::Config;
use crate::error::{truncate_body, Error, Result};
use crate::hash::compute_file_hash;
use crate::session::LoginInfo;
use crate::subtitle_id::SubtitleId;
use crate::types::{Attributes, ErrorResponse, ResponseData, UserInfo};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub const PROVIDER_NAME: &str = "Open Subtitles";
const SUBTITLE_FORMAT: &str = "srt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    Movie,
    Episode,
}

impl ContentType {
    fn query_value(self) -> &'static str {
        match self {
            ContentType::Movie => "movie",
            ContentType::Episode => "episode",
        }
    }

    fn feature_type(self) -> &'static str {
        match self {
            ContentType::Movie => "Movie",
            ContentType::Episode => "Episode",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub content_type: ContentType,
    /// Requested language code, e.g. `en`, `pt-BR`.
    pub language: String,
    pub media_path: Option<PathBuf>,
    /// IMDb id, with or without the `tt` prefix.
    pub imdb_id: Option<String>,
    pub series_name: Option<String>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    /// Only accept results matched by movie hash.
    pub perfect_match: bool,
    /// Unattended search (scheduled task) rather than a user request.
    pub automated: bool,
}

impl SearchRequest {
    fn imdb_number(&self) -> Option<u64> {
        self.imdb_id
            .as_deref()
            .map(|s| s.trim().trim_start_matches('t'))
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|id| *id != 0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoteSubtitleInfo {
    pub id: String,
    pub provider_name: String,
    pub name: Option<String>,
    pub format: String,
    pub language: String,
    pub author: Option<String>,
    pub comment: Option<String>,
    pub community_rating: f32,
    pub download_count: i64,
    pub date_created: Option<DateTime<Utc>>,
    pub is_hash_match: Option<bool>,
    pub hearing_impaired: Option<bool>,
    pub machine_translated: Option<bool>,
    pub ai_translated: Option<bool>,
    pub frame_rate: Option<f32>,
    pub forced: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubtitleFile {
    pub format: String,
    pub language: String,
    pub content: String,
    pub forced: bool,
    pub hearing_impaired: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn from_config(cfg: &Config) -> Option<Self> {
        Some(Self {
            username: cfg.username.clone()?,
            password: cfg.password.clone()?,
        })
    }

    fn is_blank(&self) -> bool {
        self.username.trim().is_empty() || self.password.trim().is_empty()
    }
}

/// Outcome of checking a username/password (and optional API key) against the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LoginCheck {
    #[serde(rename = "Downloads")]
    Valid(i64),
    #[serde(rename = "Message")]
    Rejected(String),
}

#[derive(Debug, Default)]
struct ProviderState {
    credentials: Option<Credentials>,
    credentials_invalid: bool,
    login: Option<LoginInfo>,
    limit_reset: Option<DateTime<Utc>>,
    last_ratelimit_log: Option<DateTime<Utc>>,
    languages: Vec<String>,
    bad_file_ids: HashSet<u64>,
}

#[derive(Debug)]
pub struct SubtitleProvider {
    api: OpenSubtitlesApi,
    state: Mutex<ProviderState>,
}

impl SubtitleProvider {
    pub fn new(api: OpenSubtitlesApi, credentials: Option<Credentials>) -> Self {
        Self {
            api,
            state: Mutex::new(ProviderState {
                credentials,
                ..ProviderState::default()
            }),
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Ok(Self::new(OpenSubtitlesApi::from_config(cfg)?, Credentials::from_config(cfg)))
    }

    pub fn api(&self) -> &OpenSubtitlesApi {
        &self.api
    }

    /// Swap credentials; the next request logs in again.
    pub async fn configure(&self, credentials: Option<Credentials>) {
        let mut state = self.state.lock().await;
        state.credentials = credentials;
        state.credentials_invalid = false;
        state.login = None;
    }

    /// True once the service rejected the configured credentials. Callers may persist this.
    pub async fn credentials_invalid(&self) -> bool {
        self.state.lock().await.credentials_invalid
    }

    /// Current session, logging in when there is none or the token expired.
    ///
    /// `Ok(None)` means login was skipped because the credentials are known to be invalid.
    pub async fn ensure_login(&self, cancel: &CancellationToken) -> Result<Option<LoginInfo>> {
        let mut state = self.state.lock().await;
        if let Some(login) = state.login.as_ref().filter(|l| l.is_valid_at(Utc::now())) {
            return Ok(Some(login.clone()));
        }

        let creds = match state.credentials.clone() {
            Some(c) if !c.is_blank() => c,
            _ => return Err(Error::MissingCredentials),
        };
        if state.credentials_invalid {
            debug!("Skipping login due to credentials being invalid");
            return Ok(None);
        }

        let response = self.api.login(&creds.username, &creds.password, cancel).await?;
        if !response.ok() {
            let invalid = rejects_credentials(response.code, &creds.username);
            if invalid {
                error!(
                    "Login failed due to invalid credentials, invalidating them ({} - {})",
                    response.code,
                    truncate_body(&response.body)
                );
                state.credentials_invalid = true;
            } else {
                error!("Login failed: {} - {}", response.code, truncate_body(&response.body));
            }
            return Err(Error::Authentication {
                code: response.code,
                message: truncate_body(&response.body),
                credentials_invalid: invalid,
            });
        }

        let login = response.data.unwrap_or_default();
        if login.token().is_none() {
            return Err(Error::Authentication {
                code: response.code,
                message: "login response carried no token".to_string(),
                credentials_invalid: false,
            });
        }
        state.login = Some(login);
        self.refresh_user_info(&mut state, cancel).await?;
        debug!(
            "Logged in, download limit reset at {:?}, token expiration at {:?}",
            state.limit_reset,
            state.login.as_ref().and_then(LoginInfo::expiration)
        );
        Ok(state.login.clone())
    }

    async fn refresh_user_info(&self, state: &mut ProviderState, cancel: &CancellationToken) -> Result<()> {
        let Some(login) = state.login.clone() else {
            return Ok(());
        };
        let response = self.api.user_info(&login, cancel).await?;
        if !response.ok() {
            warn!("Failed to fetch user info: {} - {}", response.code, truncate_body(&response.body));
            return Ok(());
        }
        let user = response.data.and_then(|d| d.data);
        state.limit_reset = user.as_ref().and_then(|u| u.reset_time_utc);
        if let Some(current) = state.login.as_mut() {
            current.user = user;
        }
        Ok(())
    }

    /// Quota information for the logged in account.
    pub async fn user_quota(&self, cancel: &CancellationToken) -> Result<UserInfo> {
        let login = self.ensure_login(cancel).await?.ok_or_else(unable_to_login)?;
        login
            .user
            .ok_or_else(|| Error::NotFound("user info unavailable".to_string()))
    }

    pub async fn languages(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        {
            let state = self.state.lock().await;
            if !state.languages.is_empty() {
                return Ok(state.languages.clone());
            }
        }
        let response = self.api.languages(cancel).await?;
        let code = response.code;
        let list = response
            .into_data("language list")?
            .data
            .ok_or_else(|| Error::NotFound(format!("language list empty ({code})")))?;
        let codes: Vec<String> = list
            .into_iter()
            .filter_map(|l| l.language_code)
            .filter(|c| !c.trim().is_empty())
            .collect();
        self.state.lock().await.languages = codes.clone();
        Ok(codes)
    }

    async fn resolve_language(&self, language: &str, media: &Path, cancel: &CancellationToken) -> Result<String> {
        let available = self.languages(cancel).await?;
        match_language(&available, language).ok_or_else(|| Error::UnsupportedLanguage {
            language: language.to_string(),
            media: media.display().to_string(),
        })
    }

    pub async fn search(&self, request: &SearchRequest, cancel: &CancellationToken) -> Result<Vec<RemoteSubtitleInfo>> {
        let login = self.ensure_login(cancel).await?;

        if request.automated {
            let Some(login) = login.as_ref() else {
                debug!("Returning empty results because login failed");
                return Ok(Vec::new());
            };
            if login.remaining_downloads().is_some_and(|r| r <= 0) {
                self.log_daily_limit().await;
                return Ok(Vec::new());
            }
        }

        if request.content_type == ContentType::Episode
            && (request.season.is_none()
                || request.episode.is_none()
                || request.series_name.as_deref().map_or(true, |s| s.trim().is_empty()))
        {
            debug!("Episode information missing");
            return Ok(Vec::new());
        }

        let Some(media_path) = request
            .media_path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
        else {
            debug!("Path missing");
            return Ok(Vec::new());
        };

        let language = self.resolve_language(&request.language, media_path, cancel).await?;
        let hash = hash_media(media_path).await?;
        let imdb_id = request.imdb_number();
        let options = build_search_options(request, &language, hash.as_deref(), imdb_id, media_path);
        debug!("Search query: {:?}", options);

        let response = self.api.search_subtitles(&options, cancel).await?;
        if !response.ok() {
            error!("Invalid response: {} - {}", response.code, truncate_body(&response.body));
            return Ok(Vec::new());
        }
        let Some(items) = response.data else {
            return Ok(Vec::new());
        };

        let bad_ids = if request.automated {
            self.state.lock().await.bad_file_ids.clone()
        } else {
            HashSet::new()
        };

        Ok(items
            .into_iter()
            .filter_map(|item| accept_result(item, request, imdb_id, &bad_ids))
            .map(|attrs| to_remote_info(&attrs, &request.language))
            .collect())
    }

    async fn log_daily_limit(&self) {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let due = state
            .last_ratelimit_log
            .map_or(true, |last| (now - last).num_seconds() > 60);
        if due {
            info!("Daily download limit reached, returning no results for automated task");
            state.last_ratelimit_log = Some(now);
        }
    }

    async fn check_download_quota(&self, cancel: &CancellationToken) -> Result<()> {
        let mut state = self.state.lock().await;
        let exhausted = |s: &ProviderState| {
            s.login
                .as_ref()
                .and_then(LoginInfo::remaining_downloads)
                .is_some_and(|r| r <= 0)
        };
        if !exhausted(&*state) {
            return Ok(());
        }
        if state.limit_reset.is_some_and(|reset| reset < Utc::now()) {
            debug!("Reset time passed, updating user info");
            self.refresh_user_info(&mut state, cancel).await?;
            if !exhausted(&*state) {
                return Ok(());
            }
        }
        error!("OpenSubtitles download limit reached");
        Err(Error::RateLimitExceeded {
            reset_at: state.limit_reset,
        })
    }

    async fn set_remaining_downloads(&self, remaining: i64) {
        let mut state = self.state.lock().await;
        if let Some(user) = state.login.as_mut().and_then(|l| l.user.as_mut()) {
            user.remaining_downloads = Some(remaining);
        }
    }

    /// Download a subtitle by the identifier handed out in search results.
    pub async fn download(&self, id: &str, cancel: &CancellationToken) -> Result<SubtitleFile> {
        if id.trim().is_empty() {
            return Err(Error::InvalidSubtitleId(id.to_string()));
        }
        let mut relogged = false;

        loop {
            self.check_download_quota(cancel).await?;
            let login = self.ensure_login(cancel).await?.ok_or_else(unable_to_login)?;
            let sub_id: SubtitleId = id.parse()?;

            let info = self
                .api
                .subtitle_link(sub_id.file_id, &sub_id.format, &login, cancel)
                .await?;
            let details = info.data.clone().or_else(|| info.parse_body());
            if let Some(reset) = details.as_ref().and_then(|d| d.reset_time_utc) {
                self.state.lock().await.limit_reset = Some(reset);
                debug!("Updated expiration time to {}", reset);
            }

            if !info.ok() {
                if info.code == StatusCode::NOT_ACCEPTABLE && details.as_ref().is_some_and(|d| d.remaining <= 0) {
                    self.set_remaining_downloads(0).await;
                    error!("OpenSubtitles download limit reached");
                    return Err(Error::RateLimitExceeded {
                        reset_at: self.state.lock().await.limit_reset,
                    });
                }
                if info.code == StatusCode::UNAUTHORIZED && !relogged {
                    debug!("Session rejected, logging in again");
                    self.state.lock().await.login = None;
                    relogged = true;
                    continue;
                }
                return Err(Error::RequestFailed {
                    context: format!("download link for file {}", sub_id.file_id),
                    code: info.code,
                    body: truncate_body(&info.body),
                });
            }

            let details = details.unwrap_or_default();
            self.set_remaining_downloads(details.remaining).await;
            info!("Remaining subtitle downloads: {}", details.remaining);

            let Some(link) = details.link.filter(|l| !l.trim().is_empty()) else {
                return Err(Error::NotFound(format!(
                    "Failed to obtain download link for file {}: {} (empty response)",
                    sub_id.file_id, info.code
                )));
            };

            let res = self.api.download_subtitle(&link, cancel).await?;
            if res.status != StatusCode::OK || res.body.trim().is_empty() {
                if res.status == StatusCode::OK {
                    self.state.lock().await.bad_file_ids.insert(sub_id.file_id);
                    return Err(Error::NotFound(format!(
                        "Subtitle with Id {} could not be downloaded: empty body - this is most likely a broken subtitle",
                        sub_id.file_id
                    )));
                }
                return Err(Error::RequestFailed {
                    context: format!("subtitle {}", sub_id.file_id),
                    code: res.status,
                    body: truncate_body(&res.body),
                });
            }

            return Ok(SubtitleFile {
                format: sub_id.format,
                language: sub_id.language,
                content: res.body,
                forced: sub_id.forced,
                hearing_impaired: sub_id.hearing_impaired,
            });
        }
    }

    /// Try a username/password (optionally with a different API key) without touching the session.
    pub async fn validate_login(
        &self,
        username: &str,
        password: &str,
        api_key: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<LoginCheck> {
        let creds = Credentials {
            username: username.to_string(),
            password: password.to_string(),
        };
        if creds.is_blank() {
            return Err(Error::MissingCredentials);
        }
        let api = match api_key.filter(|k| !k.trim().is_empty()) {
            Some(key) => self.api.with_api_key(key),
            None => self.api.clone(),
        };
        let response = api.login(username, password, cancel).await?;
        if !response.ok() {
            return Ok(LoginCheck::Rejected(login_failure_message(response.code, &response.body)));
        }

        let login = response.data.unwrap_or_default();
        if login.token().is_some() {
            match api.logout(&login, cancel).await {
                Ok(true) => {}
                Ok(false) => warn!("Logout after login validation was refused"),
                Err(e) => warn!("Logout after login validation failed: {}", e),
            }
        }
        Ok(LoginCheck::Valid(
            login.user.map(|u| u.allowed_downloads).unwrap_or(0),
        ))
    }
}

fn unable_to_login() -> Error {
    Error::Authentication {
        code: StatusCode::UNAUTHORIZED,
        message: "Unable to login".to_string(),
        credentials_invalid: true,
    }
}

/// 400 for an email used as username, 401 for a bad password, 403 for a rejected API key.
fn rejects_credentials(code: StatusCode, username: &str) -> bool {
    (code == StatusCode::BAD_REQUEST && username.contains('@'))
        || code == StatusCode::UNAUTHORIZED
        || code == StatusCode::FORBIDDEN
}

pub fn login_failure_message(code: StatusCode, body: &str) -> String {
    let mut msg = if body.len() < 150 {
        format!("{} - {}", code.as_u16(), body)
    } else {
        code.as_u16().to_string()
    };
    if body.contains("message\":") {
        if let Some(message) = serde_json::from_str::<ErrorResponse>(body).ok().and_then(|e| e.message) {
            msg = if message == "You cannot consume this service" {
                "Invalid API key provided".to_string()
            } else {
                message
            };
        }
    }
    msg
}

/// Pick the service's spelling of `requested`, falling back to the part before a dash.
pub fn match_language(available: &[String], requested: &str) -> Option<String> {
    let mut candidate = match requested {
        "zh" => "zh-CN",
        "pt" => "pt-PT",
        other => other,
    };
    loop {
        if let Some(found) = available.iter().find(|c| c.eq_ignore_ascii_case(candidate)) {
            return Some(found.clone());
        }
        candidate = candidate.split_once('-')?.0;
    }
}

pub fn build_search_options(
    request: &SearchRequest,
    language: &str,
    hash: Option<&str>,
    imdb_id: Option<u64>,
    media_path: &Path,
) -> HashMap<String, String> {
    let mut options = HashMap::new();
    options.insert("languages".to_string(), language.to_string());

    if request.perfect_match {
        if let Some(hash) = hash {
            options.insert("moviehash".to_string(), hash.to_string());
            options.insert("moviehash_match".to_string(), "only".to_string());
            return options;
        }
    }

    options.insert("type".to_string(), request.content_type.query_value().to_string());
    if let Some(hash) = hash {
        options.insert("moviehash".to_string(), hash.to_string());
    }

    match imdb_id {
        Some(id) => {
            options.insert("imdb_id".to_string(), id.to_string());
        }
        None => {
            let file_name = media_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            options.insert("query".to_string(), file_name);
            if request.content_type == ContentType::Episode {
                if let Some(season) = request.season {
                    options.insert("season_number".to_string(), season.to_string());
                }
                if let Some(episode) = request.episode {
                    options.insert("episode_number".to_string(), episode.to_string());
                }
            }
        }
    }
    options
}

async fn hash_media(path: &Path) -> Result<Option<String>> {
    let is_stream = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("strm"));
    if is_stream {
        return Ok(None);
    }
    let owned = path.to_path_buf();
    let hash = tokio::task::spawn_blocking(move || compute_file_hash(&owned))
        .await
        .map_err(io::Error::other)?
        .map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("IOException while computing hash for {}: {}", path.display(), e),
            )
        })?;
    Ok(Some(hash))
}

fn accept_result(
    item: ResponseData,
    request: &SearchRequest,
    imdb_id: Option<u64>,
    bad_ids: &HashSet<u64>,
) -> Option<Attributes> {
    let attrs = item.attributes?;
    let file_id = attrs.first_file_id()?;
    if request.automated && bad_ids.contains(&file_id) {
        return None;
    }

    let details = attrs.feature_details.as_ref()?;
    if details.feature_type.as_deref() != Some(request.content_type.feature_type()) {
        return None;
    }
    let media_ok = match request.content_type {
        ContentType::Episode => details.season_number == request.season && details.episode_number == request.episode,
        ContentType::Movie => details.imdb_id == imdb_id,
    };
    if !media_ok {
        return None;
    }

    if request.perfect_match && !attrs.moviehash_match.unwrap_or(false) {
        return None;
    }
    Some(attrs)
}

fn to_remote_info(attrs: &Attributes, language: &str) -> RemoteSubtitleInfo {
    let id = SubtitleId {
        format: SUBTITLE_FORMAT.to_string(),
        language: language.to_string(),
        file_id: attrs.first_file_id().unwrap_or_default(),
        hearing_impaired: attrs.hearing_impaired.unwrap_or(false),
        forced: attrs.foreign_parts_only.unwrap_or(false),
    };
    RemoteSubtitleInfo {
        id: id.to_string(),
        provider_name: PROVIDER_NAME.to_string(),
        name: attrs.release.clone(),
        format: SUBTITLE_FORMAT.to_string(),
        language: language.to_string(),
        author: attrs.uploader.as_ref().and_then(|u| u.name.clone()),
        comment: attrs.comments.clone(),
        community_rating: attrs.ratings,
        download_count: attrs.download_count,
        date_created: attrs.upload_date,
        is_hash_match: attrs.moviehash_match,
        hearing_impaired: attrs.hearing_impaired,
        machine_translated: attrs.machine_translated,
        ai_translated: attrs.ai_translated,
        frame_rate: attrs.fps,
        forced: attrs.foreign_parts_only,
    }
}
