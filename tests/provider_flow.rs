use base64::Engine;
use httpmock::{
    Method::{DELETE, GET, POST},
    MockServer,
};
use opensubtitles_client::provider::{ContentType, Credentials, LoginCheck, SearchRequest, SubtitleProvider};
use opensubtitles_client::{Config, Error};
use serde_json::json;
use std::io::Write;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn token() -> String {
    let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let header = engine.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    // 2100-01-01
    let payload = engine.encode(br#"{"sub":"viewer","exp":4102444800}"#);
    format!("{}.{}.sig", header, payload)
}

fn test_config(server: &MockServer) -> Config {
    let mut cfg = Config::new("test-key")
        .with_api_url(server.url("/api/v1"))
        .with_credentials("viewer", "hunter2");
    cfg.retry.client_error_delay = Duration::ZERO;
    cfg.rate_limit.fallback_reset = Duration::ZERO;
    cfg
}

async fn mock_session(server: &MockServer, remaining: i64) -> httpmock::Mock<'_> {
    let bearer = format!("Bearer {}", token());
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v1/infos/user").header("authorization", bearer);
            then.status(200).json_body(json!({"data": {
                "allowed_downloads": 20,
                "remaining_downloads": remaining,
                "reset_time_utc": "2099-01-01T00:00:00Z"
            }}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v1/login")
                .json_body(json!({"username": "viewer", "password": "hunter2"}));
            then.status(200).json_body(json!({
                "token": token(),
                "user": {"allowed_downloads": 20, "remaining_downloads": remaining}
            }));
        })
        .await
}

#[tokio::test]
async fn download_resolves_link_and_fetches_file() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    let login = mock_session(&server, 20).await;
    let link = server.url("/files/42.srt");
    let download = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v1/download")
                .header("api-key", "test-key")
                .json_body(json!({"file_id": 42, "sub_format": "srt"}));
            then.status(200)
                .json_body(json!({"link": link, "remaining": 19, "reset_time_utc": "2099-01-01T00:00:00Z"}));
        })
        .await;
    let file = server
        .mock_async(|when, then| {
            when.method(GET).path("/files/42.srt");
            then.status(200).body("1\n00:00:01,000 --> 00:00:02,000\nHello\n");
        })
        .await;

    let provider = SubtitleProvider::from_config(&test_config(&server))?;
    let cancel = CancellationToken::new();
    let sub = provider.download("srt-en-42-sdh", &cancel).await?;
    assert_eq!(sub.format, "srt");
    assert_eq!(sub.language, "en");
    assert!(sub.hearing_impaired);
    assert!(!sub.forced);
    assert!(sub.content.contains("Hello"));

    // The session is reused for the second download.
    provider.download("srt-en-42", &cancel).await?;
    login.assert_hits_async(1).await;
    download.assert_hits_async(2).await;
    file.assert_hits_async(2).await;
    Ok(())
}

#[tokio::test]
async fn exhausted_quota_is_reported_and_remembered() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    mock_session(&server, 5).await;
    let download = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v1/download");
            then.status(406).json_body(json!({
                "message": "You have downloaded your allowed 20 subtitles for 24h",
                "remaining": 0,
                "reset_time_utc": "2099-01-01T00:00:00Z"
            }));
        })
        .await;

    let provider = SubtitleProvider::from_config(&test_config(&server))?;
    let cancel = CancellationToken::new();
    let err = provider.download("srt-en-7", &cancel).await.unwrap_err();
    match err {
        Error::RateLimitExceeded { reset_at } => assert!(reset_at.is_some()),
        other => panic!("unexpected error: {other:?}"),
    }

    // Quota is now known to be exhausted until the reset time: no further API call.
    let err = provider.download("srt-en-8", &cancel).await.unwrap_err();
    assert!(matches!(err, Error::RateLimitExceeded { .. }));
    download.assert_hits_async(1).await;
    Ok(())
}

#[tokio::test]
async fn empty_subtitle_body_is_not_found() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    mock_session(&server, 20).await;
    let link = server.url("/files/9.srt");
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v1/download");
            then.status(200).json_body(json!({"link": link, "remaining": 19}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/files/9.srt");
            then.status(200).body("");
        })
        .await;

    let provider = SubtitleProvider::from_config(&test_config(&server))?;
    let err = provider
        .download("srt-en-9", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "{err:?}");
    Ok(())
}

#[tokio::test]
async fn rejected_credentials_are_not_retried() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    let login = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v1/login");
            then.status(401).json_body(json!({"message": "Error, invalid username/password"}));
        })
        .await;

    let provider = SubtitleProvider::from_config(&test_config(&server))?;
    let cancel = CancellationToken::new();
    let err = provider.download("srt-en-1", &cancel).await.unwrap_err();
    match err {
        Error::Authentication {
            credentials_invalid, ..
        } => assert!(credentials_invalid),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(provider.credentials_invalid().await);

    assert!(provider.download("srt-en-1", &cancel).await.is_err());
    login.assert_hits_async(1).await;

    // New credentials clear the flag.
    provider
        .configure(Some(Credentials {
            username: "viewer".into(),
            password: "other".into(),
        }))
        .await;
    assert!(!provider.credentials_invalid().await);
    Ok(())
}

#[tokio::test]
async fn missing_credentials_fail_fast() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    let mut cfg = test_config(&server);
    cfg.username = None;
    let provider = SubtitleProvider::from_config(&cfg)?;
    let err = provider
        .download("srt-en-1", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MissingCredentials));
    Ok(())
}

#[tokio::test]
async fn validate_login_reports_downloads_and_logs_out() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v1/login").header("api-key", "other-key");
            then.status(200).json_body(json!({
                "token": token(),
                "user": {"allowed_downloads": 100, "remaining_downloads": 100}
            }));
        })
        .await;
    let logout = server
        .mock_async(|when, then| {
            when.method(DELETE).path("/api/v1/logout").header_exists("authorization");
            then.status(200).json_body(json!({"message": "token successfully destroyed"}));
        })
        .await;

    let provider = SubtitleProvider::from_config(&test_config(&server))?;
    let check = provider
        .validate_login("someone", "secret", Some("other-key"), &CancellationToken::new())
        .await?;
    assert_eq!(check, LoginCheck::Valid(100));
    logout.assert_hits_async(1).await;
    Ok(())
}

#[tokio::test]
async fn validate_login_translates_api_key_rejection() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v1/login");
            then.status(403).json_body(json!({"message": "You cannot consume this service"}));
        })
        .await;

    let provider = SubtitleProvider::from_config(&test_config(&server))?;
    let check = provider
        .validate_login("someone", "secret", None, &CancellationToken::new())
        .await?;
    assert_eq!(check, LoginCheck::Rejected("Invalid API key provided".into()));
    Ok(())
}

#[tokio::test]
async fn validate_login_without_credentials_sends_nothing() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    let login = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v1/login");
            then.status(200).json_body(json!({"token": token()}));
        })
        .await;

    let provider = SubtitleProvider::from_config(&test_config(&server))?;
    let cancel = CancellationToken::new();
    for (user, pass) in [("", ""), ("someone", "  "), ("   ", "secret")] {
        let err = provider.validate_login(user, pass, None, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::MissingCredentials), "{user:?}/{pass:?}: {err:?}");
    }
    login.assert_hits_async(0).await;
    Ok(())
}

#[tokio::test]
async fn rejected_session_logs_in_again_once() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    let login = mock_session(&server, 20).await;
    let download = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v1/download");
            then.status(401).json_body(json!({"message": "invalid token"}));
        })
        .await;

    let provider = SubtitleProvider::from_config(&test_config(&server))?;
    let err = provider
        .download("srt-en-42", &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        Error::RequestFailed { code, .. } => assert_eq!(code.as_u16(), 401),
        other => panic!("unexpected error: {other:?}"),
    }
    login.assert_hits_async(2).await;
    download.assert_hits_async(2).await;
    Ok(())
}

#[tokio::test]
async fn passed_reset_time_refreshes_quota_before_download() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    let user_info = server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v1/infos/user");
            then.status(200).json_body(json!({"data": {
                "allowed_downloads": 20,
                "remaining_downloads": 20,
                "reset_time_utc": "2000-01-01T00:00:00Z"
            }}));
        })
        .await;
    let login = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v1/login");
            then.status(200).json_body(json!({
                "token": token(),
                "user": {"allowed_downloads": 20, "remaining_downloads": 20}
            }));
        })
        .await;
    let download = server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v1/download");
            then.status(406).json_body(json!({
                "message": "You have downloaded your allowed 20 subtitles for 24h",
                "remaining": 0,
                "reset_time_utc": "2000-01-01T00:00:00Z"
            }));
        })
        .await;

    let provider = SubtitleProvider::from_config(&test_config(&server))?;
    let cancel = CancellationToken::new();
    let err = provider.download("srt-en-7", &cancel).await.unwrap_err();
    assert!(matches!(err, Error::RateLimitExceeded { .. }));
    user_info.assert_hits_async(1).await;

    // The reset time is already behind us, so the quota is fetched again and the
    // download is attempted instead of being refused locally.
    let err = provider.download("srt-en-8", &cancel).await.unwrap_err();
    assert!(matches!(err, Error::RateLimitExceeded { .. }));
    user_info.assert_hits_async(2).await;
    download.assert_hits_async(2).await;
    login.assert_hits_async(1).await;
    Ok(())
}

fn media_file() -> anyhow::Result<tempfile::TempDir> {
    let dir = tempfile::tempdir()?;
    let mut f = std::fs::File::create(dir.path().join("The Matrix (1999).mkv"))?;
    let data: Vec<u8> = (0..200 * 1024).map(|i: usize| ((i * 31 + 7) % 256) as u8).collect();
    f.write_all(&data)?;
    Ok(dir)
}

#[tokio::test]
async fn movie_search_hashes_file_and_filters_results() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    mock_session(&server, 20).await;
    let languages = server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v1/infos/languages");
            then.status(200).json_body(json!({"data": [
                {"language_code": "en", "language_name": "English"},
                {"language_code": "pt-PT", "language_name": "Portuguese"}
            ]}));
        })
        .await;
    let search = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/api/v1/subtitles")
                .query_param("imdb_id", "133093")
                .query_param("languages", "pt-PT")
                .query_param("moviehash", "5f9fe02060a3e000")
                .query_param("type", "movie")
                .query_param("page", "1");
            then.status(200).json_body(json!({"total_pages": 1, "page": 1, "data": [
                {"attributes": {
                    "release": "The.Matrix.1999.1080p",
                    "download_count": 1234,
                    "ratings": 8.5,
                    "moviehash_match": true,
                    "uploader": {"name": "neo"},
                    "files": [{"file_id": 7}],
                    "feature_details": {"feature_type": "Movie", "imdb_id": 133093}
                }},
                {"attributes": {
                    "files": [{"file_id": 8}],
                    "feature_details": {"feature_type": "Movie", "imdb_id": 999}
                }},
                {"attributes": {
                    "files": [],
                    "feature_details": {"feature_type": "Movie", "imdb_id": 133093}
                }}
            ]}));
        })
        .await;

    let dir = media_file()?;
    let provider = SubtitleProvider::from_config(&test_config(&server))?;
    let request = SearchRequest {
        content_type: ContentType::Movie,
        language: "pt".into(),
        media_path: Some(dir.path().join("The Matrix (1999).mkv")),
        imdb_id: Some("tt0133093".into()),
        ..Default::default()
    };
    let cancel = CancellationToken::new();
    let results = provider.search(&request, &cancel).await?;
    assert_eq!(results.len(), 1);
    let hit = &results[0];
    assert_eq!(hit.id, "srt-pt-7");
    assert_eq!(hit.author.as_deref(), Some("neo"));
    assert_eq!(hit.download_count, 1234);
    assert_eq!(hit.is_hash_match, Some(true));

    // Language list is cached between searches.
    provider.search(&request, &cancel).await?;
    languages.assert_hits_async(1).await;
    search.assert_hits_async(2).await;
    Ok(())
}

#[tokio::test]
async fn automated_search_returns_nothing_when_quota_is_spent() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    mock_session(&server, 0).await;
    let search = server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v1/subtitles");
            then.status(200).json_body(json!({"total_pages": 0, "page": 1, "data": []}));
        })
        .await;

    let dir = media_file()?;
    let provider = SubtitleProvider::from_config(&test_config(&server))?;
    let request = SearchRequest {
        language: "en".into(),
        media_path: Some(dir.path().join("The Matrix (1999).mkv")),
        automated: true,
        ..Default::default()
    };
    let results = provider.search(&request, &CancellationToken::new()).await?;
    assert!(results.is_empty());
    search.assert_hits_async(0).await;
    Ok(())
}

#[tokio::test]
async fn unsupported_language_is_an_error() -> anyhow::Result<()> {
    let server = MockServer::start_async().await;
    mock_session(&server, 20).await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/v1/infos/languages");
            then.status(200).json_body(json!({"data": [{"language_code": "en"}]}));
        })
        .await;

    let dir = media_file()?;
    let provider = SubtitleProvider::from_config(&test_config(&server))?;
    let request = SearchRequest {
        language: "xx".into(),
        media_path: Some(dir.path().join("The Matrix (1999).mkv")),
        ..Default::default()
    };
    let err = provider
        .search(&request, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedLanguage { .. }), "{err:?}");
    Ok(())
}
