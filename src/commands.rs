use clap::ArgMatches;
use log::{debug, error, info};
use opensubtitles_client::hash::compute_file_hash;
use opensubtitles_client::provider::{ContentType, Credentials, SearchRequest, SubtitleProvider};
use opensubtitles_client::{Config, Error};
use serde::Serialize;
use serde_json::Value;
use std::io::{self, Write};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// One JSON document per invocation on stdout.
#[derive(Debug, Serialize)]
struct Envelope {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reset_at: Option<String>,
}

fn error_code(err: &Error) -> &'static str {
    match err {
        Error::Config(_) | Error::MissingApiKey | Error::MissingCredentials => "config",
        Error::MissingToken | Error::Authentication { .. } => "unauthorized",
        Error::RateLimitExceeded { .. } => "rate_limited",
        Error::NotFound(_) => "not_found",
        Error::RequestFailed { .. } => "upstream_error",
        Error::Parse { .. } => "bad_response",
        Error::InvalidSubtitleId(_) | Error::UnsupportedLanguage { .. } => "invalid_input",
        Error::Cancelled => "cancelled",
        Error::Transport(_) => "transport",
        Error::Io(_) => "io",
    }
}

fn error_body(err: &anyhow::Error) -> ErrorBody {
    match err.downcast_ref::<Error>() {
        Some(e) => ErrorBody {
            code: error_code(e),
            message: e.to_string(),
            reset_at: match e {
                Error::RateLimitExceeded { reset_at } => reset_at.map(|t| t.to_rfc3339()),
                _ => None,
            },
        },
        None => ErrorBody {
            code: "internal",
            message: format!("{:#}", err),
            reset_at: None,
        },
    }
}

fn write_response(envelope: &Envelope) -> anyhow::Result<()> {
    let mut out = io::stdout();
    let payload = serde_json::to_string(envelope)?;
    writeln!(out, "{}", payload)?;
    out.flush()?;
    Ok(())
}

/// Run the selected subcommand and print its envelope. Returns the process exit code.
pub async fn run(matches: &ArgMatches, cancel: CancellationToken) -> anyhow::Result<i32> {
    let envelope = match dispatch(matches, &cancel).await {
        Ok(data) => Envelope {
            ok: true,
            data: Some(data),
            error: None,
        },
        Err(err) => {
            error!("{:#}", err);
            Envelope {
                ok: false,
                data: None,
                error: Some(error_body(&err)),
            }
        }
    };
    write_response(&envelope)?;
    Ok(if envelope.ok { 0 } else { 1 })
}

async fn dispatch(matches: &ArgMatches, cancel: &CancellationToken) -> anyhow::Result<Value> {
    let Some((name, sub)) = matches.subcommand() else {
        anyhow::bail!("no command given");
    };
    debug!("Running command={}", name);

    if name == "hash" {
        let Some(path) = sub.get_one::<PathBuf>("file").cloned() else {
            anyhow::bail!("missing file argument");
        };
        let display = path.display().to_string();
        let hash = tokio::task::spawn_blocking(move || compute_file_hash(path))
            .await?
            .map_err(Error::from)?;
        return Ok(serde_json::json!({ "file": display, "hash": hash }));
    }

    let cfg = Config::from_env()?;
    let provider = SubtitleProvider::from_config(&cfg)?;

    match name {
        "languages" => Ok(serde_json::to_value(provider.languages(cancel).await?)?),
        "quota" => Ok(serde_json::to_value(provider.user_quota(cancel).await?)?),
        "search" => {
            let request = search_request(sub);
            let results = provider.search(&request, cancel).await?;
            info!("Found {} subtitles", results.len());
            Ok(serde_json::to_value(results)?)
        }
        "download" => {
            let id = sub.get_one::<String>("id").map(String::as_str).unwrap_or_default();
            let file = provider.download(id, cancel).await?;
            match sub.get_one::<PathBuf>("out") {
                Some(out) => {
                    tokio::fs::write(out, file.content.as_bytes()).await.map_err(Error::from)?;
                    info!("Wrote subtitle {} to {}", id, out.display());
                    Ok(serde_json::json!({
                        "path": out.display().to_string(),
                        "format": file.format,
                        "language": file.language,
                        "forced": file.forced,
                        "hearing_impaired": file.hearing_impaired,
                    }))
                }
                None => Ok(serde_json::to_value(file)?),
            }
        }
        "validate-login" => {
            let creds = Credentials {
                username: sub
                    .get_one::<String>("username")
                    .cloned()
                    .or_else(|| cfg.username.clone())
                    .unwrap_or_default(),
                password: sub
                    .get_one::<String>("password")
                    .cloned()
                    .or_else(|| cfg.password.clone())
                    .unwrap_or_default(),
            };
            let api_key = sub.get_one::<String>("api-key").map(String::as_str);
            let check = provider
                .validate_login(&creds.username, &creds.password, api_key, cancel)
                .await?;
            Ok(serde_json::to_value(check)?)
        }
        other => anyhow::bail!("unknown command: {}", other),
    }
}

fn search_request(sub: &ArgMatches) -> SearchRequest {
    SearchRequest {
        content_type: if sub.get_flag("series") {
            ContentType::Episode
        } else {
            ContentType::Movie
        },
        language: sub.get_one::<String>("lang").cloned().unwrap_or_default(),
        media_path: sub.get_one::<PathBuf>("file").cloned(),
        imdb_id: sub.get_one::<String>("imdb").cloned(),
        series_name: sub.get_one::<String>("title").cloned(),
        season: sub.get_one::<u32>("season").copied(),
        episode: sub.get_one::<u32>("episode").copied(),
        perfect_match: sub.get_flag("perfect-match"),
        automated: sub.get_flag("automated"),
    }
}
