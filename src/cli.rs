use clap::{value_parser, Arg, ArgAction, Command};

pub fn build_cli() -> Command {
    Command::new("opensubtitles-client")
        .about("Rate-limited OpenSubtitles REST client")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .num_args(1)
                .global(true)
                .help("Override RUST_LOG level (e.g., info, debug)"),
        )
        .subcommand(
            Command::new("hash")
                .about("Compute the movie hash of a local file")
                .arg(Arg::new("file").required(true).value_parser(value_parser!(std::path::PathBuf))),
        )
        .subcommand(Command::new("languages").about("List language codes supported by the service"))
        .subcommand(Command::new("quota").about("Show the download quota of the configured account"))
        .subcommand(
            Command::new("search")
                .about("Search subtitles for a media file")
                .arg(Arg::new("file").long("file").value_parser(value_parser!(std::path::PathBuf)))
                .arg(Arg::new("lang").long("lang").required(true).num_args(1))
                .arg(Arg::new("imdb").long("imdb").num_args(1).help("IMDb id, e.g. tt0133093"))
                .arg(Arg::new("title").long("title").num_args(1).help("Series name for episodes"))
                .arg(Arg::new("season").long("season").value_parser(value_parser!(u32)))
                .arg(Arg::new("episode").long("episode").value_parser(value_parser!(u32)))
                .arg(
                    Arg::new("series")
                        .long("series")
                        .action(ArgAction::SetTrue)
                        .help("Treat the file as a TV episode"),
                )
                .arg(
                    Arg::new("perfect-match")
                        .long("perfect-match")
                        .action(ArgAction::SetTrue)
                        .help("Only accept hash matches"),
                )
                .arg(
                    Arg::new("automated")
                        .long("automated")
                        .action(ArgAction::SetTrue)
                        .help("Behave like an unattended task (respect the daily quota)"),
                ),
        )
        .subcommand(
            Command::new("download")
                .about("Download a subtitle by id (format-lang-fileid[-sdh][-forced])")
                .arg(Arg::new("id").required(true))
                .arg(
                    Arg::new("out")
                        .long("out")
                        .value_parser(value_parser!(std::path::PathBuf))
                        .help("Write the subtitle to this file instead of stdout JSON"),
                ),
        )
        .subcommand(
            Command::new("validate-login")
                .about("Check credentials and report the allowed daily downloads")
                .arg(Arg::new("username").long("username").num_args(1))
                .arg(Arg::new("password").long("password").num_args(1))
                .arg(Arg::new("api-key").long("api-key").num_args(1)),
        )
}

pub fn init_logging(level: Option<&str>) {
    // Explicit level wins, then RUST_LOG, then info. Logs go to stderr; stdout carries JSON.
    if let Some(lvl) = level {
        std::env::set_var("RUST_LOG", lvl);
    } else if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();
}
