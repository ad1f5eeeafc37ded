use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "urisource",
    version,
    about = "Fetch URI-addressed images with in-flight dedup, caching and retry"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Fetch one or more images
    Fetch(FetchArgs),
    /// Print the resource key of each URI
    Key(KeyArgs),
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Image URIs (http or https)
    #[arg(required = true)]
    pub uris: Vec<String>,

    /// Extra request header, NAME=VALUE (repeatable)
    #[arg(long = "header", short = 'H', value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Concurrent requests issued per URI
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub repeat: u32,

    /// Write each payload to DIR/<key>.bin
    #[arg(long, value_name = "DIR")]
    pub out: Option<PathBuf>,

    /// Disable the result cache
    #[arg(long)]
    pub no_cache: bool,

    /// Retry delays, comma separated (e.g., "2s,3s"); "none" disables retries
    #[arg(long, value_parser = parse_schedule)]
    pub retry_schedule: Option<Schedule>,
}

#[derive(Args, Debug)]
pub struct KeyArgs {
    #[arg(required = true)]
    pub uris: Vec<String>,
}

/// Parsed `--retry-schedule` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule(pub Vec<std::time::Duration>);

fn parse_header(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected NAME=VALUE, got '{}'", raw)),
    }
}

fn parse_schedule(raw: &str) -> Result<Schedule, String> {
    if raw.trim().eq_ignore_ascii_case("none") {
        return Ok(Schedule(Vec::new()));
    }

    raw.split(',')
        .map(|part| {
            humantime::parse_duration(part.trim())
                .map_err(|e| format!("invalid delay '{}': {}", part.trim(), e))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Schedule)
}
