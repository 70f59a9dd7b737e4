use super::app_config::LogLevel;
use crate::domain::entities::{CachePolicy, Priority, ResizeMode, TintColor};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "fastimage",
    version,
    about = "Fetch, decode and cache images with request coalescing",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log file path. Logs go to stderr when unset.
    #[arg(long, value_name = "PATH", global = true)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,

    /// Disk cache directory.
    #[arg(long, value_name = "PATH", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Maximum concurrent network fetches.
    #[arg(long, global = true)]
    pub max_concurrent_fetches: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load one image and print its lifecycle events.
    Load(LoadArgs),

    /// Warm the caches with several images.
    Preload {
        /// Image uris.
        #[arg(required = true)]
        uris: Vec<String>,

        /// Cache policy for every uri.
        #[arg(long)]
        policy: Option<CachePolicy>,
    },

    /// Print cache statistics.
    Stats,

    /// Remove every cached image.
    Clear,

    /// Write the default configuration file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Args)]
pub struct LoadArgs {
    /// Image uri.
    pub uri: String,

    /// Target width in pixels.
    #[arg(long, requires = "height")]
    pub width: Option<u32>,

    /// Target height in pixels.
    #[arg(long, requires = "width")]
    pub height: Option<u32>,

    /// Fit mode: contain, cover, stretch or center.
    #[arg(long)]
    pub resize: Option<ResizeMode>,

    /// Fetch priority: low, normal or high.
    #[arg(long)]
    pub priority: Option<Priority>,

    /// Cache policy: immutable, web or cacheOnly.
    #[arg(long)]
    pub policy: Option<CachePolicy>,

    /// Extra request header as `Name:Value`. Repeatable.
    #[arg(long = "header", value_name = "NAME:VALUE", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Tint color as `#rrggbb`.
    #[arg(long)]
    pub tint: Option<TintColor>,

    /// Write the decoded bitmap as PNG.
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected NAME:VALUE, got {raw:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("header name is empty".to_string());
    }
    Ok((name.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_load_command() {
        let args = CliArgs::parse_from([
            "fastimage",
            "load",
            "https://x/a.png",
            "--width",
            "100",
            "--height",
            "50",
            "--resize",
            "contain",
            "--policy",
            "cacheOnly",
            "--header",
            "Authorization: Bearer t",
            "--tint",
            "#ff0000",
        ]);

        let Command::Load(load) = args.command else {
            panic!("expected load");
        };
        assert_eq!(load.uri, "https://x/a.png");
        assert_eq!((load.width, load.height), (Some(100), Some(50)));
        assert_eq!(load.resize, Some(ResizeMode::Contain));
        assert_eq!(load.policy, Some(CachePolicy::CacheOnly));
        assert_eq!(
            load.headers,
            vec![("Authorization".to_string(), "Bearer t".to_string())]
        );
        assert_eq!(load.tint, Some(TintColor::rgb(255, 0, 0)));
    }

    #[test]
    fn test_width_requires_height() {
        assert!(CliArgs::try_parse_from(["fastimage", "load", "u", "--width", "10"]).is_err());
    }

    #[test]
    fn test_malformed_header_rejected() {
        assert!(parse_header("no-colon").is_err());
        assert!(parse_header(":value").is_err());
    }
}
