//! Command-line interface definitions for Daily Digest.
//!
//! Two subcommands: `run` builds (or resumes) one day's report, `publish`
//! hands an existing report to the publishing endpoint. Publishing options can
//! also come from environment variables.

use crate::fetch::DEFAULT_MIRROR_PREFIX;
use crate::publish::DEFAULT_AUTHOR;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments for the Daily Digest application.
///
/// # Examples
///
/// ```sh
/// # Build today's report from sources.yaml into ./out
/// daily_digest run -s sources.yaml -o ./out
///
/// # Rebuild a past day with a smaller shortlist
/// daily_digest run -o ./out --date 20250506 --select-count 8
///
/// # Publish an existing report straight away
/// daily_digest publish ./out/20250506/daily_report_20250506.md --auto-publish
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the daily pipeline, resuming from any checkpoints on disk
    Run(RunArgs),
    /// Publish an existing report
    Publish(PublishArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// YAML file listing the news sources
    #[arg(short, long, default_value = "sources.yaml")]
    pub sources: PathBuf,

    /// Root directory for per-day checkpoints and reports
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Day to run as YYYYMMDD (defaults to today, local time)
    #[arg(short, long)]
    pub date: Option<String>,

    /// Days of previous selections excluded from today's pool
    #[arg(long, default_value_t = 7)]
    pub history_days: u32,

    /// Number of stories in the day's shortlist
    #[arg(long, default_value_t = 12)]
    pub select_count: usize,

    /// Concurrent article analyses
    #[arg(long, default_value_t = 5)]
    pub workers: usize,

    /// Report title (defaults to "<YYYYMMDD> Daily Digest")
    #[arg(long)]
    pub title: Option<String>,

    /// Path to an awful_aj config.yaml (defaults to the awful_aj config dir)
    #[arg(long, env = "DIGEST_LLM_CONFIG")]
    pub llm_config: Option<PathBuf>,

    /// awful_aj chat template name
    #[arg(long, default_value = "daily_digest")]
    pub template: String,

    /// Archive mirror prefix used when a page cannot be fetched directly
    #[arg(long, default_value = DEFAULT_MIRROR_PREFIX)]
    pub mirror_prefix: String,

    #[command(flatten)]
    pub publish: PublishTarget,
}

#[derive(Args, Debug)]
pub struct PublishArgs {
    /// Markdown report to publish
    pub file: PathBuf,

    #[command(flatten)]
    pub publish: PublishTarget,
}

/// Where and how reports are published. Without an endpoint nothing is published.
#[derive(Args, Debug, Clone)]
pub struct PublishTarget {
    /// Content endpoint receiving the report
    #[arg(long, env = "PUBLISH_ENDPOINT")]
    pub publish_endpoint: Option<String>,

    /// Bearer token for the publish endpoint
    #[arg(long, env = "PUBLISH_TOKEN", hide_env_values = true)]
    pub publish_token: Option<String>,

    /// Author name attached to published reports
    #[arg(long, default_value = DEFAULT_AUTHOR)]
    pub author: String,

    /// Publish immediately instead of creating a draft
    #[arg(short = 'p', long)]
    pub auto_publish: bool,
}
