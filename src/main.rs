//! # Daily Digest
//!
//! Turns a configured list of news-source front pages into one aggregated
//! daily report. A language model picks the noteworthy stories on each page,
//! ranks them across sources, analyzes each pick and merges the analyses into
//! a Markdown report, which is then handed to an optional publisher.
//!
//! ## Usage
//!
//! ```sh
//! daily_digest run -s sources.yaml -o ./out
//! daily_digest publish ./out/20250506/daily_report_20250506.md
//! ```
//!
//! ## Architecture
//!
//! 1. **Tasks**: fetch each source page and extract candidate stories (sequential)
//! 2. **Dedup**: drop stories selected during the last `--history-days` days
//! 3. **Select**: have the model shortlist `--select-count` stories
//! 4. **Analyze**: fetch and analyze every pick (`--workers` at a time)
//! 5. **Aggregate**: merge the analyses into `daily_report_<YYYYMMDD>.md` and publish
//!
//! Every stage checkpoints under `<output-dir>/<YYYYMMDD>/`, so an interrupted
//! day resumes where it stopped and a finished day is never rerun.

use chrono::Local;
use clap::Parser;
use std::error::Error;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod checkpoint;
mod cli;
mod config;
mod error;
mod fetch;
mod llm;
mod models;
mod parse;
mod pipeline;
mod prompts;
mod publish;
mod stages;
#[cfg(test)]
mod testing;
mod utils;

use checkpoint::{CheckpointStore, day_key, parse_day_key};
use cli::{Cli, Command, PublishArgs, PublishTarget, RunArgs};
use fetch::http::HttpPageSource;
use fetch::FetchPolicy;
use llm::{AwfulJadeClient, RetryComplete};
use pipeline::{Pipeline, PipelineSettings, RunContext, RunOutcome};
use publish::{HttpPublisher, Publish, PublishRecord};
use utils::ensure_writable_dir;

const PAGE_TIMEOUT: Duration = Duration::from_secs(30);
const COMPLETION_RETRIES: usize = 3;
const COMPLETION_RETRY_DELAY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = Instant::now();
    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    let result = match args.command {
        Command::Run(run_args) => run(run_args).await,
        Command::Publish(publish_args) => publish_existing(publish_args).await,
    };

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );
    result
}

#[instrument(level = "info", skip_all)]
async fn run(args: RunArgs) -> Result<(), Box<dyn Error>> {
    let date = match args.date.as_deref() {
        Some(raw) => parse_day_key(raw)?,
        None => Local::now().date_naive(),
    };
    let store = CheckpointStore::new(&args.output_dir, date);
    info!(
        event_kind = "run.requested",
        version = env!("CARGO_PKG_VERSION"),
        date = %day_key(date),
        day_dir = %store.day_dir().display(),
        "daily_digest starting up"
    );

    // Gate before touching config, model or network.
    if store.final_exists() {
        info!(path = %store.final_path().display(), "Report for this day already exists; nothing to do");
        return Ok(());
    }

    if let Err(e) = ensure_writable_dir(store.day_dir()).await {
        error!(
            path = %store.day_dir().display(),
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let tasks = config::load_sources(&args.sources)?;
    info!(sources = tasks.len(), path = %args.sources.display(), "Loaded source tasks");

    let client = AwfulJadeClient::load(args.llm_config.as_deref(), &args.template).await?;
    let completer = RetryComplete::new(client, COMPLETION_RETRIES, COMPLETION_RETRY_DELAY);
    let source = HttpPageSource::new(PAGE_TIMEOUT)?;
    let publisher = build_publisher(&args.publish)?;

    let settings = PipelineSettings {
        fetch: FetchPolicy {
            mirror_prefix: args.mirror_prefix.clone(),
            ..FetchPolicy::default()
        },
        history_days: args.history_days,
        select_count: args.select_count,
        workers: args.workers,
        title: args.title.clone(),
        ..PipelineSettings::default()
    };

    let pipeline = Pipeline::new(source, completer, publisher, settings);
    let ctx = RunContext::new(store);

    match pipeline.run(&tasks, &ctx).await? {
        RunOutcome::AlreadyComplete(path) => {
            info!(path = %path.display(), "Report already existed");
            Ok(())
        }
        RunOutcome::Completed { report, publish_id } => {
            info!(
                path = %report.display(),
                publish_id = publish_id.as_deref().unwrap_or("-"),
                "Daily report ready"
            );
            Ok(())
        }
        RunOutcome::NoReport(reason) => {
            error!(%reason, "No report produced for this day");
            Err(format!("no report produced for {}: {reason}", day_key(date)).into())
        }
    }
}

#[instrument(level = "info", skip_all, fields(path = %args.file.display()))]
async fn publish_existing(args: PublishArgs) -> Result<(), Box<dyn Error>> {
    if !args.file.is_file() {
        return Err(format!("report not found: {}", args.file.display()).into());
    }
    let Some(publisher) = build_publisher(&args.publish)? else {
        return Err("no publish endpoint configured (--publish-endpoint or PUBLISH_ENDPOINT)".into());
    };

    match publisher.publish(&args.file).await? {
        Some(id) => {
            info!(%id, auto_publish = args.publish.auto_publish, "Report published");
            if let Some(store) = store_for_report(&args.file) {
                let record = PublishRecord::new(id, &args.file);
                if let Err(e) = store.write_json(&store.published_path(), &record).await {
                    warn!(error = %e, "Could not record publish id");
                }
            }
            Ok(())
        }
        None => Err("publisher returned no id".into()),
    }
}

fn build_publisher(target: &PublishTarget) -> Result<Option<HttpPublisher>, Box<dyn Error>> {
    let Some(endpoint) = target.publish_endpoint.as_deref() else {
        info!("No publish endpoint configured; reports will not be published");
        return Ok(None);
    };
    let publisher = HttpPublisher::new(
        endpoint,
        target.publish_token.clone(),
        target.author.clone(),
        target.auto_publish,
    )?;
    Ok(Some(publisher))
}

/// The day store a report belongs to, when it sits in a `<root>/<YYYYMMDD>/` directory.
fn store_for_report(report: &Path) -> Option<CheckpointStore> {
    let day_dir = report.parent()?;
    let date = parse_day_key(day_dir.file_name()?.to_str()?).ok()?;
    Some(CheckpointStore::new(day_dir.parent()?, date))
}
