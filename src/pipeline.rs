//! Run coordinator: drives one day's run through every stage.
//!
//! ```text
//! gate (final report exists?) ──yes──> AlreadyComplete
//!   │ no
//!   v
//! for each task, in order:  fetch ─> trim ─> extract ─> <key>.news_list.json
//!   │
//!   v
//! pool ─> dedup ─> deduplicated.json ─> select ─> selected_news.json
//!   │
//!   v
//! analyze (bounded worker pool) ─> analyses/NN.json ─> analyses.json
//!   │
//!   v
//! aggregate ─> daily_report_<day>.md ─> publish ─> published.json
//! ```
//!
//! Every arrow is checkpointed, so rerunning the same day picks up at the first
//! stage whose output is missing. Source tasks run one at a time because the
//! page source may hold exclusive browser resources; only per-item analysis
//! runs concurrently.

use crate::checkpoint::{CheckpointStore, RunStage, day_key};
use crate::error::Result;
use crate::fetch::{FetchPolicy, Fetcher, PageSource};
use crate::llm::Complete;
use crate::models::{Analysis, Candidate, SelectedItem, SourceTask};
use crate::publish::Publish;
use crate::stages::aggregate::aggregate;
use crate::stages::analyze::{AnalyzeSettings, analyze};
use crate::stages::dedup::remove_seen;
use crate::stages::extract::extract_candidates;
use crate::stages::select::select_top;
use crate::utils::trim_lines;
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, error, info, instrument, warn};

/// Tunables for one run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub fetch: FetchPolicy,
    pub analyze: AnalyzeSettings,
    pub history_days: u32,
    pub select_count: usize,
    pub workers: usize,
    /// Report title; `"<YYYYMMDD> Daily Digest"` when unset.
    pub title: Option<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            fetch: FetchPolicy::default(),
            analyze: AnalyzeSettings::default(),
            history_days: 7,
            select_count: 12,
            workers: 5,
            title: None,
        }
    }
}

/// Counters for the end-of-run summary.
#[derive(Debug, Default)]
pub struct RunStats {
    tasks_succeeded: AtomicUsize,
    tasks_failed: AtomicUsize,
    tasks_resumed: AtomicUsize,
    candidates: AtomicUsize,
    dedup_removed: AtomicUsize,
    selected: AtomicUsize,
    analyzed: AtomicUsize,
    analyses_resumed: AtomicUsize,
    skipped: AtomicUsize,
    analysis_failed: AtomicUsize,
    stage: Mutex<RunStage>,
}

impl RunStats {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn set(counter: &AtomicUsize, value: usize) {
        counter.store(value, Ordering::Relaxed);
    }

    pub fn stage(&self) -> RunStage {
        self.stage.lock().map(|s| *s).unwrap_or_default()
    }

    pub fn snapshot(&self) -> RunSummary {
        let get = |c: &AtomicUsize| c.load(Ordering::Relaxed);
        RunSummary {
            tasks_succeeded: get(&self.tasks_succeeded),
            tasks_failed: get(&self.tasks_failed),
            tasks_resumed: get(&self.tasks_resumed),
            candidates: get(&self.candidates),
            dedup_removed: get(&self.dedup_removed),
            selected: get(&self.selected),
            analyzed: get(&self.analyzed),
            analyses_resumed: get(&self.analyses_resumed),
            skipped: get(&self.skipped),
            analysis_failed: get(&self.analysis_failed),
            stage: self.stage(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub tasks_succeeded: usize,
    pub tasks_failed: usize,
    pub tasks_resumed: usize,
    pub candidates: usize,
    pub dedup_removed: usize,
    pub selected: usize,
    pub analyzed: usize,
    pub analyses_resumed: usize,
    pub skipped: usize,
    pub analysis_failed: usize,
    pub stage: RunStage,
}

/// Per-run state shared by every stage.
#[derive(Debug)]
pub struct RunContext {
    pub store: CheckpointStore,
    pub stats: RunStats,
}

impl RunContext {
    pub fn new(store: CheckpointStore) -> Self {
        Self {
            store,
            stats: RunStats::default(),
        }
    }

    /// Move the run to `stage` and persist it to `state.json`.
    pub async fn advance(&self, stage: RunStage) {
        if let Ok(mut current) = self.stats.stage.lock() {
            *current = stage;
        }
        if let Err(e) = self.store.record_stage(stage).await {
            warn!(?stage, error = %e, "Could not persist run state");
        }
        debug!(?stage, "Run advanced");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The day's report already existed; nothing ran.
    AlreadyComplete(PathBuf),
    Completed {
        report: PathBuf,
        publish_id: Option<String>,
    },
    /// The run ended without a report.
    NoReport(String),
}

impl RunOutcome {
    /// A day succeeds when its report exists, whatever happened to publishing.
    pub fn is_success(&self) -> bool {
        !matches!(self, RunOutcome::NoReport(_))
    }
}

pub struct Pipeline<S, C, P> {
    fetcher: Fetcher<S>,
    completer: C,
    publisher: P,
    settings: PipelineSettings,
}

impl<S: PageSource, C: Complete, P: Publish> Pipeline<S, C, P> {
    pub fn new(source: S, completer: C, publisher: P, settings: PipelineSettings) -> Self {
        Self {
            fetcher: Fetcher::new(source, settings.fetch.clone()),
            completer,
            publisher,
            settings,
        }
    }

    /// Run (or resume) the day held by `ctx.store`.
    ///
    /// # Errors
    ///
    /// Checkpoint I/O that later stages depend on, and completion failures
    /// during aggregation. Task, fetch, parse and publish failures are logged
    /// and absorbed.
    #[instrument(level = "info", skip_all, fields(date = %day_key(ctx.store.date()), tasks = tasks.len()))]
    pub async fn run(&self, tasks: &[SourceTask], ctx: &RunContext) -> Result<RunOutcome> {
        let store = &ctx.store;
        if store.final_exists() {
            info!(
                event_kind = "run.skipped",
                path = %store.final_path().display(),
                "Daily report already exists; nothing to do"
            );
            return Ok(RunOutcome::AlreadyComplete(store.final_path()));
        }

        info!(
            event_kind = "run.started",
            resume_from = ?store.stage(tasks),
            previous_state = ?store.load_state().await.map(|s| s.stage),
            "Starting daily run"
        );

        let outcome = self.run_stages(tasks, ctx).await;

        let summary = ctx.stats.snapshot();
        match &outcome {
            Ok(outcome) => info!(
                event_kind = "run.completed",
                success = outcome.is_success(),
                ?summary,
                "Daily run finished"
            ),
            Err(e) => error!(event_kind = "run.failed", error = %e, ?summary, "Daily run aborted"),
        }
        outcome
    }

    async fn run_stages(&self, tasks: &[SourceTask], ctx: &RunContext) -> Result<RunOutcome> {
        let store = &ctx.store;

        // Past dedup the pool is fixed; task checkpoints are only read for origins.
        let resumed_pool: Option<Vec<Candidate>> =
            load_checkpoint(store, &store.deduplicated_path()).await;
        if resumed_pool.is_some() {
            info!("Deduplicated checkpoint present; skipping source tasks");
        } else {
            ctx.advance(RunStage::TasksRunning).await;
            for task in tasks {
                self.run_task(task, ctx).await;
            }
            ctx.advance(RunStage::TasksComplete).await;
        }

        let (pool, origins) = self.load_pool(tasks, ctx).await;

        let deduplicated: Vec<Candidate> = match resumed_pool {
            Some(resumed) => resumed,
            None => {
                if pool.is_empty() {
                    return Ok(RunOutcome::NoReport("no candidates from any source".to_string()));
                }
                let before = pool.len();
                let kept = remove_seen(pool, store, self.settings.history_days).await;
                RunStats::set(&ctx.stats.dedup_removed, before - kept.len());
                store.write_json(&store.deduplicated_path(), &kept).await?;
                kept
            }
        };
        ctx.advance(RunStage::Deduplicated).await;

        let selected: Vec<SelectedItem> = match load_checkpoint(store, &store.selected_path()).await {
            Some(resumed) => resumed,
            None => {
                let picked = select_top(&self.completer, &deduplicated, self.settings.select_count).await;
                if picked.is_empty() {
                    return Ok(RunOutcome::NoReport("nothing selected".to_string()));
                }
                store.write_json(&store.selected_path(), &picked).await?;
                picked
            }
        };
        RunStats::set(&ctx.stats.selected, selected.len());
        info!(
            event_kind = "selection.completed",
            pool = deduplicated.len(),
            selected = selected.len(),
            "Selection ready"
        );
        ctx.advance(RunStage::Selected).await;

        let analyses = self.analyze_all(&selected, &origins, ctx).await?;

        let title = self
            .settings
            .title
            .clone()
            .unwrap_or_else(|| format!("{} Daily Digest", day_key(store.date())));
        let Some(aggregation) =
            aggregate(&self.completer, &self.publisher, store, &analyses, &title).await?
        else {
            return Ok(RunOutcome::NoReport("no analyzable items".to_string()));
        };
        ctx.advance(RunStage::Aggregated).await;
        if aggregation.publish_id.is_some() {
            ctx.advance(RunStage::Published).await;
        }

        Ok(RunOutcome::Completed {
            report: aggregation.report_path,
            publish_id: aggregation.publish_id,
        })
    }

    /// Fetch and extract one source. Failures are logged, never returned.
    #[instrument(level = "info", skip_all, fields(task = %task.output_key, url = %task.url))]
    async fn run_task(&self, task: &SourceTask, ctx: &RunContext) {
        let store = &ctx.store;
        let stats = &ctx.stats;
        let candidates_path = store.candidates_path(task);

        if let Some(existing) = load_checkpoint::<Vec<Candidate>>(store, &candidates_path).await {
            RunStats::bump(&stats.tasks_resumed);
            info!(count = existing.len(), "Candidates checkpoint present; skipping task");
            return;
        }

        let outcome = self.fetcher.fetch(&task.url, false).await;
        if let Err(e) = store.write_text(&store.origin_path(task), outcome.text()).await {
            warn!(error = %e, "Could not save source page");
        }
        let Some(page) = outcome.into_page() else {
            RunStats::bump(&stats.tasks_failed);
            error!(event_kind = "task.failed", reason = "fetch_failed", "Source page unavailable");
            return;
        };

        let trimmed = trim_lines(&page, task.header_lines, task.footer_lines);
        let page_text = if trimmed.trim().is_empty() {
            warn!("Trimming removed the whole source page; using it untrimmed");
            page
        } else {
            trimmed
        };

        let candidates = extract_candidates(
            &self.completer,
            &page_text,
            &task.url,
            &task.example_url,
            &task.example_output,
        )
        .await;
        if candidates.is_empty() {
            RunStats::bump(&stats.tasks_failed);
            warn!(event_kind = "task.failed", reason = "no_candidates", "Task produced nothing");
            return;
        }

        if let Err(e) = store.write_json(&candidates_path, &candidates).await {
            RunStats::bump(&stats.tasks_failed);
            error!(event_kind = "task.failed", reason = "checkpoint_write", error = %e, "Could not save candidates");
            return;
        }
        RunStats::bump(&stats.tasks_succeeded);
        info!(event_kind = "task.completed", count = candidates.len(), "Task complete");
    }

    /// Union of every task's candidates, first occurrence of a URL winning,
    /// plus which task each URL came from.
    async fn load_pool<'t>(
        &self,
        tasks: &'t [SourceTask],
        ctx: &RunContext,
    ) -> (Vec<Candidate>, HashMap<String, &'t SourceTask>) {
        let store = &ctx.store;
        let mut origins: HashMap<String, &'t SourceTask> = HashMap::new();
        let mut pool: Vec<Candidate> = Vec::new();

        for task in tasks {
            let Some(candidates) =
                load_checkpoint::<Vec<Candidate>>(store, &store.candidates_path(task)).await
            else {
                continue;
            };
            for candidate in candidates {
                origins.entry(candidate.url.clone()).or_insert(task);
                pool.push(candidate);
            }
        }

        let before = pool.len();
        let pool: Vec<Candidate> = pool.into_iter().unique_by(|c| c.url.clone()).collect();
        if pool.len() < before {
            info!(duplicates = before - pool.len(), "Dropped URLs seen in more than one source");
        }
        RunStats::set(&ctx.stats.candidates, pool.len());
        (pool, origins)
    }

    /// Analyze every selected item on a bounded worker pool.
    ///
    /// Returns the resolved analyses in selection order. `analyses.json` is
    /// only written when every item resolved, so a partially failed stage is
    /// retried item by item on the next run.
    #[instrument(level = "info", skip_all, fields(items = selected.len(), workers = self.settings.workers))]
    async fn analyze_all(
        &self,
        selected: &[SelectedItem],
        origins: &HashMap<String, &SourceTask>,
        ctx: &RunContext,
    ) -> Result<Vec<Analysis>> {
        let store = &ctx.store;
        let stats = &ctx.stats;

        if let Some(done) = load_checkpoint::<Vec<Analysis>>(store, &store.analyses_path()).await {
            info!(count = done.len(), "Analyses checkpoint present; skipping analysis");
            RunStats::set(&stats.analyses_resumed, done.len());
            ctx.advance(RunStage::Analyzed).await;
            return Ok(done);
        }

        let mut results: Vec<(usize, Option<Analysis>)> = stream::iter(selected.iter().enumerate())
            .map(|(idx, item)| async move {
                let path = store.analysis_item_path(idx + 1);
                if let Some(done) = load_checkpoint::<Analysis>(store, &path).await
                    && done.url == item.url
                {
                    RunStats::bump(&stats.analyses_resumed);
                    return (idx, Some(done));
                }

                let origin = origins.get(&item.url).copied();
                match analyze(&self.fetcher, &self.completer, item, origin, &self.settings.analyze).await {
                    Ok(analysis) => {
                        if analysis.is_skipped() {
                            RunStats::bump(&stats.skipped);
                        } else {
                            RunStats::bump(&stats.analyzed);
                        }
                        if let Err(e) = store.write_json(&path, &analysis).await {
                            warn!(url = %item.url, error = %e, "Could not save analysis");
                        }
                        (idx, Some(analysis))
                    }
                    Err(e) => {
                        RunStats::bump(&stats.analysis_failed);
                        error!(url = %item.url, error = %e, "Analysis failed; dropping item for this run");
                        (idx, None)
                    }
                }
            })
            .buffer_unordered(self.settings.workers.max(1))
            .collect()
            .await;
        results.sort_by_key(|(idx, _)| *idx);

        let total = results.len();
        let analyses: Vec<Analysis> = results.into_iter().filter_map(|(_, a)| a).collect();
        info!(
            event_kind = "analysis.completed",
            total,
            resolved = analyses.len(),
            "Analysis stage finished"
        );

        if analyses.len() == total {
            store.write_json(&store.analyses_path(), &analyses).await?;
            ctx.advance(RunStage::Analyzed).await;
        }
        Ok(analyses)
    }
}

/// Read a checkpoint if present. A corrupt file is logged and treated as
/// missing so the stage that owns it runs again.
async fn load_checkpoint<T: DeserializeOwned>(store: &CheckpointStore, path: &Path) -> Option<T> {
    if !path.exists() {
        return None;
    }
    match store.read_json(path).await {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unreadable checkpoint; recomputing");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::fetch::FETCH_FAILED;
    use crate::prompts::{AGGREGATE_SYSTEM, ANALYZE_SYSTEM, EXTRACT_SYSTEM, SELECT_SYSTEM};
    use crate::testing::{RecordingPublisher, ScriptedCompleter, ScriptedSource, task};
    use chrono::{Days, NaiveDate};
    use std::time::Duration;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, 6).unwrap()
    }

    fn settings(select_count: usize) -> PipelineSettings {
        PipelineSettings {
            fetch: FetchPolicy {
                delay: Duration::ZERO,
                mirror_prefix: "https://mirror.test/".to_string(),
                ..FetchPolicy::default()
            },
            select_count,
            ..PipelineSettings::default()
        }
    }

    fn tasks() -> Vec<SourceTask> {
        vec![task("https://a.example/", "a"), task("https://b.example/", "b")]
    }

    fn pages(url: &str) -> std::result::Result<String, String> {
        Ok(format!("Front page or article text served for {url}"))
    }

    /// Plays every model role: three stories per source, the first
    /// `select_count` listed stories, one analysis per article and a report
    /// quoting every source line it was given.
    fn newsroom(select_count: usize) -> ScriptedCompleter {
        ScriptedCompleter::new(move |prompt, system| Ok(newsroom_reply(select_count, prompt, system)))
    }

    fn newsroom_reply(select_count: usize, prompt: &str, system: Option<&str>) -> String {
        match system {
            Some(EXTRACT_SYSTEM) => {
                let source = prompt
                    .lines()
                    .find_map(|l| l.strip_prefix("From the front page of "))
                    .and_then(|rest| rest.split_whitespace().next())
                    .unwrap_or_default();
                let items: Vec<String> = (1..=3)
                    .map(|n| format!(r#"{{"title": "Story {n}", "url": "{source}{n}"}}"#))
                    .collect();
                format!("[{}]", items.join(","))
            }
            Some(SELECT_SYSTEM) => {
                let items: Vec<String> = prompt
                    .lines()
                    .filter_map(|l| l.trim().strip_prefix("Source: "))
                    .take(select_count)
                    .map(|url| format!(r#"{{"title": "Pick", "url": "{url}", "reason": "big"}}"#))
                    .collect();
                format!("[{}]", items.join(","))
            }
            Some(ANALYZE_SYSTEM) => {
                let url = prompt
                    .lines()
                    .find_map(|l| l.strip_prefix("Source: "))
                    .unwrap_or_default();
                format!("Analysis of {url}")
            }
            Some(AGGREGATE_SYSTEM) => {
                let sources: Vec<&str> =
                    prompt.lines().filter(|l| l.starts_with("Source: ")).collect();
                format!("# Daily Digest\n\n{}", sources.join("\n"))
            }
            _ => String::new(),
        }
    }

    #[tokio::test]
    async fn test_end_to_end_two_sources_four_selected() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(CheckpointStore::new(tmp.path(), date()));
        let source = ScriptedSource::by_url(pages);
        let llm = newsroom(4);
        let pipeline = Pipeline::new(&source, &llm, None::<RecordingPublisher>, settings(4));

        let outcome = pipeline.run(&tasks(), &ctx).await.unwrap();

        let report = ctx.store.final_path();
        assert_eq!(
            outcome,
            RunOutcome::Completed {
                report: report.clone(),
                publish_id: None
            }
        );

        let pool: Vec<Candidate> = ctx.store.read_json(&ctx.store.deduplicated_path()).await.unwrap();
        assert_eq!(pool.len(), 6);
        let selected: Vec<SelectedItem> = ctx.store.read_json(&ctx.store.selected_path()).await.unwrap();
        assert_eq!(selected.len(), 4);
        let analyses: Vec<Analysis> = ctx.store.read_json(&ctx.store.analyses_path()).await.unwrap();
        assert_eq!(analyses.len(), 4);
        assert!(analyses.iter().all(|a| a.analysis == format!("Analysis of {}", a.url)));

        let text = std::fs::read_to_string(&report).unwrap();
        for item in &selected {
            assert!(text.contains(&item.url), "report is missing {}", item.url);
        }

        assert_eq!(llm.calls_with_system(EXTRACT_SYSTEM), 2);
        assert_eq!(llm.calls_with_system(SELECT_SYSTEM), 1);
        assert_eq!(llm.calls_with_system(ANALYZE_SYSTEM), 4);
        assert_eq!(llm.calls_with_system(AGGREGATE_SYSTEM), 1);

        let summary = ctx.stats.snapshot();
        assert_eq!(summary.tasks_succeeded, 2);
        assert_eq!(summary.candidates, 6);
        assert_eq!(summary.analyzed, 4);
        assert_eq!(summary.stage, RunStage::Aggregated);
        assert_eq!(ctx.store.load_state().await.unwrap().stage, RunStage::Aggregated);
    }

    #[tokio::test]
    async fn test_existing_report_skips_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(CheckpointStore::new(tmp.path(), date()));
        ctx.store.write_text(&ctx.store.final_path(), "# Done").await.unwrap();
        let source = ScriptedSource::by_url(pages);
        let llm = newsroom(4);
        let pipeline = Pipeline::new(&source, &llm, None::<RecordingPublisher>, settings(4));

        let outcome = pipeline.run(&tasks(), &ctx).await.unwrap();

        assert_eq!(outcome, RunOutcome::AlreadyComplete(ctx.store.final_path()));
        assert!(outcome.is_success());
        assert!(source.calls().is_empty());
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_recent_selection_is_deduplicated() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(CheckpointStore::new(tmp.path(), date()));
        let yesterday = ctx.store.for_date(date() - Days::new(1));
        let seen = vec![SelectedItem {
            title: "Old".to_string(),
            url: "https://a.example/1".to_string(),
            reason: "r".to_string(),
        }];
        yesterday.write_json(&yesterday.selected_path(), &seen).await.unwrap();

        let source = ScriptedSource::by_url(pages);
        let llm = newsroom(4);
        let pipeline = Pipeline::new(&source, &llm, None::<RecordingPublisher>, settings(4));
        pipeline.run(&tasks(), &ctx).await.unwrap();

        let pool: Vec<Candidate> = ctx.store.read_json(&ctx.store.deduplicated_path()).await.unwrap();
        assert_eq!(pool.len(), 5);
        assert!(pool.iter().all(|c| c.url != "https://a.example/1"));
        let selected: Vec<SelectedItem> = ctx.store.read_json(&ctx.store.selected_path()).await.unwrap();
        assert!(selected.iter().all(|s| s.url != "https://a.example/1"));
        assert_eq!(ctx.stats.snapshot().dedup_removed, 1);
    }

    #[tokio::test]
    async fn test_resumes_from_candidates_checkpoint() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(CheckpointStore::new(tmp.path(), date()));
        let all = tasks();
        let saved: Vec<Candidate> = (1..=3)
            .map(|n| Candidate {
                title: format!("Saved {n}"),
                url: format!("https://a.example/{n}"),
            })
            .collect();
        ctx.store.write_json(&ctx.store.candidates_path(&all[0]), &saved).await.unwrap();

        let source = ScriptedSource::by_url(pages);
        let llm = newsroom(4);
        let pipeline = Pipeline::new(&source, &llm, None::<RecordingPublisher>, settings(4));
        let outcome = pipeline.run(&all, &ctx).await.unwrap();

        assert!(outcome.is_success());
        assert!(!source.calls().iter().any(|u| u == "https://a.example/"));
        assert_eq!(llm.calls_with_system(EXTRACT_SYSTEM), 1);
        assert_eq!(ctx.stats.snapshot().tasks_resumed, 1);
    }

    #[tokio::test]
    async fn test_skipped_article_is_pruned_from_selection() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(CheckpointStore::new(tmp.path(), date()));
        let source = ScriptedSource::by_url(|url| {
            if url.ends_with("a.example/2") {
                Ok(String::new())
            } else {
                pages(url)
            }
        });
        let llm = newsroom(4);
        let pipeline = Pipeline::new(&source, &llm, None::<RecordingPublisher>, settings(4));

        let outcome = pipeline.run(&tasks(), &ctx).await.unwrap();

        assert!(outcome.is_success());
        let selected: Vec<SelectedItem> = ctx.store.read_json(&ctx.store.selected_path()).await.unwrap();
        assert_eq!(selected.len(), 3);
        assert!(selected.iter().all(|s| s.url != "https://a.example/2"));
        let report = std::fs::read_to_string(ctx.store.final_path()).unwrap();
        assert!(!report.contains("https://a.example/2"));
        assert_eq!(llm.calls_with_system(ANALYZE_SYSTEM), 3);
        assert_eq!(ctx.stats.snapshot().skipped, 1);
    }

    #[tokio::test]
    async fn test_publish_failure_is_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(CheckpointStore::new(tmp.path(), date()));
        let source = ScriptedSource::by_url(pages);
        let llm = newsroom(4);
        let publisher = RecordingPublisher::failing("endpoint down");
        let pipeline = Pipeline::new(&source, &llm, &publisher, settings(4));

        let outcome = pipeline.run(&tasks(), &ctx).await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(publisher.calls().len(), 1);
        assert!(ctx.store.final_exists());
        assert_eq!(ctx.store.load_state().await.unwrap().stage, RunStage::Aggregated);
    }

    #[tokio::test]
    async fn test_publish_success_marks_published() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(CheckpointStore::new(tmp.path(), date()));
        let source = ScriptedSource::by_url(pages);
        let llm = newsroom(4);
        let publisher = RecordingPublisher::returning("draft-1");
        let pipeline = Pipeline::new(&source, &llm, &publisher, settings(4));

        let outcome = pipeline.run(&tasks(), &ctx).await.unwrap();

        assert_eq!(
            outcome,
            RunOutcome::Completed {
                report: ctx.store.final_path(),
                publish_id: Some("draft-1".to_string())
            }
        );
        assert!(ctx.store.published_path().exists());
        assert_eq!(ctx.store.stage(&tasks()), RunStage::Published);
        assert_eq!(ctx.store.load_state().await.unwrap().stage, RunStage::Published);
    }

    #[tokio::test]
    async fn test_failed_task_does_not_stop_run() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(CheckpointStore::new(tmp.path(), date()));
        let all = tasks();
        let source = ScriptedSource::by_url(|url| {
            if url.ends_with("a.example/") {
                Err("connection refused".to_string())
            } else {
                pages(url)
            }
        });
        let llm = newsroom(4);
        let pipeline = Pipeline::new(&source, &llm, None::<RecordingPublisher>, settings(4));

        let outcome = pipeline.run(&all, &ctx).await.unwrap();

        assert!(outcome.is_success());
        assert!(!ctx.store.candidates_path(&all[0]).exists());
        let origin = std::fs::read_to_string(ctx.store.origin_path(&all[0])).unwrap();
        assert_eq!(origin, FETCH_FAILED);
        let selected: Vec<SelectedItem> = ctx.store.read_json(&ctx.store.selected_path()).await.unwrap();
        assert_eq!(selected.len(), 3);
        assert!(selected.iter().all(|s| s.url.starts_with("https://b.example/")));
        let summary = ctx.stats.snapshot();
        assert_eq!(summary.tasks_failed, 1);
        assert_eq!(summary.tasks_succeeded, 1);
    }

    #[tokio::test]
    async fn test_no_candidates_means_no_report() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(CheckpointStore::new(tmp.path(), date()));
        let source = ScriptedSource::always("");
        let llm = newsroom(4);
        let pipeline = Pipeline::new(&source, &llm, None::<RecordingPublisher>, settings(4));

        let outcome = pipeline.run(&tasks(), &ctx).await.unwrap();

        assert!(matches!(outcome, RunOutcome::NoReport(_)));
        assert!(!outcome.is_success());
        assert!(!ctx.store.deduplicated_path().exists());
        assert_eq!(llm.calls(), 0);
    }

    fn picks(urls: &[&str]) -> Vec<SelectedItem> {
        urls.iter()
            .map(|url| SelectedItem {
                title: "Pick".to_string(),
                url: url.to_string(),
                reason: "big".to_string(),
            })
            .collect()
    }

    async fn seed_selection(store: &CheckpointStore, urls: &[&str]) {
        let pool: Vec<Candidate> = urls
            .iter()
            .map(|url| Candidate {
                title: "Story".to_string(),
                url: url.to_string(),
            })
            .collect();
        store.write_json(&store.deduplicated_path(), &pool).await.unwrap();
        store.write_json(&store.selected_path(), &picks(urls)).await.unwrap();
    }

    #[tokio::test]
    async fn test_resume_after_dedup_skips_source_tasks() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(CheckpointStore::new(tmp.path(), date()));
        let all = tasks();
        let b_saved: Vec<Candidate> = (1..=3)
            .map(|n| Candidate {
                title: format!("Saved {n}"),
                url: format!("https://b.example/{n}"),
            })
            .collect();
        ctx.store.write_json(&ctx.store.candidates_path(&all[1]), &b_saved).await.unwrap();
        seed_selection(&ctx.store, &["https://b.example/1", "https://b.example/2"]).await;

        let source = ScriptedSource::by_url(pages);
        let llm = newsroom(4);
        let pipeline = Pipeline::new(&source, &llm, None::<RecordingPublisher>, settings(4));
        let outcome = pipeline.run(&all, &ctx).await.unwrap();

        assert!(outcome.is_success());
        assert!(!source.calls().iter().any(|u| u == "https://a.example/"));
        assert!(!ctx.store.origin_path(&all[0]).exists());
        assert_eq!(llm.calls_with_system(EXTRACT_SYSTEM), 0);
        assert_eq!(llm.calls_with_system(SELECT_SYSTEM), 0);
        assert_eq!(llm.calls_with_system(ANALYZE_SYSTEM), 2);
        let summary = ctx.stats.snapshot();
        assert_eq!(summary.tasks_resumed, 0);
        assert_eq!(summary.tasks_failed, 0);
    }

    #[tokio::test]
    async fn test_analysis_resumes_item_by_item() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(CheckpointStore::new(tmp.path(), date()));
        let urls = ["https://a.example/1", "https://a.example/2", "https://b.example/1"];
        seed_selection(&ctx.store, &urls).await;
        let saved = Analysis {
            title: "Pick".to_string(),
            url: urls[0].to_string(),
            analysis: "Saved analysis".to_string(),
        };
        ctx.store.write_json(&ctx.store.analysis_item_path(1), &saved).await.unwrap();
        let stale = Analysis {
            title: "Gone".to_string(),
            url: "https://stale.example/x".to_string(),
            analysis: "From an older selection".to_string(),
        };
        ctx.store.write_json(&ctx.store.analysis_item_path(2), &stale).await.unwrap();

        let source = ScriptedSource::by_url(pages);
        let llm = newsroom(4);
        let pipeline = Pipeline::new(&source, &llm, None::<RecordingPublisher>, settings(4));
        let outcome = pipeline.run(&tasks(), &ctx).await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(ctx.stats.snapshot().analyses_resumed, 1);
        assert_eq!(llm.calls_with_system(ANALYZE_SYSTEM), 2);
        assert!(!source.calls().iter().any(|u| u == urls[0]));

        let analyses: Vec<Analysis> = ctx.store.read_json(&ctx.store.analyses_path()).await.unwrap();
        assert_eq!(analyses.len(), 3);
        assert_eq!(analyses[0].analysis, "Saved analysis");
        assert_eq!(analyses[1].url, urls[1]);
        assert_eq!(analyses[1].analysis, format!("Analysis of {}", urls[1]));
        let rewritten: Analysis = ctx.store.read_json(&ctx.store.analysis_item_path(2)).await.unwrap();
        assert_eq!(rewritten.url, urls[1]);
    }

    #[tokio::test]
    async fn test_failed_analysis_leaves_stage_incomplete() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = RunContext::new(CheckpointStore::new(tmp.path(), date()));
        let urls = ["https://a.example/1", "https://b.example/1", "https://b.example/2"];
        seed_selection(&ctx.store, &urls).await;

        let source = ScriptedSource::by_url(pages);
        let llm = ScriptedCompleter::new(|prompt, system| {
            if system == Some(ANALYZE_SYSTEM) && prompt.contains("Source: https://b.example/1\n") {
                return Err(PipelineError::Completion("model overloaded".to_string()));
            }
            Ok(newsroom_reply(4, prompt, system))
        });
        let pipeline = Pipeline::new(&source, &llm, None::<RecordingPublisher>, settings(4));
        let outcome = pipeline.run(&tasks(), &ctx).await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(ctx.stats.snapshot().analysis_failed, 1);
        assert!(!ctx.store.analyses_path().exists());
        assert!(ctx.store.analysis_item_path(1).exists());
        assert!(!ctx.store.analysis_item_path(2).exists());
        assert!(ctx.store.analysis_item_path(3).exists());
        let report = std::fs::read_to_string(ctx.store.final_path()).unwrap();
        assert!(report.contains("https://a.example/1"));
        assert!(!report.contains("https://b.example/1"));
    }
}
