//! Final synthesis of the day's analyses into one report.

use crate::checkpoint::CheckpointStore;
use crate::error::Result;
use crate::llm::Complete;
use crate::models::{Analysis, SelectedItem};
use crate::prompts::{self, AGGREGATE_SYSTEM};
use crate::publish::{Publish, PublishRecord};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{error, info, instrument, warn};

/// What [`aggregate`] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregation {
    pub report_path: PathBuf,
    /// Draft or publish id, when a publisher accepted the report.
    pub publish_id: Option<String>,
    pub included: usize,
    /// Skipped analyses dropped from the selection checkpoint.
    pub pruned: usize,
}

/// Merge `analyses` into the day's report and hand it to `publisher`.
///
/// Skipped analyses are left out of the report and pruned from the selection
/// checkpoint, so a source that keeps failing does not block tomorrow's
/// deduplication. Returns `Ok(None)` when nothing analyzable is left.
///
/// # Errors
///
/// A failed completion or a failed report write. Publishing failures are
/// logged and reported as `publish_id: None`.
#[instrument(level = "info", skip_all, fields(analyses = analyses.len(), %title))]
pub async fn aggregate<C: Complete, P: Publish>(
    completer: &C,
    publisher: &P,
    store: &CheckpointStore,
    analyses: &[Analysis],
    title: &str,
) -> Result<Option<Aggregation>> {
    let (skipped, kept): (Vec<&Analysis>, Vec<&Analysis>) =
        analyses.iter().partition(|a| a.is_skipped());

    let pruned = if skipped.is_empty() {
        0
    } else {
        prune_selection(store, &skipped).await
    };

    if kept.is_empty() {
        warn!(skipped = skipped.len(), "Every analysis was skipped; no report today");
        return Ok(None);
    }

    let kept: Vec<Analysis> = kept.into_iter().cloned().collect();
    let prompt = prompts::aggregate(&kept, title);
    let report = completer.complete(&prompt, Some(AGGREGATE_SYSTEM)).await?;

    let report_path = store.final_path();
    store
        .write_text(&report_path, &format!("{}\n", report.trim_end()))
        .await?;
    info!(
        event_kind = "report.written",
        path = %report_path.display(),
        included = kept.len(),
        pruned,
        "Wrote daily report"
    );

    let publish_id = match publisher.publish(&report_path).await {
        Ok(Some(id)) => {
            let record = PublishRecord::new(id.clone(), &report_path);
            if let Err(e) = store.write_json(&store.published_path(), &record).await {
                warn!(error = %e, "Could not record publish id");
            }
            Some(id)
        }
        Ok(None) => None,
        Err(e) => {
            error!(
                event_kind = "publish.failed",
                path = %report_path.display(),
                error = %e,
                "Publishing handoff failed; report is kept"
            );
            None
        }
    };

    Ok(Some(Aggregation {
        report_path,
        publish_id,
        included: kept.len(),
        pruned,
    }))
}

/// Drop skipped items from the selection checkpoint; returns how many went.
async fn prune_selection(store: &CheckpointStore, skipped: &[&Analysis]) -> usize {
    let path = store.selected_path();
    let selected: Vec<SelectedItem> = match store.read_json(&path).await {
        Ok(selected) => selected,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cannot read selection to prune it");
            return 0;
        }
    };

    let drop: HashSet<&str> = skipped.iter().map(|a| a.url.as_str()).collect();
    let before = selected.len();
    let remaining: Vec<SelectedItem> = selected
        .into_iter()
        .filter(|item| !drop.contains(item.url.as_str()))
        .collect();
    let pruned = before - remaining.len();

    if pruned > 0 {
        match store.write_json(&path, &remaining).await {
            Ok(()) => info!(pruned, remaining = remaining.len(), "Pruned skipped items from selection"),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to rewrite selection");
                return 0;
            }
        }
    }
    pruned
}
