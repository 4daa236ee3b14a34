//! Cross-source ranking down to the day's shortlist.

use crate::llm::Complete;
use crate::models::{Candidate, SelectedItem};
use crate::parse::{SELECTION_CHAIN, parse_with};
use crate::prompts::{self, SELECT_SYSTEM};
use crate::utils::truncate_for_log;
use itertools::Itertools;
use std::collections::HashSet;
use tracing::{error, info, instrument, warn};

/// Have the model rank `candidates` and return at most `target_count` picks.
///
/// Only picks whose URL is in `candidates` survive, so nothing the
/// deduplicator removed can come back through the model. An empty result
/// means "nothing selected" and ends the day's run without a report.
#[instrument(level = "info", skip_all, fields(pool = candidates.len(), target_count))]
pub async fn select_top<C: Complete>(
    completer: &C,
    candidates: &[Candidate],
    target_count: usize,
) -> Vec<SelectedItem> {
    if candidates.is_empty() || target_count == 0 {
        return Vec::new();
    }

    let prompt = prompts::select(candidates, target_count);
    let response = match completer.complete(&prompt, Some(SELECT_SYSTEM)).await {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "Selection completion failed");
            return Vec::new();
        }
    };

    let pool: HashSet<&str> = candidates.iter().map(|c| c.url.as_str()).collect();
    let selected: Vec<SelectedItem> = parse_with(&response, SELECTION_CHAIN)
        .into_iter()
        .filter(|item| {
            let known = pool.contains(item.url.as_str());
            if !known {
                warn!(url = %item.url, "Model selected a URL outside the pool; dropping");
            }
            known
        })
        .unique_by(|item| item.url.clone())
        .take(target_count)
        .collect();

    if selected.is_empty() {
        warn!(
            response_preview = %truncate_for_log(&response, 300),
            "Nothing selected"
        );
    } else {
        info!(count = selected.len(), "Selected items");
    }
    selected
}
