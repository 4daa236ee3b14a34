//! Cross-run deduplication.
//!
//! A candidate is dropped when its URL was selected on any of the previous
//! `window_days` days. URLs are compared exactly as stored: no scheme, slash
//! or query normalisation.

use crate::checkpoint::{CheckpointStore, day_key};
use crate::models::Candidate;
use chrono::Days;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

/// URLs selected during the trailing window before a run date.
///
/// Derived from the per-day selection checkpoints on every run; never
/// persisted on its own.
#[derive(Debug, Default)]
pub struct HistoryIndex {
    seen: HashSet<String>,
}

impl HistoryIndex {
    /// Union the selection checkpoints of `[date - window_days, date - 1]`.
    ///
    /// Missing days are normal. Unreadable or malformed files are logged and
    /// skipped so deduplication only ever gets weaker, never fatal.
    #[instrument(level = "info", skip_all, fields(date = %day_key(store.date()), window_days))]
    pub async fn load(store: &CheckpointStore, window_days: u32) -> Self {
        let mut seen = HashSet::new();

        for offset in 1..=u64::from(window_days) {
            let Some(date) = store.date().checked_sub_days(Days::new(offset)) else {
                warn!(offset, "History date out of range; skipping");
                continue;
            };
            let path = store.for_date(date).selected_path();
            if !path.exists() {
                continue;
            }

            match store.read_json::<Vec<Value>>(&path).await {
                Ok(items) => {
                    let before = seen.len();
                    seen.extend(
                        items
                            .iter()
                            .filter_map(|item| item.get("url").and_then(Value::as_str))
                            .map(str::to_string),
                    );
                    debug!(day = %day_key(date), added = seen.len() - before, "Loaded history day");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Unreadable history file; skipping");
                }
            }
        }

        info!(seen = seen.len(), "History index ready");
        Self::from_urls(seen)
    }

    pub fn from_urls<I: IntoIterator<Item = String>>(urls: I) -> Self {
        Self {
            seen: urls.into_iter().collect(),
        }
    }

    pub fn contains(&self, url: &str) -> bool {
        self.seen.contains(url)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Keep candidates whose URL is not in the index, in input order.
    pub fn filter(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        candidates
            .into_iter()
            .filter(|c| {
                let seen = self.contains(&c.url);
                if seen {
                    debug!(url = %c.url, "Dropping candidate seen in history");
                }
                !seen
            })
            .collect()
    }
}

/// Drop candidates already selected within `window_days` before the store's date.
pub async fn remove_seen(
    candidates: Vec<Candidate>,
    store: &CheckpointStore,
    window_days: u32,
) -> Vec<Candidate> {
    let history = HistoryIndex::load(store, window_days).await;
    let before = candidates.len();
    let kept = history.filter(candidates);
    info!(
        before,
        after = kept.len(),
        history = history.len(),
        "Removed previously selected candidates"
    );
    kept
}
