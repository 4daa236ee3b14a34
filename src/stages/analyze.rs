//! Per-item article analysis.

use crate::error::Result;
use crate::fetch::{Fetcher, PageSource};
use crate::llm::Complete;
use crate::models::{Analysis, SelectedItem, SourceTask};
use crate::prompts::{self, ANALYZE_SYSTEM};
use crate::utils::trim_lines;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone)]
pub struct AnalyzeSettings {
    /// Trimmed article text shorter than this many chars triggers a re-fetch.
    pub min_content_len: usize,
    pub refetch_attempts: usize,
}

impl Default for AnalyzeSettings {
    fn default() -> Self {
        Self {
            min_content_len: 10,
            refetch_attempts: 3,
        }
    }
}

/// Fetch the article behind `item` and have the model analyze it.
///
/// `origin` is the source task the item was extracted from; its header and
/// footer counts are trimmed off the article. Without one the article is used
/// as fetched.
///
/// - No content at all: returns [`Analysis::skipped`] without a completion.
/// - Trimmed text too short: re-fetch and re-trim up to `refetch_attempts`
///   times, then go with what there is (the untrimmed page if trimming
///   left nothing).
///
/// # Errors
///
/// Only a completion that exhausted its own retries.
#[instrument(level = "info", skip_all, fields(url = %item.url))]
pub async fn analyze<S: PageSource, C: Complete>(
    fetcher: &Fetcher<S>,
    completer: &C,
    item: &SelectedItem,
    origin: Option<&SourceTask>,
    settings: &AnalyzeSettings,
) -> Result<Analysis> {
    let Some(mut page) = fetcher
        .fetch(&item.url, false)
        .await
        .into_page()
        .filter(|text| !text.trim().is_empty())
    else {
        warn!("Article has no content; skipping analysis");
        return Ok(Analysis::skipped(item));
    };

    let (header, footer) = origin
        .map(|task| (task.header_lines, task.footer_lines))
        .unwrap_or((0, 0));
    let mut trimmed = trim_lines(&page, header, footer);

    let mut refetches = 0;
    while trimmed.trim().chars().count() < settings.min_content_len
        && refetches < settings.refetch_attempts
    {
        refetches += 1;
        warn!(
            refetches,
            max = settings.refetch_attempts,
            chars = trimmed.trim().chars().count(),
            "Trimmed article too short; re-fetching"
        );
        if let Some(again) = fetcher.fetch(&item.url, false).await.into_page() {
            trimmed = trim_lines(&again, header, footer);
            page = again;
        }
    }

    let content = if trimmed.trim().is_empty() {
        warn!("Trimming removed the whole article; using it untrimmed");
        page.as_str()
    } else {
        trimmed.as_str()
    };
    info!(
        fetched_chars = page.chars().count(),
        used_chars = content.chars().count(),
        "Analyzing article"
    );

    let prompt = prompts::analyze(item, content);
    let analysis = completer.complete(&prompt, Some(ANALYZE_SYSTEM)).await?;

    Ok(Analysis {
        title: item.title.clone(),
        url: item.url.clone(),
        analysis,
    })
}
