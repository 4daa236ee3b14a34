//! Data models flowing through the digest pipeline.
//!
//! - [`SourceTask`]: one configured news source plus its parsing hints
//! - [`Candidate`]: a title/URL pair extracted from a source page
//! - [`SelectedItem`]: a candidate promoted into the day's shortlist
//! - [`Analysis`]: the model's write-up of one selected item
//!
//! The serialized field names are the on-disk checkpoint format, so renaming
//! a Rust field must keep its `serde` name.

use serde::{Deserialize, Serialize};

/// Analysis text recorded when an article had no usable content.
///
/// The aggregator uses it to prune the item from the day's selection so a
/// broken source does not poison the next days' deduplication.
pub const NO_CONTENT_SKIPPED: &str = "no content, skipped";

/// Reason attached to selected items the model returned without one.
pub const NO_REASON_GIVEN: &str = "no reason given";

/// One news source to scan, loaded from the sources file.
///
/// # Fields
///
/// * `url` - The source front page
/// * `output_key` - Prefix for this source's checkpoint files
/// * `header_lines` / `footer_lines` - Lines of boilerplate trimmed from fetched pages
/// * `example_url` / `example_output` - One in-context example of how a link on
///   this page should be written out as an absolute article URL
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SourceTask {
    pub url: String,
    #[serde(rename = "output_file")]
    pub output_key: String,
    #[serde(rename = "strip_line_header")]
    pub header_lines: usize,
    #[serde(rename = "strip_line_bottom")]
    pub footer_lines: usize,
    #[serde(rename = "sample_url")]
    pub example_url: String,
    #[serde(rename = "sample_url_output")]
    pub example_output: String,
}

/// A story link picked out of a source page. `url` is its identity.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Candidate {
    pub title: String,
    pub url: String,
}

/// A candidate that made the day's shortlist.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SelectedItem {
    pub title: String,
    pub url: String,
    #[serde(default = "default_reason")]
    pub reason: String,
}

fn default_reason() -> String {
    NO_REASON_GIVEN.to_string()
}

/// The model's analysis of one selected item.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Analysis {
    pub title: String,
    pub url: String,
    pub analysis: String,
}

impl Analysis {
    /// Sentinel analysis for an item whose article had no content.
    pub fn skipped(item: &SelectedItem) -> Self {
        Self {
            title: item.title.clone(),
            url: item.url.clone(),
            analysis: NO_CONTENT_SKIPPED.to_string(),
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.analysis == NO_CONTENT_SKIPPED
    }
}
