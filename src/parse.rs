//! Recovering structured lists from model output.
//!
//! Models do not reliably follow "JSON only" instructions, so each stage runs
//! the raw response through an ordered chain of [`Strategy`] functions and
//! keeps the first one that yields at least one valid item:
//!
//! 1. [`strict_json`]: the whole response is a JSON array
//! 2. [`bracketed_json`]: a JSON array embedded in prose or a code fence
//! 3. [`line_scan`]: URL-bearing lines paired with nearby text (candidates only)
//!
//! Invalid array elements are dropped individually. When nothing in the
//! chain produces an item the result is an empty list.

use crate::models::{Candidate, NO_REASON_GIVEN, SelectedItem};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

/// One parsing strategy. `None` means "nothing usable here, try the next".
pub type Strategy<T> = fn(&str) -> Option<Vec<T>>;

static BRACKETED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\[.*\]").unwrap());
/// Balanced `(...)` groups stay part of the URL; a lone `)` ends it, so
/// Markdown links still parse.
static URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https?://(?:[^\s<>"'()\[\]]|\([^\s<>"'()\[\]]*\))+"#).unwrap()
});
static LIST_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\d+[.)]\s+").unwrap());

/// Shape check for one element of a model-returned array.
pub trait ModelItem: Sized {
    fn from_value(value: &Value) -> Option<Self>;
}

fn non_empty_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

impl ModelItem for Candidate {
    fn from_value(value: &Value) -> Option<Self> {
        Some(Candidate {
            title: non_empty_str(value, "title")?.to_string(),
            url: non_empty_str(value, "url")?.to_string(),
        })
    }
}

impl ModelItem for SelectedItem {
    fn from_value(value: &Value) -> Option<Self> {
        Some(SelectedItem {
            title: non_empty_str(value, "title")?.to_string(),
            url: non_empty_str(value, "url")?.to_string(),
            reason: non_empty_str(value, "reason")
                .unwrap_or(NO_REASON_GIVEN)
                .to_string(),
        })
    }
}

/// Run `raw` through `chain`, stopping at the first strategy with items.
pub fn parse_with<T>(raw: &str, chain: &[Strategy<T>]) -> Vec<T> {
    chain
        .iter()
        .enumerate()
        .find_map(|(i, strategy)| {
            let items = strategy(raw)?;
            debug!(strategy = i, count = items.len(), "Parsed model output");
            Some(items)
        })
        .unwrap_or_default()
}

/// Chain used for per-source candidate extraction.
pub const CANDIDATE_CHAIN: &[Strategy<Candidate>] =
    &[strict_json::<Candidate>, bracketed_json::<Candidate>, line_scan];

/// Chain used for the cross-source selection. There is no per-line URL to
/// pair a reason with, so it stops at bracket extraction.
pub const SELECTION_CHAIN: &[Strategy<SelectedItem>] =
    &[strict_json::<SelectedItem>, bracketed_json::<SelectedItem>];

pub fn strict_json<T: ModelItem>(raw: &str) -> Option<Vec<T>> {
    let values: Vec<Value> = serde_json::from_str(raw.trim()).ok()?;
    let total = values.len();
    let items: Vec<T> = values.iter().filter_map(T::from_value).collect();
    if items.len() < total {
        warn!(
            dropped = total - items.len(),
            kept = items.len(),
            "Dropped malformed items from model output"
        );
    }
    (!items.is_empty()).then_some(items)
}

pub fn bracketed_json<T: ModelItem>(raw: &str) -> Option<Vec<T>> {
    let found = BRACKETED.find(raw)?;
    strict_json(found.as_str())
}

/// Heuristic scan for `title ... http(s)://url` lines.
///
/// The title is the rest of the line with the URL removed; when that is
/// empty the previous non-URL line is used instead.
pub fn line_scan(raw: &str) -> Option<Vec<Candidate>> {
    let lines: Vec<&str> = raw.lines().collect();
    let mut items = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let Some(found) = URL.find(line) else {
            continue;
        };
        let url = found.as_str().trim_end_matches(['.', ',', ';', ':']);

        let mut title = clean_title(&line.replace(found.as_str(), ""));
        if title.is_empty() && i > 0 && !URL.is_match(lines[i - 1]) {
            title = clean_title(lines[i - 1]);
        }
        if !title.is_empty() {
            items.push(Candidate {
                title,
                url: url.to_string(),
            });
        }
    }

    (!items.is_empty()).then_some(items)
}

fn clean_title(s: &str) -> String {
    let s = s.replace("[]", "").replace("()", "");
    let s = LIST_MARKER.replace(&s, "");
    let s = s.trim_matches(|c: char| c.is_whitespace() || "-*•:|,\"'[]()#>{}".contains(c));
    match s.to_ascii_lowercase().as_str() {
        "url" | "link" | "source" | "title" => String::new(),
        _ => s.to_string(),
    }
}
