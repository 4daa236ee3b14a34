//! Page fetching with bounded retry and a mirror fallback.
//!
//! [`PageSource`] is the raw capability ("give me this page as text").
//! [`Fetcher`] wraps it with the retry policy every stage relies on:
//!
//! 1. Up to `attempts` direct requests, sleeping a fixed `delay` after each
//!    failure. A response whose trimmed text is `min_content_len` chars or
//!    shorter counts as a failure.
//! 2. If the caller did not already ask for the mirror, one extra request
//!    through the archival mirror.
//! 3. Otherwise [`FetchOutcome::Failed`], never an error.
//!
//! Nothing is cached between calls; source pages change all day.

pub mod http;

use crate::error::Result;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

/// Text stored in place of a page whose fetch was exhausted.
pub const FETCH_FAILED: &str = "fetch failed: retries exhausted";

/// Default archival mirror; the original URL is appended verbatim.
pub const DEFAULT_MIRROR_PREFIX: &str = "https://archive.ph/newest/";

/// Raw page-fetch capability.
///
/// Implementations own whatever browser or HTTP machinery they need and may
/// not tolerate concurrent instantiation, so callers share one instance.
pub trait PageSource {
    async fn fetch_page(&self, url: &str) -> Result<String>;
}

impl<T: PageSource> PageSource for &T {
    async fn fetch_page(&self, url: &str) -> Result<String> {
        (**self).fetch_page(url).await
    }
}

/// Result of [`Fetcher::fetch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Page(String),
    /// Every direct attempt and the mirror attempt came back unusable.
    Failed,
}

impl FetchOutcome {
    /// The page text, or [`FETCH_FAILED`].
    pub fn text(&self) -> &str {
        match self {
            FetchOutcome::Page(text) => text,
            FetchOutcome::Failed => FETCH_FAILED,
        }
    }

    pub fn into_page(self) -> Option<String> {
        match self {
            FetchOutcome::Page(text) => Some(text),
            FetchOutcome::Failed => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub attempts: usize,
    pub delay: Duration,
    pub min_content_len: usize,
    pub mirror_prefix: String,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(2),
            min_content_len: 10,
            mirror_prefix: DEFAULT_MIRROR_PREFIX.to_string(),
        }
    }
}

/// Retrying front for a [`PageSource`].
#[derive(Debug)]
pub struct Fetcher<S> {
    source: S,
    policy: FetchPolicy,
}

impl<S: PageSource> Fetcher<S> {
    pub fn new(source: S, policy: FetchPolicy) -> Self {
        Self { source, policy }
    }

    pub fn mirror_url(&self, url: &str) -> String {
        format!("{}{}", self.policy.mirror_prefix, url)
    }

    /// Fetch `url` as text.
    ///
    /// With `bypass_paywall` the direct attempts already go through the
    /// mirror and no extra fallback is made.
    #[instrument(level = "info", skip(self), fields(%url, bypass_paywall))]
    pub async fn fetch(&self, url: &str, bypass_paywall: bool) -> FetchOutcome {
        let target = if bypass_paywall {
            self.mirror_url(url)
        } else {
            url.to_string()
        };

        for attempt in 1..=self.policy.attempts {
            if let Some(text) = self.try_once(&target).await {
                debug!(attempt, bytes = text.len(), "Fetched page");
                return FetchOutcome::Page(text);
            }
            let another_request = attempt < self.policy.attempts || !bypass_paywall;
            if another_request {
                warn!(attempt, max = self.policy.attempts, delay = ?self.policy.delay, "Fetch attempt unusable; retrying");
                sleep(self.policy.delay).await;
            }
        }

        if !bypass_paywall {
            let mirror = self.mirror_url(url);
            info!(%mirror, "Direct fetch exhausted; trying mirror");
            if let Some(text) = self.try_once(&mirror).await {
                return FetchOutcome::Page(text);
            }
        }

        warn!("Fetch failed after all retries");
        FetchOutcome::Failed
    }

    async fn try_once(&self, url: &str) -> Option<String> {
        match self.source.fetch_page(url).await {
            Ok(text) if is_usable(&text, self.policy.min_content_len) => Some(text),
            Ok(text) => {
                debug!(%url, chars = text.trim().chars().count(), "Page came back empty");
                None
            }
            Err(e) => {
                warn!(%url, error = %e, "Page fetch errored");
                None
            }
        }
    }
}

fn is_usable(text: &str, min_len: usize) -> bool {
    text.trim().chars().count() > min_len
}
