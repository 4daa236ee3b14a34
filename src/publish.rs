//! Publishing handoff for the finished report.
//!
//! The pipeline only knows the [`Publish`] capability: hand over the report
//! path, get back a draft or publish id. A failed handoff never undoes the
//! report; the coordinator logs it with `event_kind = "publish.failed"`.
//!
//! [`HttpPublisher`] posts the report to a content-management endpoint:
//!
//! ```text
//! POST <endpoint>
//! Authorization: Bearer <token>
//! {"title": ..., "author": ..., "digest": ..., "content": ..., "publish": false}
//! ```
//!
//! The title is the report's first Markdown heading and the digest its first
//! paragraph, cut to [`DIGEST_MAX_CHARS`]. The response must carry an `id`,
//! `media_id` or `publish_id`.

use crate::error::{PipelineError, Result};
use crate::utils::truncate_for_log;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument, warn};
use url::Url;

pub const DIGEST_MAX_CHARS: usize = 64;

pub const DEFAULT_AUTHOR: &str = "Daily Digest";

/// Hand a finished report to whatever publishes it.
///
/// `Ok(None)` means nothing was published (no publisher configured).
pub trait Publish {
    async fn publish(&self, document: &Path) -> Result<Option<String>>;
}

impl<P: Publish> Publish for &P {
    async fn publish(&self, document: &Path) -> Result<Option<String>> {
        (**self).publish(document).await
    }
}

/// An unconfigured publisher is a no-op.
impl<P: Publish> Publish for Option<P> {
    async fn publish(&self, document: &Path) -> Result<Option<String>> {
        match self {
            Some(publisher) => publisher.publish(document).await,
            None => {
                info!(path = %document.display(), "No publisher configured; skipping handoff");
                Ok(None)
            }
        }
    }
}

/// Contents of `log/published.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRecord {
    pub id: String,
    pub document: PathBuf,
    pub published_at: DateTime<Utc>,
}

impl PublishRecord {
    pub fn new(id: String, document: &Path) -> Self {
        Self {
            id,
            document: document.to_path_buf(),
            published_at: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DraftRequest<'a> {
    title: &'a str,
    author: &'a str,
    digest: &'a str,
    content: &'a str,
    publish: bool,
}

#[derive(Debug)]
pub struct HttpPublisher {
    client: reqwest::Client,
    endpoint: Url,
    token: Option<String>,
    author: String,
    auto_publish: bool,
}

impl HttpPublisher {
    pub fn new(
        endpoint: &str,
        token: Option<String>,
        author: impl Into<String>,
        auto_publish: bool,
    ) -> Result<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            PipelineError::Config(format!("invalid publish endpoint {endpoint:?}: {e}"))
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            token,
            author: author.into(),
            auto_publish,
        })
    }
}

impl Publish for HttpPublisher {
    #[instrument(level = "info", skip_all, fields(path = %document.display(), auto_publish = self.auto_publish))]
    async fn publish(&self, document: &Path) -> Result<Option<String>> {
        let content = tokio::fs::read_to_string(document).await?;

        let fallback_title = document
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let title = first_heading(&content).unwrap_or(&fallback_title);
        let digest = first_paragraph(&content, DIGEST_MAX_CHARS);

        let draft = DraftRequest {
            title,
            author: &self.author,
            digest: &digest,
            content: &content,
            publish: self.auto_publish,
        };

        let mut request = self.client.post(self.endpoint.clone()).json(&draft);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, body = %truncate_for_log(&body, 300), "Publish endpoint rejected report");
            return Err(PipelineError::Publish(format!(
                "endpoint returned {status}: {}",
                truncate_for_log(&body, 200)
            )));
        }

        let body: Value = response.json().await?;
        let id = response_id(&body).ok_or_else(|| {
            PipelineError::Publish(format!(
                "response carried no id: {}",
                truncate_for_log(&body.to_string(), 200)
            ))
        })?;
        info!(%id, %title, "Report handed to publisher");
        Ok(Some(id))
    }
}

/// Text of the first Markdown heading, without its `#` markers.
pub fn first_heading(markdown: &str) -> Option<&str> {
    markdown
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('#'))
        .map(|line| line.trim_start_matches('#').trim())
        .find(|title| !title.is_empty())
}

/// First non-heading paragraph, whitespace-collapsed and cut to `max_chars`.
pub fn first_paragraph(markdown: &str, max_chars: usize) -> String {
    let mut paragraph: Vec<&str> = Vec::new();
    for line in markdown.lines().map(str::trim) {
        if line.is_empty() {
            if !paragraph.is_empty() {
                break;
            }
            continue;
        }
        if line.starts_with('#') {
            if !paragraph.is_empty() {
                break;
            }
            continue;
        }
        paragraph.push(line);
    }

    paragraph
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(max_chars)
        .collect()
}

fn response_id(body: &Value) -> Option<String> {
    ["id", "media_id", "publish_id"]
        .iter()
        .find_map(|key| match body.get(*key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}
