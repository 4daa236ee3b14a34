//! Loading the ordered list of news sources.
//!
//! The sources file is YAML with a top-level `news_dict` list (the key
//! `sources` is accepted too). Loading is all-or-nothing: one malformed entry
//! fails the whole run before any stage executes.

use crate::error::{PipelineError, Result};
use crate::models::SourceTask;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, instrument};
use url::Url;

#[derive(Debug, Deserialize)]
struct SourcesFile {
    #[serde(rename = "news_dict", alias = "sources")]
    sources: Vec<SourceTask>,
}

/// Read and validate the sources file at `path`.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub fn load_sources(path: &Path) -> Result<Vec<SourceTask>> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        PipelineError::Config(format!("cannot read sources file {}: {e}", path.display()))
    })?;
    let tasks = parse_sources(&raw)?;
    info!(count = tasks.len(), "Loaded source tasks");
    Ok(tasks)
}

/// Parse and validate sources YAML.
pub fn parse_sources(raw: &str) -> Result<Vec<SourceTask>> {
    let file: SourcesFile = serde_yaml::from_str(raw)?;
    if file.sources.is_empty() {
        return Err(PipelineError::Config("no sources configured".to_string()));
    }

    let mut keys = HashSet::new();
    for (i, task) in file.sources.iter().enumerate() {
        validate(task).map_err(|msg| PipelineError::Config(format!("source #{i}: {msg}")))?;
        if !keys.insert(task.output_key.as_str()) {
            return Err(PipelineError::Config(format!(
                "source #{i}: duplicate output_file {:?}",
                task.output_key
            )));
        }
    }
    Ok(file.sources)
}

fn validate(task: &SourceTask) -> std::result::Result<(), String> {
    let url = Url::parse(&task.url).map_err(|e| format!("bad url {:?}: {e}", task.url))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("url {:?} is not http(s)", task.url));
    }

    let key = &task.output_key;
    if key.trim().is_empty() {
        return Err("output_file is empty".to_string());
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        || key.starts_with('.')
    {
        return Err(format!("output_file {key:?} is not a safe file name"));
    }
    Ok(())
}
