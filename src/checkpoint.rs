//! Per-day checkpoint store.
//!
//! Every stage writes its output under one day directory. A stage counts as
//! done when its output file exists, so a crashed run picks up at the first
//! stage without one. Writes go to a temp file and are renamed into place,
//! which keeps a half-written file from ever marking a stage complete.
//!
//! ```text
//! <root>/<YYYYMMDD>/
//! ├── state.json
//! ├── daily_report_<YYYYMMDD>.md
//! └── log/
//!     ├── <key>.origin
//!     ├── <key>.news_list.json
//!     ├── deduplicated.json
//!     ├── selected_news.json
//!     ├── analyses/NN.json
//!     ├── analyses.json
//!     └── published.json
//! ```

use crate::error::{PipelineError, Result};
use crate::models::SourceTask;
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

const DAY_FORMAT: &str = "%Y%m%d";

/// Progress of one day's run, in pipeline order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    #[default]
    NotStarted,
    TasksRunning,
    TasksComplete,
    Deduplicated,
    Selected,
    Analyzed,
    Aggregated,
    Published,
}

/// The persisted `state.json` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    pub date: String,
    pub stage: RunStage,
    pub updated_at: DateTime<Utc>,
}

/// `20250506` style key for a run date.
pub fn day_key(date: NaiveDate) -> String {
    date.format(DAY_FORMAT).to_string()
}

pub fn parse_day_key(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DAY_FORMAT)
        .map_err(|_| PipelineError::InvalidDate(raw.to_string()))
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
    date: NaiveDate,
    day_dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(root: impl Into<PathBuf>, date: NaiveDate) -> Self {
        let root = root.into();
        let day_dir = root.join(day_key(date));
        Self {
            root,
            date,
            day_dir,
        }
    }

    /// Store for another day under the same root.
    pub fn for_date(&self, date: NaiveDate) -> Self {
        Self::new(self.root.clone(), date)
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn day_dir(&self) -> &Path {
        &self.day_dir
    }

    fn log_dir(&self) -> PathBuf {
        self.day_dir.join("log")
    }

    pub fn origin_path(&self, task: &SourceTask) -> PathBuf {
        self.log_dir().join(format!("{}.origin", task.output_key))
    }

    pub fn candidates_path(&self, task: &SourceTask) -> PathBuf {
        self.log_dir().join(format!("{}.news_list.json", task.output_key))
    }

    pub fn deduplicated_path(&self) -> PathBuf {
        self.log_dir().join("deduplicated.json")
    }

    pub fn selected_path(&self) -> PathBuf {
        self.log_dir().join("selected_news.json")
    }

    pub fn analysis_item_path(&self, index: usize) -> PathBuf {
        self.log_dir().join("analyses").join(format!("{index:02}.json"))
    }

    pub fn analyses_path(&self) -> PathBuf {
        self.log_dir().join("analyses.json")
    }

    pub fn final_path(&self) -> PathBuf {
        self.day_dir
            .join(format!("daily_report_{}.md", day_key(self.date)))
    }

    pub fn published_path(&self) -> PathBuf {
        self.log_dir().join("published.json")
    }

    pub fn state_path(&self) -> PathBuf {
        self.day_dir.join("state.json")
    }

    /// The run-level gate: a day with a final report is finished.
    pub fn final_exists(&self) -> bool {
        self.final_path().exists()
    }

    /// Furthest stage whose output is on disk.
    pub fn stage(&self, tasks: &[SourceTask]) -> RunStage {
        if self.published_path().exists() {
            RunStage::Published
        } else if self.final_exists() {
            RunStage::Aggregated
        } else if self.analyses_path().exists() {
            RunStage::Analyzed
        } else if self.selected_path().exists() {
            RunStage::Selected
        } else if self.deduplicated_path().exists() {
            RunStage::Deduplicated
        } else if !tasks.is_empty() && tasks.iter().all(|t| self.candidates_path(t).exists()) {
            RunStage::TasksComplete
        } else if tasks
            .iter()
            .any(|t| self.origin_path(t).exists() || self.candidates_path(t).exists())
        {
            RunStage::TasksRunning
        } else {
            RunStage::NotStarted
        }
    }

    /// Persist `stage` as the day's state record.
    pub async fn record_stage(&self, stage: RunStage) -> Result<()> {
        let record = StateRecord {
            date: day_key(self.date),
            stage,
            updated_at: Utc::now(),
        };
        self.write_json(&self.state_path(), &record).await
    }

    pub async fn load_state(&self) -> Option<StateRecord> {
        self.read_json(&self.state_path()).await.ok()
    }

    pub async fn write_json<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        self.write_text(path, &json).await
    }

    pub async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let raw = fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub async fn write_text(&self, path: &Path, text: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, text).await?;
        fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), bytes = text.len(), "Wrote checkpoint");
        Ok(())
    }
}
