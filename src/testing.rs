//! Scripted stand-ins for the fetch, completion and publish capabilities.
//!
//! Every fake records its calls so tests can assert exact attempt counts.

use crate::error::{PipelineError, Result};
use crate::fetch::PageSource;
use crate::llm::Complete;
use crate::models::SourceTask;
use crate::publish::Publish;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A source task with no trimming and no link example.
pub fn task(url: &str, key: &str) -> SourceTask {
    SourceTask {
        url: url.to_string(),
        output_key: key.to_string(),
        header_lines: 0,
        footer_lines: 0,
        example_url: String::new(),
        example_output: String::new(),
    }
}

type PageFn = Box<dyn Fn(&str) -> std::result::Result<String, String> + Send + Sync>;

enum PageScript {
    Always(String),
    Sequence(Mutex<VecDeque<std::result::Result<String, String>>>),
    ByUrl(PageFn),
}

pub struct ScriptedSource {
    script: PageScript,
    calls: Mutex<Vec<String>>,
}

impl ScriptedSource {
    pub fn always(text: &str) -> Self {
        Self::with(PageScript::Always(text.to_string()))
    }

    /// Replies in order; an exhausted script answers with an empty page.
    pub fn sequence(replies: Vec<std::result::Result<String, String>>) -> Self {
        Self::with(PageScript::Sequence(Mutex::new(replies.into())))
    }

    pub fn by_url<F>(respond: F) -> Self
    where
        F: Fn(&str) -> std::result::Result<String, String> + Send + Sync + 'static,
    {
        Self::with(PageScript::ByUrl(Box::new(respond)))
    }

    fn with(script: PageScript) -> Self {
        Self {
            script,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl PageSource for ScriptedSource {
    async fn fetch_page(&self, url: &str) -> Result<String> {
        self.calls.lock().unwrap().push(url.to_string());
        let reply = match &self.script {
            PageScript::Always(text) => Ok(text.clone()),
            PageScript::Sequence(replies) => replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(String::new())),
            PageScript::ByUrl(respond) => respond(url),
        };
        reply.map_err(PipelineError::Http)
    }
}

type CompleteFn = Box<dyn Fn(&str, Option<&str>) -> Result<String> + Send + Sync>;

enum CompletionScript {
    Sequence(Mutex<VecDeque<Result<String>>>),
    Responder(CompleteFn),
}

pub struct ScriptedCompleter {
    script: CompletionScript,
    calls: Mutex<Vec<(String, Option<String>)>>,
}

impl ScriptedCompleter {
    /// Replies in order; an exhausted script answers `Ok("")` forever.
    pub fn sequence(replies: Vec<Result<String>>) -> Self {
        Self::with(CompletionScript::Sequence(Mutex::new(replies.into())))
    }

    /// Replies computed from the prompt and system message.
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&str, Option<&str>) -> Result<String> + Send + Sync + 'static,
    {
        Self::with(CompletionScript::Responder(Box::new(respond)))
    }

    fn with(script: CompletionScript) -> Self {
        Self {
            script,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_with_system(&self, system: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s)| s.as_deref() == Some(system))
            .count()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(p, _)| p.clone())
            .collect()
    }
}

impl Complete for ScriptedCompleter {
    async fn complete(&self, prompt: &str, system: Option<&str>) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((prompt.to_string(), system.map(str::to_string)));
        match &self.script {
            CompletionScript::Sequence(replies) => replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(String::new())),
            CompletionScript::Responder(respond) => respond(prompt, system),
        }
    }
}

pub struct RecordingPublisher {
    outcome: std::result::Result<String, String>,
    calls: Mutex<Vec<PathBuf>>,
}

impl RecordingPublisher {
    pub fn returning(id: &str) -> Self {
        Self {
            outcome: Ok(id.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            outcome: Err(reason.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().unwrap().clone()
    }
}

impl Publish for RecordingPublisher {
    async fn publish(&self, document: &Path) -> Result<Option<String>> {
        self.calls.lock().unwrap().push(document.to_path_buf());
        self.outcome
            .clone()
            .map(Some)
            .map_err(PipelineError::Publish)
    }
}
