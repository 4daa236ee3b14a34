//! The completion capability: send a prompt to an LLM, get text back.
//!
//! - [`Complete`]: core trait every stage talks to
//! - [`RetryComplete`]: decorator retrying transport errors and empty answers
//!   with a fixed budget and a fixed delay
//! - [`AwfulJadeClient`]: OpenAI-compatible backend built on `awful_aj`
//!
//! Callers treat a completion as one blocking step; once the retry budget is
//! spent the error is returned to the stage, which decides what it means.

use crate::error::{PipelineError, Result};
use awful_aj::api::ask;
use awful_aj::{config::AwfulJadeConfig, template::ChatTemplate};
use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

/// Async LLM completion.
pub trait Complete {
    /// Complete `prompt`, optionally under a stage-specific system message.
    async fn complete(&self, prompt: &str, system: Option<&str>) -> Result<String>;
}

impl<T: Complete> Complete for &T {
    async fn complete(&self, prompt: &str, system: Option<&str>) -> Result<String> {
        (**self).complete(prompt, system).await
    }
}

/// Retry wrapper around any [`Complete`] implementation.
///
/// An `Ok` response that is empty or whitespace counts as a failed attempt.
/// The inner client is called at most `max_retries + 1` times, sleeping
/// `delay` between attempts.
pub struct RetryComplete<T> {
    inner: T,
    max_retries: usize,
    delay: Duration,
}

impl<T: Complete> RetryComplete<T> {
    pub fn new(inner: T, max_retries: usize, delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            delay,
        }
    }
}

impl<T> fmt::Debug for RetryComplete<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryComplete")
            .field("max_retries", &self.max_retries)
            .field("delay", &self.delay)
            .finish()
    }
}

impl<T: Complete> Complete for RetryComplete<T> {
    #[instrument(level = "info", skip_all)]
    async fn complete(&self, prompt: &str, system: Option<&str>) -> Result<String> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            let failure = match self.inner.complete(prompt, system).await {
                Ok(resp) if !resp.trim().is_empty() => return Ok(resp),
                Ok(_) => "empty response".to_string(),
                Err(e) => e.to_string(),
            };

            attempt += 1;
            if attempt > self.max_retries {
                error!(
                    attempt,
                    max = self.max_retries,
                    elapsed_ms_total = total_t0.elapsed().as_millis(),
                    error = %failure,
                    "complete() exhausted retries"
                );
                return Err(PipelineError::Completion(format!(
                    "gave up after {attempt} attempts: {failure}"
                )));
            }

            warn!(
                attempt,
                max = self.max_retries,
                elapsed_ms_attempt = attempt_t0.elapsed().as_millis(),
                delay = ?self.delay,
                error = %failure,
                "complete() attempt failed; retrying"
            );
            sleep(self.delay).await;
        }
    }
}

/// [`Complete`] backend over `awful_aj::api::ask`.
///
/// Endpoint, key and model come from an `awful_aj` `config.yaml`; the chat
/// template supplies the default system prompt, which a stage's system
/// message replaces for that call.
pub struct AwfulJadeClient {
    config: AwfulJadeConfig,
    template: ChatTemplate,
}

impl AwfulJadeClient {
    pub fn new(config: AwfulJadeConfig, template: ChatTemplate) -> Self {
        Self { config, template }
    }

    /// Load the `awful_aj` config (explicit path or the default config dir)
    /// and the named chat template.
    #[instrument(level = "info", skip_all, fields(template = %template_name))]
    pub async fn load(config_path: Option<&Path>, template_name: &str) -> Result<Self> {
        let config_file = match config_path {
            Some(p) => p.to_path_buf(),
            None => awful_aj::config_dir()
                .map_err(|e| PipelineError::Config(format!("no awful_aj config dir: {e}")))?
                .join("config.yaml"),
        };
        let config_file = config_file
            .to_str()
            .ok_or_else(|| PipelineError::Config("LLM config path is not UTF-8".to_string()))?
            .to_string();

        let config = awful_aj::config::load_config(&config_file).map_err(|e| {
            PipelineError::Config(format!("cannot load LLM config {config_file}: {e}"))
        })?;
        info!(config_path = %config_file, "Loaded LLM configuration");

        let template = awful_aj::template::load_template(template_name)
            .await
            .map_err(|e| {
                PipelineError::Config(format!("cannot load template {template_name}: {e}"))
            })?;
        info!("Loaded chat template");

        Ok(Self::new(config, template))
    }
}

impl fmt::Debug for AwfulJadeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwfulJadeClient").finish_non_exhaustive()
    }
}

impl Complete for AwfulJadeClient {
    #[instrument(level = "info", skip_all, fields(prompt_bytes = prompt.len()))]
    async fn complete(&self, prompt: &str, system: Option<&str>) -> Result<String> {
        let t0 = Instant::now();
        let template = match system {
            Some(sys) => {
                let mut t = self.template.clone();
                t.system_prompt = sys.to_string();
                t
            }
            None => self.template.clone(),
        };

        let res = ask(&self.config, prompt.to_string(), &template, None, None)
            .await
            .map_err(|e| PipelineError::Completion(e.to_string()));

        let elapsed_ms = t0.elapsed().as_millis();
        match &res {
            Ok(text) => info!(elapsed_ms, response_bytes = text.len(), "LLM call succeeded"),
            Err(e) => warn!(elapsed_ms, error = %e, "LLM call failed"),
        }
        res
    }
}
