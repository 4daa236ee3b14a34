//! Candidate extraction from one source page.

use crate::llm::Complete;
use crate::models::Candidate;
use crate::parse::{CANDIDATE_CHAIN, parse_with};
use crate::prompts::{self, EXTRACT_SYSTEM};
use crate::utils::truncate_for_log;
use itertools::Itertools;
use tracing::{error, info, instrument, warn};
use url::Url;

/// Ask the model for the noteworthy stories on `page_text`.
///
/// The response goes through [`CANDIDATE_CHAIN`]. Relative URLs are resolved
/// against `source_url`; absolute ones are kept byte-for-byte. Duplicate URLs
/// keep their first occurrence. A failed completion or unusable response
/// yields an empty list, which the coordinator treats as a no-op task.
#[instrument(level = "info", skip_all, fields(source = %source_url))]
pub async fn extract_candidates<C: Complete>(
    completer: &C,
    page_text: &str,
    source_url: &str,
    example_url: &str,
    example_output: &str,
) -> Vec<Candidate> {
    let prompt = prompts::extract(page_text, source_url, example_url, example_output);
    let response = match completer.complete(&prompt, Some(EXTRACT_SYSTEM)).await {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "Extraction completion failed");
            return Vec::new();
        }
    };

    let base = Url::parse(source_url).ok();
    let candidates: Vec<Candidate> = parse_with(&response, CANDIDATE_CHAIN)
        .into_iter()
        .filter_map(|c| resolve(c, base.as_ref()))
        .unique_by(|c| c.url.clone())
        .collect();

    if candidates.is_empty() {
        warn!(
            response_preview = %truncate_for_log(&response, 300),
            "No candidates recovered from model output"
        );
    } else {
        info!(count = candidates.len(), "Extracted candidates");
    }
    candidates
}

fn resolve(candidate: Candidate, base: Option<&Url>) -> Option<Candidate> {
    match Url::parse(&candidate.url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Some(candidate),
        Ok(_) => None,
        Err(_) => {
            let joined = base?.join(&candidate.url).ok()?;
            Some(Candidate {
                url: joined.to_string(),
                ..candidate
            })
        }
    }
}
