//! Prompt text for each completion stage.
//!
//! Every stage sends its own system message so one chat template can serve
//! the whole run.

use crate::models::{Analysis, Candidate, SelectedItem};
use std::fmt::Write;

pub const EXTRACT_SYSTEM: &str = "You are a news editor who reads a publication's front page and \
lists its most noteworthy stories. You answer with a JSON array only.";

pub const SELECT_SYSTEM: &str = "You are the editor-in-chief of a daily news digest. You rank \
stories gathered from many publications and answer with a JSON array only.";

pub const ANALYZE_SYSTEM: &str = "You are a seasoned news commentator who writes sharp, \
well-sourced analysis of a single article.";

pub const AGGREGATE_SYSTEM: &str = "You are the editor-in-chief assembling the day's digest from \
your commentators' analyses.";

/// Prompt asking for the noteworthy stories on one source page.
pub fn extract(page_text: &str, source_url: &str, example_url: &str, example_output: &str) -> String {
    format!(
        r#"From the front page of {source_url} below, pick the 5 to 10 stories most worth following today.
Prefer major policy or economic shifts, technical breakthroughs, fresh developments from the
last 24-48 hours, and original analysis.

Answer with a JSON array in exactly this shape:
[
  {{"title": "Story title", "url": "Absolute story URL"}}
]

Links on this page may be relative or templated. For example the link {example_url}
must be written as: {example_output}

Front page content:
{page_text}

Output only the JSON array."#
    )
}

/// Prompt asking for the day's shortlist across every source.
pub fn select(candidates: &[Candidate], target_count: usize) -> String {
    let mut listing = String::new();
    for (idx, candidate) in candidates.iter().enumerate() {
        let _ = writeln!(
            listing,
            "{}. Title: {}\n   Source: {}\n",
            idx + 1,
            candidate.title,
            candidate.url
        );
    }

    format!(
        r#"Below are today's stories collected from all our sources. Choose the {target_count} most
important ones, weighing impact, timeliness, depth and novelty, and keep the selection varied
across fields.

{listing}
Answer with a JSON array of {target_count} entries in exactly this shape:
[
  {{"title": "Story title", "url": "Story URL", "reason": "Why it was chosen"}}
]

Copy titles and URLs exactly as listed. Output only the JSON array."#
    )
}

/// Prompt asking for an analysis of one article.
pub fn analyze(item: &SelectedItem, content: &str) -> String {
    format!(
        r#"Analyze this news story in about 800 words:

1. Open with a headline that gets to the heart of it.
2. Briefly explain what happened.
3. Give your view: strengths and weaknesses, real impact on the market and industry, and
   what it means for society and policy.
4. Make a bold prediction about what comes next.
5. Close with concrete advice for the reader.

Keep it conversational and opinionated. Do not cite numbers that are not in the source.

Why this story was picked: {reason}
Source: {url}

Article content:
{content}"#,
        reason = item.reason,
        url = item.url,
    )
}

/// Prompt asking for the final digest built from every analysis.
pub fn aggregate(analyses: &[Analysis], title: &str) -> String {
    let mut body = String::new();
    for analysis in analyses {
        let _ = writeln!(
            body,
            "\n【{}】\nSource: {}\n{}",
            analysis.title, analysis.url, analysis.analysis
        );
    }

    format!(
        r#"Combine the analyses below into one daily digest titled "{title}".

- Pick the one or two most consequential themes and analyze them in depth: the technology or
  product, market impact, social and policy impact, and where it is heading.
- Cover the remaining stories as short briefs.
- Point out connections between stories and remove repetition.
- Keep every source link.

Structure: title, a short lede, the in-depth section, the briefs, and a closing paragraph on
the day's main trends. Write in Markdown.

Analyses:
{body}"#
    )
}
