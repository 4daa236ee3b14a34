//! Plain HTTP page source.
//!
//! Downloads a page with `reqwest` and renders the HTML into line-oriented
//! text with `scraper`. Links are kept as `[text](absolute-url)` so the
//! extraction prompt can see where each headline points.

use super::PageSource;
use crate::error::{PipelineError, Result};
use reqwest::header::CONTENT_TYPE;
use scraper::{ElementRef, Html};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct HttpPageSource {
    client: reqwest::Client,
}

impl HttpPageSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

impl PageSource for HttpPageSource {
    #[instrument(level = "info", skip_all, fields(%url))]
    async fn fetch_page(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Http(format!("{url} returned {status}")));
        }

        let is_html = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_none_or(|v| v.contains("html"));
        let final_url = response.url().clone();
        let body = response.text().await?;

        let text = if is_html {
            render_html(&body, Some(&final_url))
        } else {
            body
        };
        debug!(bytes = text.len(), "Rendered page text");
        Ok(text)
    }
}

/// Render an HTML document as text, one block element per line.
///
/// Script-like elements are dropped. Anchors become `[text](url)` with the
/// href resolved against `base` when one is given.
pub fn render_html(html: &str, base: Option<&Url>) -> String {
    let document = Html::parse_document(html);
    let mut out = String::new();
    walk(document.root_element(), base, &mut out);

    out.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn walk(element: ElementRef<'_>, base: Option<&Url>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
            continue;
        }
        let Some(child_el) = ElementRef::wrap(child) else {
            continue;
        };

        let name = child_el.value().name();
        match name {
            "script" | "style" | "noscript" | "svg" | "head" | "template" | "iframe" => continue,
            "br" => {
                out.push('\n');
                continue;
            }
            "a" => {
                render_link(child_el, base, out);
                continue;
            }
            _ => {}
        }

        let block = is_block(name);
        if block {
            out.push('\n');
        }
        if let Some(level) = heading_level(name) {
            out.push_str(&"#".repeat(level));
            out.push(' ');
        }
        walk(child_el, base, out);
        if block {
            out.push('\n');
        }
    }
}

fn render_link(anchor: ElementRef<'_>, base: Option<&Url>, out: &mut String) {
    let text = anchor.text().collect::<Vec<_>>().join(" ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");

    match anchor.value().attr("href").and_then(|href| resolve_href(href, base)) {
        Some(href) => {
            out.push_str(&format!(" [{text}]({href}) "));
        }
        None => {
            out.push_str(&text);
        }
    }
}

fn resolve_href(href: &str, base: Option<&Url>) -> Option<String> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
    {
        return None;
    }
    match Url::parse(href) {
        Ok(abs) => Some(abs.to_string()),
        Err(_) => match base {
            Some(base) => base.join(href).ok().map(|u| u.to_string()),
            None => Some(href.to_string()),
        },
    }
}

fn heading_level(name: &str) -> Option<usize> {
    match name {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

fn is_block(name: &str) -> bool {
    matches!(
        name,
        "p" | "div"
            | "section"
            | "article"
            | "header"
            | "footer"
            | "nav"
            | "main"
            | "aside"
            | "ul"
            | "ol"
            | "li"
            | "tr"
            | "table"
            | "blockquote"
            | "pre"
            | "figure"
            | "figcaption"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
    )
}
