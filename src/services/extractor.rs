// src/services/extractor.rs

//! Content extraction service.
//!
//! Loads a page and pulls out the text of the first node matched by an
//! XPath expression. Every outcome carries deterministic content so the
//! result can always be recorded as a snapshot.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sxd_xpath::{Context, Factory, Value};

use crate::error::{AppError, Result};
use crate::utils::http::fetch_text;

pub const NO_SELECTOR: &str = "No XPathExpression provided";
pub const FETCH_FAILED: &str = "Failed to load URL";
pub const INVALID_SELECTOR: &str = "Invalid XPathExpression";
pub const NO_CONTENT: &str = "No content";

/// How an extraction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionOutcome {
    SelectorMissing,
    FetchFailed,
    SelectorInvalid,
    NoMatch,
    Ok,
}

impl ExtractionOutcome {
    /// Failures end the site's pass right after the sentinel is recorded.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::FetchFailed | Self::SelectorInvalid)
    }
}

impl fmt::Display for ExtractionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SelectorMissing => "selector_missing",
            Self::FetchFailed => "fetch_failed",
            Self::SelectorInvalid => "selector_invalid",
            Self::NoMatch => "no_match",
            Self::Ok => "ok",
        };
        f.write_str(s)
    }
}

/// Extracted content plus outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub content: String,
    pub outcome: ExtractionOutcome,
}

impl Extraction {
    fn sentinel(outcome: ExtractionOutcome) -> Self {
        let content = match outcome {
            ExtractionOutcome::SelectorMissing => NO_SELECTOR,
            ExtractionOutcome::FetchFailed => FETCH_FAILED,
            ExtractionOutcome::SelectorInvalid => INVALID_SELECTOR,
            ExtractionOutcome::NoMatch | ExtractionOutcome::Ok => NO_CONTENT,
        };
        Self {
            content: content.to_string(),
            outcome,
        }
    }

    fn matched(content: String) -> Self {
        Self {
            content,
            outcome: ExtractionOutcome::Ok,
        }
    }
}

/// Loads page markup.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// Fetches pages over HTTP with the shared client.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        fetch_text(&self.client, url).await
    }
}

/// Fetches a page and extracts the selected fragment.
#[derive(Clone)]
pub struct ContentExtractor {
    fetcher: Arc<dyn PageFetcher>,
}

impl ContentExtractor {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }

    /// One outbound fetch, no retries.
    pub async fn extract(&self, url: &str, selector: Option<&str>) -> Extraction {
        let html = match self.fetcher.fetch(url).await {
            Ok(html) => html,
            Err(e) => {
                log::error!("Failed to load URL {}: {}", url, e);
                return Extraction::sentinel(ExtractionOutcome::FetchFailed);
            }
        };

        match selector.map(str::trim).filter(|s| !s.is_empty()) {
            None => Extraction::sentinel(ExtractionOutcome::SelectorMissing),
            Some(selector) => select_text(&html, selector),
        }
    }
}

/// Evaluate an XPath expression against an HTML document and return the
/// trimmed text of the first matching node in document order.
pub fn select_text(html: &str, selector: &str) -> Extraction {
    if selector.trim().is_empty() {
        return Extraction::sentinel(ExtractionOutcome::SelectorMissing);
    }

    match first_node_text(html, selector) {
        Ok(Some(text)) => Extraction::matched(text),
        Ok(None) => Extraction::sentinel(ExtractionOutcome::NoMatch),
        Err(e) => {
            log::error!("{}", e);
            Extraction::sentinel(ExtractionOutcome::SelectorInvalid)
        }
    }
}

/// `Ok(None)` when the expression is valid but selects nothing.
fn first_node_text(html: &str, selector: &str) -> Result<Option<String>> {
    let xpath = Factory::new()
        .build(selector)
        .map_err(|e| AppError::selector(selector, e))?
        .ok_or_else(|| AppError::selector(selector, "empty expression"))?;

    let package = sxd_html::parse_html(html);
    let document = package.as_document();

    match xpath.evaluate(&Context::new(), document.root()) {
        Ok(Value::Nodeset(nodes)) => Ok(nodes
            .document_order_first()
            .map(|node| node.string_value().trim().to_string())),
        Ok(_) => Err(AppError::selector(selector, "expression does not select nodes")),
        Err(e) => Err(AppError::selector(selector, e)),
    }
}
