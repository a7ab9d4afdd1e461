//! Watched site data structures.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A registered page to watch.
///
/// Created by the external registration process; the watcher never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Website {
    /// Stable unique identifier
    pub id: String,

    /// Absolute HTTP/HTTPS URL
    pub url: String,

    /// Structural selector for the watched fragment
    #[serde(default, alias = "XPathExpression", alias = "xpath")]
    pub xpath_expression: Option<String>,
}

impl Website {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            xpath_expression: None,
        }
    }

    pub fn with_xpath(mut self, xpath: impl Into<String>) -> Self {
        self.xpath_expression = Some(xpath.into());
        self
    }

    /// The selector, if one is configured and non-blank.
    pub fn selector(&self) -> Option<&str> {
        self.xpath_expression
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Whether the id can name this site's files and artifacts.
    pub fn has_valid_id(&self) -> bool {
        is_valid_id(&self.id)
    }

    /// Load a site list from a JSON file.
    pub fn load_all(path: impl AsRef<Path>) -> Result<Vec<Self>> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Site ids become file names and object keys: a single non-blank path
/// segment with no separators or parent references.
pub fn is_valid_id(id: &str) -> bool {
    !id.trim().is_empty() && !id.contains(['/', '\\', '\0']) && !id.contains("..")
}

/// A site as loaded at cycle start, joined with its latest snapshot content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedSite {
    pub website: Website,

    /// Content of the most recent snapshot; `None` for never-observed sites
    pub latest_content: Option<String>,
}

impl WatchedSite {
    pub fn new(website: Website, latest_content: Option<String>) -> Self {
        Self {
            website,
            latest_content,
        }
    }

    /// A site with no history, as delivered by a registration event.
    pub fn fresh(website: Website) -> Self {
        Self::new(website, None)
    }

    pub fn id(&self) -> &str {
        &self.website.id
    }
}
