//! Snapshot records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// An immutable, timestamped record of extracted content for a site.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// The site this snapshot belongs to
    pub website_id: String,

    /// Extracted text or a failure sentinel
    pub content: String,

    /// Creation time, strictly increasing per site
    pub timestamp: DateTime<Utc>,

    /// SHA-256 of `content`, hex encoded
    pub digest: String,
}

impl Snapshot {
    pub fn new(
        website_id: impl Into<String>,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let content = content.into();
        Self {
            website_id: website_id.into(),
            digest: content_digest(&content),
            content,
            timestamp,
        }
    }

    pub fn reference(&self) -> SnapshotRef {
        SnapshotRef {
            website_id: self.website_id.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Handle to a recorded snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRef {
    pub website_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Hex-encoded SHA-256 of a content string.
pub fn content_digest(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}
