//! Storage abstractions for sites, snapshots and rendered documents.
//!
//! ## Directory Structure
//!
//! ```text
//! storage/
//! ├── sites.json                  # Registered sites (maintained externally)
//! ├── snapshots/                  # Append-only snapshot history per site
//! │   └── {websiteId}.jsonl      # One JSON snapshot per line
//! └── pdfs/                       # Rendered documents
//!     ├── {websiteId}.pdf         # Registration capture
//!     └── {websiteId}-{ts}.pdf    # One per detected change
//! ```

pub mod local;
#[cfg(feature = "s3")]
pub mod s3;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Snapshot, WatchedSite};
use crate::pipeline::ArtifactKey;

// Re-export for convenience
pub use local::LocalStorage;
#[cfg(feature = "s3")]
pub use s3::S3ArtifactStore;

/// Produces the set of sites to watch at cycle start.
#[async_trait]
pub trait SiteSource: Send + Sync {
    /// Load every watched site joined with its latest snapshot content.
    async fn load_sites(&self) -> Result<Vec<WatchedSite>>;
}

/// Append-only snapshot persistence.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Append a snapshot. Must fail if its timestamp is not strictly greater
    /// than the latest stored timestamp for the same site.
    async fn insert(&self, snapshot: &Snapshot) -> Result<()>;

    /// Most recent snapshot for a site.
    async fn latest(&self, website_id: &str) -> Result<Option<Snapshot>>;

    /// Full history for a site, oldest first.
    async fn history(&self, website_id: &str) -> Result<Vec<Snapshot>>;
}

/// Write-only store for rendered documents.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store a rendered document and return its location.
    async fn put(&self, key: &ArtifactKey, bytes: Vec<u8>) -> Result<String>;
}
