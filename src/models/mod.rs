// src/models/mod.rs

//! Domain models for the watcher.

mod config;
mod snapshot;
mod threat;
mod website;

// Re-export all public types
pub use config::{
    CaptureConfig, Config, PolicyConfig, SafeBrowsingConfig, StorageConfig, ThreatFailurePolicy,
    UnchangedPolicy, WatcherConfig,
};
pub use snapshot::{Snapshot, SnapshotRef, content_digest};
pub use threat::{GateDecision, ThreatCheckResult};
pub use website::{WatchedSite, Website, is_valid_id};
