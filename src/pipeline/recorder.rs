//! Snapshot recording with strictly increasing per-site timestamps.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::error::{AppError, Result};
use crate::models::{Snapshot, SnapshotRef};
use crate::storage::SnapshotStore;

/// Smallest step used to break timestamp ties.
fn tick() -> Duration {
    Duration::microseconds(1)
}

/// Appends snapshots, assigning each a timestamp strictly greater than any
/// earlier one for the same site, even when the wall clock has not advanced.
pub struct SnapshotRecorder {
    store: Arc<dyn SnapshotStore>,
    issued: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl SnapshotRecorder {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            store,
            issued: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    /// Append a new snapshot for a site.
    pub async fn record(&self, website_id: &str, content: &str) -> Result<SnapshotRef> {
        let stored_latest = self
            .store
            .latest(website_id)
            .await
            .map_err(|e| AppError::persistence(format!("reading latest for {}: {}", website_id, e)))?
            .map(|s| s.timestamp);

        let timestamp = self.next_timestamp(website_id, stored_latest, Utc::now())?;
        let snapshot = Snapshot::new(website_id, content, timestamp);

        self.store.insert(&snapshot).await.map_err(|e| match e {
            AppError::Persistence(_) => e,
            other => AppError::persistence(other),
        })?;

        log::debug!("Recorded snapshot for {} at {}", website_id, timestamp);
        Ok(snapshot.reference())
    }

    /// Pick `now`, unless that would not be after the latest known timestamp.
    fn next_timestamp(
        &self,
        website_id: &str,
        stored_latest: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let mut issued = self
            .issued
            .lock()
            .map_err(|_| AppError::persistence("snapshot clock poisoned"))?;

        let floor = match (issued.get(website_id).copied(), stored_latest) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        let timestamp = match floor {
            Some(floor) if now <= floor => floor + tick(),
            _ => now,
        };

        issued.insert(website_id.to_string(), timestamp);
        Ok(timestamp)
    }
}
