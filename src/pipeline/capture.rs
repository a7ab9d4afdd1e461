//! Rendered-document capture on detected change.
//!
//! Capture is decoupled from change history: a failed capture is logged and
//! reported, and the text snapshot is still recorded by the caller.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};
use crate::services::{DocumentRenderer, RenderSlots};
use crate::storage::ArtifactStore;

/// How artifact keys are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKeyMode {
    /// `{websiteId}`: one artifact per registration
    PerRegistration,
    /// `{websiteId}-{timestamp}`: one artifact per change event
    PerChange,
}

/// Storage key for a rendered document, without extension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey(String);

impl ArtifactKey {
    /// Key for the insert-triggered single capture.
    pub fn registration(website_id: &str) -> Self {
        Self(website_id.to_string())
    }

    /// Key for a capture triggered by a periodic change event.
    pub fn change(website_id: &str, at: DateTime<Utc>) -> Self {
        Self(format!("{}-{}", website_id, at.format("%Y%m%d%H%M%S%3f")))
    }

    pub fn for_mode(mode: ArtifactKeyMode, website_id: &str, at: DateTime<Utc>) -> Self {
        match mode {
            ArtifactKeyMode::PerRegistration => Self::registration(website_id),
            ArtifactKeyMode::PerChange => Self::change(website_id, at),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored rendered document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub key: ArtifactKey,
    pub location: String,
    pub size: usize,
}

/// Renders a page and hands the bytes to the artifact store.
pub struct CaptureOrchestrator {
    renderer: Arc<dyn DocumentRenderer>,
    store: Arc<dyn ArtifactStore>,
    slots: RenderSlots,
    timeout: Duration,
}

impl CaptureOrchestrator {
    pub fn new(
        renderer: Arc<dyn DocumentRenderer>,
        store: Arc<dyn ArtifactStore>,
        slots: RenderSlots,
        timeout: Duration,
    ) -> Self {
        Self {
            renderer,
            store,
            slots,
            timeout,
        }
    }

    pub fn slots(&self) -> &RenderSlots {
        &self.slots
    }

    /// Render a page within the timeout, holding a render slot throughout.
    pub async fn capture(&self, url: &str) -> Result<Vec<u8>> {
        let _slot = self.slots.acquire().await?;

        match tokio::time::timeout(self.timeout, self.renderer.render(url)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::timeout(
                format!("render of {}", url),
                self.timeout.as_secs(),
            )),
        }
    }

    /// Store rendered bytes under the key derived from `mode`.
    pub async fn store(
        &self,
        website_id: &str,
        mode: ArtifactKeyMode,
        bytes: Vec<u8>,
    ) -> Result<StoredArtifact> {
        let key = ArtifactKey::for_mode(mode, website_id, Utc::now());
        let size = bytes.len();
        let location = self.store.put(&key, bytes).await?;

        Ok(StoredArtifact {
            key,
            location,
            size,
        })
    }

    /// Capture followed by store. Nothing is stored if the render fails.
    pub async fn capture_and_store(
        &self,
        website_id: &str,
        url: &str,
        mode: ArtifactKeyMode,
    ) -> Result<StoredArtifact> {
        let bytes = self.capture(url).await?;
        let artifact = self.store(website_id, mode, bytes).await?;
        log::info!(
            "Stored capture for {} at {} ({} bytes)",
            website_id,
            artifact.location,
            artifact.size
        );
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    struct PdfRenderer;

    #[async_trait]
    impl DocumentRenderer for PdfRenderer {
        async fn render(&self, _url: &str) -> Result<Vec<u8>> {
            Ok(b"%PDF-1.7 test".to_vec())
        }
    }

    struct SlowRenderer;

    #[async_trait]
    impl DocumentRenderer for SlowRenderer {
        async fn render(&self, _url: &str) -> Result<Vec<u8>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        keys: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ArtifactStore for MemoryStore {
        async fn put(&self, key: &ArtifactKey, _bytes: Vec<u8>) -> Result<String> {
            self.keys.lock().unwrap().push(key.to_string());
            Ok(format!("mem://{}", key))
        }
    }

    #[test]
    fn test_key_modes_are_distinct() {
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 17, 5, 6).unwrap();

        assert_eq!(
            ArtifactKey::for_mode(ArtifactKeyMode::PerRegistration, "site-1", at).as_str(),
            "site-1"
        );
        assert_eq!(
            ArtifactKey::for_mode(ArtifactKeyMode::PerChange, "site-1", at).as_str(),
            "site-1-20260304170506000"
        );
    }

    #[tokio::test]
    async fn test_capture_and_store() {
        let store = Arc::new(MemoryStore::default());
        let orchestrator = CaptureOrchestrator::new(
            Arc::new(PdfRenderer),
            store.clone(),
            RenderSlots::new(1),
            Duration::from_secs(5),
        );

        let artifact = orchestrator
            .capture_and_store("s1", "https://example.com", ArtifactKeyMode::PerRegistration)
            .await
            .unwrap();

        assert_eq!(artifact.location, "mem://s1");
        assert_eq!(*store.keys.lock().unwrap(), vec!["s1".to_string()]);
        assert_eq!(orchestrator.slots().available(), 1);
    }

    #[tokio::test]
    async fn test_timeout_stores_nothing_and_releases_slot() {
        let store = Arc::new(MemoryStore::default());
        let orchestrator = CaptureOrchestrator::new(
            Arc::new(SlowRenderer),
            store.clone(),
            RenderSlots::new(1),
            Duration::from_millis(50),
        );

        let err = orchestrator
            .capture_and_store("s1", "https://example.com", ArtifactKeyMode::PerChange)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Timeout { .. }));
        assert!(store.keys.lock().unwrap().is_empty());
        assert_eq!(orchestrator.slots().available(), 1);
    }
}
