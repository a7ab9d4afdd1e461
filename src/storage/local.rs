//! Local filesystem storage implementation.
//!
//! Serves as site source, snapshot store and artifact store for development
//! and single-host deployments.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── sites.json                  # Vec<Website>
//! ├── snapshots/{websiteId}.jsonl # One Snapshot per line, oldest first
//! └── {container}/{key}.pdf       # Rendered documents
//! ```
//!
//! Recording appends one line, so its cost does not grow with the history.
//! The latest snapshot per site is cached after the first read; this process
//! is assumed to be the only writer of the snapshot files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{Snapshot, WatchedSite, Website, is_valid_id};
use crate::pipeline::ArtifactKey;
use crate::storage::{ArtifactStore, SiteSource, SnapshotStore};

const SITES_KEY: &str = "sites.json";
const DEFAULT_CONTAINER: &str = "pdfs";

/// Local filesystem storage backend.
pub struct LocalStorage {
    root_dir: PathBuf,
    container: String,
    /// Latest snapshot per site. Held across every snapshot read-modify-write.
    latest: Mutex<HashMap<String, Snapshot>>,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self::with_container(root_dir, DEFAULT_CONTAINER)
    }

    /// Create a LocalStorage with a custom artifact container directory.
    pub fn with_container(root_dir: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            root_dir: root_dir.into(),
            container: container.into(),
            latest: Mutex::new(HashMap::new()),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        if let Err(e) = async {
            file.write_all(bytes).await?;
            file.flush().await
        }
        .await
        {
            drop(file);
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(AppError::Io(e));
        }
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Append bytes to a file, creating it if needed.
    async fn append_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(())
    }

    /// Write JSON data.
    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Read JSON data.
    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Snapshot history key for a site.
    fn snapshot_key(website_id: &str) -> Result<String> {
        if !is_valid_id(website_id) {
            return Err(AppError::validation(format!(
                "invalid website id {:?}",
                website_id
            )));
        }
        Ok(format!("snapshots/{}.jsonl", website_id))
    }

    /// Artifact key within the container.
    fn artifact_path(&self, key: &ArtifactKey) -> Result<String> {
        if !is_valid_id(key.as_str()) {
            return Err(AppError::validation(format!("invalid artifact key {:?}", key.as_str())));
        }
        Ok(format!("{}/{}.pdf", self.container, key.as_str()))
    }

    /// Read a site's history. The flag is set when a torn last line was dropped.
    async fn read_history(&self, key: &str) -> Result<(Vec<Snapshot>, bool)> {
        match self.read_bytes(key).await? {
            Some(bytes) => parse_history(key, &bytes),
            None => Ok((Vec::new(), false)),
        }
    }

    /// Rewrite a site's history atomically.
    async fn write_history(&self, key: &str, history: &[Snapshot]) -> Result<()> {
        let mut bytes = Vec::new();
        for snapshot in history {
            serde_json::to_writer(&mut bytes, snapshot)?;
            bytes.push(b'\n');
        }
        self.write_bytes(key, &bytes).await
    }

    /// Load the registered sites without joining snapshots.
    ///
    /// Sites whose id cannot name a file are dropped with a warning.
    pub async fn load_websites(&self) -> Result<Vec<Website>> {
        let sites = match self.read_json::<Vec<Website>>(SITES_KEY).await? {
            Some(sites) => sites,
            None => {
                log::warn!("No {} found in {}", SITES_KEY, self.root_dir.display());
                return Ok(Vec::new());
            }
        };

        Ok(sites
            .into_iter()
            .filter(|site| {
                let valid = site.has_valid_id();
                if !valid {
                    log::warn!("Ignoring site with invalid id {:?} ({})", site.id, site.url);
                }
                valid
            })
            .collect())
    }

    /// Replace the registered site list.
    pub async fn save_websites(&self, sites: &[Website]) -> Result<()> {
        self.write_json(SITES_KEY, sites).await
    }

    /// Find one registered site by id.
    pub async fn find_website(&self, website_id: &str) -> Result<Website> {
        self.load_websites()
            .await?
            .into_iter()
            .find(|site| site.id == website_id)
            .ok_or_else(|| AppError::NotFound(format!("site {}", website_id)))
    }
}

/// Parse JSON lines. A malformed last line is an interrupted append and is
/// dropped; a malformed earlier line is corruption.
fn parse_history(key: &str, bytes: &[u8]) -> Result<(Vec<Snapshot>, bool)> {
    let text = String::from_utf8_lossy(bytes);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();

    let mut history = Vec::with_capacity(lines.len());
    let mut torn = false;
    for (i, line) in lines.iter().enumerate() {
        match serde_json::from_str(line) {
            Ok(snapshot) => history.push(snapshot),
            Err(e) if i + 1 == lines.len() => {
                log::warn!("Dropping torn last record in {}: {}", key, e);
                torn = true;
            }
            Err(e) => {
                return Err(AppError::persistence(format!(
                    "{} line {}: {}",
                    key,
                    i + 1,
                    e
                )));
            }
        }
    }
    Ok((history, torn))
}

#[async_trait]
impl SiteSource for LocalStorage {
    /// A site whose history cannot be read is left out of this cycle only.
    async fn load_sites(&self) -> Result<Vec<WatchedSite>> {
        let websites = self.load_websites().await?;
        let mut sites = Vec::with_capacity(websites.len());

        for website in websites {
            match self.latest(&website.id).await {
                Ok(latest) => sites.push(WatchedSite::new(website, latest.map(|s| s.content))),
                Err(e) => log::error!(
                    "Skipping {} this cycle, snapshot history unreadable: {}",
                    website.id,
                    e
                ),
            }
        }

        Ok(sites)
    }
}

#[async_trait]
impl SnapshotStore for LocalStorage {
    async fn insert(&self, snapshot: &Snapshot) -> Result<()> {
        let key = Self::snapshot_key(&snapshot.website_id)?;
        let mut latest = self.latest.lock().await;

        let last = match latest.get(&snapshot.website_id) {
            Some(cached) => Some(cached.timestamp),
            None => {
                let (history, torn) = self.read_history(&key).await?;
                if torn {
                    self.write_history(&key, &history)
                        .await
                        .map_err(|e| AppError::persistence(format!("repairing {}: {}", key, e)))?;
                }
                history.iter().map(|s| s.timestamp).max()
            }
        };

        if let Some(last) = last {
            if snapshot.timestamp <= last {
                return Err(AppError::persistence(format!(
                    "snapshot for {} at {} is not after latest {}",
                    snapshot.website_id, snapshot.timestamp, last
                )));
            }
        }

        let mut line = serde_json::to_vec(snapshot)?;
        line.push(b'\n');
        if let Err(e) = self.append_bytes(&key, &line).await {
            // The file may now end in a partial line; re-read before the next append.
            latest.remove(&snapshot.website_id);
            return Err(AppError::persistence(format!("appending to {}: {}", key, e)));
        }

        latest.insert(snapshot.website_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn latest(&self, website_id: &str) -> Result<Option<Snapshot>> {
        let key = Self::snapshot_key(website_id)?;
        let mut latest = self.latest.lock().await;
        if let Some(cached) = latest.get(website_id) {
            return Ok(Some(cached.clone()));
        }

        let (history, _) = self.read_history(&key).await?;
        let newest = history.into_iter().max_by_key(|s| s.timestamp);
        if let Some(snapshot) = &newest {
            latest.insert(website_id.to_string(), snapshot.clone());
        }
        Ok(newest)
    }

    async fn history(&self, website_id: &str) -> Result<Vec<Snapshot>> {
        let key = Self::snapshot_key(website_id)?;
        let (history, _) = self.read_history(&key).await?;
        Ok(history)
    }
}

#[async_trait]
impl ArtifactStore for LocalStorage {
    async fn put(&self, key: &ArtifactKey, bytes: Vec<u8>) -> Result<String> {
        let path = self.artifact_path(key)?;
        self.write_bytes(&path, &bytes)
            .await
            .map_err(|e| AppError::persistence(format!("writing {}: {}", path, e)))?;
        Ok(self.path(&path).display().to_string())
    }
}
