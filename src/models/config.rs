//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Scheduling and HTTP behavior
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Cycle policies for unchanged content and lookup failures
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Reputation lookup settings
    #[serde(default)]
    pub safe_browsing: SafeBrowsingConfig,

    /// Rendered-document capture settings
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Site, snapshot and artifact storage
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Apply the supported environment overrides.
    ///
    /// This is the only place the process environment is consulted; the
    /// resulting struct is passed down to every collaborator.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("SAFE_BROWSING_API_KEY") {
            self.safe_browsing.api_key = Some(key);
        }
        if let Some(dir) = lookup("WATCHER_STORAGE_DIR") {
            self.storage.root_dir = PathBuf::from(dir);
        }
        if let Some(endpoint) = lookup("WATCHER_RENDER_ENDPOINT") {
            self.capture.endpoint = endpoint;
        }
        if let Some(secs) = lookup("WATCHER_INTERVAL_SECS") {
            match secs.parse() {
                Ok(secs) => self.watcher.interval_secs = secs,
                Err(_) => log::warn!("Ignoring WATCHER_INTERVAL_SECS={secs:?}: not a number"),
            }
        }
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.watcher.user_agent.trim().is_empty() {
            return Err(AppError::validation("watcher.user_agent is empty"));
        }
        if self.watcher.interval_secs == 0 {
            return Err(AppError::validation("watcher.interval_secs must be > 0"));
        }
        if self.watcher.timeout_secs == 0 {
            return Err(AppError::validation("watcher.timeout_secs must be > 0"));
        }
        if self.watcher.max_concurrent == 0 {
            return Err(AppError::validation("watcher.max_concurrent must be > 0"));
        }
        if url::Url::parse(&self.safe_browsing.endpoint).is_err() {
            return Err(AppError::validation("safe_browsing.endpoint is not a URL"));
        }
        if self.capture.enabled {
            if url::Url::parse(&self.capture.endpoint).is_err() {
                return Err(AppError::validation("capture.endpoint is not a URL"));
            }
            if self.capture.timeout_secs == 0 {
                return Err(AppError::validation("capture.timeout_secs must be > 0"));
            }
            if self.capture.max_concurrent_renders == 0 {
                return Err(AppError::validation(
                    "capture.max_concurrent_renders must be > 0",
                ));
            }
        }
        if self.storage.artifact_container.trim().is_empty() {
            return Err(AppError::validation("storage.artifact_container is empty"));
        }
        Ok(())
    }
}

/// Scheduling and HTTP client behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Seconds between cycle starts
    #[serde(default = "defaults::interval")]
    pub interval_secs: u64,

    /// User-Agent header for page fetches
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Page fetch timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Maximum sites processed concurrently within one cycle
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            interval_secs: defaults::interval(),
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            max_concurrent: defaults::max_concurrent(),
        }
    }
}

/// What to do when extracted content equals the latest snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnchangedPolicy {
    /// Record a snapshot every cycle, even with identical content
    #[default]
    Append,
    /// Record only when the content changed
    Skip,
}

/// What to do when the reputation lookup itself fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThreatFailurePolicy {
    /// Treat the URL as safe and log a warning
    #[default]
    Allow,
    /// Skip the site for this cycle and log a warning
    Skip,
}

/// Cycle policies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct PolicyConfig {
    #[serde(default)]
    pub unchanged: UnchangedPolicy,

    #[serde(default)]
    pub threat_lookup_failure: ThreatFailurePolicy,
}

/// Google Safe Browsing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafeBrowsingConfig {
    /// API key; absent or blank disables the lookup
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "defaults::safe_browsing_endpoint")]
    pub endpoint: String,

    #[serde(default = "defaults::client_id")]
    pub client_id: String,

    #[serde(default = "defaults::client_version")]
    pub client_version: String,

    #[serde(default = "defaults::threat_types")]
    pub threat_types: Vec<String>,

    #[serde(default = "defaults::platform_types")]
    pub platform_types: Vec<String>,
}

impl SafeBrowsingConfig {
    /// The configured API key, if it is non-blank.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

impl Default for SafeBrowsingConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: defaults::safe_browsing_endpoint(),
            client_id: defaults::client_id(),
            client_version: defaults::client_version(),
            threat_types: defaults::threat_types(),
            platform_types: defaults::platform_types(),
        }
    }
}

/// Rendering service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Whether changed pages are captured at all
    #[serde(default = "defaults::capture_enabled")]
    pub enabled: bool,

    /// Rendering service endpoint
    #[serde(default = "defaults::render_endpoint")]
    pub endpoint: String,

    /// Render timeout in seconds (page load plus font wait)
    #[serde(default = "defaults::render_timeout")]
    pub timeout_secs: u64,

    /// Maximum renders in flight across all sites
    #[serde(default = "defaults::max_concurrent_renders")]
    pub max_concurrent_renders: usize,

    /// Ask the renderer to wait for `document.fonts.ready`
    #[serde(default = "defaults::wait_for_fonts")]
    pub wait_for_fonts: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::capture_enabled(),
            endpoint: defaults::render_endpoint(),
            timeout_secs: defaults::render_timeout(),
            max_concurrent_renders: defaults::max_concurrent_renders(),
            wait_for_fonts: defaults::wait_for_fonts(),
        }
    }
}

/// Storage locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for sites, snapshots and local artifacts
    #[serde(default = "defaults::root_dir")]
    pub root_dir: PathBuf,

    /// Container (directory or key prefix) for rendered documents
    #[serde(default = "defaults::artifact_container")]
    pub artifact_container: String,

    /// Bucket for artifacts when built with S3 support
    #[serde(default)]
    pub s3_bucket: Option<String>,

    #[serde(default)]
    pub s3_prefix: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: defaults::root_dir(),
            artifact_container: defaults::artifact_container(),
            s3_bucket: None,
            s3_prefix: None,
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    // Watcher defaults
    pub fn interval() -> u64 {
        20
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; SiteWatcher/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn max_concurrent() -> usize {
        4
    }

    // Safe Browsing defaults
    pub fn safe_browsing_endpoint() -> String {
        "https://safebrowsing.googleapis.com/v4/threatMatches:find".into()
    }
    pub fn client_id() -> String {
        "websitewatcher".into()
    }
    pub fn client_version() -> String {
        "1.0".into()
    }
    pub fn threat_types() -> Vec<String> {
        vec![
            "MALWARE".into(),
            "SOCIAL_ENGINEERING".into(),
            "UNWANTED_SOFTWARE".into(),
            "POTENTIALLY_HARMFUL_APPLICATION".into(),
        ]
    }
    pub fn platform_types() -> Vec<String> {
        vec!["ANY_PLATFORM".into()]
    }

    // Capture defaults
    pub fn capture_enabled() -> bool {
        true
    }
    pub fn render_endpoint() -> String {
        "http://127.0.0.1:3000/render/pdf".into()
    }
    pub fn render_timeout() -> u64 {
        60
    }
    pub fn max_concurrent_renders() -> usize {
        2
    }
    pub fn wait_for_fonts() -> bool {
        true
    }

    // Storage defaults
    pub fn root_dir() -> PathBuf {
        PathBuf::from("storage")
    }
    pub fn artifact_container() -> String {
        "pdfs".into()
    }
}
