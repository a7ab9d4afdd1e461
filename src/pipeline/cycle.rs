//! One watch cycle over a set of sites.
//!
//! Per site the pass runs
//! `Loaded → ThreatChecked → Extracted → {Unchanged | Changed} → [Captured] → Recorded → Done`.
//! Every failure is confined to its site; the cycle always attempts every
//! site it was given.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::OwnedMutexGuard;

use crate::error::{AppError, Result};
use crate::models::{
    GateDecision, PolicyConfig, SnapshotRef, ThreatFailurePolicy, UnchangedPolicy, WatchedSite,
    Website,
};
use crate::pipeline::capture::{ArtifactKeyMode, CaptureOrchestrator, StoredArtifact};
use crate::pipeline::diff::{Change, ChangeDetector};
use crate::pipeline::recorder::SnapshotRecorder;
use crate::services::{ContentExtractor, Extraction, ExtractionOutcome, ThreatGate};
use crate::storage::SiteSource;

/// Which trigger started the pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleMode {
    /// Fixed-interval timer
    Periodic,
    /// A newly registered site
    Registration,
}

impl CycleMode {
    pub fn key_mode(self) -> ArtifactKeyMode {
        match self {
            Self::Periodic => ArtifactKeyMode::PerChange,
            Self::Registration => ArtifactKeyMode::PerRegistration,
        }
    }
}

/// States a site passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteStage {
    Loaded,
    ThreatChecked,
    Extracted,
    Unchanged,
    Changed,
    Captured,
    Recorded,
    Done,
}

/// Final result of one site's pass.
#[derive(Debug, Clone)]
pub enum SiteOutcome {
    Changed {
        change: Change,
        snapshot: SnapshotRef,
        artifact: Option<StoredArtifact>,
        capture_error: Option<String>,
    },
    Unchanged {
        snapshot: Option<SnapshotRef>,
    },
    /// Fetch or selector failure, recorded as a sentinel snapshot
    ExtractionFailed {
        outcome: ExtractionOutcome,
        snapshot: SnapshotRef,
    },
    Blocked {
        reason: String,
        threats: Vec<String>,
    },
    /// Reputation lookup failed and policy says skip
    Skipped {
        reason: String,
    },
    /// Another pass holds this site
    Busy,
    PersistenceFailed {
        error: String,
    },
}

/// Trace and outcome of one site's pass.
#[derive(Debug, Clone)]
pub struct SiteReport {
    pub website_id: String,
    pub stages: Vec<SiteStage>,
    pub extraction: Option<Extraction>,
    pub outcome: SiteOutcome,
}

impl SiteReport {
    /// Snapshot written during this pass, if any.
    pub fn snapshot(&self) -> Option<&SnapshotRef> {
        match &self.outcome {
            SiteOutcome::Changed { snapshot, .. } => Some(snapshot),
            SiteOutcome::Unchanged { snapshot } => snapshot.as_ref(),
            SiteOutcome::ExtractionFailed { snapshot, .. } => Some(snapshot),
            _ => None,
        }
    }

    pub fn artifact(&self) -> Option<&StoredArtifact> {
        match &self.outcome {
            SiteOutcome::Changed { artifact, .. } => artifact.as_ref(),
            _ => None,
        }
    }

    pub fn is_changed(&self) -> bool {
        matches!(self.outcome, SiteOutcome::Changed { .. })
    }
}

struct SiteTrace {
    website_id: String,
    stages: Vec<SiteStage>,
    extraction: Option<Extraction>,
}

impl SiteTrace {
    fn new(website_id: &str) -> Self {
        Self {
            website_id: website_id.to_string(),
            stages: Vec::new(),
            extraction: None,
        }
    }

    fn enter(&mut self, stage: SiteStage) {
        log::debug!("{}: {:?}", self.website_id, stage);
        self.stages.push(stage);
    }

    fn finish(mut self, outcome: SiteOutcome) -> SiteReport {
        self.enter(SiteStage::Done);
        SiteReport {
            website_id: self.website_id,
            stages: self.stages,
            extraction: self.extraction,
            outcome,
        }
    }
}

/// Summary of one cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sites: Vec<SiteReport>,
}

impl CycleReport {
    fn count(&self, pred: impl Fn(&SiteOutcome) -> bool) -> usize {
        self.sites.iter().filter(|s| pred(&s.outcome)).count()
    }

    pub fn changed_count(&self) -> usize {
        self.count(|o| matches!(o, SiteOutcome::Changed { .. }))
    }

    pub fn unchanged_count(&self) -> usize {
        self.count(|o| matches!(o, SiteOutcome::Unchanged { .. }))
    }

    pub fn failed_count(&self) -> usize {
        self.count(|o| matches!(o, SiteOutcome::ExtractionFailed { .. }))
    }

    pub fn blocked_count(&self) -> usize {
        self.count(|o| matches!(o, SiteOutcome::Blocked { .. }))
    }

    pub fn skipped_count(&self) -> usize {
        self.count(|o| matches!(o, SiteOutcome::Skipped { .. } | SiteOutcome::Busy))
    }

    pub fn persistence_failures(&self) -> usize {
        self.count(|o| matches!(o, SiteOutcome::PersistenceFailed { .. }))
    }

    pub fn recorded_count(&self) -> usize {
        self.sites.iter().filter(|s| s.snapshot().is_some()).count()
    }

    pub fn artifact_count(&self) -> usize {
        self.sites.iter().filter(|s| s.artifact().is_some()).count()
    }

    /// A tick fails when it tried to persist and nothing was persisted.
    pub fn is_failure(&self) -> bool {
        self.persistence_failures() > 0 && self.recorded_count() == 0
    }

    pub fn log_summary(&self) {
        let elapsed = self.finished_at - self.started_at;
        log::info!(
            "Cycle finished in {}ms: {} sites, {} changed, {} unchanged, {} failed, {} blocked, {} skipped, {} artifacts",
            elapsed.num_milliseconds(),
            self.sites.len(),
            self.changed_count(),
            self.unchanged_count(),
            self.failed_count(),
            self.blocked_count(),
            self.skipped_count(),
            self.artifact_count()
        );
        if self.persistence_failures() > 0 {
            log::error!(
                "{} sites could not persist their snapshot",
                self.persistence_failures()
            );
        }
    }
}

/// Per-site exclusion so two passes never interleave writes for one site.
#[derive(Default)]
pub struct SiteLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SiteLocks {
    /// Take the site's lock without waiting; `None` if a pass already holds it.
    pub fn try_acquire(&self, website_id: &str) -> Option<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self.locks.lock().ok()?;
            Arc::clone(locks.entry(website_id.to_string()).or_default())
        };
        lock.try_lock_owned().ok()
    }
}

/// Drives gate, extraction, change detection, capture and recording per site.
pub struct WatchCycle {
    gate: ThreatGate,
    extractor: ContentExtractor,
    detector: ChangeDetector,
    recorder: SnapshotRecorder,
    capture: Option<CaptureOrchestrator>,
    policy: PolicyConfig,
    max_concurrent: usize,
    locks: SiteLocks,
}

impl WatchCycle {
    pub fn new(gate: ThreatGate, extractor: ContentExtractor, recorder: SnapshotRecorder) -> Self {
        Self {
            gate,
            extractor,
            detector: ChangeDetector::new(),
            recorder,
            capture: None,
            policy: PolicyConfig::default(),
            max_concurrent: 1,
            locks: SiteLocks::default(),
        }
    }

    pub fn with_capture(mut self, capture: CaptureOrchestrator) -> Self {
        self.capture = Some(capture);
        self
    }

    pub fn with_policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn capture(&self) -> Option<&CaptureOrchestrator> {
        self.capture.as_ref()
    }

    /// Load sites from the source and run one periodic cycle.
    pub async fn run_from(&self, source: &dyn SiteSource) -> Result<CycleReport> {
        let sites = source.load_sites().await?;
        Ok(self.run(sites).await)
    }

    /// Run one periodic cycle over the given sites.
    pub async fn run(&self, sites: Vec<WatchedSite>) -> CycleReport {
        let started_at = Utc::now();
        log::info!("Watch cycle starting for {} sites", sites.len());

        let reports: Vec<SiteReport> = stream::iter(sites)
            .map(|site| async move { self.process_site(&site, CycleMode::Periodic).await })
            .buffered(self.max_concurrent)
            .collect()
            .await;

        CycleReport {
            started_at,
            finished_at: Utc::now(),
            sites: reports,
        }
    }

    /// Single-capture pass for a newly registered site.
    pub async fn process_registration(&self, website: Website) -> SiteReport {
        log::info!(
            "Registration received: ID - {} URL - {}",
            website.id,
            website.url
        );
        self.process_site(&WatchedSite::fresh(website), CycleMode::Registration)
            .await
    }

    /// Run one site through the state machine.
    pub async fn process_site(&self, site: &WatchedSite, mode: CycleMode) -> SiteReport {
        let id = site.id();
        let mut trace = SiteTrace::new(id);

        let Some(_guard) = self.locks.try_acquire(id) else {
            log::warn!("Site {} is already being processed; skipping", id);
            return trace.finish(SiteOutcome::Busy);
        };
        trace.enter(SiteStage::Loaded);

        let url = match self.gate.evaluate(&site.website.url).await {
            Ok(GateDecision::Allowed { url }) => url,
            Ok(GateDecision::Blocked { reason, threats }) => {
                log::warn!(
                    "Skipping {}: {} URL={} Threats={}",
                    id,
                    reason,
                    site.website.url,
                    threats.join(", ")
                );
                return trace.finish(SiteOutcome::Blocked { reason, threats });
            }
            Err(e) => match self.policy.threat_lookup_failure {
                ThreatFailurePolicy::Allow => {
                    log::warn!("Threat lookup failed for {}, allowing: {}", id, e);
                    site.website.url.trim().to_string()
                }
                ThreatFailurePolicy::Skip => {
                    log::warn!("Threat lookup failed for {}, skipping: {}", id, e);
                    return trace.finish(SiteOutcome::Skipped {
                        reason: e.to_string(),
                    });
                }
            },
        };
        trace.enter(SiteStage::ThreatChecked);

        let extraction = self.extractor.extract(&url, site.website.selector()).await;
        trace.enter(SiteStage::Extracted);
        log::info!(
            "Fetched content for {} ({}): {}",
            id,
            extraction.outcome,
            extraction.content
        );
        let content = extraction.content.clone();
        let outcome = extraction.outcome;
        trace.extraction = Some(extraction);

        if outcome.is_failure() {
            let result = self.record(id, &content, &mut trace).await;
            return trace.finish(match result {
                Ok(snapshot) => SiteOutcome::ExtractionFailed { outcome, snapshot },
                Err(e) => persistence_failed(id, e),
            });
        }

        let change = self
            .detector
            .detect(site.latest_content.as_deref(), &content);

        if !change.is_change() {
            trace.enter(SiteStage::Unchanged);
            log::info!("No change in content for {}", id);

            if self.policy.unchanged == UnchangedPolicy::Skip {
                return trace.finish(SiteOutcome::Unchanged { snapshot: None });
            }
            let result = self.record(id, &content, &mut trace).await;
            return trace.finish(match result {
                Ok(snapshot) => SiteOutcome::Unchanged {
                    snapshot: Some(snapshot),
                },
                Err(e) => persistence_failed(id, e),
            });
        }

        trace.enter(SiteStage::Changed);
        log::info!("Content has changed for {} ({:?})", id, change);

        let (artifact, capture_error) = match &self.capture {
            Some(capture) => match capture.capture_and_store(id, &url, mode.key_mode()).await {
                Ok(artifact) => {
                    trace.enter(SiteStage::Captured);
                    (Some(artifact), None)
                }
                Err(e) => {
                    log::error!("Capture failed for {}: {}", id, e);
                    (None, Some(e.to_string()))
                }
            },
            None => (None, None),
        };

        let result = self.record(id, &content, &mut trace).await;
        trace.finish(match result {
            Ok(snapshot) => SiteOutcome::Changed {
                change,
                snapshot,
                artifact,
                capture_error,
            },
            Err(e) => persistence_failed(id, e),
        })
    }

    async fn record(
        &self,
        website_id: &str,
        content: &str,
        trace: &mut SiteTrace,
    ) -> Result<SnapshotRef> {
        let snapshot = self.recorder.record(website_id, content).await?;
        trace.enter(SiteStage::Recorded);
        Ok(snapshot)
    }
}

fn persistence_failed(website_id: &str, error: AppError) -> SiteOutcome {
    log::error!("Failed to record snapshot for {}: {}", website_id, error);
    SiteOutcome::PersistenceFailed {
        error: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Snapshot, ThreatCheckResult};
    use crate::pipeline::capture::ArtifactKey;
    use crate::services::{
        DocumentRenderer, FETCH_FAILED, NO_CONTENT, PageFetcher, RenderSlots, ReputationLookup,
        UNSAFE_URL,
    };
    use crate::storage::{ArtifactStore, LocalStorage, SnapshotStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Serves fixed markup per URL; unknown URLs fail like an unreachable host.
    #[derive(Default)]
    struct Pages {
        pages: HashMap<String, String>,
        fetches: AtomicUsize,
        delay: Option<Duration>,
    }

    impl Pages {
        fn with(mut self, url: &str, html: &str) -> Self {
            self.pages.insert(url.to_string(), html.to_string());
            self
        }
    }

    #[async_trait]
    impl PageFetcher for Pages {
        async fn fetch(&self, url: &str) -> Result<String> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| AppError::fetch(url, "connection refused"))
        }
    }

    enum Lookup {
        Threats(Vec<&'static str>),
        Fails,
    }

    #[async_trait]
    impl ReputationLookup for Lookup {
        async fn check(&self, url: &str) -> Result<ThreatCheckResult> {
            match self {
                Lookup::Threats(t) if url.contains("bad") => {
                    Ok(ThreatCheckResult::from_threats(t.iter().copied()))
                }
                Lookup::Threats(_) => Ok(ThreatCheckResult::safe()),
                Lookup::Fails => Err(AppError::threat_lookup(url, "503")),
            }
        }
    }

    struct Renderer {
        fail: bool,
        calls: AtomicUsize,
    }

    impl Renderer {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DocumentRenderer for Renderer {
        async fn render(&self, url: &str) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(AppError::capture(url, "font loading timed out"))
            } else {
                Ok(b"%PDF-1.7".to_vec())
            }
        }
    }

    #[derive(Default)]
    struct Artifacts {
        keys: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ArtifactStore for Artifacts {
        async fn put(&self, key: &ArtifactKey, _bytes: Vec<u8>) -> Result<String> {
            self.keys.lock().unwrap().push(key.to_string());
            Ok(format!("mem://{}", key))
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl SnapshotStore for BrokenStore {
        async fn insert(&self, _snapshot: &Snapshot) -> Result<()> {
            Err(AppError::persistence("database unavailable"))
        }
        async fn latest(&self, _website_id: &str) -> Result<Option<Snapshot>> {
            Ok(None)
        }
        async fn history(&self, _website_id: &str) -> Result<Vec<Snapshot>> {
            Ok(Vec::new())
        }
    }

    struct Harness {
        _tmp: TempDir,
        storage: Arc<LocalStorage>,
        pages: Arc<Pages>,
        renderer: Arc<Renderer>,
        artifacts: Arc<Artifacts>,
        cycle: WatchCycle,
    }

    fn harness(pages: Pages, lookup: Option<Lookup>, renderer_fails: bool) -> Harness {
        let tmp = TempDir::new().unwrap();
        let storage = Arc::new(LocalStorage::new(tmp.path()));
        let pages = Arc::new(pages);
        let renderer = Arc::new(Renderer::new(renderer_fails));
        let artifacts = Arc::new(Artifacts::default());

        let gate = match lookup {
            Some(lookup) => ThreatGate::new(Arc::new(lookup)),
            None => ThreatGate::unconfigured(),
        };
        let capture = CaptureOrchestrator::new(
            renderer.clone(),
            artifacts.clone(),
            RenderSlots::new(2),
            Duration::from_secs(5),
        );
        let cycle = WatchCycle::new(
            gate,
            ContentExtractor::new(pages.clone()),
            SnapshotRecorder::new(storage.clone()),
        )
        .with_capture(capture)
        .with_max_concurrent(4);

        Harness {
            _tmp: tmp,
            storage,
            pages,
            renderer,
            artifacts,
            cycle,
        }
    }

    fn site(id: &str, url: &str, xpath: &str, latest: Option<&str>) -> WatchedSite {
        WatchedSite::new(
            Website::new(id, url).with_xpath(xpath),
            latest.map(str::to_string),
        )
    }

    #[tokio::test]
    async fn test_title_change_scenario() {
        let h = harness(
            Pages::default().with("https://s1.example", "<html><head><title>New</title></head></html>"),
            None,
            false,
        );
        let previous = Snapshot::new("S1", "Old", Utc::now() - chrono::Duration::minutes(1));
        h.storage.insert(&previous).await.unwrap();

        let report = h
            .cycle
            .run(vec![site("S1", "https://s1.example", "//title", Some("Old"))])
            .await;

        let site = &report.sites[0];
        assert_eq!(site.extraction.as_ref().unwrap().content, "New");
        assert!(matches!(
            site.outcome,
            SiteOutcome::Changed { change: Change::Changed, .. }
        ));
        assert_eq!(h.renderer.calls.load(Ordering::SeqCst), 1);

        let history = h.storage.history("S1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "New");
        assert!(history[1].timestamp > previous.timestamp);
        assert_eq!(
            site.stages,
            vec![
                SiteStage::Loaded,
                SiteStage::ThreatChecked,
                SiteStage::Extracted,
                SiteStage::Changed,
                SiteStage::Captured,
                SiteStage::Recorded,
                SiteStage::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_first_observation_records_and_captures() {
        let h = harness(
            Pages::default().with("https://a.example", "<div id='x'>hello</div>"),
            None,
            false,
        );

        let report = h
            .cycle
            .run(vec![site("a", "https://a.example", "//div[@id='x']", None)])
            .await;

        assert!(matches!(
            report.sites[0].outcome,
            SiteOutcome::Changed { change: Change::FirstObservation, .. }
        ));
        assert_eq!(h.storage.history("a").await.unwrap().len(), 1);
        let keys = h.artifacts.keys.lock().unwrap().clone();
        assert_eq!(keys.len(), 1);
        assert!(keys[0].starts_with("a-"));
    }

    #[tokio::test]
    async fn test_unchanged_appends_without_capture() {
        let h = harness(
            Pages::default().with("https://a.example", "<title>Same</title>"),
            None,
            false,
        );

        let report = h
            .cycle
            .run(vec![site("a", "https://a.example", "//title", Some("Same"))])
            .await;

        assert!(matches!(
            report.sites[0].outcome,
            SiteOutcome::Unchanged { snapshot: Some(_) }
        ));
        assert_eq!(h.renderer.calls.load(Ordering::SeqCst), 0);
        let history = h.storage.history("a").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "Same");
    }

    #[tokio::test]
    async fn test_unchanged_skip_policy_records_nothing() {
        let mut h = harness(
            Pages::default().with("https://a.example", "<p>missing title</p>"),
            None,
            false,
        );
        h.cycle = h.cycle.with_policy(PolicyConfig {
            unchanged: UnchangedPolicy::Skip,
            ..PolicyConfig::default()
        });

        let report = h
            .cycle
            .run(vec![site("a", "https://a.example", "//title", Some(NO_CONTENT))])
            .await;

        assert!(matches!(
            report.sites[0].outcome,
            SiteOutcome::Unchanged { snapshot: None }
        ));
        assert!(h.storage.history("a").await.unwrap().is_empty());
        assert_eq!(h.renderer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_isolated() {
        let h = harness(
            Pages::default().with("https://up.example", "<title>Up</title>"),
            None,
            false,
        );

        let report = h
            .cycle
            .run(vec![
                site("down", "https://down.example", "//title", Some("Up")),
                site("up", "https://up.example", "//title", None),
            ])
            .await;

        assert_eq!(report.sites.len(), 2);
        assert!(matches!(
            report.sites[0].outcome,
            SiteOutcome::ExtractionFailed { outcome: ExtractionOutcome::FetchFailed, .. }
        ));
        assert_eq!(
            h.storage.latest("down").await.unwrap().unwrap().content,
            FETCH_FAILED
        );
        assert!(report.sites[1].is_changed());
        assert_eq!(h.renderer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_capture_failure_still_records_snapshot() {
        let h = harness(
            Pages::default().with("https://a.example", "<title>Fresh</title>"),
            None,
            true,
        );

        let report = h
            .cycle
            .run(vec![site("a", "https://a.example", "//title", Some("Stale"))])
            .await;

        match &report.sites[0].outcome {
            SiteOutcome::Changed {
                artifact,
                capture_error,
                ..
            } => {
                assert!(artifact.is_none());
                assert!(capture_error.is_some());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        let history = h.storage.history("a").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "Fresh");
        assert!(h.artifacts.keys.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blocked_site_is_never_fetched() {
        let h = harness(
            Pages::default().with("https://bad.example", "<title>x</title>"),
            Some(Lookup::Threats(vec!["MALWARE", "MALWARE"])),
            false,
        );

        let report = h
            .cycle
            .run(vec![site("bad", "https://bad.example", "//title", None)])
            .await;

        match &report.sites[0].outcome {
            SiteOutcome::Blocked { reason, threats } => {
                assert_eq!(reason, UNSAFE_URL);
                assert_eq!(threats, &vec!["MALWARE".to_string()]);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(h.pages.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(h.renderer.calls.load(Ordering::SeqCst), 0);
        assert!(h.storage.history("bad").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_failure_policies() {
        let pages = || Pages::default().with("https://a.example", "<title>A</title>");

        let allow = harness(pages(), Some(Lookup::Fails), false);
        let report = allow
            .cycle
            .run(vec![site("a", "https://a.example", "//title", None)])
            .await;
        assert!(report.sites[0].is_changed());

        let mut skip = harness(pages(), Some(Lookup::Fails), false);
        skip.cycle = skip.cycle.with_policy(PolicyConfig {
            threat_lookup_failure: ThreatFailurePolicy::Skip,
            ..PolicyConfig::default()
        });
        let report = skip
            .cycle
            .run(vec![site("a", "https://a.example", "//title", None)])
            .await;
        assert!(matches!(report.sites[0].outcome, SiteOutcome::Skipped { .. }));
        assert_eq!(skip.pages.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(skip.renderer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_registration_uses_site_id_key() {
        let h = harness(
            Pages::default().with("https://a.example", "<title>A</title>"),
            None,
            false,
        );

        let report = h
            .cycle
            .process_registration(Website::new("site-7", "https://a.example").with_xpath("//title"))
            .await;

        assert!(report.is_changed());
        assert_eq!(
            *h.artifacts.keys.lock().unwrap(),
            vec!["site-7".to_string()]
        );
        assert_eq!(h.storage.history("site-7").await.unwrap()[0].content, "A");
    }

    #[tokio::test]
    async fn test_concurrent_cycles_keep_timestamps_increasing() {
        let mut pages = Pages::default().with("https://a.example", "<title>A</title>");
        pages.delay = Some(Duration::from_millis(20));
        let h = harness(pages, None, false);
        let sites = vec![site("a", "https://a.example", "//title", None)];

        let (first, second) = tokio::join!(h.cycle.run(sites.clone()), h.cycle.run(sites.clone()));
        let third = h.cycle.run(sites).await;

        let busy = [&first, &second]
            .iter()
            .filter(|r| matches!(r.sites[0].outcome, SiteOutcome::Busy))
            .count();
        assert_eq!(busy, 1);
        assert!(third.sites[0].snapshot().is_some());

        let history = h.storage.history("a").await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test]
    async fn test_persistence_failure_marks_tick_failed() {
        let pages = Arc::new(Pages::default().with("https://a.example", "<title>A</title>"));
        let cycle = WatchCycle::new(
            ThreatGate::unconfigured(),
            ContentExtractor::new(pages),
            SnapshotRecorder::new(Arc::new(BrokenStore)),
        );

        let report = cycle
            .run(vec![
                site("a", "https://a.example", "//title", None),
                site("b", "https://b.example", "//title", None),
            ])
            .await;

        assert_eq!(report.sites.len(), 2);
        assert_eq!(report.persistence_failures(), 2);
        assert!(report.is_failure());
    }

    #[tokio::test]
    async fn test_invalid_url_is_blocked() {
        let h = harness(Pages::default(), None, false);

        let report = h
            .cycle
            .run(vec![site("x", "not a url", "//title", None)])
            .await;

        assert_eq!(report.blocked_count(), 1);
        assert_eq!(h.pages.fetches.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_site_locks_exclude() {
        let locks = SiteLocks::default();
        let guard = locks.try_acquire("a").unwrap();
        assert!(locks.try_acquire("a").is_none());
        assert!(locks.try_acquire("b").is_some());
        drop(guard);
        assert!(locks.try_acquire("a").is_some());
    }
}
