//! Entry points that drive the watch cycle: a fixed-interval scheduler and a
//! consumer for registration events.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::models::Website;
use crate::pipeline::cycle::{CycleReport, WatchCycle};
use crate::storage::SiteSource;

/// Counters for one scheduler run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub cycles_started: usize,
    pub ticks_skipped: usize,
}

/// Starts one cycle per tick, never two at once.
pub struct Scheduler {
    cycle: Arc<WatchCycle>,
    source: Arc<dyn SiteSource>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(cycle: Arc<WatchCycle>, source: Arc<dyn SiteSource>, interval: Duration) -> Self {
        Self {
            cycle,
            source,
            interval,
        }
    }

    /// Tick until `shutdown` resolves, then wait for the in-flight cycle.
    ///
    /// A tick that fires while the previous cycle is still running is skipped.
    /// On shutdown no new render starts; renders already holding a slot finish,
    /// and later changes in the in-flight cycle are recorded without a capture.
    pub async fn run<F>(self, shutdown: F) -> SchedulerStats
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        let mut stats = SchedulerStats::default();
        let mut in_flight: Option<JoinHandle<()>> = None;

        log::info!(
            "Scheduler started, one cycle every {}s",
            self.interval.as_secs_f64()
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("Shutdown requested");
                    if let Some(capture) = self.cycle.capture() {
                        capture.slots().close();
                    }
                    break;
                }
                _ = ticker.tick() => {
                    if in_flight.as_ref().is_some_and(|h| !h.is_finished()) {
                        stats.ticks_skipped += 1;
                        log::warn!("Previous cycle still running; skipping tick");
                        continue;
                    }

                    let cycle = Arc::clone(&self.cycle);
                    let source = Arc::clone(&self.source);
                    stats.cycles_started += 1;
                    in_flight = Some(tokio::spawn(async move {
                        run_tick(&cycle, source.as_ref()).await;
                    }));
                }
            }
        }

        if let Some(handle) = in_flight {
            if !handle.is_finished() {
                log::info!("Waiting for in-flight cycle to complete");
            }
            if let Err(e) = handle.await {
                log::error!("Cycle task ended abnormally: {}", e);
            }
        }

        stats
    }
}

/// Run one cycle; failures are logged, never propagated to the scheduler.
pub async fn run_tick(cycle: &WatchCycle, source: &dyn SiteSource) -> Option<CycleReport> {
    match cycle.run_from(source).await {
        Ok(report) => {
            report.log_summary();
            if report.is_failure() {
                log::error!("Cycle failed: no snapshot could be persisted");
            }
            Some(report)
        }
        Err(e) => {
            log::error!("Cycle aborted, sites could not be loaded: {}", e);
            None
        }
    }
}

/// Create the channel that carries newly registered sites.
pub fn registration_channel(buffer: usize) -> (mpsc::Sender<Website>, mpsc::Receiver<Website>) {
    mpsc::channel(buffer.max(1))
}

/// Runs the single-capture pass for each registration event.
pub struct RegistrationConsumer {
    cycle: Arc<WatchCycle>,
    receiver: mpsc::Receiver<Website>,
}

impl RegistrationConsumer {
    pub fn new(cycle: Arc<WatchCycle>, receiver: mpsc::Receiver<Website>) -> Self {
        Self { cycle, receiver }
    }

    /// Consume events until every sender is dropped. Returns the number handled.
    pub async fn run(mut self) -> usize {
        let mut handled = 0;
        while let Some(website) = self.receiver.recv().await {
            let report = self.cycle.process_registration(website).await;
            log::info!(
                "Registration pass for {} finished: {:?}",
                report.website_id,
                report.outcome
            );
            handled += 1;
        }
        handled
    }

    pub fn spawn(self) -> JoinHandle<usize> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, Result};
    use crate::models::{Snapshot, WatchedSite};
    use crate::pipeline::{ArtifactKey, CaptureOrchestrator, SnapshotRecorder};
    use crate::services::{ContentExtractor, DocumentRenderer, PageFetcher, RenderSlots, ThreatGate};
    use crate::storage::{ArtifactStore, LocalStorage, SnapshotStore};
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct SlowPage(Duration);

    #[async_trait]
    impl PageFetcher for SlowPage {
        async fn fetch(&self, _url: &str) -> Result<String> {
            tokio::time::sleep(self.0).await;
            Ok("<title>Slow</title>".to_string())
        }
    }

    struct NoSites;

    #[async_trait]
    impl SiteSource for NoSites {
        async fn load_sites(&self) -> Result<Vec<WatchedSite>> {
            Err(AppError::persistence("site table unavailable"))
        }
    }

    fn cycle(storage: Arc<LocalStorage>, delay: Duration) -> Arc<WatchCycle> {
        Arc::new(WatchCycle::new(
            ThreatGate::unconfigured(),
            ContentExtractor::new(Arc::new(SlowPage(delay))),
            SnapshotRecorder::new(storage),
        ))
    }

    #[tokio::test]
    async fn test_overlapping_ticks_are_skipped_and_inflight_completes() {
        let tmp = TempDir::new().unwrap();
        let storage = Arc::new(LocalStorage::new(tmp.path()));
        storage
            .save_websites(&[Website::new("a", "https://a.example").with_xpath("//title")])
            .await
            .unwrap();

        let scheduler = Scheduler::new(
            cycle(storage.clone(), Duration::from_millis(300)),
            storage.clone(),
            Duration::from_millis(20),
        );
        let stats = scheduler
            .run(tokio::time::sleep(Duration::from_millis(150)))
            .await;

        assert_eq!(stats.cycles_started, 1);
        assert!(stats.ticks_skipped >= 1);

        let history: Vec<Snapshot> = storage.history("a").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "Slow");
    }

    #[tokio::test]
    async fn test_source_failure_does_not_stop_scheduler() {
        let tmp = TempDir::new().unwrap();
        let storage = Arc::new(LocalStorage::new(tmp.path()));

        let scheduler = Scheduler::new(
            cycle(storage, Duration::ZERO),
            Arc::new(NoSites),
            Duration::from_millis(10),
        );
        let stats = scheduler
            .run(tokio::time::sleep(Duration::from_millis(100)))
            .await;

        assert!(stats.cycles_started >= 2);
    }

    #[tokio::test]
    async fn test_registration_consumer_handles_every_event() {
        let tmp = TempDir::new().unwrap();
        let storage = Arc::new(LocalStorage::new(tmp.path()));
        let (tx, rx) = registration_channel(4);
        let consumer = RegistrationConsumer::new(cycle(storage.clone(), Duration::ZERO), rx).spawn();

        for id in ["r1", "r2"] {
            tx.send(Website::new(id, "https://r.example").with_xpath("//title"))
                .await
                .unwrap();
        }
        drop(tx);

        assert_eq!(consumer.await.unwrap(), 2);
        assert_eq!(storage.history("r1").await.unwrap().len(), 1);
        assert_eq!(storage.history("r2").await.unwrap().len(), 1);
    }

    struct PdfRenderer;

    #[async_trait]
    impl DocumentRenderer for PdfRenderer {
        async fn render(&self, _url: &str) -> Result<Vec<u8>> {
            Ok(b"%PDF-1.7".to_vec())
        }
    }

    struct NullArtifacts;

    #[async_trait]
    impl ArtifactStore for NullArtifacts {
        async fn put(&self, key: &ArtifactKey, _bytes: Vec<u8>) -> Result<String> {
            Ok(format!("null://{}", key))
        }
    }

    #[tokio::test]
    async fn test_shutdown_closes_render_slots() {
        let tmp = TempDir::new().unwrap();
        let storage = Arc::new(LocalStorage::new(tmp.path()));
        let slots = RenderSlots::new(2);
        let cycle = Arc::new(
            WatchCycle::new(
                ThreatGate::unconfigured(),
                ContentExtractor::new(Arc::new(SlowPage(Duration::ZERO))),
                SnapshotRecorder::new(storage.clone()),
            )
            .with_capture(CaptureOrchestrator::new(
                Arc::new(PdfRenderer),
                Arc::new(NullArtifacts),
                slots.clone(),
                Duration::from_secs(5),
            )),
        );

        assert!(slots.acquire().await.is_ok());

        let scheduler = Scheduler::new(cycle, storage, Duration::from_millis(10));
        scheduler
            .run(tokio::time::sleep(Duration::from_millis(30)))
            .await;

        assert!(slots.acquire().await.is_err());
    }
}
