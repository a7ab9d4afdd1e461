// src/pipeline/watch.rs

//! Wiring from configuration to a running pipeline.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::models::{Config, Website};
use crate::pipeline::capture::CaptureOrchestrator;
use crate::pipeline::cycle::{CycleReport, WatchCycle};
use crate::pipeline::recorder::SnapshotRecorder;
use crate::pipeline::scheduler::{
    RegistrationConsumer, Scheduler, SchedulerStats, registration_channel,
};
use crate::services::{ContentExtractor, HttpFetcher, HttpRenderer, RenderSlots, ThreatGate};
use crate::storage::{ArtifactStore, LocalStorage, SnapshotStore};
use crate::utils::http::create_async_client;
use crate::utils::is_http_url;

/// Assemble a watch cycle from configuration and stores.
pub fn build_cycle(
    config: &Config,
    snapshots: Arc<dyn SnapshotStore>,
    artifacts: Arc<dyn ArtifactStore>,
) -> Result<WatchCycle> {
    let client = create_async_client(&config.watcher)?;

    let gate = ThreatGate::from_config(client.clone(), &config.safe_browsing);
    let extractor = ContentExtractor::new(Arc::new(HttpFetcher::new(client.clone())));
    let recorder = SnapshotRecorder::new(snapshots);

    let mut cycle = WatchCycle::new(gate, extractor, recorder)
        .with_policy(config.policy)
        .with_max_concurrent(config.watcher.max_concurrent);

    if config.capture.enabled {
        let renderer = HttpRenderer::new(client, &config.capture);
        cycle = cycle.with_capture(CaptureOrchestrator::new(
            Arc::new(renderer),
            artifacts,
            RenderSlots::new(config.capture.max_concurrent_renders),
            Duration::from_secs(config.capture.timeout_secs),
        ));
    } else {
        log::info!("Document capture disabled");
    }

    Ok(cycle)
}

/// Pick the artifact store: S3 when a bucket is configured, local otherwise.
#[cfg(feature = "s3")]
async fn artifact_store(
    config: &Config,
    local: &Arc<LocalStorage>,
) -> Result<Arc<dyn ArtifactStore>> {
    let store: Arc<dyn ArtifactStore> = match config.storage.s3_bucket {
        Some(_) => Arc::new(crate::storage::S3ArtifactStore::from_config(&config.storage).await?),
        None => local.clone(),
    };
    Ok(store)
}

#[cfg(not(feature = "s3"))]
async fn artifact_store(
    config: &Config,
    local: &Arc<LocalStorage>,
) -> Result<Arc<dyn ArtifactStore>> {
    if config.storage.s3_bucket.is_some() {
        log::warn!("storage.s3_bucket is set but S3 support is not compiled in; using local artifacts");
    }
    let store: Arc<dyn ArtifactStore> = local.clone();
    Ok(store)
}

async fn cycle_for(config: &Config, storage: &Arc<LocalStorage>) -> Result<WatchCycle> {
    let artifacts = artifact_store(config, storage).await?;
    build_cycle(config, storage.clone(), artifacts)
}

/// Run exactly one cycle. A tick that could not persist anything is an error.
pub async fn run_once(config: &Config, storage: Arc<LocalStorage>) -> Result<CycleReport> {
    let cycle = cycle_for(config, &storage).await?;
    let report = cycle.run_from(storage.as_ref()).await?;
    report.log_summary();

    if report.is_failure() {
        return Err(AppError::persistence(format!(
            "no snapshot persisted for {} sites",
            report.persistence_failures()
        )));
    }
    Ok(report)
}

/// Run the scheduler until `shutdown` resolves.
pub async fn run_watch<F>(
    config: &Config,
    storage: Arc<LocalStorage>,
    shutdown: F,
) -> Result<SchedulerStats>
where
    F: Future<Output = ()>,
{
    let cycle = Arc::new(cycle_for(config, &storage).await?);
    let scheduler = Scheduler::new(
        cycle,
        storage,
        Duration::from_secs(config.watcher.interval_secs),
    );
    Ok(scheduler.run(shutdown).await)
}

/// Deliver one registration event for a site in the site list.
pub async fn run_capture(
    config: &Config,
    storage: Arc<LocalStorage>,
    website_id: &str,
) -> Result<usize> {
    let website = storage.find_website(website_id).await?;
    run_registrations(config, storage, vec![website]).await
}

/// Add sites to the site list and run the registration pass for each new one.
///
/// Sites whose id is already registered are left untouched.
pub async fn register_sites(
    config: &Config,
    storage: Arc<LocalStorage>,
    websites: Vec<Website>,
) -> Result<usize> {
    let mut sites = storage.load_websites().await?;
    let mut added = Vec::new();

    for website in websites {
        if !website.has_valid_id() {
            log::warn!("Not registering {:?}: invalid id", website.id);
            continue;
        }
        if !is_http_url(&website.url) {
            log::warn!("Not registering {}: invalid url {:?}", website.id, website.url);
            continue;
        }
        if sites.iter().any(|s| s.id == website.id) {
            log::warn!("Site {} already registered; skipping", website.id);
            continue;
        }
        sites.push(website.clone());
        added.push(website);
    }

    if added.is_empty() {
        return Ok(0);
    }
    storage.save_websites(&sites).await?;
    log::info!("Registered {} new sites", added.len());

    run_registrations(config, storage, added).await
}

async fn run_registrations(
    config: &Config,
    storage: Arc<LocalStorage>,
    websites: Vec<Website>,
) -> Result<usize> {
    let cycle = Arc::new(cycle_for(config, &storage).await?);

    let (tx, rx) = registration_channel(websites.len());
    let consumer = RegistrationConsumer::new(cycle, rx).spawn();

    for website in websites {
        tx.send(website)
            .await
            .map_err(|e| AppError::validation(format!("registration channel closed: {}", e)))?;
    }
    drop(tx);

    consumer
        .await
        .map_err(|e| AppError::validation(format!("registration consumer failed: {}", e)))
}
