//! Watch pipeline.
//!
//! - `cycle`: per-site state machine and cycle driver
//! - `scheduler`: fixed-interval scheduler and registration consumer
//! - `watch`: wiring from configuration and the CLI entry points

pub mod capture;
pub mod cycle;
pub mod diff;
pub mod recorder;
pub mod scheduler;
pub mod watch;

pub use capture::{ArtifactKey, ArtifactKeyMode, CaptureOrchestrator, StoredArtifact};
pub use cycle::{
    CycleMode, CycleReport, SiteLocks, SiteOutcome, SiteReport, SiteStage, WatchCycle,
};
pub use diff::{Change, ChangeDetector};
pub use recorder::SnapshotRecorder;
pub use scheduler::{
    RegistrationConsumer, Scheduler, SchedulerStats, registration_channel, run_tick,
};
pub use watch::{build_cycle, register_sites, run_capture, run_once, run_watch};
