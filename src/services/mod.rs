//! Service layer for the watcher.
//!
//! This module contains the collaborators each site passes through:
//! - URL reputation gating (`ThreatGate`)
//! - Page fetching and fragment extraction (`ContentExtractor`)
//! - Rendered-document capture (`DocumentRenderer`)

mod extractor;
mod renderer;
mod threat;

pub use extractor::{
    ContentExtractor, Extraction, ExtractionOutcome, FETCH_FAILED, HttpFetcher, INVALID_SELECTOR,
    NO_CONTENT, NO_SELECTOR, PageFetcher, select_text,
};
pub use renderer::{DocumentRenderer, HttpRenderer, RenderSlot, RenderSlots};
pub use threat::{
    INVALID_URL, MISSING_URL, ReputationLookup, SafeBrowsingClient, ThreatGate, UNSAFE_URL,
};
