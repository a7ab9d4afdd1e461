//! Change detection between the latest snapshot and freshly extracted content.
//!
//! Comparison is plain string inequality. Content is already trimmed by the
//! extractor, so no further normalization happens here.

use serde::{Deserialize, Serialize};

/// Result of comparing a site's content with its history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Change {
    /// No prior snapshot exists
    FirstObservation,
    /// Content differs from the latest snapshot
    Changed,
    /// Content equals the latest snapshot
    Unchanged,
}

impl Change {
    pub fn is_change(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Compares extracted content with the latest recorded content.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeDetector;

impl ChangeDetector {
    pub fn new() -> Self {
        Self
    }

    /// Classify the current content against the latest snapshot, if any.
    pub fn detect(&self, latest: Option<&str>, current: &str) -> Change {
        match latest {
            None => Change::FirstObservation,
            Some(latest) if latest == current => Change::Unchanged,
            Some(_) => Change::Changed,
        }
    }

    /// Absence of history always counts as a change.
    pub fn has_changed(&self, latest: Option<&str>, current: &str) -> bool {
        self.detect(latest, current).is_change()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::NO_CONTENT;

    #[test]
    fn test_no_history_is_change() {
        let detector = ChangeDetector::new();
        assert_eq!(detector.detect(None, "anything"), Change::FirstObservation);
        assert!(detector.has_changed(None, ""));
        assert!(detector.has_changed(None, NO_CONTENT));
    }

    #[test]
    fn test_equal_content_is_not_change() {
        let detector = ChangeDetector::new();
        assert!(!detector.has_changed(Some("Same"), "Same"));
    }

    #[test]
    fn test_equal_sentinels_are_not_change() {
        let detector = ChangeDetector::new();
        assert!(!detector.has_changed(Some(NO_CONTENT), NO_CONTENT));
    }

    #[test]
    fn test_different_content_is_change() {
        let detector = ChangeDetector::new();
        assert_eq!(detector.detect(Some("Old"), "New"), Change::Changed);
    }

    #[test]
    fn test_no_normalization() {
        let detector = ChangeDetector::new();
        assert!(detector.has_changed(Some("Price"), "price"));
        assert!(detector.has_changed(Some("a  b"), "a b"));
    }
}
