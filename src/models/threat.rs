//! Reputation lookup results and gate decisions.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Outcome of one reputation lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatCheckResult {
    pub has_threat: bool,

    /// Deduplicated threat labels
    pub threats: BTreeSet<String>,
}

impl ThreatCheckResult {
    /// A verdict with no threats.
    pub fn safe() -> Self {
        Self::default()
    }

    /// Build a verdict from raw (possibly repeated) threat labels.
    pub fn from_threats<I, S>(threats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let threats: BTreeSet<String> = threats.into_iter().map(Into::into).collect();
        Self {
            has_threat: !threats.is_empty(),
            threats,
        }
    }
}

/// Typed decision handed from the gate to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allowed { url: String },
    Blocked { reason: String, threats: Vec<String> },
}

impl GateDecision {
    pub fn blocked(reason: impl Into<String>, threats: Vec<String>) -> Self {
        Self::Blocked {
            reason: reason.into(),
            threats,
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}
