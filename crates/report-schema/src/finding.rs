//! Scan findings for a single item.

use posturescan_common::Severity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Scan result for one item: a count per severity level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    #[serde(default)]
    pub severity_counts: BTreeMap<Severity, u64>,
}

impl Finding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style count setter.
    pub fn with_count(mut self, severity: Severity, count: u64) -> Self {
        self.severity_counts.insert(severity, count);
        self
    }

    /// Count for a severity. Missing levels count as zero.
    pub fn count(&self, severity: Severity) -> u64 {
        self.severity_counts.get(&severity).copied().unwrap_or(0)
    }

    pub fn critical_count(&self) -> u64 {
        self.count(Severity::Critical)
    }

    /// Total findings across all severities.
    pub fn total(&self) -> u64 {
        self.severity_counts.values().sum()
    }
}

/// Outcome of looking up the finding for an item.
///
/// `NotFound` means the item has not been scanned yet. It is neither a clean
/// result nor an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindingLookup {
    Found(Finding),
    NotFound,
}

impl FindingLookup {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FindingLookup::NotFound)
    }
}
