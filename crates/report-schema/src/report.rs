//! Audit report types: violations, recovered scan errors and the report itself.

use crate::finding::Finding;
use crate::resource::{Container, Item};
use posturescan_common::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// An item whose finding carries at least one CRITICAL vulnerability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    container_name: String,
    item_id: String,
    critical_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    digest: Option<String>,
}

impl Violation {
    /// Classify a finding. Returns a violation iff the CRITICAL count is at least one.
    pub fn from_finding(item: &Item, finding: &Finding) -> Option<Self> {
        let critical_count = finding.critical_count();
        if critical_count == 0 {
            return None;
        }
        Some(Self {
            container_name: item.container_name.clone(),
            item_id: item.item_id.clone(),
            critical_count,
            digest: item.digest.clone(),
        })
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn critical_count(&self) -> u64 {
        self.critical_count
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Identifier of the form `container:item`.
    pub fn qualified_id(&self) -> String {
        format!("{}:{}", self.container_name, self.item_id)
    }
}

/// Level at which a recovered failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorScope {
    Container,
    Item,
}

impl fmt::Display for ErrorScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorScope::Container => write!(f, "container"),
            ErrorScope::Item => write!(f, "item"),
        }
    }
}

/// A per-resource failure that was recorded instead of aborting the audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanError {
    pub scope: ErrorScope,
    pub identifier: String,
    pub cause: String,
}

impl ScanError {
    /// Item listing failed for a container.
    pub fn container(container: &Container, cause: impl fmt::Display) -> Self {
        Self {
            scope: ErrorScope::Container,
            identifier: container.name.clone(),
            cause: cause.to_string(),
        }
    }

    /// Finding retrieval failed for an item.
    pub fn item(item: &Item, cause: impl fmt::Display) -> Self {
        Self {
            scope: ErrorScope::Item,
            identifier: item.qualified_id(),
            cause: cause.to_string(),
        }
    }
}

/// Counters describing how the fleet was walked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    /// Containers whose item listing was attempted.
    pub containers: usize,
    /// Containers whose item listing failed.
    pub containers_failed: usize,
    /// Items enumerated across all listed containers.
    pub items: usize,
    /// Items scanned with zero critical findings.
    pub items_clean: usize,
    /// Items without a scan result yet.
    pub items_not_scanned: usize,
}

impl ScanStats {
    pub fn merge(&mut self, other: &ScanStats) {
        self.containers += other.containers;
        self.containers_failed += other.containers_failed;
        self.items += other.items;
        self.items_clean += other.items_clean;
        self.items_not_scanned += other.items_not_scanned;
    }
}

/// Terminal output of an audit run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub run_id: Uuid,
    /// Description of the provider that was audited.
    pub provider: String,
    pub started_at: Timestamp,
    pub completed_at: Timestamp,
    pub violations: Vec<Violation>,
    pub errors: Vec<ScanError>,
    pub stats: ScanStats,
    /// Set when the run stopped early on a timeout or cancel signal.
    #[serde(default)]
    pub cancelled: bool,
}

impl AuditReport {
    /// Start an empty report for a provider.
    pub fn new(provider: impl Into<String>) -> Self {
        let now = Timestamp::now();
        Self {
            run_id: Uuid::new_v4(),
            provider: provider.into(),
            started_at: now,
            completed_at: now,
            violations: Vec::new(),
            errors: Vec::new(),
            stats: ScanStats::default(),
            cancelled: false,
        }
    }

    /// Whether every container was visited.
    pub fn is_complete(&self) -> bool {
        !self.cancelled
    }

    pub fn container_errors(&self) -> impl Iterator<Item = &ScanError> {
        self.errors
            .iter()
            .filter(|e| e.scope == ErrorScope::Container)
    }

    pub fn item_errors(&self) -> impl Iterator<Item = &ScanError> {
        self.errors.iter().filter(|e| e.scope == ErrorScope::Item)
    }

    /// Stamp the completion time.
    pub fn finish(&mut self) {
        self.completed_at = Timestamp::now();
    }

    pub fn duration_ms(&self) -> u64 {
        self.started_at.millis_until(&self.completed_at)
    }
}
