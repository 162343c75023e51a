//! Fleet snapshot provider: serves a fleet description loaded from a file.
//!
//! Snapshots describe containers, items and findings, and can inject
//! failures at every level. They back offline audits and end-to-end tests.

use crate::provider::RegistryProvider;
use async_trait::async_trait;
use posturescan_common::{Error, Result, Severity};
use posturescan_schema::{Container, Finding, FindingLookup, Item};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A whole fleet as stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetSnapshot {
    /// When set, listing the fleet fails with this message.
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub containers: Vec<SnapshotContainer>,
}

/// One container in a snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotContainer {
    pub name: String,
    #[serde(default)]
    pub uri: Option<String>,
    /// When set, listing this container's items fails.
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub items: Vec<SnapshotItem>,
}

/// One item in a snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotItem {
    pub id: String,
    #[serde(default)]
    pub digest: Option<String>,
    /// Severity counts. Absent means the item has not been scanned.
    #[serde(default)]
    pub finding: Option<BTreeMap<Severity, u64>>,
    /// When set, fetching this item's finding fails.
    #[serde(default)]
    pub error: Option<String>,
}

impl FleetSnapshot {
    /// Load a snapshot from a YAML or JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(serde_yaml::from_str(&content)?)
        }
    }

    /// Container names must be unique in the fleet, item ids within a container.
    fn check_unique(&self) -> Result<()> {
        let mut names = HashSet::new();
        for container in &self.containers {
            if !names.insert(container.name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate container {} in snapshot",
                    container.name
                )));
            }
            let mut ids = HashSet::new();
            for item in &container.items {
                if !ids.insert(item.id.as_str()) {
                    return Err(Error::Config(format!(
                        "duplicate item {}:{} in snapshot",
                        container.name, item.id
                    )));
                }
            }
        }
        Ok(())
    }

    fn container(&self, name: &str) -> Option<&SnapshotContainer> {
        self.containers.iter().find(|c| c.name == name)
    }
}

/// Provider serving a [`FleetSnapshot`].
pub struct SnapshotProvider {
    snapshot: FleetSnapshot,
    source: Option<PathBuf>,
}

impl SnapshotProvider {
    /// Serve `snapshot`, rejecting duplicate container names or item ids.
    pub fn new(snapshot: FleetSnapshot) -> Result<Self> {
        snapshot.check_unique()?;
        Ok(Self {
            snapshot,
            source: None,
        })
    }

    /// Load the snapshot at `path`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut provider = Self::new(FleetSnapshot::load(path)?)?;
        debug!(
            "Loaded snapshot {:?} with {} container(s)",
            path,
            provider.snapshot.containers.len()
        );
        provider.source = Some(path.to_path_buf());
        Ok(provider)
    }
}

#[async_trait]
impl RegistryProvider for SnapshotProvider {
    fn describe(&self) -> String {
        match self.source {
            Some(ref path) => format!("snapshot:{}", path.display()),
            None => "snapshot:memory".to_string(),
        }
    }

    async fn list_containers(&self) -> Result<Vec<Container>> {
        if let Some(ref error) = self.snapshot.error {
            return Err(Error::Other(error.clone()));
        }
        Ok(self
            .snapshot
            .containers
            .iter()
            .map(|c| Container {
                name: c.name.clone(),
                uri: c.uri.clone(),
            })
            .collect())
    }

    async fn list_items(&self, container: &Container) -> Result<Vec<Item>> {
        let entry = self
            .snapshot
            .container(&container.name)
            .ok_or_else(|| Error::Other(format!("container {} vanished", container.name)))?;
        if let Some(ref error) = entry.error {
            return Err(Error::Other(error.clone()));
        }
        Ok(entry
            .items
            .iter()
            .map(|i| Item {
                container_name: entry.name.clone(),
                item_id: i.id.clone(),
                digest: i.digest.clone(),
                tag: None,
            })
            .collect())
    }

    async fn get_finding(&self, container: &Container, item: &Item) -> Result<FindingLookup> {
        let entry = self
            .snapshot
            .container(&container.name)
            .and_then(|c| c.items.iter().find(|i| i.id == item.item_id))
            .ok_or_else(|| Error::Other(format!("item {} vanished", item.qualified_id())))?;

        if let Some(ref error) = entry.error {
            return Err(Error::Other(error.clone()));
        }
        Ok(match entry.finding {
            Some(ref counts) => FindingLookup::Found(Finding {
                severity_counts: counts.clone(),
            }),
            None => FindingLookup::NotFound,
        })
    }
}
