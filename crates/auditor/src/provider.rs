//! The registry provider capability consumed by the auditor.

use async_trait::async_trait;
use posturescan_common::Result;
use posturescan_schema::{Container, FindingLookup, Item};

/// A backing system that can enumerate a fleet and report scan results.
///
/// Any registry, package store or artifact store can implement this. Errors
/// from `list_containers` are fatal to an audit. Errors from the other two
/// methods are recorded per resource and the audit moves on.
#[async_trait]
pub trait RegistryProvider: Send + Sync {
    /// Human-readable description, e.g. `ecr:us-west-2`.
    fn describe(&self) -> String;

    /// List every container in the fleet.
    async fn list_containers(&self) -> Result<Vec<Container>>;

    /// List the items held by one container.
    async fn list_items(&self, container: &Container) -> Result<Vec<Item>>;

    /// Fetch the scan finding for one item.
    async fn get_finding(&self, container: &Container, item: &Item) -> Result<FindingLookup>;
}
