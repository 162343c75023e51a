//! Report schema definitions for posturescan.
//!
//! This crate defines the fleet data model (containers, items, findings)
//! and the audit report produced by a posture scan.

pub mod finding;
pub mod report;
pub mod resource;
pub mod validation;

pub use finding::{Finding, FindingLookup};
pub use report::{AuditReport, ErrorScope, ScanError, ScanStats, Violation};
pub use resource::{Container, Item};
pub use validation::{validate_report, ValidationError, ValidationResult};
