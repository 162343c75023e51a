//! posturescan auditor - walks a registry fleet and reports images with
//! critical vulnerability findings.

pub mod auditor;
pub mod config;
pub mod ecr;
pub mod provider;
pub mod render;
pub mod runner;
pub mod snapshot;

pub use auditor::{run_audit, Auditor, AuditorConfig, CancelFlag};
pub use config::{AuditOptions, AuditSettings, EcrOptions, ProviderKind};
pub use ecr::{EcrProvider, EcrSettings, TagStatus};
pub use provider::RegistryProvider;
pub use render::{render_report, OutputFormat};
pub use snapshot::{FleetSnapshot, SnapshotProvider};
