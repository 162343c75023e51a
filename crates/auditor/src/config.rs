//! Audit configuration: YAML file values overlaid with command-line flags.

use crate::auditor::AuditorConfig;
use crate::ecr::{EcrProvider, EcrSettings, TagStatus};
use crate::provider::RegistryProvider;
use crate::render::OutputFormat;
use crate::snapshot::SnapshotProvider;
use posturescan_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Which backing system to audit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Ecr,
    Snapshot,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Ecr => write!(f, "ecr"),
            ProviderKind::Snapshot => write!(f, "snapshot"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ecr" => Ok(ProviderKind::Ecr),
            "snapshot" | "file" => Ok(ProviderKind::Snapshot),
            _ => Err(Error::Config(format!("Invalid provider: {}", s))),
        }
    }
}

/// ECR options as they appear in the config file or on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EcrOptions {
    pub region: Option<String>,
    pub profile: Option<String>,
    pub registry_id: Option<String>,
    pub endpoint_url: Option<String>,
    pub tag_status: Option<TagStatus>,
    pub aws_bin: Option<String>,
}

impl EcrOptions {
    fn overlay(self, top: EcrOptions) -> EcrOptions {
        EcrOptions {
            region: top.region.or(self.region),
            profile: top.profile.or(self.profile),
            registry_id: top.registry_id.or(self.registry_id),
            endpoint_url: top.endpoint_url.or(self.endpoint_url),
            tag_status: top.tag_status.or(self.tag_status),
            aws_bin: top.aws_bin.or(self.aws_bin),
        }
    }
}

/// Unresolved audit options. Every field is optional so layers can be overlaid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuditOptions {
    pub provider: Option<ProviderKind>,
    pub ecr: EcrOptions,
    pub snapshot: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub timeout_seconds: Option<u64>,
    pub format: Option<OutputFormat>,
}

impl AuditOptions {
    /// Load options from a YAML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let options: AuditOptions = serde_yaml::from_str(&content)?;
        debug!("Loaded config from {:?}", path);
        Ok(options)
    }

    /// Values set in `top` win over values set in `self`.
    pub fn overlay(self, top: AuditOptions) -> AuditOptions {
        AuditOptions {
            provider: top.provider.or(self.provider),
            ecr: self.ecr.overlay(top.ecr),
            snapshot: top.snapshot.or(self.snapshot),
            concurrency: top.concurrency.or(self.concurrency),
            timeout_seconds: top.timeout_seconds.or(self.timeout_seconds),
            format: top.format.or(self.format),
        }
    }
}

/// Fully resolved settings for one audit run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditSettings {
    pub provider: ProviderKind,
    pub ecr: EcrSettings,
    pub snapshot: Option<PathBuf>,
    pub auditor: AuditorConfig,
    pub format: OutputFormat,
}

impl AuditSettings {
    /// Resolve options, consulting `env` only for the AWS region.
    ///
    /// With no region from options or environment, the ECR provider falls
    /// back to the AWS CLI profile.
    pub fn resolve<F>(options: AuditOptions, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let provider = options.provider.unwrap_or_default();

        let concurrency = options.concurrency.unwrap_or(1);
        if concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".to_string()));
        }

        if provider == ProviderKind::Snapshot && options.snapshot.is_none() {
            return Err(Error::Config(
                "the snapshot provider requires a snapshot file".to_string(),
            ));
        }

        let region = options
            .ecr
            .region
            .or_else(|| env("AWS_REGION"))
            .or_else(|| env("AWS_DEFAULT_REGION"))
            .filter(|r| !r.trim().is_empty());

        let defaults = EcrSettings::default();
        let ecr = EcrSettings {
            aws_bin: options.ecr.aws_bin.unwrap_or(defaults.aws_bin),
            region,
            profile: options.ecr.profile,
            registry_id: options.ecr.registry_id,
            endpoint_url: options.ecr.endpoint_url,
            tag_status: options.ecr.tag_status.unwrap_or_default(),
        };

        let timeout = options
            .timeout_seconds
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Ok(Self {
            provider,
            ecr,
            snapshot: options.snapshot,
            auditor: AuditorConfig {
                concurrency,
                timeout,
            },
            format: options.format.unwrap_or_default(),
        })
    }

    /// Construct the configured provider.
    pub fn build_provider(&self) -> Result<Arc<dyn RegistryProvider>> {
        match self.provider {
            ProviderKind::Ecr => Ok(Arc::new(EcrProvider::new(self.ecr.clone()))),
            ProviderKind::Snapshot => {
                let path = self.snapshot.as_deref().ok_or_else(|| {
                    Error::Config("the snapshot provider requires a snapshot file".to_string())
                })?;
                Ok(Arc::new(SnapshotProvider::from_file(path)?))
            }
        }
    }
}
