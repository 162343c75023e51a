//! Fleet posture auditor.
//!
//! Walks every container a [`RegistryProvider`] lists, probes each item for
//! its scan finding and accumulates violations and recovered errors. Only a
//! failure to list the fleet aborts the run.

use crate::provider::RegistryProvider;
use posturescan_common::{Error, Result};
use posturescan_schema::{AuditReport, Container, FindingLookup, ScanError, ScanStats, Violation};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Auditor configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditorConfig {
    /// Containers audited at once. `1` walks the fleet sequentially.
    pub concurrency: usize,
    /// Deadline for the whole run, measured from its start.
    pub timeout: Option<Duration>,
}

impl Default for AuditorConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            timeout: None,
        }
    }
}

/// Cloneable signal asking a running audit to stop issuing probes.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Deadline plus cancel flag, shared by every probe of one run.
#[derive(Debug, Clone)]
struct Guard {
    deadline: Option<Instant>,
    cancel: CancelFlag,
}

impl Guard {
    fn tripped(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Drive `fut` unless the run is cancelled or times out first.
    async fn bound<F: Future>(&self, fut: F) -> Option<F::Output> {
        let notified = self.cancel.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.tripped() {
            return None;
        }

        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            out = fut => Some(out),
            _ = &mut notified => None,
            _ = expired => None,
        }
    }
}

/// Everything one container task produced.
#[derive(Debug, Default)]
struct ContainerOutcome {
    violations: Vec<Violation>,
    errors: Vec<ScanError>,
    stats: ScanStats,
    interrupted: bool,
}

impl ContainerOutcome {
    fn interrupted() -> Self {
        Self {
            interrupted: true,
            ..Default::default()
        }
    }
}

/// The fleet posture auditor.
pub struct Auditor {
    provider: Arc<dyn RegistryProvider>,
    config: AuditorConfig,
    cancel: CancelFlag,
}

impl Auditor {
    /// Create an auditor over a provider.
    pub fn new(provider: Arc<dyn RegistryProvider>, config: AuditorConfig) -> Self {
        Self {
            provider,
            config,
            cancel: CancelFlag::new(),
        }
    }

    /// Use an externally owned cancel flag.
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Run the audit.
    ///
    /// Returns `Err(Error::Enumeration)` only when the fleet cannot be listed.
    /// Every other failure is recorded in the report.
    pub async fn run(&self) -> Result<AuditReport> {
        let provider_name = self.provider.describe();
        let guard = Guard {
            deadline: self.config.timeout.map(|t| Instant::now() + t),
            cancel: self.cancel.clone(),
        };
        let mut report = AuditReport::new(provider_name.clone());

        info!("Starting audit of {}", provider_name);

        let containers = match guard.bound(self.provider.list_containers()).await {
            Some(Ok(containers)) => containers,
            Some(Err(e)) => {
                return Err(Error::Enumeration {
                    provider: provider_name,
                    reason: e.to_string(),
                })
            }
            None => {
                return Err(Error::Enumeration {
                    provider: provider_name,
                    reason: "cancelled before the fleet was listed".to_string(),
                })
            }
        };

        info!("Found {} container(s)", containers.len());

        let outcomes = if self.config.concurrency <= 1 {
            self.run_sequential(containers, &guard).await
        } else {
            self.run_concurrent(containers, &guard).await
        };

        for outcome in outcomes {
            report.violations.extend(outcome.violations);
            report.errors.extend(outcome.errors);
            report.stats.merge(&outcome.stats);
            report.cancelled |= outcome.interrupted;
        }
        report.finish();

        if report.cancelled {
            warn!(
                "Audit cancelled after {} container(s); report is partial",
                report.stats.containers
            );
        }
        info!(
            "Audit finished: {} violation(s), {} error(s) in {}ms",
            report.violations.len(),
            report.errors.len(),
            report.duration_ms()
        );

        Ok(report)
    }

    async fn run_sequential(
        &self,
        containers: Vec<Container>,
        guard: &Guard,
    ) -> Vec<ContainerOutcome> {
        let mut outcomes = Vec::with_capacity(containers.len());
        for container in containers {
            let outcome = audit_container(self.provider.as_ref(), &container, guard).await;
            let stop = outcome.interrupted;
            outcomes.push(outcome);
            if stop {
                break;
            }
        }
        outcomes
    }

    /// Audit containers in parallel, then merge in provider order.
    async fn run_concurrent(
        &self,
        containers: Vec<Container>,
        guard: &Guard,
    ) -> Vec<ContainerOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut tasks = JoinSet::new();
        let names: Vec<String> = containers.iter().map(|c| c.name.clone()).collect();

        for (index, container) in containers.into_iter().enumerate() {
            let provider = self.provider.clone();
            let semaphore = semaphore.clone();
            let guard = guard.clone();
            tasks.spawn(async move {
                let outcome = match guard.bound(semaphore.acquire_owned()).await {
                    Some(Ok(_permit)) => {
                        audit_container(provider.as_ref(), &container, &guard).await
                    }
                    _ => ContainerOutcome::interrupted(),
                };
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<ContainerOutcome>> = names.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => warn!("Audit task failed: {}", e),
            }
        }

        slots
            .into_iter()
            .zip(names)
            .map(|(slot, name)| {
                slot.unwrap_or_else(|| {
                    warn!("Audit task for {} did not complete", name);
                    let mut outcome = ContainerOutcome::default();
                    outcome.stats.containers = 1;
                    outcome.stats.containers_failed = 1;
                    outcome.errors.push(ScanError::container(
                        &Container::new(name),
                        "audit task panicked",
                    ));
                    outcome
                })
            })
            .collect()
    }
}

/// Audit one container: list its items, then probe each one in order.
async fn audit_container(
    provider: &dyn RegistryProvider,
    container: &Container,
    guard: &Guard,
) -> ContainerOutcome {
    let mut outcome = ContainerOutcome::default();
    if guard.tripped() {
        outcome.interrupted = true;
        return outcome;
    }

    outcome.stats.containers = 1;
    let items = match guard.bound(provider.list_items(container)).await {
        Some(Ok(items)) => items,
        Some(Err(e)) => {
            warn!("Failed to list items for {}: {}", container.name, e);
            outcome.stats.containers_failed = 1;
            outcome.errors.push(ScanError::container(container, e));
            return outcome;
        }
        None => {
            outcome.stats.containers = 0;
            outcome.interrupted = true;
            return outcome;
        }
    };

    debug!("{}: {} item(s)", container.name, items.len());
    outcome.stats.items = items.len();

    for item in &items {
        match guard.bound(provider.get_finding(container, item)).await {
            Some(Ok(FindingLookup::NotFound)) => {
                debug!("{}: not scanned yet", item.qualified_id());
                outcome.stats.items_not_scanned += 1;
            }
            Some(Ok(FindingLookup::Found(finding))) => {
                match Violation::from_finding(item, &finding) {
                    Some(violation) => {
                        info!(
                            "CRITICAL findings detected in {} ({})",
                            item.qualified_id(),
                            violation.critical_count()
                        );
                        outcome.violations.push(violation);
                    }
                    None => {
                        debug!("{}: clean, {} finding(s)", item.qualified_id(), finding.total());
                        outcome.stats.items_clean += 1;
                    }
                }
            }
            Some(Err(e)) => {
                warn!(
                    "Error retrieving findings for {}: {}",
                    item.qualified_id(),
                    e
                );
                outcome.errors.push(ScanError::item(item, e));
            }
            None => {
                outcome.interrupted = true;
                break;
            }
        }
    }

    outcome
}

/// Run a sequential audit with default settings.
pub async fn run_audit(provider: Arc<dyn RegistryProvider>) -> Result<AuditReport> {
    Auditor::new(provider, AuditorConfig::default()).run().await
}
