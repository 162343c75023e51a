//! Report validation utilities.

use crate::report::AuditReport;
use std::collections::HashSet;
use thiserror::Error;

/// Validation error type.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Item reported more than once: {0}")]
    DuplicateItem(String),

    #[error("Item is both a violation and an error: {0}")]
    ConflictingOutcome(String),

    #[error("Violation without critical findings: {0}")]
    EmptyViolation(String),

    #[error("Item outcomes do not partition the fleet: {accounted} accounted, {expected} enumerated")]
    PartitionMismatch { accounted: usize, expected: usize },

    #[error("Container error count mismatch: stats say {stats}, report lists {listed}")]
    ContainerErrorMismatch { stats: usize, listed: usize },

    #[error("Report completed before it started")]
    TimeTravel,
}

/// Result of report validation.
#[derive(Debug)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Check the invariants a finished report must hold.
pub fn validate_report(report: &AuditReport) -> ValidationResult {
    let mut result = ValidationResult::new();

    let mut violated: HashSet<String> = HashSet::new();
    for violation in &report.violations {
        let id = violation.qualified_id();
        if violation.critical_count() == 0 {
            result.add_error(ValidationError::EmptyViolation(id.clone()));
        }
        if !violated.insert(id.clone()) {
            result.add_error(ValidationError::DuplicateItem(id));
        }
    }

    let mut errored: HashSet<&str> = HashSet::new();
    for error in report.item_errors() {
        let id = error.identifier.as_str();
        if violated.contains(id) {
            result.add_error(ValidationError::ConflictingOutcome(id.to_string()));
        }
        if !errored.insert(id) {
            result.add_error(ValidationError::DuplicateItem(id.to_string()));
        }
    }

    let listed = report.container_errors().count();
    if report.stats.containers_failed != listed {
        result.add_error(ValidationError::ContainerErrorMismatch {
            stats: report.stats.containers_failed,
            listed,
        });
    }

    if report.is_complete() {
        let accounted = report.violations.len()
            + errored.len()
            + report.stats.items_clean
            + report.stats.items_not_scanned;
        if accounted != report.stats.items {
            result.add_error(ValidationError::PartitionMismatch {
                accounted,
                expected: report.stats.items,
            });
        }
    } else {
        result.add_warning("Report is partial: the audit was cancelled".to_string());
    }

    if report.completed_at < report.started_at {
        result.add_error(ValidationError::TimeTravel);
    }

    result
}
