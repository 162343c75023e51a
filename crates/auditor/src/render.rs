//! Report rendering.

use posturescan_common::{Error, Result};
use posturescan_schema::AuditReport;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::str::FromStr;

/// Output format for a rendered report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(Error::Config(format!("Invalid output format: {}", s))),
        }
    }
}

/// Render a report in the requested format.
pub fn render_report<W: Write>(report: &AuditReport, format: OutputFormat, out: &mut W) -> Result<()> {
    match format {
        OutputFormat::Text => render_text(report, out),
        OutputFormat::Json => render_json(report, out),
    }
}

/// One line per violation, one per error, then a summary.
pub fn render_text<W: Write>(report: &AuditReport, out: &mut W) -> Result<()> {
    for violation in &report.violations {
        write!(
            out,
            "VIOLATION {} critical={}",
            violation.qualified_id(),
            violation.critical_count()
        )?;
        if let Some(digest) = violation.digest() {
            write!(out, " digest={}", digest)?;
        }
        writeln!(out)?;
    }

    for error in &report.errors {
        writeln!(
            out,
            "ERROR [{}] {}: {}",
            error.scope, error.identifier, error.cause
        )?;
    }

    writeln!(
        out,
        "Summary: {} violation(s), {} error(s) across {} container(s), {} item(s)",
        report.violations.len(),
        report.errors.len(),
        report.stats.containers,
        report.stats.items
    )?;

    if report.cancelled {
        writeln!(out, "PARTIAL: audit cancelled before completion")?;
    }

    Ok(())
}

pub fn render_json<W: Write>(report: &AuditReport, out: &mut W) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, report)?;
    writeln!(out)?;
    Ok(())
}
