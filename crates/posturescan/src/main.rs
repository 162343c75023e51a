//! posturescan - audit a container registry fleet for critical vulnerabilities.

use anyhow::Context;
use clap::{Parser, Subcommand};
use posturescan_auditor::{
    render_report, AuditOptions, AuditSettings, Auditor, EcrOptions, OutputFormat, ProviderKind,
    TagStatus,
};
use posturescan_schema::{validate_report, AuditReport};
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "posturescan")]
#[command(
    author,
    version,
    about = "Report container images with critical vulnerability findings across a registry fleet"
)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Audit every image in the configured fleet
    Audit {
        /// YAML config file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Provider (ecr, snapshot)
        #[arg(long)]
        provider: Option<ProviderKind>,

        /// AWS region
        #[arg(long)]
        region: Option<String>,

        /// AWS CLI profile
        #[arg(long)]
        profile: Option<String>,

        /// Registry account id, for cross-account audits
        #[arg(long)]
        registry_id: Option<String>,

        /// Override the ECR endpoint URL
        #[arg(long)]
        endpoint_url: Option<String>,

        /// Images to audit (tagged, untagged, any)
        #[arg(long)]
        tag_status: Option<TagStatus>,

        /// Path to the aws executable
        #[arg(long)]
        aws_bin: Option<String>,

        /// Fleet snapshot file (for the snapshot provider)
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Containers audited in parallel
        #[arg(long)]
        concurrency: Option<usize>,

        /// Audit timeout in seconds (0 for none)
        #[arg(long)]
        timeout: Option<u64>,

        /// Output format (text, json)
        #[arg(long)]
        format: Option<OutputFormat>,

        /// Also write the JSON report to this file
        #[arg(long, short)]
        out: Option<PathBuf>,
    },

    /// Render and validate a saved JSON report
    Show {
        /// Report file path
        #[arg(long)]
        report: PathBuf,

        /// Output format (text, json)
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },
}

fn init_logging(verbose: bool, log_format: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let registry = tracing_subscriber::registry().with(filter);
    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

fn print_report(report: &AuditReport, format: OutputFormat) -> anyhow::Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    render_report(report, format, &mut out)?;
    out.flush()?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, &cli.log_format);

    match cli.command {
        Commands::Audit {
            config,
            provider,
            region,
            profile,
            registry_id,
            endpoint_url,
            tag_status,
            aws_bin,
            snapshot,
            concurrency,
            timeout,
            format,
            out,
        } => {
            let file_options = match config {
                Some(ref path) => AuditOptions::load(path)
                    .with_context(|| format!("Failed to load config {:?}", path))?,
                None => AuditOptions::default(),
            };
            let cli_options = AuditOptions {
                provider,
                ecr: EcrOptions {
                    region,
                    profile,
                    registry_id,
                    endpoint_url,
                    tag_status,
                    aws_bin,
                },
                snapshot,
                concurrency,
                timeout_seconds: timeout,
                format,
            };

            let settings =
                AuditSettings::resolve(file_options.overlay(cli_options), |key| {
                    std::env::var(key).ok()
                })?;
            let provider = settings
                .build_provider()
                .context("Failed to set up provider")?;

            let auditor = Auditor::new(provider, settings.auditor);
            let cancel = auditor.cancel_flag();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, finishing with a partial report");
                    cancel.cancel();
                }
            });

            let report = auditor.run().await?;

            if let Some(ref path) = out {
                let json = serde_json::to_string_pretty(&report)?;
                std::fs::write(path, json)
                    .with_context(|| format!("Failed to write report to {:?}", path))?;
                info!("Report written to {:?}", path);
            }

            print_report(&report, settings.format)?;
        }

        Commands::Show { report, format } => {
            let content = std::fs::read_to_string(&report)
                .with_context(|| format!("Failed to read report {:?}", report))?;
            let parsed: AuditReport =
                serde_json::from_str(&content).context("Report is not valid JSON")?;

            print_report(&parsed, format)?;

            let validation = validate_report(&parsed);
            for warning in &validation.warnings {
                warn!("{}", warning);
            }
            if !validation.valid {
                for error in &validation.errors {
                    warn!("{}", error);
                }
                anyhow::bail!(
                    "Report failed validation with {} error(s)",
                    validation.errors.len()
                );
            }
        }
    }

    Ok(())
}
