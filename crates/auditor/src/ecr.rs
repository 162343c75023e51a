//! Amazon ECR provider backed by the AWS command-line tool.

use crate::provider::RegistryProvider;
use crate::runner::{CommandOutput, CommandRunner, LocalRunner};
use async_trait::async_trait;
use posturescan_common::{Error, Result, Severity};
use posturescan_schema::{Container, Finding, FindingLookup, Item};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};
use tokio::sync::OnceCell;
use tracing::{debug, trace};

/// Error code ECR returns for images that have never been scanned.
pub const SCAN_NOT_FOUND_CODE: &str = "ScanNotFoundException";

/// Region used when neither the settings nor the AWS profile name one.
pub const DEFAULT_REGION: &str = "us-west-2";

/// Pattern for the error line the AWS CLI prints on stderr.
static AWS_ERROR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"An error occurred \(([A-Za-z0-9_.]+)\)(?: when calling the \w+ operation)?:?\s*(.*)")
        .unwrap()
});

/// Which images to enumerate per repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagStatus {
    #[default]
    Tagged,
    Untagged,
    Any,
}

impl TagStatus {
    fn filter_arg(&self) -> Option<&'static str> {
        match self {
            TagStatus::Tagged => Some("tagStatus=TAGGED"),
            TagStatus::Untagged => Some("tagStatus=UNTAGGED"),
            TagStatus::Any => None,
        }
    }
}

impl fmt::Display for TagStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagStatus::Tagged => write!(f, "tagged"),
            TagStatus::Untagged => write!(f, "untagged"),
            TagStatus::Any => write!(f, "any"),
        }
    }
}

impl FromStr for TagStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tagged" => Ok(TagStatus::Tagged),
            "untagged" => Ok(TagStatus::Untagged),
            "any" | "all" => Ok(TagStatus::Any),
            _ => Err(Error::Config(format!("Invalid tag status: {}", s))),
        }
    }
}

/// Connection settings for the ECR provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcrSettings {
    pub aws_bin: String,
    /// Explicit region. `None` defers to the AWS CLI profile.
    pub region: Option<String>,
    pub profile: Option<String>,
    /// Account owning the registry, for cross-account audits.
    pub registry_id: Option<String>,
    pub endpoint_url: Option<String>,
    pub tag_status: TagStatus,
}

impl Default for EcrSettings {
    fn default() -> Self {
        Self {
            aws_bin: "aws".to_string(),
            region: None,
            profile: None,
            registry_id: None,
            endpoint_url: None,
            tag_status: TagStatus::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeRepositoriesOutput {
    #[serde(default)]
    repositories: Vec<RepositoryEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryEntry {
    repository_name: String,
    #[serde(default)]
    repository_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListImagesOutput {
    #[serde(default)]
    image_ids: Vec<ImageIdEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageIdEntry {
    #[serde(default)]
    image_digest: Option<String>,
    #[serde(default)]
    image_tag: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScanFindingsOutput {
    #[serde(default)]
    image_scan_status: Option<ImageScanStatus>,
    #[serde(default)]
    image_scan_findings: Option<ImageScanFindings>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageScanStatus {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageScanFindings {
    #[serde(default)]
    finding_severity_counts: HashMap<String, u64>,
}

/// ECR provider that shells out to `aws ecr ...`.
pub struct EcrProvider {
    settings: EcrSettings,
    runner: Arc<dyn CommandRunner>,
    /// `--region` value used when the settings carry none. Resolved once.
    fallback_region: OnceCell<Option<String>>,
}

impl EcrProvider {
    /// Create a provider running the AWS CLI locally.
    pub fn new(settings: EcrSettings) -> Self {
        Self::with_runner(settings, Arc::new(LocalRunner::new()))
    }

    pub fn with_runner(settings: EcrSettings, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            settings,
            runner,
            fallback_region: OnceCell::new(),
        }
    }

    /// Region to pass with `--region`, or `None` when the profile has one.
    async fn region(&self) -> Option<String> {
        if let Some(ref region) = self.settings.region {
            return Some(region.clone());
        }
        self.fallback_region
            .get_or_init(|| self.profile_region_fallback())
            .await
            .clone()
    }

    /// Ask `aws configure get region` whether the profile names a region.
    async fn profile_region_fallback(&self) -> Option<String> {
        let mut args = vec![
            "configure".to_string(),
            "get".to_string(),
            "region".to_string(),
        ];
        if let Some(ref profile) = self.settings.profile {
            args.push("--profile".to_string());
            args.push(profile.clone());
        }

        match self.runner.run(&self.settings.aws_bin, &args).await {
            Ok(output) if output.success() && !output.stdout.trim().is_empty() => {
                debug!("Using profile region {}", output.stdout.trim());
                None
            }
            Ok(_) => {
                debug!("No profile region configured, using {}", DEFAULT_REGION);
                Some(DEFAULT_REGION.to_string())
            }
            Err(e) => {
                debug!("aws configure get region failed ({}), using {}", e, DEFAULT_REGION);
                Some(DEFAULT_REGION.to_string())
            }
        }
    }

    async fn base_args(&self, operation: &str) -> Vec<String> {
        let mut args = vec![
            "ecr".to_string(),
            operation.to_string(),
            "--output".to_string(),
            "json".to_string(),
        ];
        if let Some(region) = self.region().await {
            args.push("--region".to_string());
            args.push(region);
        }
        if let Some(ref profile) = self.settings.profile {
            args.push("--profile".to_string());
            args.push(profile.clone());
        }
        if let Some(ref endpoint) = self.settings.endpoint_url {
            args.push("--endpoint-url".to_string());
            args.push(endpoint.clone());
        }
        if let Some(ref registry_id) = self.settings.registry_id {
            args.push("--registry-id".to_string());
            args.push(registry_id.clone());
        }
        args
    }

    async fn call<T: DeserializeOwned>(&self, args: Vec<String>) -> Result<T> {
        let output = self.runner.run(&self.settings.aws_bin, &args).await?;
        if !output.success() {
            return Err(classify_failure(&output, &args));
        }
        trace!("aws {} -> {} bytes", args[1], output.stdout.len());
        serde_json::from_str(&output.stdout)
            .map_err(|e| Error::Parse(format!("{} output: {}", args[1], e)))
    }
}

/// Turn a failed CLI invocation into an error, extracting the AWS error code
/// from stderr when present.
fn classify_failure(output: &CommandOutput, args: &[String]) -> Error {
    let stderr = output.stderr.trim();
    if let Some(caps) = AWS_ERROR_PATTERN.captures(stderr) {
        return Error::Aws {
            code: caps[1].to_string(),
            message: caps
                .get(2)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default(),
        };
    }

    let reason = if stderr.is_empty() {
        format!("exit code {:?}", output.exit_code)
    } else {
        stderr.to_string()
    };
    Error::CommandExecution {
        cmd: format!("aws {}", args.get(1).map(String::as_str).unwrap_or("ecr")),
        reason,
    }
}

fn severity_counts(raw: HashMap<String, u64>) -> Finding {
    let mut finding = Finding::new();
    for (label, count) in raw {
        match label.parse::<Severity>() {
            Ok(severity) => finding = finding.with_count(severity, count),
            Err(_) => debug!("Ignoring unknown severity label {} ({})", label, count),
        }
    }
    finding
}

fn interpret_scan(output: ScanFindingsOutput) -> Result<FindingLookup> {
    let status = output
        .image_scan_status
        .as_ref()
        .and_then(|s| s.status.as_deref())
        .map(str::to_uppercase);

    match status.as_deref() {
        Some("FAILED") | Some("UNSUPPORTED_IMAGE") => {
            let description = output
                .image_scan_status
                .and_then(|s| s.description)
                .unwrap_or_else(|| "no description".to_string());
            return Err(Error::ScanFailed(description));
        }
        Some("IN_PROGRESS") | Some("PENDING") if output.image_scan_findings.is_none() => {
            return Ok(FindingLookup::NotFound);
        }
        _ => {}
    }

    let counts = output
        .image_scan_findings
        .map(|f| f.finding_severity_counts)
        .unwrap_or_default();
    Ok(FindingLookup::Found(severity_counts(counts)))
}

#[async_trait]
impl RegistryProvider for EcrProvider {
    fn describe(&self) -> String {
        let region = self.settings.region.as_deref().unwrap_or("profile");
        match self.settings.registry_id {
            Some(ref id) => format!("ecr:{}:{}", region, id),
            None => format!("ecr:{}", region),
        }
    }

    async fn list_containers(&self) -> Result<Vec<Container>> {
        let args = self.base_args("describe-repositories").await;
        let output: DescribeRepositoriesOutput = self.call(args).await?;

        Ok(output
            .repositories
            .into_iter()
            .map(|repo| Container {
                name: repo.repository_name,
                uri: repo.repository_uri,
            })
            .collect())
    }

    async fn list_items(&self, container: &Container) -> Result<Vec<Item>> {
        let mut args = self.base_args("list-images").await;
        args.push("--repository-name".to_string());
        args.push(container.name.clone());
        if let Some(filter) = self.settings.tag_status.filter_arg() {
            args.push("--filter".to_string());
            args.push(filter.to_string());
        }

        let output: ListImagesOutput = self.call(args).await?;
        Ok(output
            .image_ids
            .into_iter()
            .filter_map(|id| Item::from_image(&container.name, id.image_digest, id.image_tag))
            .collect())
    }

    async fn get_finding(&self, container: &Container, item: &Item) -> Result<FindingLookup> {
        let image_id = match (&item.digest, &item.tag) {
            (Some(digest), _) => format!("imageDigest={}", digest),
            (None, Some(tag)) => format!("imageTag={}", tag),
            (None, None) => format!("imageTag={}", item.item_id),
        };

        // Only the severity counts are read, and every page repeats them.
        let mut args = self.base_args("describe-image-scan-findings").await;
        args.push("--repository-name".to_string());
        args.push(container.name.clone());
        args.push("--image-id".to_string());
        args.push(image_id);
        args.push("--no-paginate".to_string());

        match self.call::<ScanFindingsOutput>(args).await {
            Ok(output) => interpret_scan(output),
            Err(Error::Aws { ref code, .. }) if code == SCAN_NOT_FOUND_CODE => {
                Ok(FindingLookup::NotFound)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Replays canned output keyed by ECR operation and records invocations.
    #[derive(Default)]
    struct ScriptedRunner {
        responses: HashMap<String, CommandOutput>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedRunner {
        fn respond(mut self, operation: &str, exit_code: i32, stdout: &str, stderr: &str) -> Self {
            self.responses.insert(
                operation.to_string(),
                CommandOutput {
                    exit_code: Some(exit_code),
                    stdout: stdout.to_string(),
                    stderr: stderr.to_string(),
                },
            );
            self
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }

        /// Arguments of the first call to `operation`.
        fn call_to(&self, operation: &str) -> Vec<String> {
            self.calls()
                .into_iter()
                .find(|args| args[1] == operation)
                .unwrap_or_else(|| panic!("no call to {operation}"))
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
            assert_eq!(program, "aws");
            self.calls.lock().unwrap().push(args.to_vec());
            Ok(self.responses.get(&args[1]).cloned().unwrap_or(CommandOutput {
                exit_code: Some(255),
                stdout: String::new(),
                stderr: "unexpected call".to_string(),
            }))
        }
    }

    fn provider(runner: ScriptedRunner) -> (EcrProvider, Arc<ScriptedRunner>) {
        let runner = Arc::new(runner);
        let provider = EcrProvider::with_runner(EcrSettings::default(), runner.clone());
        (provider, runner)
    }

    #[tokio::test]
    async fn test_list_containers_parses_repositories() {
        let (provider, runner) = provider(ScriptedRunner::default().respond(
            "describe-repositories",
            0,
            r#"{"repositories":[
                {"repositoryName":"app","repositoryUri":"123.dkr.ecr.us-west-2.amazonaws.com/app"},
                {"repositoryName":"worker"}
            ]}"#,
            "",
        ));

        let containers = provider.list_containers().await.unwrap();
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0].name, "app");
        assert!(containers[0].uri.is_some());
        assert_eq!(containers[1].uri, None);

        assert_eq!(
            runner.call_to("describe-repositories"),
            vec!["ecr", "describe-repositories", "--output", "json", "--region", "us-west-2"]
        );
    }

    #[tokio::test]
    async fn test_list_items_sends_tag_filter() {
        let (provider, runner) = provider(ScriptedRunner::default().respond(
            "list-images",
            0,
            r#"{"imageIds":[
                {"imageDigest":"sha256:aaa","imageTag":"v1"},
                {"imageDigest":"sha256:bbb"},
                {}
            ]}"#,
            "",
        ));

        let items = provider.list_items(&Container::new("app")).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].item_id, "v1");
        assert_eq!(items[0].digest.as_deref(), Some("sha256:aaa"));
        assert_eq!(items[1].item_id, "sha256:bbb");

        let joined = runner.call_to("list-images").join(" ");
        assert!(joined.contains("--repository-name app"));
        assert!(joined.contains("--filter tagStatus=TAGGED"));
    }

    #[tokio::test]
    async fn test_any_tag_status_omits_filter() {
        let runner = Arc::new(ScriptedRunner::default().respond("list-images", 0, "{}", ""));
        let settings = EcrSettings {
            tag_status: TagStatus::Any,
            profile: Some("audit".to_string()),
            registry_id: Some("999999999999".to_string()),
            ..Default::default()
        };
        let provider = EcrProvider::with_runner(settings, runner.clone());

        let items = provider.list_items(&Container::new("app")).await.unwrap();
        assert!(items.is_empty());
        let joined = runner.call_to("list-images").join(" ");
        assert!(!joined.contains("--filter"));
        assert!(joined.contains("--profile audit"));
        assert!(joined.contains("--registry-id 999999999999"));
        assert_eq!(provider.describe(), "ecr:profile:999999999999");
        assert!(runner
            .call_to("get")
            .join(" ")
            .ends_with("configure get region --profile audit"));
    }

    #[tokio::test]
    async fn test_finding_counts_are_parsed() {
        let (provider, runner) = provider(ScriptedRunner::default().respond(
            "describe-image-scan-findings",
            0,
            r#"{"imageScanStatus":{"status":"COMPLETE"},
                "imageScanFindings":{"findingSeverityCounts":{"CRITICAL":2,"HIGH":1,"UNDEFINED":4}}}"#,
            "",
        ));

        let item = Item::new("app", "v1").with_digest("sha256:aaa");
        let lookup = provider
            .get_finding(&Container::new("app"), &item)
            .await
            .unwrap();
        match lookup {
            FindingLookup::Found(finding) => {
                assert_eq!(finding.critical_count(), 2);
                assert_eq!(finding.count(Severity::High), 1);
                assert_eq!(finding.total(), 3);
            }
            FindingLookup::NotFound => panic!("expected a finding"),
        }
        let joined = runner.call_to("describe-image-scan-findings").join(" ");
        assert!(joined.contains("--image-id imageDigest=sha256:aaa"));
        assert!(joined.ends_with("--no-paginate"));
    }

    #[tokio::test]
    async fn test_profile_region_is_left_to_the_cli() {
        let (provider, runner) = provider(
            ScriptedRunner::default()
                .respond("get", 0, "eu-central-1\n", "")
                .respond("describe-repositories", 0, r#"{"repositories":[]}"#, "")
                .respond("list-images", 0, "{}", ""),
        );

        provider.list_containers().await.unwrap();
        provider.list_items(&Container::new("app")).await.unwrap();

        assert!(!runner.call_to("describe-repositories").contains(&"--region".to_string()));
        assert!(!runner.call_to("list-images").contains(&"--region".to_string()));
        let lookups = runner.calls().iter().filter(|args| args[1] == "get").count();
        assert_eq!(lookups, 1);
    }

    #[tokio::test]
    async fn test_explicit_region_skips_profile_lookup() {
        let runner = Arc::new(ScriptedRunner::default().respond(
            "describe-repositories",
            0,
            r#"{"repositories":[]}"#,
            "",
        ));
        let settings = EcrSettings {
            region: Some("ap-south-1".to_string()),
            ..Default::default()
        };
        let provider = EcrProvider::with_runner(settings, runner.clone());

        provider.list_containers().await.unwrap();
        assert_eq!(runner.calls().len(), 1);
        assert!(runner
            .call_to("describe-repositories")
            .join(" ")
            .contains("--region ap-south-1"));
        assert_eq!(provider.describe(), "ecr:ap-south-1");
    }

    #[tokio::test]
    async fn test_scan_not_found_is_not_an_error() {
        let (provider, _) = provider(ScriptedRunner::default().respond(
            "describe-image-scan-findings",
            254,
            "",
            "\nAn error occurred (ScanNotFoundException) when calling the DescribeImageScanFindings operation: Image scan does not exist for the image\n",
        ));

        let lookup = provider
            .get_finding(&Container::new("app"), &Item::new("app", "v1"))
            .await
            .unwrap();
        assert!(lookup.is_not_found());
    }

    #[tokio::test]
    async fn test_other_aws_errors_propagate_with_code() {
        let (provider, _) = provider(ScriptedRunner::default().respond(
            "describe-image-scan-findings",
            254,
            "",
            "An error occurred (ThrottlingException) when calling the DescribeImageScanFindings operation: Rate exceeded",
        ));

        let err = provider
            .get_finding(&Container::new("app"), &Item::new("app", "v1"))
            .await
            .unwrap_err();
        match err {
            Error::Aws { code, message } => {
                assert_eq!(code, "ThrottlingException");
                assert_eq!(message, "Rate exceeded");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_failure_without_aws_code_is_command_error() {
        let (provider, _) = provider(ScriptedRunner::default().respond(
            "describe-repositories",
            255,
            "",
            "Unable to locate credentials. You can configure credentials by running \"aws configure\".",
        ));

        let err = provider.list_containers().await.unwrap_err();
        assert!(matches!(err, Error::CommandExecution { .. }));
        assert!(err.to_string().contains("Unable to locate credentials"));
    }

    #[tokio::test]
    async fn test_malformed_json_is_parse_error() {
        let (provider, _) =
            provider(ScriptedRunner::default().respond("list-images", 0, "not json", ""));
        let err = provider.list_items(&Container::new("app")).await.unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_scan_status_interpretation() {
        let in_progress: ScanFindingsOutput =
            serde_json::from_str(r#"{"imageScanStatus":{"status":"IN_PROGRESS"}}"#).unwrap();
        assert!(interpret_scan(in_progress).unwrap().is_not_found());

        let failed: ScanFindingsOutput = serde_json::from_str(
            r#"{"imageScanStatus":{"status":"FAILED","description":"unsupported layer"}}"#,
        )
        .unwrap();
        let err = interpret_scan(failed).unwrap_err();
        assert!(err.to_string().contains("unsupported layer"));

        let complete_clean: ScanFindingsOutput =
            serde_json::from_str(r#"{"imageScanStatus":{"status":"COMPLETE"}}"#).unwrap();
        assert_eq!(
            interpret_scan(complete_clean).unwrap(),
            FindingLookup::Found(Finding::new())
        );
    }

    #[test]
    fn test_parse_tag_status() {
        assert_eq!(TagStatus::from_str("TAGGED").unwrap(), TagStatus::Tagged);
        assert_eq!(TagStatus::from_str("all").unwrap(), TagStatus::Any);
        assert!(TagStatus::from_str("sometimes").is_err());
    }
}
