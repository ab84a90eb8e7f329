//! Turns finished runs into [`RunResult`]s and keeps the ordered sequence.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::cli::config::{HttpMethod, TestType};
use crate::engine::executor::{OutcomeKind, RunOutcome};
use crate::engine::plan::RunSpec;
use crate::error::Result;

const METADATA_SUFFIX: &str = "-metadata.json";

/// Terminal state of a run, see [`crate::engine::RunState`] for the full machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum FailureReason {
    /// The load generator could not be started at all
    ExecutionUnavailable(String),
    /// The load generator crashed, timed out or exited with an unexpected code
    FailedHard(String),
    /// The run completed but one of its artifact files is not on disk
    ArtifactMissing(PathBuf),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::ExecutionUnavailable(reason) => write!(f, "execution unavailable: {}", reason),
            FailureReason::FailedHard(reason) => write!(f, "failed: {}", reason),
            FailureReason::ArtifactMissing(path) => write!(f, "artifact missing: {}", path.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifacts {
    pub metrics_path: PathBuf,
    pub metadata_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub spec: RunSpec,
    pub succeeded: bool,
    pub exit_code: Option<i32>,
    pub artifacts: Option<Artifacts>,
    /// Completed, but the load generator reported crossed thresholds
    pub threshold_violations: bool,
    pub failure: Option<FailureReason>,
}

impl RunResult {
    pub fn failed(spec: RunSpec, exit_code: Option<i32>, reason: FailureReason) -> Self {
        Self {
            spec,
            succeeded: false,
            exit_code,
            artifacts: None,
            threshold_violations: false,
            failure: Some(reason),
        }
    }
}

/// Checks artifacts after each run and accumulates results in run order.
#[derive(Debug)]
pub struct ResultCollector {
    results_dir: PathBuf,
    threshold_exit_code: i32,
    results: Vec<RunResult>,
}

impl ResultCollector {
    pub fn new(results_dir: impl Into<PathBuf>, threshold_exit_code: i32) -> Self {
        Self {
            results_dir: results_dir.into(),
            threshold_exit_code,
            results: Vec::new(),
        }
    }

    pub fn expected_artifacts(&self, spec: &RunSpec) -> Artifacts {
        Artifacts {
            metrics_path: self.results_dir.join(spec.results_file_name()),
            metadata_path: self.results_dir.join(spec.metadata_file_name()),
        }
    }

    /// Remove artifacts an earlier invocation left under this run's names, so
    /// only files written by the upcoming run can be collected.
    pub fn clear_previous(&self, spec: &RunSpec) -> std::io::Result<()> {
        let artifacts = self.expected_artifacts(spec);
        for path in [&artifacts.metrics_path, &artifacts.metadata_path] {
            match std::fs::remove_file(path) {
                Ok(()) => {
                    tracing::debug!(run = %spec.base_name, path = %path.display(), "removed stale artifact")
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Record a run whose load generator never started.
    pub fn record_unavailable(&mut self, spec: RunSpec, reason: String) -> &RunResult {
        self.push(RunResult::failed(
            spec,
            None,
            FailureReason::ExecutionUnavailable(reason),
        ))
    }

    /// Classify the outcome, verify both artifact files and append the result.
    pub fn collect(&mut self, spec: RunSpec, outcome: RunOutcome) -> &RunResult {
        let threshold_violations = match outcome.classify(self.threshold_exit_code) {
            OutcomeKind::Completed => false,
            OutcomeKind::CompletedWithViolations => true,
            OutcomeKind::FailedHard(reason) => {
                return self.push(RunResult::failed(
                    spec,
                    outcome.exit_code,
                    FailureReason::FailedHard(reason),
                ));
            }
        };

        let artifacts = self.expected_artifacts(&spec);
        for path in [&artifacts.metrics_path, &artifacts.metadata_path] {
            if !path.is_file() {
                tracing::error!(
                    run = %spec.base_name,
                    path = %path.display(),
                    "run completed but its artifact is missing; excluding it from the report"
                );
                let missing = path.clone();
                return self.push(RunResult::failed(
                    spec,
                    outcome.exit_code,
                    FailureReason::ArtifactMissing(missing),
                ));
            }
        }

        for path in [&artifacts.metrics_path, &artifacts.metadata_path] {
            if let Err(e) = make_world_readable(path) {
                tracing::warn!(run = %spec.base_name, path = %path.display(), error = %e, "could not relax artifact permissions");
            }
        }

        self.push(RunResult {
            spec,
            succeeded: true,
            exit_code: outcome.exit_code,
            artifacts: Some(artifacts),
            threshold_violations,
            failure: None,
        })
    }

    fn push(&mut self, result: RunResult) -> &RunResult {
        self.results.push(result);
        &self.results[self.results.len() - 1]
    }

    pub fn into_results(self) -> Vec<RunResult> {
        self.results
    }
}

/// What the load-test script records next to each metrics file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    pub request_name: String,
    pub request_method: String,
    pub endpoint: String,
    pub test_type: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub peak_vus: Option<u32>,
    #[serde(default)]
    pub thresholds_failed: bool,
}

impl RunMetadata {
    fn into_spec(self, base_name: &str) -> Option<RunSpec> {
        Some(RunSpec {
            method: HttpMethod::parse(&self.request_method)?,
            test_type: TestType::parse(&self.test_type)?,
            request_name: self.request_name,
            base_url: self.base_url,
            endpoint: self.endpoint,
            resolved_auth_token: String::new(),
            payload: serde_json::Map::new(),
            content_type: String::new(),
            headers: BTreeMap::new(),
            query_params: BTreeMap::new(),
            expected_status: 0,
            thresholds: BTreeMap::new(),
            data_file: String::new(),
            peak_users: self.peak_vus.unwrap_or(0),
            base_name: base_name.to_string(),
        })
    }
}

/// Rebuild results from artifact pairs already in `results_dir`, ordered by
/// artifact name. Unreadable metadata files are skipped with a warning.
pub fn discover(results_dir: &Path) -> Result<Vec<RunResult>> {
    let mut names: Vec<String> = std::fs::read_dir(results_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .filter(|name| name.ends_with(METADATA_SUFFIX))
        .collect();
    names.sort();

    let mut results = Vec::new();
    for name in names {
        let base_name = &name[..name.len() - METADATA_SUFFIX.len()];
        let path = results_dir.join(&name);
        let metadata: RunMetadata = match std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_json::from_str(&raw).map_err(|e| e.to_string()))
        {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable metadata");
                continue;
            }
        };
        let threshold_violations = metadata.thresholds_failed;
        let Some(spec) = metadata.into_spec(base_name) else {
            tracing::warn!(path = %path.display(), "skipping metadata with unknown method or test type");
            continue;
        };

        let artifacts = Artifacts {
            metrics_path: results_dir.join(spec.results_file_name()),
            metadata_path: path,
        };
        if !artifacts.metrics_path.is_file() {
            let missing = artifacts.metrics_path.clone();
            results.push(RunResult::failed(spec, None, FailureReason::ArtifactMissing(missing)));
            continue;
        }
        results.push(RunResult {
            spec,
            succeeded: true,
            exit_code: None,
            artifacts: Some(artifacts),
            threshold_violations,
            failure: None,
        });
    }
    tracing::debug!(dir = %results_dir.display(), found = results.len(), "discovered existing runs");
    Ok(results)
}

/// 0644 so a server running as another user (e.g. in a container) can read it.
pub fn make_world_readable(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))?;
    }
    #[cfg(not(unix))]
    {
        let mut permissions = std::fs::metadata(path)?.permissions();
        permissions.set_readonly(false);
        std::fs::set_permissions(path, permissions)?;
    }
    Ok(())
}
