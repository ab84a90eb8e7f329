//! Folds collected runs into the dataset behind the dashboards.

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::cli::config::{HttpMethod, TestType};
use crate::engine::collector::{make_world_readable, Artifacts, RunResult};
use crate::engine::plan::RunSpec;
use crate::error::Result;

pub mod csv;
pub mod dashboard;
pub mod html;
pub mod pdf;
pub mod server;

use self::csv::MetricTable;

pub const REQUEST_DURATION: &str = "http_req_duration";
pub const REQUEST_FAILED: &str = "http_req_failed";
pub const REQUEST_COUNT: &str = "http_reqs";
pub const VUS_MAX: &str = "vus_max";
pub const VUS: &str = "vus";

/// Stable names the single-run dashboard polls.
pub const LATEST_METRICS_FILE: &str = "latest_results.csv";
pub const LATEST_METADATA_FILE: &str = "latest_metadata.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportMode {
    /// Exactly one run: dashboard follows the `latest_*` files
    Single,
    /// Several runs compared side by side
    Comprehensive,
}

/// Summary of one collected run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub display_label: String,
    pub base_name: String,
    pub request_name: String,
    pub method: HttpMethod,
    pub endpoint: String,
    pub test_type: TestType,
    pub total_requests: u64,
    pub avg_latency_ms: f64,
    pub p90_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub error_rate_pct: f64,
    /// False when the metrics never recorded a failure-rate metric at all
    pub error_rate_recorded: bool,
    pub requests_per_second: f64,
    pub max_concurrent_users: u64,
    pub threshold_violations: bool,
    pub metrics_file: String,
    pub metadata_file: String,
}

impl ReportRow {
    pub fn from_metrics(result: &RunResult, artifacts: &Artifacts, table: &MetricTable) -> Self {
        let spec = &result.spec;
        let duration = |key: &str| table.value(REQUEST_DURATION, key).unwrap_or(0.0);
        let (error_rate_pct, error_rate_recorded) = if table.contains(REQUEST_FAILED) {
            (table.value(REQUEST_FAILED, "rate").unwrap_or(0.0) * 100.0, true)
        } else {
            (0.0, false)
        };
        let max_vus = table
            .value(VUS_MAX, "max")
            .or_else(|| table.value(VUS_MAX, "value"))
            .or_else(|| table.value(VUS, "max"))
            .unwrap_or(0.0);

        Self {
            display_label: spec.label(),
            base_name: spec.base_name.clone(),
            request_name: spec.request_name.clone(),
            method: spec.method,
            endpoint: spec.endpoint.clone(),
            test_type: spec.test_type,
            total_requests: round_count(table.value(REQUEST_COUNT, "count").unwrap_or(0.0)),
            avg_latency_ms: duration("avg"),
            p90_latency_ms: duration("p(90)"),
            p95_latency_ms: duration("p(95)"),
            error_rate_pct,
            error_rate_recorded,
            requests_per_second: table.value(REQUEST_COUNT, "rate").unwrap_or(0.0),
            max_concurrent_users: round_count(max_vus),
            threshold_violations: result.threshold_violations,
            metrics_file: file_name(&artifacts.metrics_path),
            metadata_file: file_name(&artifacts.metadata_path),
        }
    }
}

impl ReportRow {
    /// Zeroed row for a run that has not produced metrics yet.
    pub fn pending(spec: &RunSpec) -> Self {
        Self {
            display_label: spec.label(),
            base_name: spec.base_name.clone(),
            request_name: spec.request_name.clone(),
            method: spec.method,
            endpoint: spec.endpoint.clone(),
            test_type: spec.test_type,
            total_requests: 0,
            avg_latency_ms: 0.0,
            p90_latency_ms: 0.0,
            p95_latency_ms: 0.0,
            error_rate_pct: 0.0,
            error_rate_recorded: false,
            requests_per_second: 0.0,
            max_concurrent_users: 0,
            threshold_violations: false,
            metrics_file: spec.results_file_name(),
            metadata_file: spec.metadata_file_name(),
        }
    }
}

fn round_count(v: f64) -> u64 {
    if v.is_finite() && v > 0.0 {
        v.round() as u64
    } else {
        0
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// A run that produced no report row, and why.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExcludedRun {
    pub display_label: String,
    pub base_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedReport {
    pub mode: ReportMode,
    pub rows: Vec<ReportRow>,
    pub excluded: Vec<ExcludedRun>,
    /// Artifacts to alias as `latest_*` (single mode only)
    pub latest: Option<Artifacts>,
}

impl AggregatedReport {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Single-mode report for the one planned run, before it has finished.
    /// The dashboard built from it polls the `latest_*` files.
    pub fn pending(spec: &RunSpec) -> Self {
        Self {
            mode: ReportMode::Single,
            rows: vec![ReportRow::pending(spec)],
            excluded: Vec::new(),
            latest: None,
        }
    }

    pub fn violations(&self) -> usize {
        self.rows.iter().filter(|r| r.threshold_violations).count()
    }
}

/// Build the report from the run sequence. Failed runs and runs whose
/// metrics cannot be read are listed in `excluded`, never in `rows`.
pub fn aggregate(results: &[RunResult]) -> AggregatedReport {
    let mut rows = Vec::new();
    let mut excluded = Vec::new();

    for result in results {
        let artifacts = match (&result.artifacts, result.succeeded) {
            (Some(artifacts), true) => artifacts,
            _ => {
                let reason = result
                    .failure
                    .as_ref()
                    .map(|f| f.to_string())
                    .unwrap_or_else(|| "run did not succeed".to_string());
                excluded.push(ExcludedRun {
                    display_label: result.spec.label(),
                    base_name: result.spec.base_name.clone(),
                    reason,
                });
                continue;
            }
        };

        match MetricTable::from_path(&artifacts.metrics_path) {
            Ok(table) => rows.push(ReportRow::from_metrics(result, artifacts, &table)),
            Err(e) => {
                tracing::error!(run = %result.spec.base_name, error = %e, "cannot read metrics, excluding run");
                excluded.push(ExcludedRun {
                    display_label: result.spec.label(),
                    base_name: result.spec.base_name.clone(),
                    reason: format!("metrics unreadable: {}", e),
                });
            }
        }
    }

    let (mode, latest) = if results.len() == 1 {
        let latest = results[0].artifacts.clone().filter(|_| !rows.is_empty());
        (ReportMode::Single, latest)
    } else {
        (ReportMode::Comprehensive, None)
    };

    AggregatedReport {
        mode,
        rows,
        excluded,
        latest,
    }
}

/// Copy the designated run's artifacts to the well-known `latest_*` names.
pub fn publish_latest(report: &AggregatedReport, results_dir: &Path) -> Result<Option<Artifacts>> {
    let Some(source) = &report.latest else {
        return Ok(None);
    };
    let target = Artifacts {
        metrics_path: results_dir.join(LATEST_METRICS_FILE),
        metadata_path: results_dir.join(LATEST_METADATA_FILE),
    };
    for (from, to) in [
        (&source.metrics_path, &target.metrics_path),
        (&source.metadata_path, &target.metadata_path),
    ] {
        std::fs::copy(from, to)?;
        make_world_readable(to)?;
    }
    tracing::info!(metrics = %target.metrics_path.display(), "published latest artifacts");
    Ok(Some(target))
}

/// Remove `latest_*` files left by an earlier invocation.
pub fn clear_latest(results_dir: &Path) -> Result<()> {
    for name in [LATEST_METRICS_FILE, LATEST_METADATA_FILE] {
        match std::fs::remove_file(results_dir.join(name)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Relative path (from the results directory) used by the dashboard for a row.
pub fn dashboard_paths(report: &AggregatedReport, row: &ReportRow) -> (PathBuf, PathBuf) {
    match report.mode {
        ReportMode::Single => (
            PathBuf::from(LATEST_METRICS_FILE),
            PathBuf::from(LATEST_METADATA_FILE),
        ),
        ReportMode::Comprehensive => (
            PathBuf::from(&row.metrics_file),
            PathBuf::from(&row.metadata_file),
        ),
    }
}
