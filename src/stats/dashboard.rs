//! Fills the dashboard template with the JSON report index.

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::engine::collector::make_world_readable;
use crate::error::{Error, Result};
use crate::stats::{dashboard_paths, AggregatedReport, ExcludedRun, ReportMode, ReportRow};

pub const REPORT_INDEX_PLACEHOLDER: &str = "{{REPORT_INDEX}}";
pub const DASHBOARD_FILE: &str = "dashboard.html";
pub const DASHBOARD_TITLE: &str = "Load Test Dashboard";

/// Seconds between polls of the `latest_*` files in single mode.
pub const SINGLE_MODE_REFRESH_SECS: u32 = 5;

const TEMPLATE: &str = include_str!("dashboard.html");

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportIndex<'a> {
    pub title: &'a str,
    pub mode: ReportMode,
    pub generated_at: &'a str,
    pub refresh_seconds: Option<u32>,
    pub runs: Vec<IndexEntry<'a>>,
    pub excluded: &'a [ExcludedRun],
}

/// A row plus the artifact paths the page should fetch, relative to the page.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry<'a> {
    pub metrics: String,
    pub metadata: String,
    #[serde(flatten)]
    pub row: &'a ReportRow,
}

impl<'a> ReportIndex<'a> {
    pub fn new(report: &'a AggregatedReport, generated_at: &'a str) -> Self {
        let runs = report
            .rows
            .iter()
            .map(|row| {
                let (metrics, metadata) = dashboard_paths(report, row);
                IndexEntry {
                    metrics: url_path(&metrics),
                    metadata: url_path(&metadata),
                    row,
                }
            })
            .collect();

        Self {
            title: DASHBOARD_TITLE,
            mode: report.mode,
            generated_at,
            refresh_seconds: match report.mode {
                ReportMode::Single => Some(SINGLE_MODE_REFRESH_SECS),
                ReportMode::Comprehensive => None,
            },
            runs,
            excluded: &report.excluded,
        }
    }
}

fn url_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Substitute the index into the single insertion point of `template`.
pub fn render_template(template: &str, index: &ReportIndex<'_>) -> Result<String> {
    let occurrences = template.matches(REPORT_INDEX_PLACEHOLDER).count();
    if occurrences != 1 {
        return Err(Error::RenderingFailed(format!(
            "dashboard template must contain {} exactly once, found {}",
            REPORT_INDEX_PLACEHOLDER, occurrences
        )));
    }

    let json = serde_json::to_string(index)
        .map_err(|e| Error::RenderingFailed(format!("cannot serialize report index: {}", e)))?;
    // The index lands inside a <script> element.
    let json = json.replace("</", "<\\/");

    Ok(template.replacen(REPORT_INDEX_PLACEHOLDER, &json, 1))
}

pub fn render_dashboard(report: &AggregatedReport, generated_at: &str) -> Result<String> {
    render_template(TEMPLATE, &ReportIndex::new(report, generated_at))
}

/// Write `dashboard.html` into the results directory.
pub fn write_dashboard(report: &AggregatedReport, results_dir: &Path, generated_at: &str) -> Result<PathBuf> {
    let html = render_dashboard(report, generated_at)?;
    let path = results_dir.join(DASHBOARD_FILE);
    std::fs::write(&path, html)?;
    make_world_readable(&path)?;
    tracing::info!(path = %path.display(), rows = report.rows.len(), "dashboard written");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::config::{HttpMethod, TestType};
    use tempfile::TempDir;

    fn row() -> ReportRow {
        ReportRow {
            display_label: "Users (GET smoke)".to_string(),
            base_name: "users-get-smoke".to_string(),
            request_name: "Users".to_string(),
            method: HttpMethod::Get,
            endpoint: "/users</script>".to_string(),
            test_type: TestType::Smoke,
            total_requests: 1200,
            avg_latency_ms: 120.5,
            p90_latency_ms: 250.0,
            p95_latency_ms: 310.25,
            error_rate_pct: 2.5,
            error_rate_recorded: true,
            requests_per_second: 19.87,
            max_concurrent_users: 50,
            threshold_violations: false,
            metrics_file: "users-get-smoke-results.csv".to_string(),
            metadata_file: "users-get-smoke-metadata.json".to_string(),
        }
    }

    fn report(mode: ReportMode, rows: Vec<ReportRow>) -> AggregatedReport {
        AggregatedReport {
            mode,
            rows,
            excluded: Vec::new(),
            latest: None,
        }
    }

    #[test]
    fn test_golden_substitution() {
        let report = report(ReportMode::Single, vec![row()]);
        let index = ReportIndex::new(&report, "2026-01-02 03:04:05");
        let rendered = render_template(include_str!("testdata/mini_template.html"), &index).unwrap();
        assert_eq!(rendered, include_str!("testdata/mini_golden.html"));
    }

    #[test]
    fn test_bundled_template_has_one_insertion_point() {
        assert_eq!(TEMPLATE.matches(REPORT_INDEX_PLACEHOLDER).count(), 1);
        assert!(TEMPLATE.contains("render-complete"));
    }

    #[test]
    fn test_template_without_placeholder_rejected() {
        let report = report(ReportMode::Comprehensive, vec![]);
        let index = ReportIndex::new(&report, "now");
        let err = render_template("<html></html>", &index).unwrap_err();
        assert!(matches!(err, Error::RenderingFailed(_)));

        let twice = format!("{0}{0}", REPORT_INDEX_PLACEHOLDER);
        assert!(render_template(&twice, &index).is_err());
    }

    #[test]
    fn test_comprehensive_index_points_at_per_run_files() {
        let mut second = row();
        second.base_name = "users-get-load".to_string();
        second.metrics_file = "users-get-load-results.csv".to_string();
        let report = report(ReportMode::Comprehensive, vec![row(), second]);
        let index = ReportIndex::new(&report, "now");
        assert_eq!(index.refresh_seconds, None);
        assert_eq!(index.runs[0].metrics, "users-get-smoke-results.csv");
        assert_eq!(index.runs[1].metrics, "users-get-load-results.csv");
    }

    #[test]
    fn test_rendered_dashboard_embeds_every_row_once() {
        let mut second = row();
        second.base_name = "orders-post-load".to_string();
        second.request_name = "Orders".to_string();
        let report = report(ReportMode::Comprehensive, vec![row(), second]);
        let html = render_dashboard(&report, "now").unwrap();
        assert!(!html.contains(REPORT_INDEX_PLACEHOLDER));
        assert_eq!(html.matches("\"baseName\":\"users-get-smoke\"").count(), 1);
        assert_eq!(html.matches("\"baseName\":\"orders-post-load\"").count(), 1);
        assert!(!html.contains("/users</script>"));
    }

    #[test]
    fn test_write_dashboard() {
        let dir = TempDir::new().unwrap();
        let report = report(ReportMode::Single, vec![row()]);
        let path = write_dashboard(&report, dir.path(), "now").unwrap();
        assert_eq!(path, dir.path().join(DASHBOARD_FILE));
        let html = std::fs::read_to_string(path).unwrap();
        assert!(html.contains("\"metrics\":\"latest_results.csv\""));
        assert!(html.contains("\"refreshSeconds\":5"));
    }
}
