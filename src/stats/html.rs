use std::path::{Path, PathBuf};

use crate::engine::collector::make_world_readable;
use crate::error::Result;
use crate::stats::{AggregatedReport, ReportMode};

pub const SUMMARY_FILE: &str = "summary.html";

/// Generate a static, script-free HTML summary of the aggregated report
pub fn generate_html(report: &AggregatedReport, generated_at: &str) -> String {
    if report.rows.is_empty() && report.excluded.is_empty() {
        return r#"<!DOCTYPE html>
<html><head><title>Load Test Summary</title></head>
<body style="font-family: system-ui, sans-serif; max-width: 800px; margin: 0 auto; padding: 20px;">
<h1>Load Test Summary</h1>
<p>No runs were collected.</p>
</body></html>"#
            .to_string();
    }

    let mut html = String::new();

    html.push_str(r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>Load Test Summary</title>
    <style>
        * { box-sizing: border-box; }
        body {
            font-family: system-ui, -apple-system, sans-serif;
            max-width: 1200px;
            margin: 0 auto;
            padding: 20px;
            background: #f5f5f5;
            color: #333;
        }
        h1 { color: #1a1a2e; border-bottom: 3px solid #e94560; padding-bottom: 10px; }
        h2 { color: #16213e; margin-top: 30px; }
        .summary-grid {
            display: grid;
            grid-template-columns: repeat(auto-fit, minmax(200px, 1fr));
            gap: 15px;
            margin: 20px 0;
        }
        .stat-card {
            background: white;
            border-radius: 8px;
            padding: 20px;
            box-shadow: 0 2px 4px rgba(0,0,0,0.1);
        }
        .stat-card .label { color: #666; font-size: 14px; margin-bottom: 5px; }
        .stat-card .value { font-size: 28px; font-weight: bold; color: #1a1a2e; }
        .stat-card.success .value { color: #28a745; }
        .stat-card.error .value { color: #dc3545; }
        table {
            width: 100%;
            border-collapse: collapse;
            background: white;
            border-radius: 8px;
            overflow: hidden;
            box-shadow: 0 2px 4px rgba(0,0,0,0.1);
            margin: 15px 0;
        }
        th, td { padding: 12px 15px; text-align: left; border-bottom: 1px solid #eee; }
        th { background: #1a1a2e; color: white; font-weight: 500; }
        tr:hover { background: #f8f9fa; }
        .timestamp { color: #888; font-size: 14px; }
        .section { margin: 30px 0; }
        code { background: #f0f0f0; padding: 2px 6px; border-radius: 3px; font-size: 13px; }
        .badge { display: inline-block; padding: 3px 8px; border-radius: 4px; font-size: 12px; font-weight: 500; }
        .badge-success { background: #d4edda; color: #155724; }
        .badge-error { background: #f8d7da; color: #721c24; }
        .badge-info { background: #cce5ff; color: #004085; }
    </style>
</head>
<body>
    <h1>Load Test Summary</h1>
    <p class="timestamp">Generated: "#);

    html.push_str(&escape_html(generated_at));
    let mode = match report.mode {
        ReportMode::Single => "single run",
        ReportMode::Comprehensive => "comprehensive",
    };
    html.push_str(&format!(" &middot; {}</p>\n", mode));

    let total_requests: u64 = report.rows.iter().map(|r| r.total_requests).sum();
    let violations = report.violations();

    html.push_str(
        r#"
    <h2>Overview</h2>
    <div class="summary-grid">"#,
    );

    html.push_str(&format!(
        r#"
        <div class="stat-card">
            <div class="label">Runs Reported</div>
            <div class="value">{}</div>
        </div>"#,
        report.rows.len()
    ));

    html.push_str(&format!(
        r#"
        <div class="stat-card">
            <div class="label">Total Requests</div>
            <div class="value">{}</div>
        </div>"#,
        format_number(total_requests)
    ));

    html.push_str(&format!(
        r#"
        <div class="stat-card {}">
            <div class="label">Threshold Violations</div>
            <div class="value">{}</div>
        </div>"#,
        if violations == 0 { "success" } else { "error" },
        violations
    ));

    html.push_str(&format!(
        r#"
        <div class="stat-card {}">
            <div class="label">Excluded Runs</div>
            <div class="value">{}</div>
        </div>"#,
        if report.excluded.is_empty() { "success" } else { "error" },
        report.excluded.len()
    ));

    html.push_str("</div>\n");

    if !report.rows.is_empty() {
        html.push_str(
            r#"
    <div class="section">
        <h2>Runs</h2>
        <table>
            <tr>
                <th>Request</th>
                <th>Endpoint</th>
                <th>Test</th>
                <th>Requests</th>
                <th>Avg (ms)</th>
                <th>P90 (ms)</th>
                <th>P95 (ms)</th>
                <th>Errors</th>
                <th>Req/s</th>
                <th>Peak VUs</th>
                <th>Thresholds</th>
            </tr>"#,
        );

        for row in &report.rows {
            let errors = if row.error_rate_recorded {
                format!("{:.2}%", row.error_rate_pct)
            } else {
                "n/a".to_string()
            };
            let thresholds = if row.threshold_violations {
                r#"<span class="badge badge-error">crossed</span>"#
            } else {
                r#"<span class="badge badge-success">ok</span>"#
            };

            html.push_str(&format!(
                r#"
            <tr>
                <td>{} <span class="badge badge-info">{}</span></td>
                <td><code>{}</code></td>
                <td>{}</td>
                <td>{}</td>
                <td>{:.1}</td>
                <td>{:.1}</td>
                <td>{:.1}</td>
                <td>{}</td>
                <td>{:.1}</td>
                <td>{}</td>
                <td>{}</td>
            </tr>"#,
                escape_html(&row.request_name),
                row.method,
                truncate_endpoint(&row.endpoint, 60),
                row.test_type,
                format_number(row.total_requests),
                row.avg_latency_ms,
                row.p90_latency_ms,
                row.p95_latency_ms,
                errors,
                row.requests_per_second,
                row.max_concurrent_users,
                thresholds
            ));
        }

        html.push_str("</table></div>\n");
    }

    if !report.excluded.is_empty() {
        html.push_str(
            r#"
    <div class="section">
        <h2>Excluded Runs</h2>
        <table>
            <tr>
                <th>Run</th>
                <th>Reason</th>
            </tr>"#,
        );

        for run in &report.excluded {
            html.push_str(&format!(
                r#"
            <tr>
                <td>{}</td>
                <td><code>{}</code></td>
            </tr>"#,
                escape_html(&run.display_label),
                escape_html(&run.reason)
            ));
        }

        html.push_str("</table></div>\n");
    }

    html.push_str("</body>\n</html>\n");
    html
}

/// Write `summary.html` next to the dashboard.
pub fn write_summary(report: &AggregatedReport, results_dir: &Path, generated_at: &str) -> Result<PathBuf> {
    let path = results_dir.join(SUMMARY_FILE);
    std::fs::write(&path, generate_html(report, generated_at))?;
    make_world_readable(&path)?;
    Ok(path)
}

fn format_number(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn truncate_endpoint(s: &str, max_len: usize) -> String {
    let escaped = escape_html(s);
    if s.chars().count() <= max_len {
        return escaped;
    }
    let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", escape_html(&cut))
}
