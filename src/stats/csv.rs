//! k6 metrics CSV reading and the flat `report.csv` comparison table.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::stats::AggregatedReport;

/// One metric from a k6 summary export: its type and the `key=value` sub-fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricEntry {
    pub kind: String,
    pub values: BTreeMap<String, f64>,
}

/// Parsed `metric,type,value` file, where `value` is `key=number`.
///
/// ```text
/// metric,type,value
/// http_req_duration,trend,"avg=120.5"
/// http_req_duration,trend,"p(95)=310.2"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricTable {
    metrics: BTreeMap<String, MetricEntry>,
}

impl MetricTable {
    pub fn parse(content: &str) -> Result<Self, csv::Error> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());

        let mut metrics: BTreeMap<String, MetricEntry> = BTreeMap::new();
        for record in reader.records() {
            let record = record?;
            let (Some(name), Some(kind), Some(value)) = (record.get(0), record.get(1), record.get(2))
            else {
                continue;
            };
            if name.is_empty() {
                continue;
            }
            let entry = metrics.entry(name.to_string()).or_insert_with(|| MetricEntry {
                kind: kind.to_string(),
                values: BTreeMap::new(),
            });
            let Some((key, raw)) = value.split_once('=') else {
                continue;
            };
            match raw.trim().parse::<f64>() {
                Ok(v) if v.is_finite() => {
                    entry.values.insert(key.trim().to_string(), v);
                }
                _ => tracing::debug!(metric = name, key, raw, "skipping non-numeric metric value"),
            }
        }

        Ok(Self { metrics })
    }

    pub fn from_path(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content).map_err(|e| {
            crate::error::Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("{}: {}", path.display(), e),
            ))
        })
    }

    pub fn get(&self, metric: &str) -> Option<&MetricEntry> {
        self.metrics.get(metric)
    }

    pub fn contains(&self, metric: &str) -> bool {
        self.metrics.contains_key(metric)
    }

    pub fn value(&self, metric: &str, key: &str) -> Option<f64> {
        self.metrics.get(metric).and_then(|m| m.values.get(key).copied())
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

/// Export the comparison rows as a flat CSV table.
pub fn write_report_csv(report: &AggregatedReport, path: &Path) -> crate::error::Result<()> {
    let to_io = |e: csv::Error| std::io::Error::other(e.to_string());
    let mut writer = csv::Writer::from_path(path).map_err(to_io)?;
    writer
        .write_record([
            "label",
            "test_type",
            "total_requests",
            "avg_latency_ms",
            "p90_latency_ms",
            "p95_latency_ms",
            "error_rate_pct",
            "requests_per_second",
            "max_concurrent_users",
            "threshold_violations",
        ])
        .map_err(to_io)?;
    for row in &report.rows {
        writer
            .write_record([
                row.display_label.clone(),
                row.test_type.to_string(),
                row.total_requests.to_string(),
                format!("{:.3}", row.avg_latency_ms),
                format!("{:.3}", row.p90_latency_ms),
                format!("{:.3}", row.p95_latency_ms),
                format!("{:.4}", row.error_rate_pct),
                format!("{:.3}", row.requests_per_second),
                row.max_concurrent_users.to_string(),
                row.threshold_violations.to_string(),
            ])
            .map_err(to_io)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "metric,type,value\n\
http_req_duration,trend,\"avg=120.5\"\n\
http_req_duration,trend,\"p(90)=250\"\n\
http_req_duration,trend,\"p(95)=310.25\"\n\
http_reqs,counter,\"count=1200\"\n\
http_reqs,counter,\"rate=19.87\"\n\
vus_max,gauge,\"value=50\"\n\
checks,rate,\"rate=NaN\"\n";

    #[test]
    fn test_parse_groups_sub_fields() {
        let table = MetricTable::parse(SAMPLE).unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table.value("http_req_duration", "avg"), Some(120.5));
        assert_eq!(table.value("http_req_duration", "p(95)"), Some(310.25));
        assert_eq!(table.value("http_reqs", "count"), Some(1200.0));
        assert_eq!(table.get("vus_max").unwrap().kind, "gauge");
    }

    #[test]
    fn test_non_numeric_values_skipped_but_metric_kept() {
        let table = MetricTable::parse(SAMPLE).unwrap();
        assert!(table.contains("checks"));
        assert_eq!(table.value("checks", "rate"), None);
    }

    #[test]
    fn test_missing_values_are_none() {
        let table = MetricTable::parse(SAMPLE).unwrap();
        assert_eq!(table.value("http_req_failed", "rate"), None);
        assert_eq!(table.value("http_req_duration", "p(99)"), None);
    }

    #[test]
    fn test_header_only() {
        let table = MetricTable::parse("metric,type,value\n").unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_short_rows_ignored() {
        let table = MetricTable::parse("metric,type,value\nlonely\nhttp_reqs,counter,\"count=3\"\n").unwrap();
        assert_eq!(table.value("http_reqs", "count"), Some(3.0));
    }
}
