//! CSV metric sink - appends derived gauges to a local file for offline
//! analysis
//!
//! The file name carries the threshold (`metrics_2.5.csv`) so runs with
//! different thresholds never collide, and repeated runs with the same
//! threshold append to the same file. Parent directories are created and the
//! header row written on first creation only.

use crate::estimator_core::record::DerivedMetric;
use crate::pipeline::sink::{MetricSink, SinkError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const HEADER: &[&str] = &[
    "Name",
    "Type",
    "EstimatedCount",
    "TotalCount",
    "Threshold",
    "Platform",
    "Timestamp",
    "EntityGuid",
    "Attributes",
];

pub struct CsvMetricSink {
    path: PathBuf,
    threshold: f64,
}

impl CsvMetricSink {
    pub fn new(output_dir: impl AsRef<Path>, threshold: f64) -> Self {
        let path = output_dir
            .as_ref()
            .join(format!("metrics_{}.csv", threshold));
        Self { path, threshold }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_batch(&self, batch: &[DerivedMetric]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let needs_header = self
            .path
            .metadata()
            .map(|m| m.len() == 0)
            .unwrap_or(true);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);

        if needs_header {
            log::info!("📝 Writing metrics to: {}", self.path.display());
            writeln!(writer, "{}", HEADER.join(","))?;
        }

        for metric in batch {
            let row = [
                metric.name.clone(),
                "gauge".to_string(),
                format!("{}", metric.value),
                format!("{}", metric.total_count),
                format!("{}", self.threshold),
                metric.platform.clone().unwrap_or_default(),
                format!("{}", metric.timestamp),
                metric.identity().to_string(),
                render_attributes(metric),
            ];
            let escaped: Vec<String> = row.iter().map(|f| escape_field(f)).collect();
            writeln!(writer, "{}", escaped.join(","))?;
        }

        writer.flush()
    }
}

/// Catch-all rendering of all attributes, key-sorted for stable output.
fn render_attributes(metric: &DerivedMetric) -> String {
    let sorted: BTreeMap<&String, &String> = metric.attributes.iter().collect();
    let pairs: Vec<String> = sorted
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    format!("{{{}}}", pairs.join("; "))
}

/// Quote fields containing the delimiter, quotes, or newlines; double any
/// inner quotes.
fn escape_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[async_trait]
impl MetricSink for CsvMetricSink {
    async fn send(&mut self, batch: &[DerivedMetric]) -> Result<(), SinkError> {
        if batch.is_empty() {
            log::info!("No metrics to send");
            return Ok(());
        }

        self.write_batch(batch)?;
        log::info!("Saved {} metrics to {}", batch.len(), self.path.display());
        Ok(())
    }

    fn sink_type(&self) -> &'static str {
        "csv"
    }
}
