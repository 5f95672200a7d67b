//! Pipeline controller - one polling cycle
//!
//! Orchestrates `Querying → Estimating → Emitting` over the injected
//! capabilities:
//!
//! ```text
//! watermark.current() ──► AggregateSource::fetch(lower_bound, window)
//!     ↓
//! per record: advance watermark, validate, BreachEstimator::estimate
//!     ↓
//! MetricSink::send(batch)   (batch cleared afterward, success or not)
//! ```
//!
//! Error containment: a transport failure or backend error list aborts the
//! cycle (the next scheduled cycle starts fresh from the last advanced
//! watermark); a malformed response body is treated as an empty result set;
//! a malformed record is skipped alone. A sink failure is logged and the
//! batch dropped - estimates for that cycle are lost by design rather than
//! redelivered, see DESIGN.md.

use crate::estimator_core::estimator::BreachEstimator;
use crate::estimator_core::record::{derive_platform, DerivedMetric};
use crate::estimator_core::watermark::Watermark;
use crate::pipeline::query::{AggregateSource, QueryError, TimeWindow};
use crate::pipeline::sink::MetricSink;

#[derive(Debug)]
pub enum CycleError {
    Query(QueryError),
}

impl std::fmt::Display for CycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleError::Query(e) => write!(f, "Cycle aborted: {}", e),
        }
    }
}

impl std::error::Error for CycleError {}

/// Counters for one completed cycle, for the caller to log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Records returned by the query
    pub fetched: usize,
    /// Records excluded from emission (no identity, empty bucket)
    pub skipped: usize,
    /// Metrics handed to the sink
    pub emitted: usize,
    /// True when the sink accepted the batch
    pub delivered: bool,
    /// Cursor position after this cycle
    pub watermark: i64,
}

pub struct PipelineController {
    source: Box<dyn AggregateSource>,
    sink: Box<dyn MetricSink>,
    estimator: BreachEstimator,
    watermark: Watermark,
    derived_metric_name: String,
    batch: Vec<DerivedMetric>,
}

impl PipelineController {
    pub fn new(
        source: Box<dyn AggregateSource>,
        sink: Box<dyn MetricSink>,
        estimator: BreachEstimator,
        watermark: Watermark,
        derived_metric_name: String,
    ) -> Self {
        Self {
            source,
            sink,
            estimator,
            watermark,
            derived_metric_name,
            batch: Vec::new(),
        }
    }

    pub fn watermark(&self) -> i64 {
        self.watermark.current()
    }

    /// Run one cycle over the given window.
    pub async fn run_cycle(&mut self, window: &TimeWindow) -> Result<CycleOutcome, CycleError> {
        let records = match self.source.fetch(self.watermark.current(), window).await {
            Ok(records) => records,
            Err(QueryError::Parse(e)) => {
                // Shape mismatch: nothing usable this cycle, but not fatal
                log::error!("Response did not match expected shape, treating as empty: {}", e);
                Vec::new()
            }
            Err(e) => return Err(CycleError::Query(e)),
        };

        let fetched = records.len();
        let mut skipped = 0;

        for record in &records {
            // The time cursor must progress past sparse and invalid buckets
            self.watermark.advance(record.bucket_timestamp);

            if !record.has_identity() {
                log::warn!(
                    "Skipping record at bucket {} without identity attribute",
                    record.bucket_timestamp
                );
                skipped += 1;
                continue;
            }
            if record.count <= 0.0 {
                log::debug!("Skipping empty bucket {}", record.bucket_timestamp);
                skipped += 1;
                continue;
            }
            if record.violates_cauchy_schwarz() {
                log::warn!(
                    "Moment defect at bucket {} ({}): sumOfSquares {} < total²/count",
                    record.bucket_timestamp,
                    record
                        .attributes
                        .get(crate::estimator_core::record::IDENTITY_ATTRIBUTE)
                        .map(String::as_str)
                        .unwrap_or("?"),
                    record.sum_of_squares
                );
            }

            self.batch.push(DerivedMetric {
                name: self.derived_metric_name.clone(),
                value: self.estimator.estimate(record),
                timestamp: record.bucket_timestamp,
                total_count: record.count,
                platform: derive_platform(&record.attributes),
                attributes: record.attributes.clone(),
            });
        }

        let emitted = self.batch.len();
        let send_result = self.sink.send(&self.batch).await;
        // Cleared whether or not the send succeeded; a failed batch is
        // dropped, not redelivered
        self.batch.clear();

        let delivered = match send_result {
            Ok(()) => true,
            Err(e) => {
                log::error!("Failed to deliver {} metrics via {} sink: {}", emitted, self.sink.sink_type(), e);
                false
            }
        };

        Ok(CycleOutcome {
            fetched,
            skipped,
            emitted,
            delivered,
            watermark: self.watermark.current(),
        })
    }
}
