//! Estimator Core - Threshold Breach Estimation
//!
//! This module provides the pure (no I/O) half of the pipeline: the value
//! objects for bucketed moment aggregates, the Gaussian breach estimator,
//! and the watermark cursor that drives incremental querying.
//!
//! # Architecture
//!
//! ```text
//! Query response rows → AggregateRecord (count/total/sumOfSquares + attributes)
//!     ↓
//! BreachEstimator (mean, RMS std, z-score, Φ lookup)
//!     ↓
//! DerivedMetric (gauge: estimated breach count)
//!     ↓
//! MetricSink (remote ingest or CSV backend)
//! ```
//!
//! The `Watermark` is read before each query (lower time bound) and advanced
//! from every bucket timestamp observed in the response, so repeated cycles
//! never reprocess a bucket and never skip one.

pub mod estimator;
pub mod record;
pub mod watermark;

pub use estimator::{BreachEstimator, Direction};
pub use record::{AggregateRecord, DerivedMetric, derive_platform};
pub use watermark::Watermark;
