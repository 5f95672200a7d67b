pub mod config;
pub mod estimator_core;
pub mod pipeline;

pub use config::{Config, ConfigError, SinkBackend};
pub use estimator_core::{AggregateRecord, BreachEstimator, DerivedMetric, Direction, Watermark};
pub use pipeline::{PipelineController, TimeWindow};
