//! Metric sink trait for derived gauge metrics
//!
//! Defines the interface the controller emits through. Two backends exist:
//! the remote ingest endpoint and a local CSV file. The controller never
//! branches on which one it holds.

use crate::estimator_core::record::DerivedMetric;
use crate::pipeline::retry::TransportError;
use async_trait::async_trait;

#[derive(Debug)]
pub enum SinkError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
    Transport(TransportError),
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::Io(err)
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        SinkError::Serialization(err)
    }
}

impl From<TransportError> for SinkError {
    fn from(err: TransportError) -> Self {
        SinkError::Transport(err)
    }
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Io(e) => write!(f, "IO error: {}", e),
            SinkError::Serialization(e) => write!(f, "Serialization error: {}", e),
            SinkError::Transport(e) => write!(f, "Transport error: {}", e),
        }
    }
}

impl std::error::Error for SinkError {}

/// Backend trait for delivering a batch of derived metrics
#[async_trait]
pub trait MetricSink: Send {
    /// Deliver one batch. The batch is atomic from the caller's side:
    /// delivered or not, never partially acknowledged.
    async fn send(&mut self, batch: &[DerivedMetric]) -> Result<(), SinkError>;

    /// Get backend type for logging
    fn sink_type(&self) -> &'static str;
}
