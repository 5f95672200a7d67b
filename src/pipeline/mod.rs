//! Pipeline - the I/O half of the system
//!
//! Everything that touches the network or the filesystem lives here, behind
//! capability traits so the controller (and tests) never depend on a
//! concrete backend.
//!
//! ## Module Organization
//!
//! - `retry` - Transport trait, reqwest impl, bounded-retry executor
//! - `query` - AggregateSource trait, GraphQL query backend
//! - `sink` - MetricSink trait and error taxonomy
//! - `remote_sink` - ingest-endpoint sink
//! - `csv_sink` - local durable-file sink
//! - `controller` - the per-cycle state machine

pub mod controller;
pub mod csv_sink;
pub mod query;
pub mod remote_sink;
pub mod retry;
pub mod sink;

pub use controller::{CycleError, CycleOutcome, PipelineController};
pub use csv_sink::CsvMetricSink;
pub use query::{AggregateSource, QueryApi, QueryError, TimeWindow};
pub use remote_sink::RemoteMetricSink;
pub use retry::{HttpRequest, HttpResponse, ReqwestTransport, RetryClient, RetryPolicy, Transport, TransportError};
pub use sink::{MetricSink, SinkError};
