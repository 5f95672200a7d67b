//! Aggregate query backend
//!
//! Builds the time-windowed aggregate query, POSTs it wrapped in the
//! backend's GraphQL envelope through the retrying client, and parses the
//! response rows into `AggregateRecord`s.
//!
//! The wire shape is a black box to the rest of the pipeline: the controller
//! only sees the `AggregateSource` capability, so tests (and alternate
//! backends) substitute an in-memory fake.

use crate::estimator_core::record::AggregateRecord;
use crate::pipeline::retry::{HttpRequest, RetryClient, TransportError};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Query time window: relative for live polling, absolute for backfill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeWindow {
    Since { minutes: i64 },
    Range { start: i64, end: i64 },
}

impl TimeWindow {
    /// Window clause appended to the aggregate query.
    pub fn clause(&self) -> String {
        match self {
            TimeWindow::Since { minutes } => format!("SINCE {} minutes ago", minutes),
            TimeWindow::Range { start, end } => format!(
                "SINCE '{}' UNTIL '{}'",
                format_epoch(*start),
                format_epoch(*end)
            ),
        }
    }
}

fn format_epoch(epoch: i64) -> String {
    Utc.timestamp_opt(epoch, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| epoch.to_string())
}

#[derive(Debug)]
pub enum QueryError {
    Transport(TransportError),
    Parse(serde_json::Error),
    /// Non-empty error list in the response envelope
    Backend(Vec<String>),
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryError::Transport(e) => write!(f, "Query transport error: {}", e),
            QueryError::Parse(e) => write!(f, "Query response parse error: {}", e),
            QueryError::Backend(messages) => {
                write!(f, "Query backend errors: {}", messages.join("; "))
            }
        }
    }
}

impl std::error::Error for QueryError {}

impl From<TransportError> for QueryError {
    fn from(err: TransportError) -> Self {
        QueryError::Transport(err)
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        QueryError::Parse(err)
    }
}

/// Capability the controller depends on; the GraphQL backend is one impl.
#[async_trait]
pub trait AggregateSource: Send + Sync {
    async fn fetch(
        &self,
        lower_bound: i64,
        window: &TimeWindow,
    ) -> Result<Vec<AggregateRecord>, QueryError>;
}

#[derive(Serialize)]
struct GraphQlPayload {
    query: String,
}

#[derive(Debug, Default, Deserialize)]
struct GraphQlResult {
    #[serde(default)]
    data: GraphQlData,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Default, Deserialize)]
struct GraphQlData {
    #[serde(default)]
    actor: GraphQlActor,
}

#[derive(Debug, Default, Deserialize)]
struct GraphQlActor {
    #[serde(default)]
    account: GraphQlAccount,
}

#[derive(Debug, Default, Deserialize)]
struct GraphQlAccount {
    #[serde(default)]
    nrql: GraphQlNrql,
}

#[derive(Debug, Default, Deserialize)]
struct GraphQlNrql {
    #[serde(default)]
    results: Vec<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

/// GraphQL-wrapped aggregate query backend.
pub struct QueryApi {
    client: RetryClient,
    endpoint: String,
    account_id: String,
    api_key: String,
    metric_name: String,
    filter_expression: String,
    facet_dimensions: Vec<String>,
}

impl QueryApi {
    pub fn new(
        client: RetryClient,
        endpoint: String,
        account_id: String,
        api_key: String,
        metric_name: String,
        filter_expression: String,
        facet_dimensions: Vec<String>,
    ) -> Self {
        Self {
            client,
            endpoint,
            account_id,
            api_key,
            metric_name,
            filter_expression,
            facet_dimensions,
        }
    }

    /// Aggregate query text for one window.
    fn build_query(&self, lower_bound: i64, window: &TimeWindow) -> String {
        format!(
            "SELECT {}, {} FROM Metric WHERE {} AND timestamp > {} LIMIT MAX {}",
            self.metric_name,
            self.facet_dimensions.join(", "),
            self.filter_expression,
            lower_bound,
            window.clause()
        )
    }

    fn build_payload(&self, aggregate_query: &str) -> Result<String, serde_json::Error> {
        let envelope = format!(
            "{{actor {{account(id: {}) {{nrql (timeout: 120, query: {}) {{results}}}}}}}}",
            self.account_id,
            serde_json::to_string(aggregate_query)?
        );
        serde_json::to_string(&GraphQlPayload { query: envelope })
    }
}

#[async_trait]
impl AggregateSource for QueryApi {
    async fn fetch(
        &self,
        lower_bound: i64,
        window: &TimeWindow,
    ) -> Result<Vec<AggregateRecord>, QueryError> {
        let aggregate_query = self.build_query(lower_bound, window);
        log::debug!("Aggregate query: {}", aggregate_query);

        let request = HttpRequest {
            url: self.endpoint.clone(),
            body: self.build_payload(&aggregate_query)?,
            headers: vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("API-Key".to_string(), self.api_key.clone()),
            ],
        };

        let body = self.client.execute(&request).await?;
        log::debug!("Parsing response {} bytes", body.len());

        let result: GraphQlResult = serde_json::from_str(&body)?;
        if !result.errors.is_empty() {
            return Err(QueryError::Backend(
                result.errors.into_iter().map(|e| e.message).collect(),
            ));
        }

        let rows = result.data.actor.account.nrql.results;
        let records: Vec<AggregateRecord> = rows
            .iter()
            .filter_map(|row| parse_row(row, &self.metric_name, &self.facet_dimensions))
            .collect();

        if records.len() < rows.len() {
            log::warn!(
                "Dropped {} of {} rows missing timestamp or aggregate object",
                rows.len() - records.len(),
                rows.len()
            );
        }

        Ok(records)
    }
}

/// One response row → record. Rows without a timestamp or without the
/// aggregate object keyed by the metric name carry nothing usable (not even
/// a watermark candidate) and are dropped.
fn parse_row(
    row: &serde_json::Map<String, serde_json::Value>,
    metric_name: &str,
    facet_dimensions: &[String],
) -> Option<AggregateRecord> {
    let bucket_timestamp = row.get("timestamp")?.as_f64()? as i64;
    let timeslice = row.get(metric_name)?.as_object()?;

    let moment = |key: &str| timeslice.get(key).and_then(|v| v.as_f64()).unwrap_or(0.0);

    let mut attributes = HashMap::new();
    for key in facet_dimensions {
        if let Some(value) = row.get(key) {
            attributes.insert(key.clone(), render_attribute(value));
        }
    }

    Some(AggregateRecord {
        bucket_timestamp,
        count: moment("count"),
        total: moment("total"),
        sum_of_squares: moment("sumOfSquares"),
        attributes,
    })
}

fn render_attribute(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
