//! Process configuration loaded from environment variables
//!
//! Everything here is validated once at startup; the pipeline itself never
//! touches the environment. A missing or unparseable required setting is a
//! `ConfigError` and the process exits with a diagnostic.

use crate::estimator_core::estimator::Direction;
use crate::estimator_core::record::IDENTITY_ATTRIBUTE;
use std::env;
use std::time::Duration;

pub const DEFAULT_QUERY_API_URL: &str = "https://api.newrelic.com/graphql";
pub const DEFAULT_INGEST_API_URL: &str = "https://metric-api.newrelic.com/metric/v1";

const MIN_POLL_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkBackend {
    Remote,
    Csv,
}

impl SinkBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkBackend::Remote => "remote",
            SinkBackend::Csv => "csv",
        }
    }
}

/// Pick the sink backend from a `--sink remote|csv` argv flag.
pub fn parse_sink_from_args(default: SinkBackend) -> SinkBackend {
    let args: Vec<String> = env::args().collect();
    if let Some(idx) = args.iter().position(|x| x == "--sink") {
        match args.get(idx + 1).map(|s| s.as_str()) {
            Some("remote") => return SinkBackend::Remote,
            Some("csv") => return SinkBackend::Csv,
            _ => {}
        }
    }
    default
}

#[derive(Debug)]
pub enum ConfigError {
    MissingVariable(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVariable(var) => write!(f, "Missing environment variable: {}", var),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Immutable process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub account_id: String,
    pub metric_name: String,
    /// Name of the emitted gauge: lowerCamel(metric_name) + "Threshold"
    pub derived_metric_name: String,
    pub filter_expression: String,
    /// Facet dimensions with the identity attribute re-appended last
    pub facet_dimensions: Vec<String>,
    pub threshold: f64,
    pub direction: Direction,
    pub query_api_url: String,
    pub query_api_key: String,
    pub ingest_api_url: String,
    /// Required only when the remote sink is selected
    pub ingest_api_key: Option<String>,
    pub poll_interval: Duration,
    pub query_since_minutes: i64,
    pub csv_output_dir: String,
    pub http_max_attempts: u32,
    pub http_backoff_base: Duration,
    pub http_backoff_max: Duration,
    pub request_timeout: Duration,
}

impl Config {
    /// Load and validate configuration from environment variables.
    pub fn from_env(sink: SinkBackend) -> Result<Self, ConfigError> {
        let account_id = required("ACCOUNT_ID")?;
        let metric_name = required("METRIC_NAME")?;
        let filter_expression = required("METRIC_WHERE")?;
        let facet_raw = required("METRIC_FACET")?;
        let query_api_key = required("QUERY_API_KEY")?;

        let ingest_api_key = env::var("INGEST_API_KEY").ok().filter(|k| !k.trim().is_empty());
        if sink == SinkBackend::Remote && ingest_api_key.is_none() {
            return Err(ConfigError::MissingVariable("INGEST_API_KEY".to_string()));
        }

        let threshold: f64 = required("THRESHOLD")?.parse().map_err(|_| {
            ConfigError::InvalidValue("THRESHOLD must be a number".to_string())
        })?;

        let direction = match env::var("THRESHOLD_DIRECTION") {
            Ok(raw) => Direction::from_str(raw.trim()).ok_or_else(|| {
                ConfigError::InvalidValue(format!(
                    "THRESHOLD_DIRECTION must be 'above' or 'below', got '{}'",
                    raw
                ))
            })?,
            Err(_) => Direction::Below,
        };

        let poll_interval_secs = parse_or("POLL_INTERVAL_SECS", MIN_POLL_INTERVAL_SECS)?;
        if poll_interval_secs < MIN_POLL_INTERVAL_SECS {
            return Err(ConfigError::InvalidValue(format!(
                "POLL_INTERVAL_SECS must be at least {} (got {})",
                MIN_POLL_INTERVAL_SECS, poll_interval_secs
            )));
        }

        Ok(Self {
            derived_metric_name: derive_metric_name(&metric_name),
            facet_dimensions: parse_facets(&facet_raw),
            account_id,
            metric_name,
            filter_expression,
            threshold,
            direction,
            query_api_url: env::var("QUERY_API_URL")
                .unwrap_or_else(|_| DEFAULT_QUERY_API_URL.to_string()),
            query_api_key,
            ingest_api_url: env::var("INGEST_API_URL")
                .unwrap_or_else(|_| DEFAULT_INGEST_API_URL.to_string()),
            ingest_api_key,
            poll_interval: Duration::from_secs(poll_interval_secs),
            query_since_minutes: parse_or("QUERY_SINCE_MINUTES", 5)?,
            csv_output_dir: env::var("CSV_OUTPUT_DIR").unwrap_or_else(|_| ".".to_string()),
            http_max_attempts: parse_or("HTTP_MAX_ATTEMPTS", 4)?,
            http_backoff_base: Duration::from_millis(parse_or("HTTP_BACKOFF_BASE_MS", 500)?),
            http_backoff_max: Duration::from_millis(parse_or("HTTP_BACKOFF_MAX_MS", 30_000)?),
            request_timeout: Duration::from_secs(parse_or("REQUEST_TIMEOUT_SECS", 30)?),
        })
    }
}

fn required(var: &str) -> Result<String, ConfigError> {
    let value = env::var(var)
        .map(|v| v.trim().to_string())
        .unwrap_or_default();
    if value.is_empty() {
        Err(ConfigError::MissingVariable(var.to_string()))
    } else {
        Ok(value)
    }
}

fn parse_or<T: std::str::FromStr>(var: &str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{} could not be parsed: '{}'", var, raw))),
        Err(_) => Ok(default),
    }
}

/// Split a comma-separated facet list, dropping any user-supplied spelling
/// of the identity attribute, then re-append the canonical one last so every
/// query row can be checked for identity.
pub fn parse_facets(raw: &str) -> Vec<String> {
    let mut facets: Vec<String> = raw
        .split(',')
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty() && a != IDENTITY_ATTRIBUTE && a != "entityGuid")
        .collect();
    facets.push(IDENTITY_ATTRIBUTE.to_string());
    facets
}

/// Lower-camel-case the source metric name and suffix it with `Threshold`:
/// `mobile.crash.count` → `mobileCrashCountThreshold`.
pub fn derive_metric_name(metric_name: &str) -> String {
    let mut out = String::with_capacity(metric_name.len() + 9);
    for (i, segment) in metric_name
        .split(|c: char| c == '.' || c == '_' || c == '-' || c == ' ' || c == '/')
        .filter(|s| !s.is_empty())
        .enumerate()
    {
        let mut chars = segment.chars();
        let first = chars.next().unwrap();
        if i == 0 {
            out.extend(first.to_lowercase());
        } else {
            out.extend(first.to_uppercase());
        }
        out.push_str(chars.as_str());
    }
    out.push_str("Threshold");
    out
}
