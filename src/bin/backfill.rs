//! Backfill Binary - bounded historical estimation over a fixed date range
//!
//! Walks `[BACKFILL_START, BACKFILL_END)` in fixed-size windows, running the
//! same pipeline cycle as the live daemon against each window, then exits.
//! Chunking keeps any single query under the backend's row cap so a long
//! range cannot be silently truncated in the middle.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --bin backfill [-- --sink csv|remote]
//! ```
//!
//! ## Environment Variables
//!
//! Everything the tailflow daemon reads, plus:
//!
//! - BACKFILL_START - range start, 'YYYY-MM-DD HH:MM:SS' UTC or epoch seconds (required)
//! - BACKFILL_END - range end, same formats (required)
//! - BACKFILL_CHUNK_MINUTES - window size per query (default: 60)
//!
//! The sink defaults to csv for offline analysis.

use chrono::NaiveDateTime;
use tailflow::config::{parse_sink_from_args, Config, ConfigError, SinkBackend};
use tailflow::estimator_core::{BreachEstimator, Watermark};
use tailflow::pipeline::{
    CsvMetricSink, MetricSink, PipelineController, QueryApi, RemoteMetricSink, ReqwestTransport,
    RetryClient, RetryPolicy, TimeWindow,
};

/// Accepts `YYYY-MM-DD HH:MM:SS` (UTC) or raw epoch seconds.
fn parse_time(var: &str, raw: &str) -> Result<i64, ConfigError> {
    if let Ok(epoch) = raw.trim().parse::<i64>() {
        return Ok(epoch);
    }
    NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc().timestamp())
        .map_err(|_| {
            ConfigError::InvalidValue(format!(
                "{} must be 'YYYY-MM-DD HH:MM:SS' or epoch seconds, got '{}'",
                var, raw
            ))
        })
}

fn required_time(var: &str) -> Result<i64, ConfigError> {
    let raw = std::env::var(var).map_err(|_| ConfigError::MissingVariable(var.to_string()))?;
    parse_time(var, &raw)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    dotenv::dotenv().ok();

    // NOTE: Workaround for rustls issue
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("Can't set crypto provider to aws_lc_rs");

    let sink_backend = parse_sink_from_args(SinkBackend::Csv);
    let (config, range_start, range_end, chunk_minutes) =
        match load_backfill_config(sink_backend) {
            Ok(loaded) => loaded,
            Err(e) => {
                log::error!("❌ {}", e);
                std::process::exit(1);
            }
        };

    log::info!("🚀 Starting backfill");
    log::info!("   Range: {} → {}", range_start, range_end);
    log::info!("   Chunk: {} minutes", chunk_minutes);
    log::info!("   Threshold: {} (direction: {})", config.threshold, config.direction.as_str());
    log::info!("   Sink: {}", sink_backend.as_str());

    let retry_policy = RetryPolicy {
        max_attempts: config.http_max_attempts,
        base_backoff: config.http_backoff_base,
        max_backoff: config.http_backoff_max,
    };

    let query_client = RetryClient::new(
        Box::new(ReqwestTransport::new(config.request_timeout)?),
        retry_policy,
    );
    let source = QueryApi::new(
        query_client,
        config.query_api_url.clone(),
        config.account_id.clone(),
        config.query_api_key.clone(),
        config.metric_name.clone(),
        config.filter_expression.clone(),
        config.facet_dimensions.clone(),
    );

    let sink: Box<dyn MetricSink> = match sink_backend {
        SinkBackend::Remote => {
            let ingest_key = config
                .ingest_api_key
                .clone()
                .ok_or("INGEST_API_KEY is required for the remote sink")?;
            let ingest_client = RetryClient::new(
                Box::new(ReqwestTransport::new(config.request_timeout)?),
                retry_policy,
            );
            Box::new(RemoteMetricSink::new(
                ingest_client,
                config.ingest_api_url.clone(),
                ingest_key,
            ))
        }
        SinkBackend::Csv => Box::new(CsvMetricSink::new(&config.csv_output_dir, config.threshold)),
    };

    // Start the cursor at the range start so the first query's lower bound
    // does not reach back before the range
    let mut controller = PipelineController::new(
        Box::new(source),
        sink,
        BreachEstimator::new(config.threshold, config.direction),
        Watermark::new(range_start),
        config.derived_metric_name.clone(),
    );

    let chunk_secs = chunk_minutes * 60;
    let mut window_start = range_start;
    let mut total_emitted = 0usize;

    while window_start < range_end {
        let window_end = (window_start + chunk_secs).min(range_end);
        let window = TimeWindow::Range {
            start: window_start,
            end: window_end,
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("⚠️  Received CTRL+C, stopping backfill at {}", window_start);
                break;
            }
            result = controller.run_cycle(&window) => {
                let outcome = result?;
                total_emitted += outcome.emitted;
                log::info!(
                    "✅ Window {} → {}: fetched {} / skipped {} / emitted {}",
                    window_start,
                    window_end,
                    outcome.fetched,
                    outcome.skipped,
                    outcome.emitted
                );
            }
        }

        window_start = window_end;
    }

    log::info!("✅ Backfill complete: {} metrics emitted", total_emitted);
    Ok(())
}

fn load_backfill_config(
    sink: SinkBackend,
) -> Result<(Config, i64, i64, i64), ConfigError> {
    let config = Config::from_env(sink)?;
    let range_start = required_time("BACKFILL_START")?;
    let range_end = required_time("BACKFILL_END")?;
    if range_end <= range_start {
        return Err(ConfigError::InvalidValue(format!(
            "BACKFILL_END ({}) must be after BACKFILL_START ({})",
            range_end, range_start
        )));
    }
    let chunk_minutes = match std::env::var("BACKFILL_CHUNK_MINUTES") {
        Ok(raw) => raw.trim().parse::<i64>().ok().filter(|m| *m > 0).ok_or_else(|| {
            ConfigError::InvalidValue(format!(
                "BACKFILL_CHUNK_MINUTES must be a positive integer, got '{}'",
                raw
            ))
        })?,
        Err(_) => 60,
    };
    Ok((config, range_start, range_end, chunk_minutes))
}
