//! Tailflow Daemon - Threshold Breach Estimation Pipeline
//!
//! Polls the metrics backend for time-bucketed moment aggregates, estimates
//! how many raw samples in each bucket breached the configured threshold,
//! and emits the estimate as a derived gauge metric.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --bin tailflow [-- --sink remote|csv]
//! ```
//!
//! ## Environment Variables
//!
//! - ACCOUNT_ID - account to query (required)
//! - METRIC_NAME - source metric holding count/total/sumOfSquares (required)
//! - METRIC_WHERE - filter expression for the aggregate query (required)
//! - METRIC_FACET - comma-separated facet dimensions (required)
//! - THRESHOLD - breach threshold (required)
//! - THRESHOLD_DIRECTION - 'above' or 'below' (default: below)
//! - QUERY_API_KEY - key for the query endpoint (required)
//! - INGEST_API_KEY - key for the ingest endpoint (required for remote sink)
//! - POLL_INTERVAL_SECS - seconds between cycles, minimum 60 (default: 60)
//! - QUERY_SINCE_MINUTES - relative window per query (default: 5)
//! - QUERY_API_URL / INGEST_API_URL - endpoint overrides
//! - CSV_OUTPUT_DIR - directory for the csv sink (default: .)
//! - HTTP_MAX_ATTEMPTS / HTTP_BACKOFF_BASE_MS / HTTP_BACKOFF_MAX_MS /
//!   REQUEST_TIMEOUT_SECS - retry and timeout knobs
//! - RUST_LOG - logging level (optional, default: info)

use tailflow::config::{parse_sink_from_args, Config, SinkBackend};
use tailflow::estimator_core::{BreachEstimator, Watermark};
use tailflow::pipeline::{
    CsvMetricSink, MetricSink, PipelineController, QueryApi, RemoteMetricSink, ReqwestTransport,
    RetryClient, RetryPolicy, TimeWindow,
};
use tokio::time::interval;

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

    let sink_backend = parse_sink_from_args(SinkBackend::Remote);
    let config = match Config::from_env(sink_backend) {
        Ok(config) => config,
        Err(e) => {
            log::error!("❌ {}", e);
            std::process::exit(1);
        }
    };

    log::info!("🚀 Starting tailflow");
    log::info!("   Account: {}", config.account_id);
    log::info!("   Source metric: {}", config.metric_name);
    log::info!("   Derived metric: {}", config.derived_metric_name);
    log::info!(
        "   Threshold: {} (direction: {})",
        config.threshold,
        config.direction.as_str()
    );
    log::info!("   Sink: {}", sink_backend.as_str());
    log::info!("   Poll interval: {:?}", config.poll_interval);

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

    let mut controller = PipelineController::new(
        Box::new(source),
        sink,
        BreachEstimator::new(config.threshold, config.direction),
        Watermark::new(0),
        config.derived_metric_name.clone(),
    );

    let window = TimeWindow::Since {
        minutes: config.query_since_minutes,
    };
    let mut ticker = interval(config.poll_interval);

    log::info!("✅ Polling loop running - press CTRL+C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("⚠️  Received CTRL+C, shutting down...");
                break;
            }
            _ = ticker.tick() => {
                // Bound the cycle so a stalled call cannot outlive its slot
                // or indefinitely delay shutdown
                match tokio::time::timeout(config.poll_interval, controller.run_cycle(&window)).await {
                    Ok(Ok(outcome)) => {
                        log::info!(
                            "✅ Cycle complete: fetched {} / skipped {} / emitted {} (watermark {})",
                            outcome.fetched,
                            outcome.skipped,
                            outcome.emitted,
                            outcome.watermark
                        );
                    }
                    Ok(Err(e)) => {
                        log::error!("❌ {}", e);
                    }
                    Err(_) => {
                        log::error!("❌ Cycle timed out after {:?}", config.poll_interval);
                    }
                }
            }
        }
    }

    log::info!("✅ tailflow stopped");
    Ok(())
}
