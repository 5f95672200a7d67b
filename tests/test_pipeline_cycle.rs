//! Integration tests for the pipeline controller cycle
//!
//! Wires PipelineController to in-memory fakes of the query backend and the
//! metric sink, verifying the end-to-end cycle contract:
//! - valid records become derived metrics, invalid ones are skipped
//! - the watermark advances past every observed bucket, valid or not
//! - the working batch is cleared after every sink call, success or failure
//! - fetch failures abort the cycle without corrupting the watermark

#[cfg(test)]
mod pipeline_cycle_tests {
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};
    use tailflow::estimator_core::{AggregateRecord, BreachEstimator, DerivedMetric, Direction, Watermark};
    use tailflow::pipeline::{
        AggregateSource, CycleError, MetricSink, PipelineController, QueryError, SinkError,
        TimeWindow, TransportError,
    };

    /// Scripted query backend: pops one canned response per fetch and
    /// records the lower bound it was asked for.
    struct FakeSource {
        responses: Mutex<VecDeque<Result<Vec<AggregateRecord>, QueryError>>>,
        lower_bounds: Arc<Mutex<Vec<i64>>>,
    }

    #[async_trait]
    impl AggregateSource for FakeSource {
        async fn fetch(
            &self,
            lower_bound: i64,
            _window: &TimeWindow,
        ) -> Result<Vec<AggregateRecord>, QueryError> {
            self.lower_bounds.lock().unwrap().push(lower_bound);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    /// Captures every delivered batch; optionally fails each send.
    struct FakeSink {
        batches: Arc<Mutex<Vec<Vec<DerivedMetric>>>>,
        fail: bool,
    }

    #[async_trait]
    impl MetricSink for FakeSink {
        async fn send(&mut self, batch: &[DerivedMetric]) -> Result<(), SinkError> {
            if self.fail {
                return Err(SinkError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "sink unavailable",
                )));
            }
            self.batches.lock().unwrap().push(batch.to_vec());
            Ok(())
        }

        fn sink_type(&self) -> &'static str {
            "fake"
        }
    }

    fn make_record(
        bucket_timestamp: i64,
        count: f64,
        total: f64,
        sum_of_squares: f64,
        guid: Option<&str>,
    ) -> AggregateRecord {
        let mut attributes = HashMap::new();
        attributes.insert("appName".to_string(), "myapp-android".to_string());
        if let Some(guid) = guid {
            attributes.insert("entity.guid".to_string(), guid.to_string());
        }
        AggregateRecord {
            bucket_timestamp,
            count,
            total,
            sum_of_squares,
            attributes,
        }
    }

    fn make_controller(
        responses: Vec<Result<Vec<AggregateRecord>, QueryError>>,
        fail_sink: bool,
    ) -> (
        PipelineController,
        Arc<Mutex<Vec<i64>>>,
        Arc<Mutex<Vec<Vec<DerivedMetric>>>>,
    ) {
        let lower_bounds = Arc::new(Mutex::new(Vec::new()));
        let batches = Arc::new(Mutex::new(Vec::new()));
        let source = FakeSource {
            responses: Mutex::new(responses.into_iter().collect()),
            lower_bounds: lower_bounds.clone(),
        };
        let sink = FakeSink {
            batches: batches.clone(),
            fail: fail_sink,
        };
        let controller = PipelineController::new(
            Box::new(source),
            Box::new(sink),
            BreachEstimator::new(60.0, Direction::Below),
            Watermark::new(0),
            "mobileCrashCountThreshold".to_string(),
        );
        (controller, lower_bounds, batches)
    }

    #[tokio::test]
    async fn test_cycle_emits_valid_records_and_skips_invalid() {
        // 1. Two valid records, one without identity, one empty bucket
        let records = vec![
            make_record(1_700_000_060, 100.0, 5000.0, 260_000.0, Some("GUID-1")),
            make_record(1_700_000_120, 50.0, 2000.0, 90_000.0, Some("GUID-2")),
            make_record(1_700_000_180, 10.0, 100.0, 1100.0, None),
            make_record(1_700_000_240, 0.0, 0.0, 0.0, Some("GUID-3")),
        ];
        let (mut controller, _, batches) = make_controller(vec![Ok(records)], false);

        // 2. Run one cycle
        let outcome = controller
            .run_cycle(&TimeWindow::Since { minutes: 5 })
            .await
            .unwrap();

        // 3. Valid records emitted, invalid skipped, watermark past ALL buckets
        assert_eq!(outcome.fetched, 4);
        assert_eq!(outcome.skipped, 2);
        assert_eq!(outcome.emitted, 2);
        assert!(outcome.delivered);
        assert_eq!(outcome.watermark, 1_700_000_240);

        let delivered = batches.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        let batch = &delivered[0];
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].name, "mobileCrashCountThreshold");
        assert_eq!(batch[0].timestamp, 1_700_000_060);
        assert_eq!(batch[0].total_count, 100.0);
        assert_eq!(batch[0].platform, Some("android".to_string()));
        // mean 50, std ~50.99, below-60 estimate ~57.8
        assert!((batch[0].value - 57.8).abs() < 0.2);
    }

    #[tokio::test]
    async fn test_watermark_feeds_next_cycle_lower_bound() {
        let first = vec![make_record(1_700_000_060, 10.0, 100.0, 1100.0, Some("GUID-1"))];
        let second = vec![make_record(1_700_000_120, 10.0, 100.0, 1100.0, Some("GUID-1"))];
        let (mut controller, lower_bounds, _) =
            make_controller(vec![Ok(first), Ok(second)], false);

        let window = TimeWindow::Since { minutes: 5 };
        controller.run_cycle(&window).await.unwrap();
        controller.run_cycle(&window).await.unwrap();

        // First query starts from zero, second from the first bucket seen
        assert_eq!(*lower_bounds.lock().unwrap(), vec![0, 1_700_000_060]);
        assert_eq!(controller.watermark(), 1_700_000_120);
    }

    #[tokio::test]
    async fn test_sink_failure_clears_batch_and_completes_cycle() {
        let records = vec![make_record(1_700_000_060, 10.0, 100.0, 1100.0, Some("GUID-1"))];
        let next = vec![make_record(1_700_000_120, 10.0, 100.0, 1100.0, Some("GUID-1"))];
        let (mut controller, _, batches) = make_controller(vec![Ok(records), Ok(next)], true);

        let window = TimeWindow::Since { minutes: 5 };
        let outcome = controller.run_cycle(&window).await.unwrap();

        // Cycle completes; the loss is recorded, not propagated
        assert_eq!(outcome.emitted, 1);
        assert!(!outcome.delivered);
        assert_eq!(outcome.watermark, 1_700_000_060);
        assert!(batches.lock().unwrap().is_empty());

        // The dropped batch must not resurface on the next cycle
        let outcome = controller.run_cycle(&window).await.unwrap();
        assert_eq!(outcome.emitted, 1);
    }

    #[tokio::test]
    async fn test_transport_failure_aborts_cycle_watermark_intact() {
        let failure = QueryError::Transport(TransportError::Exhausted {
            attempts: 4,
            last: "connection reset".to_string(),
        });
        let records = vec![make_record(1_700_000_060, 10.0, 100.0, 1100.0, Some("GUID-1"))];
        let (mut controller, _, batches) = make_controller(vec![Err(failure), Ok(records)], false);

        let window = TimeWindow::Since { minutes: 5 };
        match controller.run_cycle(&window).await {
            Err(CycleError::Query(QueryError::Transport(_))) => {}
            other => panic!("expected transport cycle error, got {:?}", other),
        }
        assert_eq!(controller.watermark(), 0);
        assert!(batches.lock().unwrap().is_empty());

        // Next cycle recovers from the same watermark
        let outcome = controller.run_cycle(&window).await.unwrap();
        assert_eq!(outcome.emitted, 1);
        assert_eq!(outcome.watermark, 1_700_000_060);
    }

    #[tokio::test]
    async fn test_parse_failure_treated_as_empty_result() {
        let parse_error = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let (mut controller, _, batches) =
            make_controller(vec![Err(QueryError::Parse(parse_error))], false);

        let outcome = controller
            .run_cycle(&TimeWindow::Since { minutes: 5 })
            .await
            .unwrap();

        assert_eq!(outcome.fetched, 0);
        assert_eq!(outcome.emitted, 0);
        // Empty batch: the sink sees a no-op send
        let delivered = batches.lock().unwrap();
        assert!(delivered.is_empty() || delivered[0].is_empty());
    }

    #[tokio::test]
    async fn test_backfill_windows_share_controller_logic() {
        // The controller is window-agnostic: an absolute range behaves the
        // same as a relative window
        let records = vec![make_record(1_700_000_060, 10.0, 100.0, 1100.0, Some("GUID-1"))];
        let (mut controller, _, _) = make_controller(vec![Ok(records)], false);

        let outcome = controller
            .run_cycle(&TimeWindow::Range {
                start: 1_700_000_000,
                end: 1_700_003_600,
            })
            .await
            .unwrap();

        assert_eq!(outcome.emitted, 1);
        assert_eq!(outcome.watermark, 1_700_000_060);
    }
}
