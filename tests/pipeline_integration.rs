//! End-to-end pipeline behavior
//!
//! Exercises the public surface the way a host service would: configuration
//! from several sources, live stream management, request and transfer
//! tracking, and teardown.

use logpipe::{
    ConfigResolver, ConfigSource, LogLevel, LogPipeline, PartialConfig, PipelineOptions,
    SourceKind, StreamDescriptor, StreamKind, TokenUsage,
};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

fn options_with_file_stream(path: &std::path::Path) -> PipelineOptions {
    PipelineOptions {
        defaults: PartialConfig {
            level: Some(LogLevel::Info),
            service_name: Some("integration".to_string()),
            streams: Some(vec![StreamDescriptor::file(
                "out",
                LogLevel::Trace,
                path.to_string_lossy(),
            )]),
            ..Default::default()
        },
        use_env: false,
        ..Default::default()
    }
}

#[tokio::test]
async fn records_reach_file_destination_with_severity_filtering() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("out.log");

    let pipeline = LogPipeline::new(options_with_file_stream(&log_path));
    pipeline.initialize().await.unwrap();

    pipeline
        .log(LogLevel::Info, "visible", HashMap::new())
        .await;
    // below the pipeline threshold, filtered before dispatch
    pipeline
        .log(LogLevel::Debug, "invisible", HashMap::new())
        .await;
    pipeline.cleanup().await;

    let content = std::fs::read_to_string(&log_path).unwrap();
    assert!(content.contains("visible"));
    assert!(!content.contains("invisible"));

    let line: serde_json::Value =
        serde_json::from_str(content.lines().next().unwrap()).unwrap();
    assert_eq!(line["severity"], 30);
    assert_eq!(line["service"], "integration");
}

#[tokio::test]
async fn config_file_overrides_defaults_and_env_overrides_file() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("logging.json");
    let mut file = std::fs::File::create(&config_path).unwrap();
    file.write_all(br#"{"level":"warn","streams":[{"name":"a","type":"console","target":"stderr"}]}"#)
        .unwrap();

    // resolver-level check of the full three-source scenario
    let sources = vec![
        ConfigSource::new(
            SourceKind::Default,
            PartialConfig {
                level: Some(LogLevel::Info),
                ..Default::default()
            },
        ),
        ConfigSource::new(
            SourceKind::File,
            PartialConfig::from_file(&config_path).await.unwrap(),
        ),
        ConfigSource::new(
            SourceKind::Environment,
            PartialConfig {
                level: Some(LogLevel::Error),
                ..Default::default()
            },
        ),
    ];
    let resolution = ConfigResolver::new().resolve(&sources).unwrap();
    assert_eq!(resolution.config.level, LogLevel::Error);
    assert_eq!(resolution.config.streams.len(), 1);
    assert_eq!(resolution.config.streams[0].name, "a");

    // pipeline-level check that the file source is actually loaded
    let pipeline = LogPipeline::new(PipelineOptions {
        defaults: PartialConfig {
            level: Some(LogLevel::Info),
            ..Default::default()
        },
        config_file: Some(config_path),
        use_env: false,
        ..Default::default()
    });
    pipeline.initialize().await.unwrap();
    assert!(pipeline.streams().contains("a"));
    pipeline.cleanup().await;
}

#[tokio::test]
async fn double_initialize_is_a_noop_success() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = LogPipeline::new(options_with_file_stream(&dir.path().join("a.log")));

    pipeline.initialize().await.unwrap();
    pipeline.initialize().await.unwrap();

    assert_eq!(pipeline.streams().len(), 1);
    assert!(pipeline.is_initialized());
    pipeline.cleanup().await;
}

#[tokio::test]
async fn stream_names_stay_unique_across_mutations() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = LogPipeline::new(options_with_file_stream(&dir.path().join("a.log")));
    pipeline.initialize().await.unwrap();

    let registry = pipeline.streams();
    registry
        .add_stream(StreamDescriptor::console("extra", LogLevel::Warn))
        .await
        .unwrap();
    assert!(registry
        .add_stream(StreamDescriptor::console("extra", LogLevel::Info))
        .await
        .is_err());

    registry
        .update_stream(
            "extra",
            &logpipe::StreamPatch {
                level: Some(LogLevel::Error),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    registry.remove_stream("out").await.unwrap();

    let status = registry.all_status();
    assert_eq!(status.len(), 1);
    assert_eq!(status["extra"].level, LogLevel::Error);
    pipeline.cleanup().await;
}

#[tokio::test]
async fn request_lifecycle_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = LogPipeline::new(options_with_file_stream(&dir.path().join("a.log")));
    pipeline.initialize().await.unwrap();

    let scope = pipeline.create_request_scope(Some("r1".to_string()));
    scope.start("GET", "/a", None);
    scope
        .track_tokens(&TokenUsage {
            prompt: 100,
            completion: 40,
            total: 140,
        })
        .unwrap();
    scope
        .log(LogLevel::Info, "handling request", HashMap::new())
        .await;
    scope.end(500, 120, Some(2048)).unwrap();

    let context = pipeline.requests().get("r1").unwrap();
    assert_eq!(context.status, logpipe::RequestStatus::Failed);
    assert_eq!(context.status_code, Some(500));
    assert_eq!(context.token_usage.total, 140);

    let health = pipeline.health_check();
    assert_eq!(health.request_tracking.failed_requests, 1);
    assert_eq!(health.request_tracking.total_requests, 1);
    pipeline.cleanup().await;
}

#[tokio::test]
async fn streamed_response_progress_and_error() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = LogPipeline::new(options_with_file_stream(&dir.path().join("a.log")));
    pipeline.initialize().await.unwrap();

    let progress = pipeline.progress();
    progress.start_stream("s1", "text/plain", Some(1000));
    pipeline.update_stream_progress("s1", 500, 1).await.unwrap();

    let state = progress.get("s1").unwrap();
    assert!(state.percentage >= 50.0);
    assert!(state
        .estimated_seconds_remaining
        .map(|eta| eta >= 0.0)
        .unwrap_or(true));

    progress
        .handle_error("s1", "ConnectionReset", "peer went away", None)
        .unwrap();
    assert_eq!(
        progress.get("s1").unwrap().status,
        logpipe::ProgressStatus::Error
    );
    assert_eq!(progress.stream_errors("s1").unwrap().len(), 1);
    pipeline.cleanup().await;
}

#[tokio::test]
async fn error_aggregation_shows_up_in_health() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = LogPipeline::new(options_with_file_stream(&dir.path().join("a.log")));
    pipeline.initialize().await.unwrap();

    for _ in 0..3 {
        pipeline
            .log_error("ECONNREFUSED", "collector unreachable", None)
            .await;
    }
    pipeline
        .log_error("ParseError", "bad frame", Some(serde_json::json!({"frame": 7})))
        .await;

    let health = pipeline.health_check();
    assert_eq!(health.error_logging.total_errors, 4);
    assert_eq!(health.error_logging.counts["ECONNREFUSED"], 3);
    assert_eq!(health.error_logging.top[0].0, "ECONNREFUSED");
    pipeline.cleanup().await;
}

#[tokio::test]
async fn update_config_rebuilds_streams_and_keeps_trackers() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first.log");
    let second = dir.path().join("second.log");

    let pipeline = LogPipeline::new(options_with_file_stream(&first));
    pipeline.initialize().await.unwrap();

    let scope = pipeline.create_request_scope(Some("r1".to_string()));
    scope.start("GET", "/", None);
    scope.end(200, 30, None).unwrap();

    pipeline
        .update_config(PartialConfig {
            streams: Some(vec![StreamDescriptor::file(
                "replacement",
                LogLevel::Trace,
                second.to_string_lossy(),
            )]),
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(pipeline.streams().contains("replacement"));
    assert!(!pipeline.streams().contains("out"));
    assert_eq!(pipeline.requests().statistics().completed_requests, 1);

    pipeline
        .log(LogLevel::Info, "after rebuild", HashMap::new())
        .await;
    pipeline.cleanup().await;

    let content = std::fs::read_to_string(&second).unwrap();
    assert!(content.contains("after rebuild"));
}

#[tokio::test]
async fn two_pipelines_are_fully_independent() {
    let dir = tempfile::tempdir().unwrap();
    let a = LogPipeline::new(options_with_file_stream(&dir.path().join("a.log")));
    let b = LogPipeline::new(options_with_file_stream(&dir.path().join("b.log")));
    a.initialize().await.unwrap();
    b.initialize().await.unwrap();

    a.log_error("OnlyInA", "isolated", None).await;

    assert_eq!(a.errors().statistics().total_errors, 1);
    assert_eq!(b.errors().statistics().total_errors, 0);
    a.cleanup().await;
    b.cleanup().await;
}

#[tokio::test]
async fn initialize_reports_partial_stream_failures() {
    let mut missing_custom = StreamDescriptor::console("plugin", LogLevel::Info);
    missing_custom.kind = StreamKind::Custom;
    missing_custom.target = None;

    let dir = tempfile::tempdir().unwrap();
    let good = StreamDescriptor::file(
        "out",
        LogLevel::Info,
        dir.path().join("a.log").to_string_lossy(),
    );

    let pipeline = LogPipeline::new(PipelineOptions {
        defaults: PartialConfig {
            streams: Some(vec![good, missing_custom]),
            ..Default::default()
        },
        use_env: false,
        ..Default::default()
    });

    let failures = pipeline.initialize().await.unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].name, "plugin");
    // the good stream still came up and the pipeline is usable
    assert!(pipeline.is_initialized());
    assert!(pipeline.streams().contains("out"));
    pipeline.cleanup().await;
}

#[tokio::test]
async fn shared_pipeline_handles_concurrent_tracking() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Arc::new(LogPipeline::new(options_with_file_stream(
        &dir.path().join("a.log"),
    )));
    pipeline.initialize().await.unwrap();

    let mut handles = Vec::new();
    for i in 0..16 {
        let p = Arc::clone(&pipeline);
        handles.push(tokio::spawn(async move {
            let scope = p.create_request_scope(Some(format!("r{}", i)));
            scope.start("GET", "/load", None);
            scope.end(200, 10, None).unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let stats = pipeline.requests().statistics();
    assert_eq!(stats.total_requests, 16);
    assert_eq!(stats.completed_requests, 16);
    pipeline.cleanup().await;
}
