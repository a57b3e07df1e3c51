//! Pipeline orchestration
//!
//! [`LogPipeline`] owns one resolved configuration, the stream registry, the
//! three trackers, and the error aggregator. It is an explicit context
//! object: construct one per process (or several in tests) and pass it by
//! reference; there is no global pipeline state.

use crate::config::{
    ConfigResolver, ConfigSource, LogLevel, MergedConfig, PartialConfig, Resolution, SourceKind,
    Validate,
};
use crate::streams::{LogRecord, StreamFailure, StreamRegistry, StreamStatus};
use crate::tracking::{
    ErrorAggregator, ErrorStatistics, RequestStatistics, RequestTracker,
    StreamProgressStatistics, StreamProgressTracker, TokenUsage,
};
use crate::utils::error::{PipelineError, Result};
use chrono::{Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Construction options for a pipeline
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Static defaults, lowest priority
    pub defaults: PartialConfig,
    /// Optional preset fragment
    pub preset: Option<PartialConfig>,
    /// Optional configuration file (JSON or YAML by extension)
    pub config_file: Option<PathBuf>,
    /// Whether `LOG_*` environment variables are read
    pub use_env: bool,
    /// Interval of the background age sweep
    pub sweep_interval: std::time::Duration,
    /// Request contexts older than this are reclaimed
    pub request_max_age: Duration,
    /// Finished transfer states older than this are purged
    pub progress_max_age: Duration,
    /// Error history bound
    pub error_history_cap: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            defaults: PartialConfig::default(),
            preset: None,
            config_file: None,
            use_env: true,
            sweep_interval: std::time::Duration::from_secs(300),
            request_max_age: Duration::minutes(RequestTracker::DEFAULT_MAX_AGE_MINUTES),
            progress_max_age: Duration::hours(StreamProgressTracker::DEFAULT_MAX_AGE_HOURS),
            error_history_cap: crate::tracking::errors::DEFAULT_HISTORY_CAP,
        }
    }
}

/// Aggregate health as reported by `health_check`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

/// Snapshot returned by [`LogPipeline::health_check`]
///
/// Always produced, even for a broken pipeline; monitoring must be able to
/// observe a degraded state rather than receive an error.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthState,
    pub initialized: bool,
    pub streams: HashMap<String, StreamStatus>,
    pub request_tracking: RequestStatistics,
    pub stream_tracking: StreamProgressStatistics,
    pub error_logging: ErrorStatistics,
}

struct PipelineState {
    config: Option<MergedConfig>,
    overrides: PartialConfig,
}

/// Root orchestrator of the logging pipeline
pub struct LogPipeline {
    options: PipelineOptions,
    resolver: ConfigResolver,
    registry: StreamRegistry,
    requests: Arc<RequestTracker>,
    progress: Arc<StreamProgressTracker>,
    errors: ErrorAggregator,
    state: RwLock<PipelineState>,
    initialized: AtomicBool,
    init_lock: tokio::sync::Mutex<()>,
    sweeper: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl LogPipeline {
    /// Create an uninitialized pipeline from explicit options
    pub fn new(options: PipelineOptions) -> Self {
        let requests = Arc::new(RequestTracker::new(options.request_max_age));
        let progress = Arc::new(StreamProgressTracker::new(options.progress_max_age));
        let errors = ErrorAggregator::new(options.error_history_cap);

        Self {
            options,
            resolver: ConfigResolver::new(),
            registry: StreamRegistry::new(),
            requests,
            progress,
            errors,
            state: RwLock::new(PipelineState {
                config: None,
                overrides: PartialConfig::default(),
            }),
            initialized: AtomicBool::new(false),
            init_lock: tokio::sync::Mutex::new(()),
            sweeper: parking_lot::Mutex::new(None),
        }
    }

    /// Resolve configuration and bring every stream up
    ///
    /// At most one initialization ever succeeds: a second call is an
    /// idempotent no-op, and concurrent callers serialize on the in-flight
    /// attempt. Any stage failing leaves the pipeline uninitialized.
    /// Individual stream construction failures are non-fatal and returned.
    pub async fn initialize(&self) -> Result<Vec<StreamFailure>> {
        let _guard = self.init_lock.lock().await;
        if self.initialized.load(Ordering::Acquire) {
            debug!("pipeline already initialized, ignoring");
            return Ok(Vec::new());
        }

        let sources = self.collect_sources().await?;
        let resolution = self.resolver.resolve(&sources)?;
        Self::report_resolution(&resolution);

        let failures = self.registry.initialize(&resolution.config).await?;

        self.state.write().config = Some(resolution.config);
        self.start_sweeper();
        self.initialized.store(true, Ordering::Release);

        info!(
            streams = self.registry.len(),
            failed = failures.len(),
            "logging pipeline initialized"
        );
        Ok(failures)
    }

    /// Whether `initialize` has completed successfully
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Registry of output streams (add/remove/update live streams)
    pub fn streams(&self) -> &StreamRegistry {
        &self.registry
    }

    /// Request lifecycle tracker
    pub fn requests(&self) -> &RequestTracker {
        &self.requests
    }

    /// Transfer progress tracker
    pub fn progress(&self) -> &StreamProgressTracker {
        &self.progress
    }

    /// Error aggregator
    pub fn errors(&self) -> &ErrorAggregator {
        &self.errors
    }

    /// Emit one structured record to every admitting destination
    ///
    /// Sink write failures are caught and reported as internal diagnostics;
    /// they never reach the caller.
    pub async fn log(
        &self,
        level: LogLevel,
        message: &str,
        fields: HashMap<String, serde_json::Value>,
    ) {
        let Some(config) = self.state.read().config.clone() else {
            debug!("log call before initialization dropped");
            return;
        };
        if !config.level.admits(level) {
            return;
        }

        let record = LogRecord {
            severity: level.severity(),
            level: level.to_string(),
            timestamp: config.timestamp.then(Utc::now),
            service: config.service_name.clone(),
            version: config.service_version.clone(),
            environment: config.environment.clone(),
            message: message.to_string(),
            fields,
        };

        for (threshold, destination) in self.registry.active_destinations() {
            if !threshold.admits(level) {
                continue;
            }
            if let Err(e) = destination.write(&record).await {
                // a lost log line must never crash the host
                error!(destination = %destination.describe(), error = %e, "sink write failed");
            }
        }
    }

    /// Log at trace severity
    pub async fn trace(&self, message: &str) {
        self.log(LogLevel::Trace, message, HashMap::new()).await;
    }

    /// Log at debug severity
    pub async fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message, HashMap::new()).await;
    }

    /// Log at info severity
    pub async fn info(&self, message: &str) {
        self.log(LogLevel::Info, message, HashMap::new()).await;
    }

    /// Log at warn severity
    pub async fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message, HashMap::new()).await;
    }

    /// Log at fatal severity
    pub async fn fatal(&self, message: &str) {
        self.log(LogLevel::Fatal, message, HashMap::new()).await;
    }

    /// Record an error event and emit it
    ///
    /// The event always goes out at error severity; network- and
    /// permission-class errors are mirrored at warn severity on a parallel
    /// channel so noisy environmental failures can be filtered separately.
    pub async fn log_error(
        &self,
        name: &str,
        message: &str,
        context: Option<serde_json::Value>,
    ) {
        let class = self.errors.record(name, message, context.clone());

        let mut fields = HashMap::new();
        fields.insert(
            "errorName".to_string(),
            serde_json::Value::String(name.to_string()),
        );
        fields.insert("errorClass".to_string(), serde_json::json!(class));
        if let Some(context) = context {
            fields.insert("context".to_string(), context);
        }

        self.log(LogLevel::Error, message, fields.clone()).await;

        if class.warn_channel() {
            fields.insert(
                "channel".to_string(),
                serde_json::Value::String("environmental".to_string()),
            );
            self.log(LogLevel::Warn, message, fields).await;
        }
    }

    /// Open a tracked scope for one inbound request
    ///
    /// A fresh request id is generated when none is supplied.
    pub fn create_request_scope(&self, request_id: Option<String>) -> RequestScope<'_> {
        RequestScope {
            pipeline: self,
            request_id: request_id.unwrap_or_else(crate::utils::generate_request_id),
        }
    }

    /// Record cumulative transfer progress and emit the sampled log line
    pub async fn update_stream_progress(
        &self,
        stream_id: &str,
        bytes_received: u64,
        chunks_received: u64,
    ) -> Result<()> {
        let snapshot = self
            .progress
            .update_progress(stream_id, bytes_received, chunks_received)?;

        if let Some(snapshot) = snapshot {
            let mut fields = HashMap::new();
            fields.insert("progress".to_string(), serde_json::json!(snapshot));
            self.log(LogLevel::Debug, "stream progress", fields).await;
        }
        Ok(())
    }

    /// Re-resolve configuration with `partial` layered on top
    ///
    /// Overrides accumulate across calls. On success the stream registry is
    /// torn down and rebuilt from the new configuration while tracker state
    /// is preserved; on validation failure nothing changes and the
    /// last-known-good configuration stays active.
    pub async fn update_config(&self, partial: PartialConfig) -> Result<Vec<StreamFailure>> {
        if !self.is_initialized() {
            return Err(PipelineError::config(
                "pipeline is not initialized; call initialize first",
            ));
        }

        let merged_overrides = {
            let state = self.state.read();
            overlay_partial(&state.overrides, &partial)
        };

        let sources = self.collect_sources().await?;
        let resolution = self.resolver.resolve(&sources)?;
        let candidate = apply_overrides(resolution.config.clone(), &merged_overrides);
        candidate.validate()?;

        Self::report_resolution(&resolution);

        let failures = self.registry.initialize(&candidate).await?;
        {
            let mut state = self.state.write();
            state.config = Some(candidate);
            state.overrides = merged_overrides;
        }

        info!(streams = self.registry.len(), "configuration updated");
        Ok(failures)
    }

    /// Non-mutating snapshot of pipeline health
    ///
    /// Never fails; a broken pipeline reports `Unhealthy` instead.
    pub fn health_check(&self) -> HealthReport {
        let initialized = self.is_initialized();
        let streams = self.registry.all_status();
        let healthy = initialized && streams.values().any(|status| status.active);

        HealthReport {
            status: if healthy {
                HealthState::Healthy
            } else {
                HealthState::Unhealthy
            },
            initialized,
            streams,
            request_tracking: self.requests.statistics(),
            stream_tracking: self.progress.statistics(),
            error_logging: self.errors.statistics(),
        }
    }

    /// Tear everything down; safe to call repeatedly
    ///
    /// Stops the background sweeper, flushes and ends every destination, and
    /// clears all tracker and error state. A later `initialize` starts from a
    /// blank slate.
    pub async fn cleanup(&self) {
        let _guard = self.init_lock.lock().await;
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }
        self.registry.shutdown_all().await;
        self.requests.clear();
        self.progress.clear();
        self.errors.clear();
        self.state.write().config = None;
        self.initialized.store(false, Ordering::Release);
        debug!("pipeline cleaned up");
    }

    async fn collect_sources(&self) -> Result<Vec<ConfigSource>> {
        let mut sources = Vec::new();

        sources.push(ConfigSource::new(
            SourceKind::Default,
            self.options.defaults.clone(),
        ));
        if let Some(preset) = &self.options.preset {
            sources.push(ConfigSource::new(SourceKind::Preset, preset.clone()));
        }
        if let Some(path) = &self.options.config_file {
            let payload = PartialConfig::from_file(path).await?;
            sources.push(ConfigSource::new(SourceKind::File, payload));
        }
        if self.options.use_env {
            sources.push(ConfigSource::new(SourceKind::Environment, PartialConfig::from_env()?));
        }

        Ok(sources)
    }

    fn report_resolution(resolution: &Resolution) {
        for warning in &resolution.warnings {
            warn!("config: {}", warning);
        }
        for conflict in &resolution.conflicts {
            warn!(
                stream = %conflict.name,
                kept = %conflict.kept,
                discarded = %conflict.discarded,
                "config: conflicting stream definitions"
            );
        }
    }

    fn start_sweeper(&self) {
        let requests = Arc::clone(&self.requests);
        let progress = Arc::clone(&self.progress);
        let period = self.options.sweep_interval;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // first tick fires immediately
            loop {
                interval.tick().await;
                let now = Utc::now();
                requests.sweep_expired(now);
                progress.cleanup(now);
            }
        });

        // each initialization owns exactly one sweeper task
        if let Some(stale) = self.sweeper.lock().replace(handle) {
            stale.abort();
        }
    }
}

/// Layer `update` over `base`, field by field
fn overlay_partial(base: &PartialConfig, update: &PartialConfig) -> PartialConfig {
    PartialConfig {
        level: update.level.or(base.level),
        timestamp: update.timestamp.or(base.timestamp),
        service_name: update.service_name.clone().or_else(|| base.service_name.clone()),
        version: update.version.clone().or_else(|| base.version.clone()),
        environment: update.environment.clone().or_else(|| base.environment.clone()),
        streams: update.streams.clone().or_else(|| base.streams.clone()),
    }
}

/// Apply runtime overrides on top of a resolved configuration
///
/// Scalar overrides replace their field; a streams override replaces the
/// declared set wholesale (it is an explicit operator action, not a merge
/// participant).
fn apply_overrides(mut config: MergedConfig, overrides: &PartialConfig) -> MergedConfig {
    if let Some(level) = overrides.level {
        config.level = level;
    }
    if let Some(timestamp) = overrides.timestamp {
        config.timestamp = timestamp;
    }
    if let Some(name) = &overrides.service_name {
        config.service_name = name.clone();
    }
    if let Some(version) = &overrides.version {
        config.service_version = version.clone();
    }
    if let Some(environment) = &overrides.environment {
        config.environment = environment.clone();
    }
    if let Some(streams) = &overrides.streams {
        config.streams = streams.clone();
    }
    config
}

/// Handle scoping log calls and lifecycle events to one request
pub struct RequestScope<'a> {
    pipeline: &'a LogPipeline,
    request_id: String,
}

impl RequestScope<'_> {
    /// The id this scope is keyed by
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Mark the request started
    pub fn start(&self, method: &str, url: &str, headers: Option<&HashMap<String, String>>) {
        self.pipeline
            .requests
            .start(&self.request_id, method, url, headers);
    }

    /// Finish the request with its response status
    pub fn end(
        &self,
        status_code: u16,
        duration_ms: i64,
        response_size: Option<u64>,
    ) -> Result<()> {
        self.pipeline
            .requests
            .end(&self.request_id, status_code, duration_ms, response_size)
    }

    /// Record a request failure
    pub fn fail(&self, error_name: &str, error_message: &str, status_code: Option<u16>) {
        self.pipeline
            .requests
            .error(&self.request_id, error_name, error_message, status_code);
    }

    /// Accumulate token usage onto the request
    pub fn track_tokens(&self, delta: &TokenUsage) -> Result<()> {
        self.pipeline
            .requests
            .update_token_usage(&self.request_id, delta)
    }

    /// Log with the request's correlation ids attached
    pub async fn log(
        &self,
        level: LogLevel,
        message: &str,
        mut fields: HashMap<String, serde_json::Value>,
    ) {
        fields.insert(
            "requestId".to_string(),
            serde_json::Value::String(self.request_id.clone()),
        );
        if let Some(context) = self.pipeline.requests.get(&self.request_id) {
            if let Some(session) = context.session_id {
                fields.insert("sessionId".to_string(), serde_json::Value::String(session));
            }
            if let Some(trace) = context.trace_id {
                fields.insert("traceId".to_string(), serde_json::Value::String(trace));
            }
        }
        self.pipeline.log(level, message, fields).await;
    }
}
