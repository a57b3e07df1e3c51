//! Request lifecycle tracking
//!
//! Owns one [`RequestContext`] per inbound request, keyed by request id, and
//! maintains running statistics (active count, average response time). A
//! context moves `Created -> Active -> {Completed | Failed}` and stays in the
//! map after finishing so operators can reconstruct what happened; an
//! explicit age-based sweep bounds memory regardless of whether the request
//! ever completed.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;

use crate::utils::error::{PipelineError, Result};
use tracing::debug;

/// Header carrying the session id, when present
pub const SESSION_HEADER: &str = "x-session-id";
/// Header carrying the trace id, when present
pub const TRACE_HEADER: &str = "x-trace-id";

/// Lifecycle state of one tracked request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Created,
    Active,
    Completed,
    Failed,
}

impl RequestStatus {
    /// Whether the state admits no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Accumulated token counters for one request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
}

impl TokenUsage {
    /// Add another usage delta onto this one
    pub fn accumulate(&mut self, delta: &TokenUsage) {
        self.prompt += delta.prompt;
        self.completion += delta.completion;
        self.total += delta.total;
    }
}

/// Structured error information recorded on a failed request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestErrorInfo {
    pub name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

/// Tracked lifecycle record for one inbound request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub status: RequestStatus,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    pub method: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_size: Option<u64>,
    pub token_usage: TokenUsage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_info: Option<RequestErrorInfo>,
}

/// Snapshot of request tracking statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStatistics {
    pub total_requests: u64,
    pub active_requests: usize,
    pub completed_requests: u64,
    pub failed_requests: u64,
    /// Running average over completed and failed requests, in milliseconds
    pub average_response_time_ms: f64,
}

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    completed: u64,
    failed: u64,
    average_duration_ms: f64,
}

impl Counters {
    /// `avg' = (avg * (n - 1) + duration) / n` with n the post-increment
    /// count of finished requests
    fn record_finished(&mut self, duration_ms: i64, failed: bool) {
        if failed {
            self.failed += 1;
        } else {
            self.completed += 1;
        }
        let n = (self.completed + self.failed) as f64;
        self.average_duration_ms =
            (self.average_duration_ms * (n - 1.0) + duration_ms as f64) / n;
    }
}

/// Tracks request contexts and their aggregate statistics
pub struct RequestTracker {
    contexts: RwLock<HashMap<String, RequestContext>>,
    counters: RwLock<Counters>,
    max_age: Duration,
}

impl RequestTracker {
    /// Default maximum context age before the sweep reclaims it
    pub const DEFAULT_MAX_AGE_MINUTES: i64 = 30;

    pub fn new(max_age: Duration) -> Self {
        Self {
            contexts: RwLock::new(HashMap::new()),
            counters: RwLock::new(Counters::default()),
            max_age,
        }
    }

    /// Begin tracking a request, or refresh method/url for a known id
    ///
    /// Re-entry for the same id is idempotent: the existing context keeps its
    /// start time and status, only method and url are updated in place.
    /// Session and trace ids are pulled from the request headers when present.
    pub fn start(
        &self,
        request_id: &str,
        method: &str,
        url: &str,
        headers: Option<&HashMap<String, String>>,
    ) {
        let mut contexts = self.contexts.write();
        if let Some(existing) = contexts.get_mut(request_id) {
            existing.method = method.to_string();
            existing.url = url.to_string();
            return;
        }

        let session_id = headers.and_then(|h| h.get(SESSION_HEADER).cloned());
        let trace_id = headers.and_then(|h| h.get(TRACE_HEADER).cloned());

        contexts.insert(
            request_id.to_string(),
            RequestContext {
                request_id: request_id.to_string(),
                session_id,
                trace_id,
                status: RequestStatus::Active,
                start_time: Utc::now(),
                end_time: None,
                duration_ms: None,
                method: method.to_string(),
                url: url.to_string(),
                status_code: None,
                response_size: None,
                token_usage: TokenUsage::default(),
                error_info: None,
            },
        );
        self.counters.write().total += 1;
    }

    /// Finish a request with its response status and measured duration
    ///
    /// `status_code >= 400` marks the context `Failed`, otherwise
    /// `Completed`. Finishing an already-terminal context is a no-op.
    pub fn end(
        &self,
        request_id: &str,
        status_code: u16,
        duration_ms: i64,
        response_size: Option<u64>,
    ) -> Result<()> {
        let mut contexts = self.contexts.write();
        let context = contexts
            .get_mut(request_id)
            .ok_or_else(|| PipelineError::not_found(format!("request '{}'", request_id)))?;

        if context.status.is_terminal() {
            debug!(request_id, "end called on finished request, ignoring");
            return Ok(());
        }

        let failed = status_code >= 400;
        context.status = if failed {
            RequestStatus::Failed
        } else {
            RequestStatus::Completed
        };
        context.status_code = Some(status_code);
        context.end_time = Some(Utc::now());
        context.duration_ms = Some(duration_ms);
        context.response_size = response_size;
        drop(contexts);

        self.counters.write().record_finished(duration_ms, failed);
        Ok(())
    }

    /// Record a request failure
    ///
    /// The duration is derived from the context's start time; a failure for
    /// an id that was never started still counts, with duration zero.
    pub fn error(
        &self,
        request_id: &str,
        error_name: &str,
        error_message: &str,
        status_code: Option<u16>,
    ) {
        let mut contexts = self.contexts.write();
        let now = Utc::now();

        let duration_ms = match contexts.get_mut(request_id) {
            Some(context) => {
                if context.status.is_terminal() {
                    debug!(request_id, "error called on finished request, ignoring");
                    return;
                }
                let duration = crate::utils::elapsed_ms(context.start_time, now);
                context.status = RequestStatus::Failed;
                context.end_time = Some(now);
                context.duration_ms = Some(duration);
                context.status_code = status_code;
                context.error_info = Some(RequestErrorInfo {
                    name: error_name.to_string(),
                    message: error_message.to_string(),
                    status_code,
                });
                duration
            }
            None => {
                contexts.insert(
                    request_id.to_string(),
                    RequestContext {
                        request_id: request_id.to_string(),
                        session_id: None,
                        trace_id: None,
                        status: RequestStatus::Failed,
                        start_time: now,
                        end_time: Some(now),
                        duration_ms: Some(0),
                        method: String::new(),
                        url: String::new(),
                        status_code,
                        response_size: None,
                        token_usage: TokenUsage::default(),
                        error_info: Some(RequestErrorInfo {
                            name: error_name.to_string(),
                            message: error_message.to_string(),
                            status_code,
                        }),
                    },
                );
                self.counters.write().total += 1;
                0
            }
        };
        drop(contexts);

        self.counters.write().record_finished(duration_ms, true);
    }

    /// Accumulate token usage onto a tracked request
    pub fn update_token_usage(&self, request_id: &str, delta: &TokenUsage) -> Result<()> {
        let mut contexts = self.contexts.write();
        let context = contexts
            .get_mut(request_id)
            .ok_or_else(|| PipelineError::not_found(format!("request '{}'", request_id)))?;
        context.token_usage.accumulate(delta);
        Ok(())
    }

    /// Snapshot of one context by id
    pub fn get(&self, request_id: &str) -> Option<RequestContext> {
        self.contexts.read().get(request_id).cloned()
    }

    /// Remove contexts whose start time is older than the max age
    ///
    /// Runs independent of status so abandoned requests (client disconnects)
    /// are reclaimed too. Returns the number of contexts removed.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.max_age;
        let mut contexts = self.contexts.write();
        let before = contexts.len();
        contexts.retain(|_, context| context.start_time >= cutoff);
        let removed = before - contexts.len();
        if removed > 0 {
            debug!(removed, "swept expired request contexts");
        }
        removed
    }

    /// Current statistics snapshot
    pub fn statistics(&self) -> RequestStatistics {
        let active = self
            .contexts
            .read()
            .values()
            .filter(|c| c.status == RequestStatus::Active)
            .count();
        let counters = self.counters.read();
        RequestStatistics {
            total_requests: counters.total,
            active_requests: active,
            completed_requests: counters.completed,
            failed_requests: counters.failed,
            average_response_time_ms: counters.average_duration_ms,
        }
    }

    /// Drop all contexts (statistics counters are kept)
    pub fn clear(&self) {
        self.contexts.write().clear();
    }
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new(Duration::minutes(Self::DEFAULT_MAX_AGE_MINUTES))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_lifecycle_failure() {
        let tracker = RequestTracker::default();
        tracker.start("r1", "GET", "/a", None);
        tracker.end("r1", 500, 120, None).unwrap();

        let context = tracker.get("r1").unwrap();
        assert_eq!(context.status, RequestStatus::Failed);
        assert_eq!(context.status_code, Some(500));
        assert_eq!(context.duration_ms, Some(120));

        let stats = tracker.statistics();
        assert_eq!(stats.failed_requests, 1);
        assert_eq!(stats.completed_requests, 0);
        assert_eq!(stats.active_requests, 0);
    }

    #[test]
    fn test_average_duration() {
        let tracker = RequestTracker::default();
        for (id, duration) in [("a", 100), ("b", 200), ("c", 300)] {
            tracker.start(id, "GET", "/", None);
            tracker.end(id, 200, duration, None).unwrap();
        }

        let stats = tracker.statistics();
        assert_eq!(stats.completed_requests, 3);
        assert!((stats.average_response_time_ms - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_start_is_idempotent() {
        let tracker = RequestTracker::default();
        tracker.start("r1", "GET", "/old", None);
        let first_start = tracker.get("r1").unwrap().start_time;

        tracker.start("r1", "POST", "/new", None);
        let context = tracker.get("r1").unwrap();
        assert_eq!(context.method, "POST");
        assert_eq!(context.url, "/new");
        assert_eq!(context.start_time, first_start);
        assert_eq!(tracker.statistics().total_requests, 1);
    }

    #[test]
    fn test_end_is_terminal() {
        let tracker = RequestTracker::default();
        tracker.start("r1", "GET", "/", None);
        tracker.end("r1", 200, 50, None).unwrap();
        tracker.end("r1", 500, 999, None).unwrap();

        let context = tracker.get("r1").unwrap();
        assert_eq!(context.status, RequestStatus::Completed);
        assert_eq!(context.duration_ms, Some(50));
        assert_eq!(tracker.statistics().failed_requests, 0);
    }

    #[test]
    fn test_error_without_context_counts_zero_duration() {
        let tracker = RequestTracker::default();
        tracker.error("ghost", "Timeout", "upstream timed out", Some(504));

        let context = tracker.get("ghost").unwrap();
        assert_eq!(context.status, RequestStatus::Failed);
        assert_eq!(context.duration_ms, Some(0));
        assert_eq!(tracker.statistics().failed_requests, 1);
    }

    #[test]
    fn test_token_usage_accumulates() {
        let tracker = RequestTracker::default();
        tracker.start("r1", "POST", "/v1/chat", None);

        tracker
            .update_token_usage(
                "r1",
                &TokenUsage {
                    prompt: 10,
                    completion: 20,
                    total: 30,
                },
            )
            .unwrap();
        tracker
            .update_token_usage(
                "r1",
                &TokenUsage {
                    prompt: 5,
                    completion: 5,
                    total: 10,
                },
            )
            .unwrap();

        let usage = tracker.get("r1").unwrap().token_usage;
        assert_eq!(usage.prompt, 15);
        assert_eq!(usage.completion, 25);
        assert_eq!(usage.total, 40);

        let err = tracker
            .update_token_usage("nope", &TokenUsage::default())
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_headers_populate_correlation_ids() {
        let tracker = RequestTracker::default();
        let mut headers = HashMap::new();
        headers.insert(SESSION_HEADER.to_string(), "sess-9".to_string());
        headers.insert(TRACE_HEADER.to_string(), "trace-7".to_string());

        tracker.start("r1", "GET", "/", Some(&headers));
        let context = tracker.get("r1").unwrap();
        assert_eq!(context.session_id.as_deref(), Some("sess-9"));
        assert_eq!(context.trace_id.as_deref(), Some("trace-7"));
    }

    #[test]
    fn test_sweep_removes_old_contexts_regardless_of_status() {
        let tracker = RequestTracker::new(Duration::minutes(30));
        tracker.start("old-active", "GET", "/", None);
        tracker.start("old-done", "GET", "/", None);
        tracker.end("old-done", 200, 10, None).unwrap();

        // both started "now"; sweeping one hour in the future removes both
        let removed = tracker.sweep_expired(Utc::now() + Duration::hours(1));
        assert_eq!(removed, 2);
        assert!(tracker.get("old-active").is_none());

        // a fresh sweep removes nothing
        tracker.start("fresh", "GET", "/", None);
        assert_eq!(tracker.sweep_expired(Utc::now()), 0);
        assert!(tracker.get("fresh").is_some());
    }
}
