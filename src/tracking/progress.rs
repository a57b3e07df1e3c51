//! Transfer-state tracking for application-level streamed responses
//!
//! Distinct from the output-stream registry: this tracks *application*
//! streaming (a chunked reply being sent to a caller), computing transfer
//! rate, completion percentage, and ETA per logical stream id.

use super::errors::ErrorRecord;
use crate::utils::error::{PipelineError, Result};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// Per-stream error history cap
const STREAM_ERROR_CAP: usize = 100;

/// Every Nth chunk produces a progress snapshot for logging
const PROGRESS_SAMPLE_CHUNKS: u64 = 10;

/// Transfer state of one tracked stream
///
/// `Idle` is the state of a stream the caller knows about but has not begun
/// transferring; `start_stream` creates tracker entries directly in
/// `Started`, so `Idle` only appears in caller-side reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Idle,
    Started,
    InProgress,
    Paused,
    Completed,
    Error,
}

impl ProgressStatus {
    /// Whether the state admits no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// Tracked transfer state for one logical stream
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamProgressState {
    pub stream_id: String,
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_size: Option<u64>,
    pub status: ProgressStatus,
    pub start_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub bytes_transferred: u64,
    pub chunks_transferred: u64,
    /// Instantaneous rate since the previous update, for display
    pub transfer_rate_bytes_per_sec: f64,
    /// 0-100; monotone while in progress, pinned to 100 once completed
    pub percentage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_seconds_remaining: Option<f64>,
    /// Total time spent paused, excluded from the ETA's average rate
    pub pause_accumulated_ms: i64,
    #[serde(skip)]
    pause_started_at: Option<DateTime<Utc>>,
    pub errors: Vec<ErrorRecord>,
}

/// Sampled progress line emitted every tenth chunk
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub stream_id: String,
    pub bytes_transferred: u64,
    pub chunks_transferred: u64,
    pub transfer_rate_bytes_per_sec: f64,
    pub percentage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_seconds_remaining: Option<f64>,
}

/// Snapshot of transfer tracking statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamProgressStatistics {
    pub tracked_streams: usize,
    pub active_streams: usize,
    pub completed_streams: usize,
    pub errored_streams: usize,
    pub total_bytes_transferred: u64,
}

/// Tracks per-stream transfer state
pub struct StreamProgressTracker {
    states: RwLock<HashMap<String, StreamProgressState>>,
    max_age: Duration,
}

impl StreamProgressTracker {
    /// Default retention for ended streams before cleanup purges them
    pub const DEFAULT_MAX_AGE_HOURS: i64 = 1;

    pub fn new(max_age: Duration) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            max_age,
        }
    }

    /// Begin tracking a stream; counters start at zero and no ETA is computed
    pub fn start_stream(&self, stream_id: &str, content_type: &str, expected_size: Option<u64>) {
        let now = Utc::now();
        self.states.write().insert(
            stream_id.to_string(),
            StreamProgressState {
                stream_id: stream_id.to_string(),
                content_type: content_type.to_string(),
                expected_size,
                status: ProgressStatus::Started,
                start_time: now,
                last_update_time: now,
                end_time: None,
                bytes_transferred: 0,
                chunks_transferred: 0,
                transfer_rate_bytes_per_sec: 0.0,
                percentage: 0.0,
                estimated_seconds_remaining: None,
                pause_accumulated_ms: 0,
                pause_started_at: None,
                errors: Vec::new(),
            },
        );
    }

    /// Record cumulative transfer totals for a stream
    ///
    /// `bytes_received` and `chunks_received` are running totals. The
    /// instantaneous rate is computed against the previous update; the ETA
    /// uses the cumulative average rate since start, with paused time
    /// excluded from its denominator. Returns a snapshot every tenth chunk
    /// for the caller to log.
    pub fn update_progress(
        &self,
        stream_id: &str,
        bytes_received: u64,
        chunks_received: u64,
    ) -> Result<Option<ProgressSnapshot>> {
        let now = Utc::now();
        let mut states = self.states.write();
        let state = states
            .get_mut(stream_id)
            .ok_or_else(|| PipelineError::not_found(format!("stream '{}'", stream_id)))?;

        if state.status.is_terminal() {
            return Err(PipelineError::stream(format!(
                "stream '{}' already finished",
                stream_id
            )));
        }
        if state.status == ProgressStatus::Paused {
            // progress reported while paused is dropped, not an error
            debug!(stream_id, "progress update ignored while paused");
            return Ok(None);
        }
        state.status = ProgressStatus::InProgress;

        let delta_bytes = bytes_received.saturating_sub(state.bytes_transferred);
        let delta_secs =
            (now - state.last_update_time).num_milliseconds().max(0) as f64 / 1000.0;
        if delta_secs > 0.0 {
            state.transfer_rate_bytes_per_sec = delta_bytes as f64 / delta_secs;
        }

        state.bytes_transferred = bytes_received;
        state.chunks_transferred = chunks_received;
        state.last_update_time = now;

        if let Some(expected) = state.expected_size {
            if expected > 0 {
                let raw = (bytes_received as f64 / expected as f64) * 100.0;
                // monotone while in progress
                state.percentage = state.percentage.max(raw.min(100.0));
            }

            state.estimated_seconds_remaining = if bytes_received >= expected {
                None
            } else {
                let active_ms = (now - state.start_time).num_milliseconds().max(0)
                    - state.pause_accumulated_ms;
                let active_secs = active_ms.max(0) as f64 / 1000.0;
                if active_secs > 0.0 && bytes_received > 0 {
                    let average_rate = bytes_received as f64 / active_secs;
                    Some(((expected - bytes_received) as f64 / average_rate).max(0.0))
                } else {
                    None
                }
            };
        }

        let snapshot = if chunks_received > 0 && chunks_received % PROGRESS_SAMPLE_CHUNKS == 0 {
            Some(ProgressSnapshot {
                stream_id: state.stream_id.clone(),
                bytes_transferred: state.bytes_transferred,
                chunks_transferred: state.chunks_transferred,
                transfer_rate_bytes_per_sec: state.transfer_rate_bytes_per_sec,
                percentage: state.percentage,
                estimated_seconds_remaining: state.estimated_seconds_remaining,
            })
        } else {
            None
        };

        Ok(snapshot)
    }

    /// Finish a stream, pinning percentage to 100 and ETA to zero
    pub fn complete_stream(&self, stream_id: &str, final_size: Option<u64>) -> Result<()> {
        let mut states = self.states.write();
        let state = states
            .get_mut(stream_id)
            .ok_or_else(|| PipelineError::not_found(format!("stream '{}'", stream_id)))?;

        if state.status.is_terminal() {
            return Ok(());
        }

        if let Some(size) = final_size {
            state.bytes_transferred = size;
        }
        state.status = ProgressStatus::Completed;
        state.percentage = 100.0;
        state.estimated_seconds_remaining = Some(0.0);
        state.end_time = Some(Utc::now());
        Ok(())
    }

    /// Pause a stream; only effective from `InProgress`
    pub fn pause_stream(&self, stream_id: &str) -> Result<()> {
        let mut states = self.states.write();
        let state = states
            .get_mut(stream_id)
            .ok_or_else(|| PipelineError::not_found(format!("stream '{}'", stream_id)))?;

        if state.status != ProgressStatus::InProgress {
            return Err(PipelineError::stream(format!(
                "stream '{}' is not in progress",
                stream_id
            )));
        }
        state.status = ProgressStatus::Paused;
        state.pause_started_at = Some(Utc::now());
        Ok(())
    }

    /// Resume a paused stream, accumulating the paused duration
    pub fn resume_stream(&self, stream_id: &str) -> Result<()> {
        let mut states = self.states.write();
        let state = states
            .get_mut(stream_id)
            .ok_or_else(|| PipelineError::not_found(format!("stream '{}'", stream_id)))?;

        if state.status != ProgressStatus::Paused {
            return Err(PipelineError::stream(format!(
                "stream '{}' is not paused",
                stream_id
            )));
        }
        if let Some(paused_at) = state.pause_started_at.take() {
            state.pause_accumulated_ms += (Utc::now() - paused_at).num_milliseconds().max(0);
        }
        state.status = ProgressStatus::InProgress;
        Ok(())
    }

    /// Record a transfer error, moving the stream to its terminal state
    pub fn handle_error(
        &self,
        stream_id: &str,
        error_name: &str,
        error_message: &str,
        context: Option<serde_json::Value>,
    ) -> Result<()> {
        let mut states = self.states.write();
        let state = states
            .get_mut(stream_id)
            .ok_or_else(|| PipelineError::not_found(format!("stream '{}'", stream_id)))?;

        if state.errors.len() >= STREAM_ERROR_CAP {
            state.errors.remove(0);
        }
        state.errors.push(ErrorRecord {
            timestamp: Utc::now(),
            name: error_name.to_string(),
            message: error_message.to_string(),
            context,
        });
        state.status = ProgressStatus::Error;
        state.end_time = Some(Utc::now());
        Ok(())
    }

    /// Snapshot of one stream's state
    pub fn get(&self, stream_id: &str) -> Option<StreamProgressState> {
        self.states.read().get(stream_id).cloned()
    }

    /// Errors recorded on one stream
    pub fn stream_errors(&self, stream_id: &str) -> Result<Vec<ErrorRecord>> {
        self.states
            .read()
            .get(stream_id)
            .map(|s| s.errors.clone())
            .ok_or_else(|| PipelineError::not_found(format!("stream '{}'", stream_id)))
    }

    /// Purge streams whose end time is older than the max age
    pub fn cleanup(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.max_age;
        let mut states = self.states.write();
        let before = states.len();
        states.retain(|_, state| match state.end_time {
            Some(ended) => ended >= cutoff,
            None => true,
        });
        let removed = before - states.len();
        if removed > 0 {
            debug!(removed, "purged finished stream states");
        }
        removed
    }

    /// Current statistics snapshot
    pub fn statistics(&self) -> StreamProgressStatistics {
        let states = self.states.read();
        let mut active = 0;
        let mut completed = 0;
        let mut errored = 0;
        let mut total_bytes = 0u64;
        for state in states.values() {
            match state.status {
                ProgressStatus::Completed => completed += 1,
                ProgressStatus::Error => errored += 1,
                _ => active += 1,
            }
            total_bytes += state.bytes_transferred;
        }
        StreamProgressStatistics {
            tracked_streams: states.len(),
            active_streams: active,
            completed_streams: completed,
            errored_streams: errored,
            total_bytes_transferred: total_bytes,
        }
    }

    /// Drop all tracked state
    pub fn clear(&self) {
        self.states.write().clear();
    }
}

impl Default for StreamProgressTracker {
    fn default() -> Self {
        Self::new(Duration::hours(Self::DEFAULT_MAX_AGE_HOURS))
    }
}
