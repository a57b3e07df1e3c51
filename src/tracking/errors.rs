//! Error aggregation
//!
//! Turns a stream of `(error, context)` events into per-name counts, a
//! bounded rolling history, and a time-bucketed trend. Classification uses a
//! closed taxonomy with one classifier function instead of ad hoc substring
//! checks scattered through the aggregator.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

/// Default bound on the rolling history
pub const DEFAULT_HISTORY_CAP: usize = 1000;

/// One recorded error event; immutable once appended
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

/// Closed error taxonomy
///
/// `Network` and `Permission` are additionally surfaced on a parallel warn
/// channel by the pipeline; the remaining classes stay at error severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    Network,
    Permission,
    Timeout,
    Memory,
    Other,
}

impl ErrorClass {
    /// Whether this class is mirrored at warn severity
    pub fn warn_channel(&self) -> bool {
        matches!(self, Self::Network | Self::Permission)
    }
}

/// Classify an error by name and message
pub fn classify(name: &str, message: &str) -> ErrorClass {
    let haystack = format!("{} {}", name, message).to_lowercase();

    const TIMEOUT: &[&str] = &["etimedout", "timed out", "timeout"];
    const MEMORY: &[&str] = &["enomem", "out of memory", "allocation failed", "oom"];
    const PERMISSION: &[&str] = &["eacces", "eperm", "permission", "access denied"];
    const NETWORK: &[&str] = &[
        "econnrefused",
        "econnreset",
        "enotfound",
        "ehostunreach",
        "connection",
        "network",
        "socket",
        "dns",
    ];

    if TIMEOUT.iter().any(|needle| haystack.contains(needle)) {
        ErrorClass::Timeout
    } else if MEMORY.iter().any(|needle| haystack.contains(needle)) {
        ErrorClass::Memory
    } else if PERMISSION.iter().any(|needle| haystack.contains(needle)) {
        ErrorClass::Permission
    } else if NETWORK.iter().any(|needle| haystack.contains(needle)) {
        ErrorClass::Network
    } else {
        ErrorClass::Other
    }
}

/// Statistics snapshot over recorded errors
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorStatistics {
    /// Lifetime error count; not bounded by the history cap
    pub total_errors: u64,
    /// Per-name counts
    pub counts: HashMap<String, u64>,
    /// The 50 most recent records, newest first
    pub recent: Vec<ErrorRecord>,
    /// Top 10 names by count; ties break by first occurrence
    pub top: Vec<(String, u64)>,
}

// Related data kept under one lock: counts, order, and history move together.
#[derive(Default)]
struct AggregatorState {
    total: u64,
    counts: HashMap<String, u64>,
    first_seen: Vec<String>,
    history: VecDeque<ErrorRecord>,
}

/// Aggregates error events into counts, history, and trends
pub struct ErrorAggregator {
    state: RwLock<AggregatorState>,
    history_cap: usize,
}

impl ErrorAggregator {
    pub fn new(history_cap: usize) -> Self {
        Self {
            state: RwLock::new(AggregatorState::default()),
            history_cap,
        }
    }

    /// Record one error event, returning its classification
    pub fn record(
        &self,
        name: &str,
        message: &str,
        context: Option<serde_json::Value>,
    ) -> ErrorClass {
        let mut state = self.state.write();

        state.total += 1;
        if !state.counts.contains_key(name) {
            state.first_seen.push(name.to_string());
        }
        *state.counts.entry(name.to_string()).or_insert(0) += 1;

        if state.history.len() >= self.history_cap {
            state.history.pop_front();
        }
        state.history.push_back(ErrorRecord {
            timestamp: Utc::now(),
            name: name.to_string(),
            message: message.to_string(),
            context,
        });

        classify(name, message)
    }

    /// Current statistics snapshot
    pub fn statistics(&self) -> ErrorStatistics {
        let state = self.state.read();

        let recent: Vec<ErrorRecord> = state.history.iter().rev().take(50).cloned().collect();

        let first_seen_index: HashMap<&str, usize> = state
            .first_seen
            .iter()
            .enumerate()
            .map(|(index, name)| (name.as_str(), index))
            .collect();

        let mut top: Vec<(String, u64)> = state
            .counts
            .iter()
            .map(|(name, count)| (name.clone(), *count))
            .collect();
        top.sort_by(|a, b| {
            b.1.cmp(&a.1).then_with(|| {
                first_seen_index
                    .get(a.0.as_str())
                    .cmp(&first_seen_index.get(b.0.as_str()))
            })
        });
        top.truncate(10);

        ErrorStatistics {
            total_errors: state.total,
            counts: state.counts.clone(),
            recent,
            top,
        }
    }

    /// Count history entries into `buckets` equal intervals over
    /// `[now - window, now)`
    ///
    /// Recomputed on demand from the capped history; entries older than the
    /// window (or already evicted) are not represented.
    pub fn trend(&self, window: Duration, buckets: usize) -> Vec<u64> {
        let buckets = buckets.max(1);
        let now = Utc::now();
        let start = now - window;
        let bucket_width_ms = (window.num_milliseconds() / buckets as i64).max(1);

        let mut histogram = vec![0u64; buckets];
        let state = self.state.read();
        for record in &state.history {
            if record.timestamp < start || record.timestamp >= now {
                continue;
            }
            let offset_ms = (record.timestamp - start).num_milliseconds();
            let index = ((offset_ms / bucket_width_ms) as usize).min(buckets - 1);
            histogram[index] += 1;
        }
        histogram
    }

    /// Number of records currently held in history
    pub fn history_len(&self) -> usize {
        self.state.read().history.len()
    }

    /// Drop all recorded state
    pub fn clear(&self) {
        let mut state = self.state.write();
        *state = AggregatorState::default();
    }
}

impl Default for ErrorAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAP)
    }
}
