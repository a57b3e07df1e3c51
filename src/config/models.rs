//! Configuration data model for the logging pipeline
//!
//! Defines severity levels, stream descriptors, partial configuration
//! payloads as supplied by individual sources, and the merged configuration
//! produced by one resolution pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Canonical ordered severity levels
///
/// Ordering is total: `Trace < Debug < Info < Warn < Error < Fatal < Silent`.
/// `Silent` is a threshold-only level; no record is ever emitted at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    Silent,
}

impl LogLevel {
    /// Numeric severity code used on the sink wire (pino-compatible)
    pub fn severity(&self) -> u8 {
        match self {
            Self::Trace => 10,
            Self::Debug => 20,
            Self::Info => 30,
            Self::Warn => 40,
            Self::Error => 50,
            Self::Fatal => 60,
            Self::Silent => 127,
        }
    }

    /// Whether a record at `level` passes a threshold of `self`
    pub fn admits(&self, level: LogLevel) -> bool {
        level != Self::Silent && level >= *self
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
            Self::Silent => "silent",
        };
        f.write_str(s)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "fatal" => Ok(Self::Fatal),
            "silent" => Ok(Self::Silent),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

/// Kind of output destination a stream binds to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Console,
    File,
    Network,
    Custom,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Console => "console",
            Self::File => "file",
            Self::Network => "network",
            Self::Custom => "custom",
        };
        f.write_str(s)
    }
}

/// Console output channel for `console` streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleTarget {
    #[default]
    Stdout,
    Stderr,
}

/// Rotation parameters passed through to the external sink
///
/// The pipeline does not rotate files itself; `file` descriptors carry these
/// untouched to whatever collaborator owns rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationPolicy {
    /// Maximum size before rotation, e.g. "10M"
    pub size: Option<String>,
    /// Rotation interval, e.g. "1d"
    pub interval: Option<String>,
}

/// Declaration of one output stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDescriptor {
    /// Unique stream name within a configuration
    pub name: String,
    /// Destination kind
    #[serde(rename = "type")]
    pub kind: StreamKind,
    /// Minimum severity this stream accepts
    #[serde(default = "default_stream_level")]
    pub level: LogLevel,
    /// File path, required for `file` streams
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Collector endpoint, required for `network` streams
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Console channel for `console` streams
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ConsoleTarget>,
    /// Rotation parameters forwarded to the external sink
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<RotationPolicy>,
    /// Whether the registry flushes and ends the destination on removal
    #[serde(default = "default_auto_end")]
    pub auto_end: bool,
}

fn default_stream_level() -> LogLevel {
    LogLevel::Info
}

fn default_auto_end() -> bool {
    true
}

impl StreamDescriptor {
    /// Console descriptor with the given name and level
    pub fn console(name: impl Into<String>, level: LogLevel) -> Self {
        Self {
            name: name.into(),
            kind: StreamKind::Console,
            level,
            path: None,
            endpoint: None,
            target: Some(ConsoleTarget::Stdout),
            rotation: None,
            auto_end: true,
        }
    }

    /// File descriptor writing to `path`
    pub fn file(name: impl Into<String>, level: LogLevel, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: StreamKind::File,
            level,
            path: Some(path.into()),
            endpoint: None,
            target: None,
            rotation: None,
            auto_end: true,
        }
    }

    /// Whether two descriptors with the same name actually differ
    ///
    /// Used by the resolver to distinguish a benign repeat from a conflict.
    pub fn differs_from(&self, other: &StreamDescriptor) -> bool {
        self != other
    }

    /// Apply a partial patch, producing the descriptor an update would create
    pub fn patched(&self, patch: &StreamPatch) -> StreamDescriptor {
        StreamDescriptor {
            name: self.name.clone(),
            kind: patch.kind.unwrap_or(self.kind),
            level: patch.level.unwrap_or(self.level),
            path: patch.path.clone().or_else(|| self.path.clone()),
            endpoint: patch.endpoint.clone().or_else(|| self.endpoint.clone()),
            target: patch.target.or(self.target),
            rotation: patch.rotation.clone().or_else(|| self.rotation.clone()),
            auto_end: patch.auto_end.unwrap_or(self.auto_end),
        }
    }
}

/// Partial update applied to a live stream via `update_stream`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamPatch {
    #[serde(rename = "type")]
    pub kind: Option<StreamKind>,
    pub level: Option<LogLevel>,
    pub path: Option<String>,
    pub endpoint: Option<String>,
    pub target: Option<ConsoleTarget>,
    pub rotation: Option<RotationPolicy>,
    pub auto_end: Option<bool>,
}

/// Configuration fragment as supplied by one source
///
/// Every field is optional; the resolver fills gaps from lower-priority
/// sources. The serde shape matches the external JSON/YAML payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialConfig {
    /// Pipeline-wide severity threshold
    pub level: Option<LogLevel>,
    /// Whether records carry a timestamp field
    pub timestamp: Option<bool>,
    /// Logical service name stamped on every record
    pub service_name: Option<String>,
    /// Service version stamped on every record
    pub version: Option<String>,
    /// Deployment environment name
    pub environment: Option<String>,
    /// Declared output streams
    pub streams: Option<Vec<StreamDescriptor>>,
}

impl PartialConfig {
    /// Whether this fragment defines nothing at all
    pub fn is_empty(&self) -> bool {
        self.level.is_none()
            && self.timestamp.is_none()
            && self.service_name.is_none()
            && self.version.is_none()
            && self.environment.is_none()
            && self.streams.is_none()
    }
}

/// Where a configuration fragment came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Default,
    Preset,
    File,
    Environment,
}

impl SourceKind {
    /// Numeric priority; lower wins
    pub fn priority(&self) -> u8 {
        match self {
            Self::Environment => 1,
            Self::File => 2,
            Self::Preset => 3,
            Self::Default => 4,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Default => "default",
            Self::Preset => "preset",
            Self::File => "file",
            Self::Environment => "environment",
        };
        f.write_str(s)
    }
}

/// One configuration source collected for a resolution pass
///
/// Immutable once collected; the resolver never mutates payloads.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    /// Kind of source
    pub kind: SourceKind,
    /// Numeric priority, lower = higher precedence
    pub priority: u8,
    /// The fragment this source contributes
    pub payload: PartialConfig,
    /// When the fragment was collected
    pub observed_at: DateTime<Utc>,
}

impl ConfigSource {
    /// Build a source with the fixed priority of its kind
    pub fn new(kind: SourceKind, payload: PartialConfig) -> Self {
        Self {
            kind,
            priority: kind.priority(),
            payload,
            observed_at: Utc::now(),
        }
    }
}

/// Authoritative configuration produced by one resolution pass
///
/// Invariants: stream names are unique and at least one descriptor exists
/// (the resolver injects a synthetic console stream when none survive).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedConfig {
    /// Pipeline-wide severity threshold
    pub level: LogLevel,
    /// Whether records carry a timestamp field
    pub timestamp: bool,
    /// Logical service name
    pub service_name: String,
    /// Service version
    pub service_version: String,
    /// Deployment environment name
    pub environment: String,
    /// Declared output streams, in merge order
    pub streams: Vec<StreamDescriptor>,
}

impl Default for MergedConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            timestamp: true,
            service_name: "service".to_string(),
            service_version: "0.0.0".to_string(),
            environment: "development".to_string(),
            streams: vec![StreamDescriptor::console("default", LogLevel::Info)],
        }
    }
}
