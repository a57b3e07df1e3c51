//! Output destinations for log records
//!
//! A destination is the pipeline's boundary to the structured sink: it
//! receives a severity number plus structured fields and a message, and is
//! responsible for getting them onto its channel. Write failures never
//! propagate past the dispatch path; the registry catches and reports them.

use crate::config::{ConsoleTarget, RotationPolicy};
use crate::utils::error::{PipelineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// One structured log record as handed to a destination
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    /// Numeric severity code (pino-compatible)
    pub severity: u8,
    /// Severity name
    pub level: String,
    /// Record timestamp; omitted when the `timestamp` config flag is off
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Logical service name
    pub service: String,
    /// Service version
    pub version: String,
    /// Deployment environment
    pub environment: String,
    /// Log message
    pub message: String,
    /// Structured fields
    #[serde(flatten)]
    pub fields: HashMap<String, serde_json::Value>,
}

impl LogRecord {
    /// Serialize the record as one JSON line
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// A live output destination
///
/// Implementations must not panic on write; they return `Err` and the
/// dispatch path swallows it with a best-effort diagnostic.
#[async_trait]
pub trait LogDestination: Send + Sync {
    /// Write one record to the destination
    async fn write(&self, record: &LogRecord) -> Result<()>;

    /// Flush any buffered output
    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Flush and release the destination's resources
    async fn shutdown(&self) -> Result<()> {
        self.flush().await
    }

    /// Short human-readable description for diagnostics
    fn describe(&self) -> String;
}

/// Destination bound to the process's stdout or stderr
///
/// Never allocates a new OS resource; it writes through the standard
/// channel handles already owned by the process.
#[derive(Debug)]
pub struct ConsoleDestination {
    target: ConsoleTarget,
}

impl ConsoleDestination {
    pub fn new(target: ConsoleTarget) -> Self {
        Self { target }
    }
}

#[async_trait]
impl LogDestination for ConsoleDestination {
    async fn write(&self, record: &LogRecord) -> Result<()> {
        let line = record.to_line()?;
        match self.target {
            ConsoleTarget::Stdout => {
                let stdout = std::io::stdout();
                let mut handle = stdout.lock();
                handle.write_all(line.as_bytes())?;
            }
            ConsoleTarget::Stderr => {
                let stderr = std::io::stderr();
                let mut handle = stderr.lock();
                handle.write_all(line.as_bytes())?;
            }
        }
        Ok(())
    }

    fn describe(&self) -> String {
        match self.target {
            ConsoleTarget::Stdout => "console(stdout)".to_string(),
            ConsoleTarget::Stderr => "console(stderr)".to_string(),
        }
    }
}

/// Append-only file destination
///
/// Creation ensures the parent directory exists before opening the file in
/// append mode. Rotation parameters are carried but not acted on; rotation
/// belongs to the external sink.
pub struct FileDestination {
    path: PathBuf,
    file: tokio::sync::Mutex<tokio::fs::File>,
    rotation: Option<RotationPolicy>,
}

impl FileDestination {
    /// Open (creating if needed) the file at `path` for appending
    pub async fn open(path: impl AsRef<Path>, rotation: Option<RotationPolicy>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    PipelineError::stream(format!(
                        "failed to create log directory {:?}: {}",
                        parent, e
                    ))
                })?;
            }
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| {
                PipelineError::stream(format!("failed to open log file {:?}: {}", path, e))
            })?;

        debug!(path = ?path, "file destination opened");

        Ok(Self {
            path,
            file: tokio::sync::Mutex::new(file),
            rotation,
        })
    }

    /// Rotation parameters forwarded to the external sink
    pub fn rotation(&self) -> Option<&RotationPolicy> {
        self.rotation.as_ref()
    }
}

#[async_trait]
impl LogDestination for FileDestination {
    async fn write(&self, record: &LogRecord) -> Result<()> {
        let line = record.to_line()?;
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let mut file = self.file.lock().await;
        file.flush().await?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file({})", self.path.display())
    }
}

/// Handoff point for records bound to a remote collector
///
/// Transport itself is an external collaborator; this destination only
/// serializes records into a bounded queue the forwarder drains. The oldest
/// entry is dropped once the queue is full, so a stalled forwarder cannot
/// grow memory without bound.
pub struct NetworkDestination {
    endpoint: String,
    buffer: parking_lot::Mutex<VecDeque<String>>,
    capacity: usize,
}

impl NetworkDestination {
    /// Default queue capacity in records
    pub const DEFAULT_CAPACITY: usize = 10_000;

    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            buffer: parking_lot::Mutex::new(VecDeque::new()),
            capacity: Self::DEFAULT_CAPACITY,
        }
    }

    /// Collector endpoint this destination hands records to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Number of records waiting for the forwarder
    pub fn pending(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Drain up to `max` queued lines for the external forwarder
    pub fn drain(&self, max: usize) -> Vec<String> {
        let mut buffer = self.buffer.lock();
        let take = max.min(buffer.len());
        buffer.drain(..take).collect()
    }
}

#[async_trait]
impl LogDestination for NetworkDestination {
    async fn write(&self, record: &LogRecord) -> Result<()> {
        let line = record.to_line()?;
        let mut buffer = self.buffer.lock();
        if buffer.len() >= self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(line);
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.buffer.lock().clear();
        Ok(())
    }

    fn describe(&self) -> String {
        format!("network({})", self.endpoint)
    }
}
