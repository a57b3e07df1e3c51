//! # logpipe
//!
//! Runtime core of a structured-logging pipeline for long-running services.
//! It resolves logging configuration from competing sources, manages a set
//! of independent output destinations with per-stream severity filtering,
//! and tracks the lifecycle of inbound requests and outbound streamed
//! responses so operators can reconstruct what happened to any request and
//! query error/latency statistics live.
//!
//! ## Features
//!
//! - **Prioritized configuration**: default, preset, file, and environment
//!   sources merge with explicit priorities, per-field origin tracking, and
//!   conflict detection for duplicate stream definitions
//! - **Live stream registry**: console/file/network/custom destinations can
//!   be added, removed, and updated without losing in-flight records
//! - **Request tracking**: per-request state machine with token usage and a
//!   running average response time
//! - **Transfer tracking**: rate, percentage, and ETA for application-level
//!   streamed responses
//! - **Error aggregation**: counts, bounded history, time-bucketed trends,
//!   and a closed classification taxonomy
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use logpipe::{LogLevel, LogPipeline, PipelineOptions};
//! use std::collections::HashMap;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = LogPipeline::new(PipelineOptions::default());
//!     pipeline.initialize().await?;
//!
//!     pipeline.log(LogLevel::Info, "service started", HashMap::new()).await;
//!
//!     let scope = pipeline.create_request_scope(None);
//!     scope.start("GET", "/health", None);
//!     scope.end(200, 12, None)?;
//!
//!     pipeline.cleanup().await;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod pipeline;
pub mod streams;
pub mod tracking;
pub mod utils;

// Re-export main types
pub use config::{
    ConfigResolver, ConfigSource, LogLevel, MergedConfig, PartialConfig, Resolution, SourceKind,
    StreamConflict, StreamDescriptor, StreamKind, StreamPatch,
};
pub use pipeline::{HealthReport, HealthState, LogPipeline, PipelineOptions, RequestScope};
pub use streams::{LogDestination, LogRecord, StreamFailure, StreamRegistry, StreamStatus};
pub use tracking::{
    ErrorAggregator, ErrorClass, ErrorRecord, ProgressStatus, RequestStatus, RequestTracker,
    StreamProgressTracker, TokenUsage,
};
pub use utils::error::{PipelineError, Result};

/// Current version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Name of the crate
pub const NAME: &str = env!("CARGO_PKG_NAME");
