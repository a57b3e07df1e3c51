//! Configuration management for the logging pipeline
//!
//! This module handles collecting configuration fragments from their sources
//! (static defaults, presets, config files, environment variables), merging
//! them by priority, and validating the result.

pub mod models;
pub mod resolver;
pub mod validation;

pub use models::*;
pub use resolver::{ConfigResolver, Resolution, StreamConflict};
pub use validation::Validate;

use crate::utils::error::{PipelineError, Result};
use std::env;
use std::path::Path;
use tracing::{debug, info};

/// Environment variable names recognized by [`PartialConfig::from_env`]
pub const ENV_LEVEL: &str = "LOG_LEVEL";
pub const ENV_TIMESTAMP: &str = "LOG_TIMESTAMP";
pub const ENV_SERVICE_NAME: &str = "LOG_SERVICE_NAME";
pub const ENV_SERVICE_VERSION: &str = "LOG_SERVICE_VERSION";
pub const ENV_ENVIRONMENT: &str = "LOG_ENVIRONMENT";
pub const ENV_STREAMS: &str = "LOG_STREAMS";

impl PartialConfig {
    /// Load a configuration fragment from a file
    ///
    /// The format is chosen by extension: `.yaml`/`.yml` parse as YAML,
    /// everything else as JSON.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {:?}", path);

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PipelineError::config(format!("Failed to read config file: {}", e)))?;

        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
            .unwrap_or(false);

        let partial: PartialConfig = if is_yaml {
            serde_yaml::from_str(&content)
                .map_err(|e| PipelineError::config(format!("Failed to parse config file: {}", e)))?
        } else {
            serde_json::from_str(&content)
                .map_err(|e| PipelineError::config(format!("Failed to parse config file: {}", e)))?
        };

        debug!("Configuration file loaded");
        Ok(partial)
    }

    /// Load a configuration fragment from environment variables
    ///
    /// Uses a fixed name-to-field mapping; `LOG_STREAMS` accepts a
    /// JSON-encoded array of stream descriptors.
    pub fn from_env() -> Result<Self> {
        debug!("Loading configuration from environment variables");

        let mut partial = PartialConfig::default();

        if let Ok(level) = env::var(ENV_LEVEL) {
            partial.level = Some(
                level
                    .parse()
                    .map_err(|e: String| PipelineError::config(format!("{}: {}", ENV_LEVEL, e)))?,
            );
        }
        if let Ok(timestamp) = env::var(ENV_TIMESTAMP) {
            partial.timestamp = Some(timestamp.parse().map_err(|e| {
                PipelineError::config(format!("{} must be true or false: {}", ENV_TIMESTAMP, e))
            })?);
        }
        if let Ok(name) = env::var(ENV_SERVICE_NAME) {
            partial.service_name = Some(name);
        }
        if let Ok(version) = env::var(ENV_SERVICE_VERSION) {
            partial.version = Some(version);
        }
        if let Ok(environment) = env::var(ENV_ENVIRONMENT) {
            partial.environment = Some(environment);
        }
        if let Ok(streams) = env::var(ENV_STREAMS) {
            let descriptors: Vec<StreamDescriptor> = serde_json::from_str(&streams)
                .map_err(|e| {
                    PipelineError::config(format!("{} must be a JSON array: {}", ENV_STREAMS, e))
                })?;
            partial.streams = Some(descriptors);
        }

        Ok(partial)
    }
}
