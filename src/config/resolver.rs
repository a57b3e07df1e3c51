//! Priority-based configuration resolution
//!
//! One resolution pass merges every available configuration source into a
//! single authoritative [`MergedConfig`]. Sources are processed in ascending
//! priority order (environment=1 wins over file=2 over preset=3 over
//! default=4); for scalar fields the first definition wins, and stream
//! descriptors merge by name with explicit conflict records instead of a
//! silent last-seen-wins.

use super::models::*;
use super::validation::Validate;
use crate::utils::Result;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Two sources defining the same named stream with differing parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConflict {
    /// Name of the contested stream
    pub name: String,
    /// Source whose definition was kept (higher priority)
    pub kept: SourceKind,
    /// Source whose definition was discarded
    pub discarded: SourceKind,
}

/// Outcome of one resolution pass
#[derive(Debug, Clone)]
pub struct Resolution {
    /// The authoritative merged configuration
    pub config: MergedConfig,
    /// Which source each scalar field was taken from
    pub field_origins: HashMap<String, SourceKind>,
    /// Same-name stream definitions that disagreed
    pub conflicts: Vec<StreamConflict>,
    /// Non-fatal observations made during the pass
    pub warnings: Vec<String>,
}

/// Merges configuration fragments honoring source priority
#[derive(Debug, Default)]
pub struct ConfigResolver;

impl ConfigResolver {
    pub fn new() -> Self {
        Self
    }

    /// Run one resolution pass over `sources`
    ///
    /// Returns `Err` when the merged result fails validation; callers must
    /// then keep their last-known-good configuration.
    pub fn resolve(&self, sources: &[ConfigSource]) -> Result<Resolution> {
        let mut ordered: Vec<&ConfigSource> = sources.iter().collect();
        ordered.sort_by_key(|source| source.priority);

        let mut field_origins = HashMap::new();
        let mut conflicts = Vec::new();
        let mut warnings = Vec::new();

        let mut level = None;
        let mut timestamp = None;
        let mut service_name = None;
        let mut version = None;
        let mut environment = None;

        // Stream merge is keyed by name; first (highest-priority) definition wins.
        let mut streams: Vec<StreamDescriptor> = Vec::new();
        let mut stream_origins: HashMap<String, SourceKind> = HashMap::new();

        for source in &ordered {
            let payload = &source.payload;
            payload.validate()?;

            if payload.is_empty() {
                warnings.push(format!("source '{}' contributed no fields", source.kind));
                continue;
            }

            Self::take_scalar(&mut level, payload.level, "level", source.kind, &mut field_origins);
            Self::take_scalar(
                &mut timestamp,
                payload.timestamp,
                "timestamp",
                source.kind,
                &mut field_origins,
            );
            Self::take_scalar(
                &mut service_name,
                payload.service_name.clone(),
                "serviceName",
                source.kind,
                &mut field_origins,
            );
            Self::take_scalar(
                &mut version,
                payload.version.clone(),
                "version",
                source.kind,
                &mut field_origins,
            );
            Self::take_scalar(
                &mut environment,
                payload.environment.clone(),
                "environment",
                source.kind,
                &mut field_origins,
            );

            if let Some(descriptors) = &payload.streams {
                for descriptor in descriptors {
                    match streams.iter().find(|s| s.name == descriptor.name) {
                        None => {
                            stream_origins.insert(descriptor.name.clone(), source.kind);
                            streams.push(descriptor.clone());
                        }
                        Some(existing) if existing.differs_from(descriptor) => {
                            let kept = stream_origins
                                .get(&descriptor.name)
                                .copied()
                                .unwrap_or(source.kind);
                            warn!(
                                stream = %descriptor.name,
                                kept = %kept,
                                discarded = %source.kind,
                                "conflicting definitions for stream, keeping higher-priority one"
                            );
                            conflicts.push(StreamConflict {
                                name: descriptor.name.clone(),
                                kept,
                                discarded: source.kind,
                            });
                        }
                        Some(_) => {} // identical repeat, not a conflict
                    }
                }
            }
        }

        if streams.is_empty() {
            warnings.push(
                "no stream descriptors survived merging; injecting synthetic console stream"
                    .to_string(),
            );
            streams.push(StreamDescriptor::console("default", LogLevel::Info));
        }

        let defaults = MergedConfig::default();
        let config = MergedConfig {
            level: level.unwrap_or(defaults.level),
            timestamp: timestamp.unwrap_or(defaults.timestamp),
            service_name: service_name.unwrap_or(defaults.service_name),
            service_version: version.unwrap_or(defaults.service_version),
            environment: environment.unwrap_or(defaults.environment),
            streams,
        };

        config.validate()?;

        debug!(
            level = %config.level,
            streams = config.streams.len(),
            conflicts = conflicts.len(),
            "configuration resolved"
        );

        Ok(Resolution {
            config,
            field_origins,
            conflicts,
            warnings,
        })
    }

    fn take_scalar<T>(
        slot: &mut Option<T>,
        candidate: Option<T>,
        field: &str,
        kind: SourceKind,
        origins: &mut HashMap<String, SourceKind>,
    ) {
        if slot.is_none() {
            if let Some(value) = candidate {
                *slot = Some(value);
                origins.insert(field.to_string(), kind);
            }
        }
    }
}
