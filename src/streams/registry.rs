//! Live registry of output streams
//!
//! Owns every active destination. Streams are created from the merged
//! configuration at initialization, and can be added, removed, and updated
//! while the pipeline is running. Destination handles never leave this
//! module except as dispatch pairs from [`StreamRegistry::active_destinations`].

use super::destination::{
    ConsoleDestination, FileDestination, LogDestination, NetworkDestination,
};
use crate::config::{MergedConfig, StreamDescriptor, StreamKind, StreamPatch, Validate};
use crate::config::{ConsoleTarget, LogLevel};
use crate::utils::error::{PipelineError, Result};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Runtime pairing of a descriptor with its live destination
struct ActiveStream {
    descriptor: StreamDescriptor,
    destination: Arc<dyn LogDestination>,
    active: bool,
}

/// One stream that failed to construct during `initialize`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamFailure {
    /// Name of the failed stream
    pub name: String,
    /// Construction error
    pub error: String,
}

/// Reported state of one registered stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatus {
    /// Whether the stream is receiving records
    pub active: bool,
    /// The stream's severity threshold
    pub level: LogLevel,
}

/// Registry of active output streams, keyed by unique name
pub struct StreamRegistry {
    streams: RwLock<Vec<ActiveStream>>,
    custom_handles: RwLock<HashMap<String, Arc<dyn LogDestination>>>,
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(Vec::new()),
            custom_handles: RwLock::new(HashMap::new()),
        }
    }

    /// Register a destination handle for a `custom` stream descriptor
    ///
    /// Custom descriptors resolve against handles registered here by name;
    /// an unregistered name fails construction (and falls under the
    /// partial-success policy during `initialize`).
    pub fn register_custom(&self, name: impl Into<String>, destination: Arc<dyn LogDestination>) {
        self.custom_handles.write().insert(name.into(), destination);
    }

    /// Build every stream the configuration declares
    ///
    /// Partial-success policy: a stream failing to construct is reported in
    /// the returned list and skipped; the remaining streams still become
    /// active. Any previously registered streams are flushed and dropped
    /// first, so this doubles as the rebuild path for `update_config`.
    pub async fn initialize(&self, config: &MergedConfig) -> Result<Vec<StreamFailure>> {
        self.shutdown_all().await;

        let mut failures = Vec::new();
        for descriptor in &config.streams {
            match self.build_destination(descriptor).await {
                Ok(destination) => {
                    self.streams.write().push(ActiveStream {
                        descriptor: descriptor.clone(),
                        destination,
                        active: true,
                    });
                    debug!(stream = %descriptor.name, kind = %descriptor.kind, "stream created");
                }
                Err(e) => {
                    warn!(stream = %descriptor.name, error = %e, "stream failed to construct, skipping");
                    failures.push(StreamFailure {
                        name: descriptor.name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(failures)
    }

    /// Add one stream; fails if the name is already registered
    pub async fn add_stream(&self, descriptor: StreamDescriptor) -> Result<()> {
        descriptor.validate()?;

        if self.contains(&descriptor.name) {
            return Err(PipelineError::conflict(format!(
                "stream '{}' already exists",
                descriptor.name
            )));
        }

        let destination = self.build_destination(&descriptor).await?;

        let mut streams = self.streams.write();
        // the construction await is a suspension point; re-check uniqueness
        if streams.iter().any(|s| s.descriptor.name == descriptor.name) {
            return Err(PipelineError::conflict(format!(
                "stream '{}' already exists",
                descriptor.name
            )));
        }
        streams.push(ActiveStream {
            descriptor,
            destination,
            active: true,
        });
        Ok(())
    }

    /// Remove one stream; fails if the name is absent
    ///
    /// When the descriptor's `auto_end` flag is set the destination is
    /// flushed and ended; a flush failure is reported but does not undo the
    /// removal.
    pub async fn remove_stream(&self, name: &str) -> Result<()> {
        let removed = {
            let mut streams = self.streams.write();
            let index = streams
                .iter()
                .position(|s| s.descriptor.name == name)
                .ok_or_else(|| PipelineError::not_found(format!("stream '{}'", name)))?;
            streams.remove(index)
        };

        if removed.descriptor.auto_end {
            if let Err(e) = removed.destination.shutdown().await {
                error!(stream = %name, error = %e, "failed to end destination on removal");
            }
        }

        debug!(stream = %name, "stream removed");
        Ok(())
    }

    /// Replace a stream's descriptor via remove-then-add
    ///
    /// If the add step fails, the previous stream is rebuilt from its
    /// captured descriptor so an invalid patch cannot silently drop a
    /// destination. The original add error is returned either way.
    pub async fn update_stream(&self, name: &str, patch: &StreamPatch) -> Result<()> {
        let old_descriptor = self
            .descriptor(name)
            .ok_or_else(|| PipelineError::not_found(format!("stream '{}'", name)))?;
        let new_descriptor = old_descriptor.patched(patch);

        self.remove_stream(name).await?;

        if let Err(add_err) = self.add_stream(new_descriptor).await {
            warn!(stream = %name, error = %add_err, "stream update failed, restoring previous definition");
            if let Err(restore_err) = self.add_stream(old_descriptor).await {
                error!(stream = %name, error = %restore_err, "failed to restore stream after bad update");
            }
            return Err(add_err);
        }

        debug!(stream = %name, "stream updated");
        Ok(())
    }

    /// Dispatch pairs for every active stream
    pub fn active_destinations(&self) -> Vec<(LogLevel, Arc<dyn LogDestination>)> {
        self.streams
            .read()
            .iter()
            .filter(|s| s.active)
            .map(|s| (s.descriptor.level, Arc::clone(&s.destination)))
            .collect()
    }

    /// Status of one stream by name
    pub fn status(&self, name: &str) -> Option<StreamStatus> {
        self.streams
            .read()
            .iter()
            .find(|s| s.descriptor.name == name)
            .map(|s| StreamStatus {
                active: s.active,
                level: s.descriptor.level,
            })
    }

    /// Status of every registered stream
    pub fn all_status(&self) -> HashMap<String, StreamStatus> {
        self.streams
            .read()
            .iter()
            .map(|s| {
                (
                    s.descriptor.name.clone(),
                    StreamStatus {
                        active: s.active,
                        level: s.descriptor.level,
                    },
                )
            })
            .collect()
    }

    /// Number of registered streams
    pub fn len(&self) -> usize {
        self.streams.read().len()
    }

    /// Whether the registry holds no streams
    pub fn is_empty(&self) -> bool {
        self.streams.read().is_empty()
    }

    /// Whether a stream with `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.streams
            .read()
            .iter()
            .any(|s| s.descriptor.name == name)
    }

    /// Flush and end every destination, emptying the registry
    pub async fn shutdown_all(&self) {
        let drained: Vec<ActiveStream> = self.streams.write().drain(..).collect();
        for stream in drained {
            if stream.descriptor.auto_end {
                if let Err(e) = stream.destination.shutdown().await {
                    error!(stream = %stream.descriptor.name, error = %e, "failed to end destination during shutdown");
                }
            }
        }
    }

    fn descriptor(&self, name: &str) -> Option<StreamDescriptor> {
        self.streams
            .read()
            .iter()
            .find(|s| s.descriptor.name == name)
            .map(|s| s.descriptor.clone())
    }

    async fn build_destination(
        &self,
        descriptor: &StreamDescriptor,
    ) -> Result<Arc<dyn LogDestination>> {
        match descriptor.kind {
            StreamKind::Console => {
                let target = descriptor.target.unwrap_or(ConsoleTarget::Stdout);
                Ok(Arc::new(ConsoleDestination::new(target)))
            }
            StreamKind::File => {
                let path = descriptor.path.as_deref().ok_or_else(|| {
                    PipelineError::validation(format!(
                        "file stream '{}' must declare a path",
                        descriptor.name
                    ))
                })?;
                let destination =
                    FileDestination::open(path, descriptor.rotation.clone()).await?;
                Ok(Arc::new(destination))
            }
            StreamKind::Network => {
                let endpoint = descriptor.endpoint.as_deref().ok_or_else(|| {
                    PipelineError::validation(format!(
                        "network stream '{}' must declare an endpoint",
                        descriptor.name
                    ))
                })?;
                Ok(Arc::new(NetworkDestination::new(endpoint)))
            }
            StreamKind::Custom => {
                let handles = self.custom_handles.read();
                handles.get(&descriptor.name).cloned().ok_or_else(|| {
                    PipelineError::stream(format!(
                        "no custom destination registered for stream '{}'",
                        descriptor.name
                    ))
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamDescriptor;

    fn console(name: &str, level: LogLevel) -> StreamDescriptor {
        StreamDescriptor::console(name, level)
    }

    #[tokio::test]
    async fn test_initialize_builds_all_streams() {
        let dir = tempfile::tempdir().unwrap();
        let config = MergedConfig {
            streams: vec![
                console("main", LogLevel::Info),
                StreamDescriptor::file(
                    "audit",
                    LogLevel::Warn,
                    dir.path().join("audit.log").to_string_lossy(),
                ),
            ],
            ..Default::default()
        };

        let registry = StreamRegistry::new();
        let failures = registry.initialize(&config).await.unwrap();
        assert!(failures.is_empty());
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.status("audit"),
            Some(StreamStatus {
                active: true,
                level: LogLevel::Warn
            })
        );
    }

    #[tokio::test]
    async fn test_initialize_partial_failure() {
        let mut custom = console("missing-custom", LogLevel::Info);
        custom.kind = StreamKind::Custom;
        custom.target = None;
        let config = MergedConfig {
            streams: vec![console("main", LogLevel::Info), custom],
            ..Default::default()
        };

        let registry = StreamRegistry::new();
        let failures = registry.initialize(&config).await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].name, "missing-custom");
        // the remaining stream still became active
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("main"));
    }

    #[tokio::test]
    async fn test_add_duplicate_name_fails() {
        let registry = StreamRegistry::new();
        registry
            .add_stream(console("x", LogLevel::Info))
            .await
            .unwrap();
        let err = registry
            .add_stream(console("x", LogLevel::Debug))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Conflict(_)));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_absent_stream_fails() {
        let registry = StreamRegistry::new();
        let err = registry.remove_stream("ghost").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_update_stream_changes_level() {
        let registry = StreamRegistry::new();
        registry
            .add_stream(console("main", LogLevel::Info))
            .await
            .unwrap();

        registry
            .update_stream(
                "main",
                &StreamPatch {
                    level: Some(LogLevel::Error),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(registry.status("main").unwrap().level, LogLevel::Error);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_update_stream_restores_old_on_failure() {
        let registry = StreamRegistry::new();
        registry
            .add_stream(console("main", LogLevel::Info))
            .await
            .unwrap();

        // switching to a custom kind with no registered handle fails the add
        let err = registry
            .update_stream(
                "main",
                &StreamPatch {
                    kind: Some(StreamKind::Custom),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Stream(_)));

        // the previous console stream was restored
        assert!(registry.contains("main"));
        assert_eq!(registry.status("main").unwrap().level, LogLevel::Info);
    }

    #[tokio::test]
    async fn test_active_destinations_filtering() {
        let registry = StreamRegistry::new();
        registry
            .add_stream(console("a", LogLevel::Info))
            .await
            .unwrap();
        registry
            .add_stream(console("b", LogLevel::Error))
            .await
            .unwrap();

        let dispatch = registry.active_destinations();
        assert_eq!(dispatch.len(), 2);
        let levels: Vec<LogLevel> = dispatch.iter().map(|(level, _)| *level).collect();
        assert!(levels.contains(&LogLevel::Info));
        assert!(levels.contains(&LogLevel::Error));
    }

    #[tokio::test]
    async fn test_shutdown_all_empties_registry() {
        let registry = StreamRegistry::new();
        registry
            .add_stream(console("a", LogLevel::Info))
            .await
            .unwrap();
        registry.shutdown_all().await;
        assert!(registry.is_empty());
    }
}
