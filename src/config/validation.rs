//! Configuration validation
//!
//! Validation runs after every resolution pass; a failure means the new
//! configuration is rejected and the caller keeps its last-known-good one.

use super::models::*;
use crate::utils::error::{PipelineError, Result};
use std::collections::HashSet;
use tracing::debug;

/// Validation seam implemented by every configuration structure
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

impl Validate for StreamDescriptor {
    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::validation("stream name must not be empty"));
        }

        match self.kind {
            StreamKind::File => {
                if self.path.as_deref().map(str::trim).unwrap_or("").is_empty() {
                    return Err(PipelineError::validation(format!(
                        "file stream '{}' must declare a path",
                        self.name
                    )));
                }
            }
            StreamKind::Network => {
                if self
                    .endpoint
                    .as_deref()
                    .map(str::trim)
                    .unwrap_or("")
                    .is_empty()
                {
                    return Err(PipelineError::validation(format!(
                        "network stream '{}' must declare an endpoint",
                        self.name
                    )));
                }
            }
            StreamKind::Console | StreamKind::Custom => {}
        }

        Ok(())
    }
}

impl Validate for PartialConfig {
    fn validate(&self) -> Result<()> {
        if let Some(streams) = &self.streams {
            let mut seen = HashSet::new();
            for descriptor in streams {
                descriptor.validate()?;
                if !seen.insert(descriptor.name.as_str()) {
                    return Err(PipelineError::validation(format!(
                        "duplicate stream name '{}' within one source",
                        descriptor.name
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Validate for MergedConfig {
    fn validate(&self) -> Result<()> {
        debug!("Validating merged configuration");

        if self.streams.is_empty() {
            return Err(PipelineError::validation(
                "merged configuration declares no streams",
            ));
        }

        let mut seen = HashSet::new();
        for descriptor in &self.streams {
            descriptor.validate()?;
            if !seen.insert(descriptor.name.as_str()) {
                return Err(PipelineError::validation(format!(
                    "duplicate stream name '{}' in merged configuration",
                    descriptor.name
                )));
            }
        }

        Ok(())
    }
}
