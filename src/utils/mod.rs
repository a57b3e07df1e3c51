//! Utility modules for the logging pipeline

pub mod error;

pub use error::{PipelineError, Result};

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a unique request ID
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Milliseconds elapsed between two instants, saturating at zero
pub fn elapsed_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - start).num_milliseconds().max(0)
}
