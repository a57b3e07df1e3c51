//! Lifecycle tracking for ephemeral entities
//!
//! Three independent trackers: inbound requests, outbound streamed
//! responses, and the error aggregate. Each owns its keyed state exclusively
//! and communicates outward only through snapshots.

pub mod errors;
pub mod progress;
pub mod requests;

pub use errors::{classify, ErrorAggregator, ErrorClass, ErrorRecord, ErrorStatistics};
pub use progress::{
    ProgressSnapshot, ProgressStatus, StreamProgressState, StreamProgressStatistics,
    StreamProgressTracker,
};
pub use requests::{
    RequestContext, RequestStatistics, RequestStatus, RequestTracker, TokenUsage,
};
