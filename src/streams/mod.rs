//! Output stream management
//!
//! The registry owns every live destination; destinations implement the
//! sink boundary that actually carries records out of the process.

pub mod destination;
pub mod registry;

pub use destination::{
    ConsoleDestination, FileDestination, LogDestination, LogRecord, NetworkDestination,
};
pub use registry::{StreamFailure, StreamRegistry, StreamStatus};
