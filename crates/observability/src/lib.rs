//! Process-wide tracing setup shared by the binaries.

/// Subscriber installation (format, filter).
pub mod tracing;

pub use crate::tracing::{init, LogConfig};
