//! Observability module providing logging and metrics.
//!
//! This module initializes and configures:
//! - Structured logging with configurable formats (pretty, compact, JSON)
//! - Prometheus counters for retention runs

pub mod metrics;
#[cfg(feature = "cli")]
mod tracing_init;

#[cfg(feature = "cli")]
pub use tracing_init::*;
