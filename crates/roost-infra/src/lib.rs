//! Roost Infrastructure Library
//!
//! Process-level plumbing shared by the Roost binaries:
//! - Telemetry initialization (tracing subscriber, text or JSON output)
//! - Shutdown signal handling

pub mod signal;

#[cfg(feature = "observability-basic")]
pub mod telemetry;

pub use signal::shutdown_signal;

#[cfg(feature = "observability-basic")]
pub use telemetry::{init_telemetry, shutdown_telemetry};
