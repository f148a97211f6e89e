//! Telemetry initialization
//!
//! Installs the global `tracing` subscriber used by the `strata` binary.

mod init;

pub use init::{init_telemetry, shutdown_telemetry};
