//! Graceful shutdown for threaded processes
//!
//! This library listens for SIGTERM/SIGINT, runs cleanup hooks, waits for
//! in-flight work to drain and cancels contexts handed to worker code.

pub mod cli;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod logging;
pub mod signal;
pub mod wait_group;

pub use config::ShutdownConfig;
pub use context::{CancelCause, CancelHandle, Context};
pub use coordinator::{
    cancellable_context, wait_for_shutdown, wait_for_shutdown_with, ShutdownCoordinator,
    ShutdownHook, ShutdownReport,
};
pub use logging::{clear_log_file, log, log_with_worker, set_log_file};
pub use signal::{ShutdownSignal, SignalNotifier};
pub use wait_group::{WaitGroup, WorkGuard};

/// Name of the demo binary, used in usage and version output
pub const PROGRAM_NAME: &str = "sigdrain";

/// Current version of the program (from Cargo.toml)
pub const PROGRAM_VERSION: &str = env!("CARGO_PKG_VERSION");
