//! Procyon core: a reusable external-process execution subsystem.
//!
//! Launches a child process with fully configurable input/output wiring,
//! concurrently drains its stdout and stderr so the child can never
//! deadlock on a full pipe, captures a bounded truncation-aware copy of
//! each stream, optionally mirrors output to files and/or the parent's own
//! console, and supports asynchronous forced termination from a different
//! thread than the one running the process.
//!
//! The subsystem never interprets command semantics; it is command-agnostic.
//!
//! ```rust,no_run
//! use procyon_core::{ProcessController, ProcessSpec};
//!
//! # async fn run() -> procyon_core::Result<()> {
//! let mut spec = ProcessSpec::new(["echo", "Hello World"]);
//! spec.stdout.set_buffer_size(-1);
//!
//! let controller = ProcessController::new();
//! let output = controller.exec(&spec).await?;
//! assert_eq!(output.exit_value(), 0);
//! assert_eq!(output.stdout().as_text(), "Hello World\n");
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod controller;
pub mod error;
pub mod output;
mod relay;
pub mod spec;

pub use capture::StreamOutput;
pub use controller::{Lifecycle, ProcessController};
pub use error::{ExecError, Result};
pub use output::{Completion, ProcessOutput};
pub use spec::{CaptureLimit, ProcessSpec, StdinSource, StreamSettings};

/// Core utilities and helper functions
pub mod utils {
    use tracing::info;

    /// Initialize tracing for the application
    pub fn init_tracing(level: &str) -> crate::Result<()> {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        fmt()
            .with_env_filter(filter)
            .try_init()
            .map_err(|e| crate::ExecError::Init(e.to_string()))?;

        info!("Tracing initialized with level: {}", level);
        Ok(())
    }
}
