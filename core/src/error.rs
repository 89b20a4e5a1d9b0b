//! Error types for the process execution subsystem

use thiserror::Error;

/// Errors raised by process execution.
///
/// Only conditions that prevent producing a well-formed [`crate::ProcessOutput`]
/// are errors. A nonzero exit status or a forcibly destroyed process is data,
/// not an error.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Invalid process settings: {0}")]
    InvalidSpec(String),

    #[error("Failed to launch process: {0}")]
    Launch(String),

    #[error("Failed to wait for process: {0}")]
    Wait(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Initialization error: {0}")]
    Init(String),
}

impl ExecError {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            ExecError::InvalidSpec(_) => "EXEC001",
            ExecError::Launch(_) => "EXEC002",
            ExecError::Wait(_) => "EXEC003",
            ExecError::Io(_) => "EXEC004",
            ExecError::Init(_) => "EXEC005",
        }
    }
}

/// Result type for process execution operations
pub type Result<T> = std::result::Result<T, ExecError>;
