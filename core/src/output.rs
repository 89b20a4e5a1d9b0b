//! Immutable result of one process execution

use crate::capture::StreamOutput;

/// How the child process came to an end.
///
/// Forced destruction is a completion outcome, not an error; the original
/// contract only distinguished it through a nonzero exit value, so the
/// tri-state is exposed explicitly while [`ProcessOutput::exit_value`]
/// keeps the conventional integer view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The child exited on its own with the given status code
    Exited { code: i32 },
    /// The child was killed by a signal not requested through
    /// [`crate::ProcessController::try_destroy`]
    Signaled { signal: i32 },
    /// The child was killed as a result of
    /// [`crate::ProcessController::try_destroy`]
    Destroyed { signal: i32 },
}

/// Exit outcome plus the captured stdout and stderr of one finished process.
#[derive(Debug)]
pub struct ProcessOutput {
    completion: Completion,
    stdout: StreamOutput,
    stderr: StreamOutput,
}

impl ProcessOutput {
    pub(crate) fn new(completion: Completion, stdout: StreamOutput, stderr: StreamOutput) -> Self {
        Self {
            completion,
            stdout,
            stderr,
        }
    }

    pub fn completion(&self) -> Completion {
        self.completion
    }

    /// Conventional integer exit status: the code for a normal exit,
    /// `128 + signal` for a killed process. Nonzero for every killed
    /// process, including destroyed ones.
    pub fn exit_value(&self) -> i32 {
        match self.completion {
            Completion::Exited { code } => code,
            Completion::Signaled { signal } | Completion::Destroyed { signal } => 128 + signal,
        }
    }

    /// Whether the child exited normally with status zero.
    pub fn success(&self) -> bool {
        matches!(self.completion, Completion::Exited { code: 0 })
    }

    /// Whether the child was killed because `try_destroy` was called.
    pub fn destroyed(&self) -> bool {
        matches!(self.completion, Completion::Destroyed { .. })
    }

    /// Captured stdout.
    pub fn stdout(&self) -> &StreamOutput {
        &self.stdout
    }

    /// Captured stderr. Empty, with `truncated == false`, when
    /// `redirect_error_stream` routed stderr into the stdout destinations.
    pub fn stderr(&self) -> &StreamOutput {
        &self.stderr
    }
}
