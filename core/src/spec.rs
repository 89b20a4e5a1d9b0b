//! Process invocation settings
//!
//! A [`ProcessSpec`] describes one invocation of an external command: the
//! argv vector, working directory, environment, the stdin source, and the
//! capture/mirror/echo destinations for stdout and stderr. It is built by
//! the caller, passed to [`crate::ProcessController::exec`], and read-only
//! for the duration of the call.

use crate::{ExecError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// How much of a stream to retain in memory.
///
/// The relay always drains the stream to end-of-file regardless of the
/// limit; the limit only bounds what is retained for the caller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CaptureLimit {
    /// Retain every byte the child produces
    Unbounded,
    /// Retain at most the first `n` bytes; zero drains without retaining
    Bytes(usize),
}

impl Default for CaptureLimit {
    fn default() -> Self {
        CaptureLimit::Bytes(0)
    }
}

/// Where the child's stdin comes from.
///
/// The variants are mutually exclusive by construction; assigning one
/// source replaces whatever was set before.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum StdinSource {
    /// The child observes end-of-input immediately
    #[default]
    None,
    /// All bytes are written to the child's stdin, then the pipe is closed
    Buffer(Vec<u8>),
    /// The file's contents are streamed to the child's stdin, then the pipe is closed
    File(PathBuf),
}

/// Capture, mirror, and echo destinations for one output stream
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamSettings {
    /// In-memory capture limit for this stream
    #[serde(default)]
    pub capture: CaptureLimit,

    /// Mirror file receiving the complete stream, untruncated, created at relay start
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_file: Option<PathBuf>,

    /// Also write every byte to the parent's own corresponding standard stream
    #[serde(default)]
    pub echo_to_console: bool,
}

impl StreamSettings {
    /// Set the capture limit from a conventional signed buffer size:
    /// negative is unbounded, `n >= 0` retains at most `n` bytes.
    pub fn set_buffer_size(&mut self, size: isize) -> &mut Self {
        self.capture = if size < 0 {
            CaptureLimit::Unbounded
        } else {
            CaptureLimit::Bytes(size as usize)
        };
        self
    }
}

/// Complete settings for one external-process invocation
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSpec {
    /// Argv vector; element 0 is the executable, the rest are literal
    /// arguments passed to the OS exactly as given (no shell expansion)
    pub command: Vec<String>,

    /// Working directory for the child; absent inherits the caller's
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,

    /// Child environment. `None` inherits the parent environment unchanged;
    /// `Some(map)` replaces the entire child environment with exactly `map`.
    /// Callers wanting "inherit plus overrides" must copy the parent
    /// environment themselves and add to the copy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<HashMap<String, String>>,

    /// Route stderr bytes into the stdout destination set; stderr's own
    /// capture buffer and mirror file stay empty
    #[serde(default)]
    pub redirect_error_stream: bool,

    /// Source for the child's stdin
    #[serde(default)]
    pub stdin: StdinSource,

    /// Destinations for the child's stdout
    #[serde(default)]
    pub stdout: StreamSettings,

    /// Destinations for the child's stderr
    #[serde(default)]
    pub stderr: StreamSettings,
}

impl ProcessSpec {
    /// Create settings for the given argv vector with all destinations at
    /// their defaults (drain and discard, no mirror file, no echo).
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            working_directory: None,
            environment: None,
            redirect_error_stream: false,
            stdin: StdinSource::None,
            stdout: StreamSettings::default(),
            stderr: StreamSettings::default(),
        }
    }

    /// Feed the child's stdin from an in-memory buffer, replacing any
    /// previously configured source.
    pub fn set_stdin_buffer(&mut self, bytes: impl Into<Vec<u8>>) -> &mut Self {
        self.stdin = StdinSource::Buffer(bytes.into());
        self
    }

    /// Feed the child's stdin from a file, replacing any previously
    /// configured source.
    pub fn set_stdin_file(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.stdin = StdinSource::File(path.into());
        self
    }

    /// Fail fast on malformed settings, before any OS resource is allocated.
    pub fn validate(&self) -> Result<()> {
        if self.command.is_empty() {
            return Err(ExecError::InvalidSpec(
                "command must not be empty".to_string(),
            ));
        }
        if self.command[0].is_empty() {
            return Err(ExecError::InvalidSpec(
                "executable name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
