use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Payload size exceeds maximum allowed size of {max} bytes (got {actual})")]
    PayloadTooLarge { max: usize, actual: usize },

    #[error("Unsupported task type: {0}")]
    UnsupportedTaskType(String),

    #[error("Invalid task payload: {0}")]
    InvalidPayload(String),

    #[error("{0} is not a valid strings encoding name")]
    UnknownEncoding(String),

    #[error("Task has no input files")]
    NoInputFiles,

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, TaskError>;

/// Failure classes reported back to the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Payload could not be mapped to a task descriptor
    InvalidTask,
    /// Input file missing or unreadable
    InputUnavailable,
    /// Tool exceeded its wall-clock limit
    Timeout,
    /// Tool could not be started or exited nonzero
    ToolExecutionFailed,
    /// Extracted strings could not be stored
    ArtifactWriteFailed,
    /// Result could not be handed to the broker
    ReportingFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidTask => "invalid_task",
            ErrorKind::InputUnavailable => "input_unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ToolExecutionFailed => "tool_execution_failed",
            ErrorKind::ArtifactWriteFailed => "artifact_write_failed",
            ErrorKind::ReportingFailed => "reporting_failed",
        }
    }

    /// Whether another attempt on the same input can succeed.
    ///
    /// `ReportingFailed` is excluded: the broker redelivers on its own and the
    /// worker never re-executes for it.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::ArtifactWriteFailed)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single task execution
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
    /// Captured tool stderr, when there is any
    pub diagnostics: Option<String>,
}

impl ExecutionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        ExecutionError {
            kind,
            message: message.into(),
            diagnostics: None,
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: impl Into<String>) -> Self {
        let diagnostics = diagnostics.into();
        if !diagnostics.is_empty() {
            self.diagnostics = Some(diagnostics);
        }
        self
    }

    pub fn invalid_task(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidTask, message)
    }

    pub fn input_unavailable(path: &Path, reason: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::InputUnavailable,
            format!("Input file {} is unavailable: {}", path.display(), reason),
        )
    }

    pub fn timeout(limit: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("strings timed out after {:?}", limit),
        )
    }

    pub fn tool_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ToolExecutionFailed, message)
    }

    pub fn artifact_write(path: &Path, reason: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::ArtifactWriteFailed,
            format!("Failed to write artifact {}: {}", path.display(), reason),
        )
    }
}

impl From<TaskError> for ExecutionError {
    fn from(err: TaskError) -> Self {
        ExecutionError::invalid_task(err.to_string())
    }
}
