mod task;
mod encoding;
mod descriptor;
mod error;
mod metadata;
mod output;
mod result;
mod retry;
mod state;

pub use task::{Task, TaskBuilder, TaskId, TaskType, TaskPayload};
pub use encoding::StringsEncoding;
pub use descriptor::{ExtractOptions, InputFile, RawTaskPayload, TaskDescriptor};
pub use error::{ErrorKind, ExecutionError, TaskError, Result};
pub use metadata::{TaskConfigOption, TaskMetadata};
pub use output::{parse_strings_output, CapturedOutput, ExtractedString, OutputBuffer, truncation_marker};
pub use result::{ExecutionResult, ResultArtifact, TaskResultPayload, ToolRun};
pub use retry::RetryPolicy;
pub use state::{TaskLifecycle, TaskState};

/// Task type routed to this worker by the broker.
pub const TASK_TYPE: &str = "strings.extract";

pub const MAX_PAYLOAD_SIZE: usize = 10 * 1024 * 1024; // 10MB
