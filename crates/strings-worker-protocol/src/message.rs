use serde::{Deserialize, Serialize};
use strings_worker_core::{ErrorKind, Task, TaskId, TaskMetadata};

/// Message types for the TCP protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    RegisterWorker = 1,
    ClaimTask = 2,
    TaskResult = 3,
    Heartbeat = 4,
    Ack = 5,
    Nack = 6,
    TaskProgress = 7,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MessageType::RegisterWorker),
            2 => Some(MessageType::ClaimTask),
            3 => Some(MessageType::TaskResult),
            4 => Some(MessageType::Heartbeat),
            5 => Some(MessageType::Ack),
            6 => Some(MessageType::Nack),
            7 => Some(MessageType::TaskProgress),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// Protocol messages.
///
/// Every worker request is answered by exactly one `Ack` or `Nack`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Worker announces itself and the task types it serves
    RegisterWorker(RegisterWorkerRequest),

    /// Worker claims a task
    ClaimTask(ClaimTaskRequest),

    /// Worker reports task result
    TaskResult(TaskResultRequest),

    /// Worker heartbeat
    Heartbeat(HeartbeatRequest),

    /// Positive acknowledgment
    Ack(AckResponse),

    /// Negative acknowledgment
    Nack(NackResponse),

    /// Progress of a running task
    TaskProgress(TaskProgressRequest),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::RegisterWorker(_) => MessageType::RegisterWorker,
            Message::ClaimTask(_) => MessageType::ClaimTask,
            Message::TaskResult(_) => MessageType::TaskResult,
            Message::Heartbeat(_) => MessageType::Heartbeat,
            Message::Ack(_) => MessageType::Ack,
            Message::Nack(_) => MessageType::Nack,
            Message::TaskProgress(_) => MessageType::TaskProgress,
        }
    }

    pub fn ack() -> Self {
        Message::Ack(AckResponse::default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterWorkerRequest {
    pub worker_id: String,
    pub concurrency: usize,
    pub task_types: Vec<TaskMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimTaskRequest {
    pub worker_id: String,
    /// Task types this worker can execute
    pub task_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskOutcome {
    Success {
        /// Base64 JSON `TaskResultPayload`
        result: String,
    },
    Failure {
        kind: ErrorKind,
        error: String,
        diagnostics: Option<String>,
        /// Broker should schedule another attempt
        retryable: bool,
    },
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResultRequest {
    pub task_id: TaskId,
    pub worker_id: String,
    pub outcome: TaskOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgressRequest {
    pub task_id: TaskId,
    pub worker_id: String,
    pub extracted_strings: u64,
    /// Strings per second since the run started
    pub rate: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: String,
    pub current_task_count: usize,
    pub cpu_usage_percent: f32,
    pub memory_usage_mb: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AckResponse {
    /// Optional task returned (e.g., for ClaimTask)
    pub task: Option<Task>,
    /// Optional message
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NackResponse {
    pub error: String,
}
