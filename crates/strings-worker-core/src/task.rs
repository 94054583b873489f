use crate::{TaskError, Result, MAX_PAYLOAD_SIZE, TASK_TYPE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a task
pub type TaskId = Uuid;

/// Task type identifier
pub type TaskType = String;

/// Task payload (JSON bytes as produced by the pipeline)
pub type TaskPayload = Vec<u8>;

/// Task envelope as delivered by the broker.
///
/// The payload is opaque at this level; it only becomes a
/// [`TaskDescriptor`](crate::TaskDescriptor) once validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier
    pub id: TaskId,

    /// Task type name (e.g., "strings.extract")
    pub task_type: TaskType,

    /// Task payload (max 10MB)
    pub payload: TaskPayload,

    /// When the task was created
    pub created_at: DateTime<Utc>,

    /// Maximum number of retry attempts granted by the broker
    pub max_retries: u32,

    /// Current retry attempt number
    pub retry_count: u32,

    /// Timeout in seconds for a single tool run (0 = worker default)
    pub timeout_seconds: u32,
}

impl Task {
    /// Create a new task
    pub fn new(task_type: TaskType, payload: TaskPayload) -> Result<Self> {
        Self::builder(task_type, payload).build()
    }

    /// Create a strings extraction task from a JSON payload
    pub fn strings(payload: &serde_json::Value) -> Result<Self> {
        let bytes = serde_json::to_vec(payload)
            .map_err(|e| TaskError::InvalidPayload(e.to_string()))?;
        Self::new(TASK_TYPE.to_string(), bytes)
    }

    /// Create a new task builder
    pub fn builder(task_type: TaskType, payload: TaskPayload) -> TaskBuilder {
        TaskBuilder::new(task_type, payload)
    }

    /// Serialize task to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(TaskError::from)
    }

    /// Deserialize task from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(TaskError::from)
    }

    /// Check if the broker still grants another attempt
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// Builder for creating tasks with custom configuration
pub struct TaskBuilder {
    task_type: TaskType,
    payload: TaskPayload,
    id: Option<TaskId>,
    max_retries: u32,
    retry_count: u32,
    timeout_seconds: u32,
}

impl TaskBuilder {
    pub fn new(task_type: TaskType, payload: TaskPayload) -> Self {
        TaskBuilder {
            task_type,
            payload,
            id: None,
            max_retries: 3,
            retry_count: 0,
            timeout_seconds: 0,
        }
    }

    pub fn id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn timeout_seconds(mut self, timeout_seconds: u32) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn build(self) -> Result<Task> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(TaskError::PayloadTooLarge {
                max: MAX_PAYLOAD_SIZE,
                actual: self.payload.len(),
            });
        }

        Ok(Task {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            task_type: self.task_type,
            payload: self.payload,
            created_at: Utc::now(),
            max_retries: self.max_retries,
            retry_count: self.retry_count,
            timeout_seconds: self.timeout_seconds,
        })
    }
}
