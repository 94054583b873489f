use crate::{ErrorKind, TaskError, TaskId, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a task inside the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Claimed from the broker
    Received,
    /// Payload and inputs are being checked
    Validating,
    /// Tool is running
    Running,
    Succeeded,
    Failed(ErrorKind),
    /// Broker acknowledged the result
    Reported,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Received => "received",
            TaskState::Validating => "validating",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed(_) => "failed",
            TaskState::Reported => "reported",
        }
    }

    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Received, Validating)
                | (Validating, Running)
                | (Validating, Failed(_))
                | (Running, Succeeded)
                | (Running, Failed(_))
                | (Succeeded, Reported)
                | (Failed(_), Reported)
        )
    }

    /// Succeeded or failed: the outcome is known
    pub fn is_settled(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed(_))
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Failed(kind) => write!(f, "failed({})", kind),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Tracks one task through its states, rejecting skipped steps
#[derive(Debug, Clone)]
pub struct TaskLifecycle {
    task_id: TaskId,
    state: TaskState,
}

impl TaskLifecycle {
    pub fn new(task_id: TaskId) -> Self {
        TaskLifecycle {
            task_id,
            state: TaskState::Received,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn advance(&mut self, next: TaskState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(TaskError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }
}
