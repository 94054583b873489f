//! Retry classification for failed executions.

use crate::{ErrorKind, Task};

/// Decides whether a failed task goes back to the broker for another attempt.
///
/// Only transient failures are retried, and only while both the worker's
/// limit and the task's own `max_retries` allow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_transient_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_transient_retries: 3,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_transient_retries: u32) -> Self {
        Self {
            max_transient_retries,
        }
    }

    pub fn should_retry(&self, kind: ErrorKind, task: &Task) -> bool {
        kind.is_transient()
            && task.can_retry()
            && task.retry_count < self.max_transient_retries
    }
}
