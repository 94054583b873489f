use crate::broker::{Broker, BrokerError};
use std::sync::Arc;
use strings_worker_core::{
    ErrorKind, ExecutionError, ExecutionResult, RetryPolicy, Task, TaskError, TaskId,
};
use strings_worker_protocol::{AckResponse, TaskOutcome, TaskResultRequest};
use thiserror::Error;
use tracing::debug;

/// The result could not be handed to the broker.
///
/// Never a reason to run the task again: the broker redelivers tasks whose
/// result it did not receive.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to report result of task {task_id}: {source}")]
    Broker {
        task_id: TaskId,
        #[source]
        source: BrokerError,
    },

    #[error("Failed to encode result of task {task_id}: {source}")]
    Encode {
        task_id: TaskId,
        #[source]
        source: TaskError,
    },
}

impl ReportError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ReportingFailed
    }
}

/// Turns execution results into result messages for the broker
pub struct Reporter {
    broker: Arc<dyn Broker>,
    worker_id: String,
    retry_policy: RetryPolicy,
}

impl Reporter {
    pub fn new(broker: Arc<dyn Broker>, worker_id: impl Into<String>, retry_policy: RetryPolicy) -> Self {
        Reporter {
            broker,
            worker_id: worker_id.into(),
            retry_policy,
        }
    }

    pub fn outcome(
        &self,
        task: &Task,
        result: &Result<ExecutionResult, ExecutionError>,
    ) -> Result<TaskOutcome, ReportError> {
        match result {
            Ok(execution) => {
                let encoded = execution
                    .to_payload()
                    .encode()
                    .map_err(|source| ReportError::Encode {
                        task_id: task.id,
                        source,
                    })?;
                Ok(TaskOutcome::Success { result: encoded })
            }
            Err(error) => Ok(TaskOutcome::Failure {
                kind: error.kind,
                error: error.message.clone(),
                diagnostics: error.diagnostics.clone(),
                retryable: self.retry_policy.should_retry(error.kind, task),
            }),
        }
    }

    pub async fn report(
        &self,
        task: &Task,
        result: &Result<ExecutionResult, ExecutionError>,
    ) -> Result<AckResponse, ReportError> {
        let outcome = self.outcome(task, result)?;
        debug!(task_id = %task.id, success = outcome.is_success(), "Reporting task result");

        self.broker
            .report(TaskResultRequest {
                task_id: task.id,
                worker_id: self.worker_id.clone(),
                outcome,
            })
            .await
            .map_err(|source| ReportError::Broker {
                task_id: task.id,
                source,
            })
    }
}
