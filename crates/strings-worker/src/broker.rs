use async_trait::async_trait;
use strings_worker_core::Task;
use strings_worker_protocol::{
    AckResponse, ClaimTaskRequest, HeartbeatRequest, ProtocolError, RegisterWorkerRequest,
    TaskProgressRequest, TaskResultRequest,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Broker rejected request: {0}")]
    Rejected(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Connection closed by broker")]
    Closed,

    #[error("Broker did not answer within the request timeout")]
    Timeout,

    #[error("Connection has been shut down")]
    Shutdown,
}

/// Requests the worker makes of the message broker
#[async_trait]
pub trait Broker: Send + Sync {
    async fn register(&self, request: RegisterWorkerRequest) -> Result<(), BrokerError>;

    /// `None` when nothing is queued
    async fn claim(&self, request: ClaimTaskRequest) -> Result<Option<Task>, BrokerError>;

    async fn report(&self, request: TaskResultRequest) -> Result<AckResponse, BrokerError>;

    async fn progress(&self, request: TaskProgressRequest) -> Result<(), BrokerError>;

    async fn heartbeat(&self, request: HeartbeatRequest) -> Result<(), BrokerError>;
}
