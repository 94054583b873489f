use crate::broker::{Broker, BrokerError};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use strings_worker_core::Task;
use strings_worker_protocol::{
    AckResponse, ClaimTaskRequest, HeartbeatRequest, Message, MessageCodec,
    RegisterWorkerRequest, TaskProgressRequest, TaskResultRequest,
};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

struct ConnectionState {
    framed: Option<Framed<TcpStream, MessageCodec>>,
    closed: bool,
}

/// TCP connection to the broker.
///
/// Created with [`connect`](Self::connect) and torn down with
/// [`close`](Self::close). Requests are serialized: each one holds the
/// connection until its `Ack`/`Nack` arrives. A broken connection is
/// dropped and re-dialled on the next request; after `close` every request
/// fails with [`BrokerError::Shutdown`].
pub struct BrokerConnection {
    address: String,
    request_timeout: Duration,
    state: Mutex<ConnectionState>,
}

impl BrokerConnection {
    pub async fn connect(address: impl Into<String>) -> Result<Self, BrokerError> {
        let address = address.into();
        let framed = dial(&address).await?;
        info!("Connected to broker at {}", address);

        Ok(BrokerConnection {
            address,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            state: Mutex::new(ConnectionState {
                framed: Some(framed),
                closed: false,
            }),
        })
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Send one message and wait for the broker's answer
    pub async fn request(&self, message: Message) -> Result<Message, BrokerError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(BrokerError::Shutdown);
        }

        if state.framed.is_none() {
            debug!("Reconnecting to broker at {}", self.address);
            let framed = tokio::time::timeout(self.request_timeout, dial(&self.address))
                .await
                .map_err(|_| BrokerError::Timeout)??;
            state.framed = Some(framed);
        }
        let Some(framed) = state.framed.as_mut() else {
            return Err(BrokerError::Closed);
        };

        let pending = exchange(framed, message);
        let result = match tokio::time::timeout(self.request_timeout, pending).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Timeout),
        };

        if let Err(e) = &result {
            // Framing may be out of sync; start over on the next request
            warn!("Dropping broker connection: {}", e);
            state.framed = None;
        }
        result
    }

    pub async fn close(&self) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        state.closed = true;
        if let Some(mut framed) = state.framed.take() {
            framed.close().await?;
            info!("Closed broker connection");
        }
        Ok(())
    }
}

async fn dial(address: &str) -> Result<Framed<TcpStream, MessageCodec>, BrokerError> {
    let stream = TcpStream::connect(address).await?;
    stream.set_nodelay(true)?;
    Ok(Framed::new(stream, MessageCodec))
}

async fn exchange(
    framed: &mut Framed<TcpStream, MessageCodec>,
    message: Message,
) -> Result<Message, BrokerError> {
    framed.send(message).await?;
    match framed.next().await {
        Some(response) => Ok(response?),
        None => Err(BrokerError::Closed),
    }
}

fn unexpected(message: Message) -> BrokerError {
    BrokerError::UnexpectedResponse(format!("{:?}", message.message_type()))
}

#[async_trait]
impl Broker for BrokerConnection {
    async fn register(&self, request: RegisterWorkerRequest) -> Result<(), BrokerError> {
        match self.request(Message::RegisterWorker(request)).await? {
            Message::Ack(_) => Ok(()),
            Message::Nack(nack) => Err(BrokerError::Rejected(nack.error)),
            other => Err(unexpected(other)),
        }
    }

    async fn claim(&self, request: ClaimTaskRequest) -> Result<Option<Task>, BrokerError> {
        match self.request(Message::ClaimTask(request)).await? {
            Message::Ack(ack) => Ok(ack.task),
            Message::Nack(nack) => Err(BrokerError::Rejected(nack.error)),
            other => Err(unexpected(other)),
        }
    }

    async fn report(&self, request: TaskResultRequest) -> Result<AckResponse, BrokerError> {
        match self.request(Message::TaskResult(request)).await? {
            Message::Ack(ack) => Ok(ack),
            Message::Nack(nack) => Err(BrokerError::Rejected(nack.error)),
            other => Err(unexpected(other)),
        }
    }

    async fn progress(&self, request: TaskProgressRequest) -> Result<(), BrokerError> {
        match self.request(Message::TaskProgress(request)).await? {
            Message::Ack(_) => Ok(()),
            Message::Nack(nack) => Err(BrokerError::Rejected(nack.error)),
            other => Err(unexpected(other)),
        }
    }

    async fn heartbeat(&self, request: HeartbeatRequest) -> Result<(), BrokerError> {
        match self.request(Message::Heartbeat(request)).await? {
            Message::Ack(_) => Ok(()),
            Message::Nack(nack) => Err(BrokerError::Rejected(nack.error)),
            other => Err(unexpected(other)),
        }
    }
}
