use strings_worker_core::TaskId;
use tokio::sync::mpsc;
use tracing::trace;

/// Strings extracted so far by a running task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub task_id: TaskId,
    pub extracted_strings: u64,
    /// Strings per second
    pub rate: u64,
}

impl ProgressUpdate {
    pub fn new(task_id: TaskId, extracted_strings: u64, elapsed_secs: f64) -> Self {
        let rate = if elapsed_secs > 0.0 {
            (extracted_strings as f64 / elapsed_secs) as u64
        } else {
            0
        };
        ProgressUpdate {
            task_id,
            extracted_strings,
            rate,
        }
    }
}

/// Receives progress while a tool runs. Must not block.
pub trait ProgressSink: Send + Sync {
    fn progress(&self, update: ProgressUpdate);
}

/// Queues updates for a forwarder task; drops them when the queue is full
#[derive(Debug, Clone)]
pub struct ChannelProgressSink {
    tx: mpsc::Sender<ProgressUpdate>,
}

impl ChannelProgressSink {
    pub fn new(tx: mpsc::Sender<ProgressUpdate>) -> Self {
        ChannelProgressSink { tx }
    }
}

impl ProgressSink for ChannelProgressSink {
    fn progress(&self, update: ProgressUpdate) {
        if let Err(e) = self.tx.try_send(update) {
            trace!(task_id = %update.task_id, "Dropped progress update: {}", e);
        }
    }
}
