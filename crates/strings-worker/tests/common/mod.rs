#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use strings_worker::{Broker, BrokerError, RunError, ToolInvocation, ToolOutput, ToolRunner};
use strings_worker_core::Task;
use strings_worker_protocol::{
    AckResponse, ClaimTaskRequest, HeartbeatRequest, RegisterWorkerRequest, TaskProgressRequest,
    TaskResultRequest,
};

/// Broker double holding its queue in memory
#[derive(Default)]
pub struct MemoryBroker {
    pub queue: Mutex<VecDeque<Task>>,
    pub reports: Mutex<Vec<TaskResultRequest>>,
    pub progress: Mutex<Vec<TaskProgressRequest>>,
    pub heartbeats: AtomicUsize,
}

impl MemoryBroker {
    pub fn with_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        MemoryBroker {
            queue: Mutex::new(tasks.into_iter().collect()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn register(&self, _: RegisterWorkerRequest) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn claim(&self, _: ClaimTaskRequest) -> Result<Option<Task>, BrokerError> {
        Ok(self.queue.lock().pop_front())
    }

    async fn report(&self, request: TaskResultRequest) -> Result<AckResponse, BrokerError> {
        self.reports.lock().push(request);
        Ok(AckResponse::default())
    }

    async fn progress(&self, request: TaskProgressRequest) -> Result<(), BrokerError> {
        self.progress.lock().push(request);
        Ok(())
    }

    async fn heartbeat(&self, _: HeartbeatRequest) -> Result<(), BrokerError> {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Counts invocations before delegating to another runner
pub struct CountingRunner<R> {
    inner: R,
    pub calls: AtomicUsize,
}

impl<R> CountingRunner<R> {
    pub fn new(inner: R) -> Self {
        CountingRunner {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<R: ToolRunner> ToolRunner for CountingRunner<R> {
    async fn run(
        &self,
        invocation: &ToolInvocation,
        lines: Arc<AtomicU64>,
    ) -> Result<ToolOutput, RunError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.run(invocation, lines).await
    }
}

/// Write an executable shell script standing in for the tool
#[cfg(unix)]
pub fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Whether the real `strings` binary can be run
pub fn strings_installed() -> bool {
    std::process::Command::new("strings")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// True while `pid` exists and is not a zombie
#[cfg(target_os = "linux")]
pub fn is_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit_once(") ")
            .map(|(_, rest)| !rest.starts_with('Z'))
            .unwrap_or(false),
        Err(_) => false,
    }
}

pub fn write_input(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}
