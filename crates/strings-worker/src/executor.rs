use crate::artifact::{ArtifactStore, NewArtifact};
use crate::config::ExtractionConfig;
use crate::progress::{ProgressSink, ProgressUpdate};
use crate::runner::{RunError, ToolInvocation, ToolOutput, ToolRunner};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use strings_worker_core::{
    ExecutionError, ExecutionResult, ResultArtifact, TaskDescriptor, TaskError, TaskLifecycle,
    TaskState, ToolRun,
};
use tracing::{debug, error, info, warn};

/// Runs the extraction tool for every input/encoding pair of a task
pub struct TaskExecutor {
    runner: Arc<dyn ToolRunner>,
    store: Arc<dyn ArtifactStore>,
    config: ExtractionConfig,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl TaskExecutor {
    pub fn new(
        runner: Arc<dyn ToolRunner>,
        store: Arc<dyn ArtifactStore>,
        config: ExtractionConfig,
    ) -> Self {
        TaskExecutor {
            runner,
            store,
            config,
            progress: None,
        }
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Execute a task
    pub async fn execute(
        &self,
        descriptor: &TaskDescriptor,
    ) -> Result<ExecutionResult, ExecutionError> {
        let mut lifecycle = TaskLifecycle::new(descriptor.task_id());
        self.execute_tracked(descriptor, &mut lifecycle).await
    }

    /// Execute a task, moving `lifecycle` from `Received` to a settled state
    pub async fn execute_tracked(
        &self,
        descriptor: &TaskDescriptor,
        lifecycle: &mut TaskLifecycle,
    ) -> Result<ExecutionResult, ExecutionError> {
        lifecycle.advance(TaskState::Validating)?;
        if let Err(e) = self.validate(descriptor).await {
            lifecycle.advance(TaskState::Failed(e.kind))?;
            return Err(e);
        }

        lifecycle.advance(TaskState::Running)?;
        match self.run_all(descriptor).await {
            Ok(result) => {
                lifecycle.advance(TaskState::Succeeded)?;
                Ok(result)
            }
            Err(e) => {
                lifecycle.advance(TaskState::Failed(e.kind))?;
                Err(e)
            }
        }
    }

    /// Settle a task whose payload could not be turned into a descriptor
    pub fn reject(&self, lifecycle: &mut TaskLifecycle, error: TaskError) -> ExecutionError {
        let error = ExecutionError::from(error);
        for next in [TaskState::Validating, TaskState::Failed(error.kind)] {
            if let Err(e) = lifecycle.advance(next) {
                error!(task_id = %lifecycle.task_id(), "{}", e);
            }
        }
        error
    }

    /// Every input must be an existing, readable regular file
    async fn validate(&self, descriptor: &TaskDescriptor) -> Result<(), ExecutionError> {
        for input in descriptor.inputs() {
            let metadata = tokio::fs::metadata(&input.path)
                .await
                .map_err(|e| ExecutionError::input_unavailable(&input.path, e))?;
            if !metadata.is_file() {
                return Err(ExecutionError::input_unavailable(
                    &input.path,
                    "not a regular file",
                ));
            }

            // Opened only to prove readability; closed before the tool runs
            tokio::fs::File::open(&input.path)
                .await
                .map_err(|e| ExecutionError::input_unavailable(&input.path, e))?;
        }
        Ok(())
    }

    /// All pairs or nothing: artifacts of earlier pairs are discarded when a
    /// later one fails
    async fn run_all(&self, descriptor: &TaskDescriptor) -> Result<ExecutionResult, ExecutionError> {
        let start = Instant::now();
        let mut runs = Vec::new();
        let mut artifacts = Vec::new();

        if let Err(e) = self.run_pairs(descriptor, &mut runs, &mut artifacts).await {
            for artifact in &artifacts {
                if let Err(io) = self.store.discard(artifact).await {
                    warn!(
                        task_id = %descriptor.task_id(),
                        path = %artifact.path.display(),
                        "Failed to discard artifact: {}", io
                    );
                }
            }
            return Err(e);
        }

        Ok(ExecutionResult {
            task_id: descriptor.task_id(),
            workflow_id: descriptor.workflow_id().map(str::to_string),
            runs,
            artifacts,
            elapsed: start.elapsed(),
        })
    }

    async fn run_pairs(
        &self,
        descriptor: &TaskDescriptor,
        runs: &mut Vec<ToolRun>,
        artifacts: &mut Vec<ResultArtifact>,
    ) -> Result<(), ExecutionError> {
        let task_id = descriptor.task_id();
        let output_dir = descriptor
            .output_dir()
            .unwrap_or(self.config.output_dir.as_path());
        let timeout = descriptor.timeout().unwrap_or_else(|| self.config.timeout());

        for &encoding in &descriptor.options().encodings {
            for input in descriptor.inputs() {
                let invocation = ToolInvocation::strings(
                    &self.config.tool_path,
                    &input.path,
                    encoding,
                    descriptor.options(),
                    timeout,
                );
                debug!(%task_id, command = %invocation.command_line(), "Running strings");

                let output = self.run_with_progress(descriptor, &invocation).await?;
                let run = ToolRun {
                    input: input.clone(),
                    encoding,
                    exit_code: output.exit_code,
                    stdout: output.stdout,
                    stderr: output.stderr,
                    elapsed: output.elapsed,
                };

                if !run.succeeded() {
                    let status = match run.exit_code {
                        Some(code) => format!("exit code {}", code),
                        None => "a signal".to_string(),
                    };
                    return Err(ExecutionError::tool_failed(format!(
                        "strings terminated with {} on {}",
                        status,
                        input.path.display()
                    ))
                    .with_diagnostics(run.stderr.text()));
                }

                let artifact = self
                    .store
                    .store(NewArtifact {
                        output_dir,
                        input,
                        encoding,
                        contents: &run.stdout,
                    })
                    .await?;

                info!(
                    %task_id,
                    input = %input.display_name,
                    %encoding,
                    strings = artifact.string_count,
                    truncated = artifact.truncated,
                    elapsed_ms = run.elapsed.as_millis() as u64,
                    "Extracted strings"
                );

                artifacts.push(artifact);
                runs.push(run);
            }
        }

        Ok(())
    }

    async fn run_with_progress(
        &self,
        descriptor: &TaskDescriptor,
        invocation: &ToolInvocation,
    ) -> Result<ToolOutput, ExecutionError> {
        let lines = Arc::new(AtomicU64::new(0));
        let run = self.runner.run(invocation, lines.clone());

        let result = match &self.progress {
            None => run.await,
            Some(sink) => {
                tokio::pin!(run);
                let started = Instant::now();
                let period = self.config.progress_interval();
                let mut ticker =
                    tokio::time::interval_at(tokio::time::Instant::now() + period, period);

                loop {
                    tokio::select! {
                        result = &mut run => break result,
                        _ = ticker.tick() => {
                            sink.progress(ProgressUpdate::new(
                                descriptor.task_id(),
                                lines.load(Ordering::Relaxed),
                                started.elapsed().as_secs_f64(),
                            ));
                        }
                    }
                }
            }
        };

        result.map_err(|e| match e {
            RunError::Timeout(limit) => ExecutionError::timeout(limit),
            other => ExecutionError::tool_failed(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::FsArtifactStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::path::PathBuf;
    use std::time::Duration;
    use strings_worker_core::{
        CapturedOutput, ErrorKind, ExtractOptions, InputFile, StringsEncoding,
    };
    use uuid::Uuid;

    /// Replays canned tool results and records every invocation
    struct ScriptedRunner {
        exit_code: Option<i32>,
        stdout: &'static [u8],
        stderr: &'static [u8],
        delay: Duration,
        timeout: bool,
        /// Inputs whose path contains this exit 1
        fail_on: Option<&'static str>,
        calls: Mutex<Vec<ToolInvocation>>,
    }

    impl ScriptedRunner {
        fn ok(stdout: &'static [u8]) -> Self {
            ScriptedRunner {
                exit_code: Some(0),
                stdout,
                stderr: b"",
                delay: Duration::ZERO,
                timeout: false,
                fail_on: None,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ToolRunner for ScriptedRunner {
        async fn run(
            &self,
            invocation: &ToolInvocation,
            lines: Arc<AtomicU64>,
        ) -> Result<ToolOutput, RunError> {
            self.calls.lock().push(invocation.clone());
            lines.store(
                self.stdout.iter().filter(|&&b| b == b'\n').count() as u64,
                Ordering::Relaxed,
            );
            tokio::time::sleep(self.delay).await;
            if self.timeout {
                return Err(RunError::Timeout(invocation.timeout));
            }
            let failing = self.fail_on.is_some_and(|needle| {
                invocation
                    .args
                    .last()
                    .is_some_and(|path| path.to_string_lossy().contains(needle))
            });
            Ok(ToolOutput {
                exit_code: if failing { Some(1) } else { self.exit_code },
                stdout: CapturedOutput {
                    bytes: self.stdout.to_vec(),
                    ..Default::default()
                },
                stderr: CapturedOutput {
                    bytes: self.stderr.to_vec(),
                    ..Default::default()
                },
                elapsed: self.delay,
            })
        }
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<ProgressUpdate>>);

    impl ProgressSink for RecordingSink {
        fn progress(&self, update: ProgressUpdate) {
            self.0.lock().push(update);
        }
    }

    fn config(output_dir: PathBuf) -> ExtractionConfig {
        ExtractionConfig {
            output_dir,
            progress_interval_ms: 20,
            ..Default::default()
        }
    }

    fn input(dir: &std::path::Path, name: &str, contents: &[u8]) -> InputFile {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        InputFile::new(path)
    }

    #[tokio::test]
    async fn test_missing_input_never_runs_tool() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::ok(b""));
        let executor = TaskExecutor::new(
            runner.clone(),
            Arc::new(FsArtifactStore::new()),
            config(dir.path().to_path_buf()),
        );

        let descriptor = TaskDescriptor::new(
            Uuid::new_v4(),
            vec![InputFile::new("/no/such/file")],
            ExtractOptions::default(),
        )
        .unwrap();

        let mut lifecycle = TaskLifecycle::new(descriptor.task_id());
        let err = executor
            .execute_tracked(&descriptor, &mut lifecycle)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::InputUnavailable);
        assert_eq!(lifecycle.state(), TaskState::Failed(ErrorKind::InputUnavailable));
        assert!(runner.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_directory_input_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::ok(b""));
        let executor = TaskExecutor::new(
            runner.clone(),
            Arc::new(FsArtifactStore::new()),
            config(dir.path().join("out")),
        );

        let descriptor = TaskDescriptor::new(
            Uuid::new_v4(),
            vec![InputFile::new(dir.path())],
            ExtractOptions::default(),
        )
        .unwrap();

        let err = executor.execute(&descriptor).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InputUnavailable);
        assert!(runner.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_one_artifact_per_input_and_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::ok(b"      0 hello\n      7 world\n"));
        let executor = TaskExecutor::new(
            runner.clone(),
            Arc::new(FsArtifactStore::new()),
            config(dir.path().join("default-out")),
        );

        let task_out = dir.path().join("task-out");
        let descriptor = TaskDescriptor::new(
            Uuid::new_v4(),
            vec![
                input(dir.path(), "a.bin", b"hello\0world"),
                input(dir.path(), "b.bin", b"hello\0world"),
            ],
            ExtractOptions {
                min_length: Some(5),
                encodings: vec![StringsEncoding::Ascii, StringsEncoding::Utf16Le],
            },
        )
        .unwrap()
        .with_output_dir(&task_out)
        .with_workflow_id("wf-9");

        let result = executor.execute(&descriptor).await.unwrap();

        assert_eq!(result.runs.len(), 4);
        assert_eq!(result.artifacts.len(), 4);
        assert_eq!(result.string_count(), 8);
        assert_eq!(result.workflow_id.as_deref(), Some("wf-9"));

        let names: Vec<_> = result.artifacts.iter().map(|a| a.display_name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "a.bin.ASCII_strings",
                "b.bin.ASCII_strings",
                "a.bin.UTF16LE_strings",
                "b.bin.UTF16LE_strings",
            ]
        );
        assert!(result.artifacts.iter().all(|a| a.path.starts_with(&task_out)));

        let calls = runner.calls.lock();
        assert_eq!(calls.len(), 4);
        let first = calls[0].command_line();
        assert!(first.contains("-n 5"), "{}", first);
        assert!(first.contains("--encoding s"), "{}", first);
        assert!(calls[2].command_line().contains("--encoding l"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner {
            exit_code: Some(1),
            stderr: b"strings: a.bin: file format not recognized\n",
            ..ScriptedRunner::ok(b"")
        });
        let executor = TaskExecutor::new(
            runner,
            Arc::new(FsArtifactStore::new()),
            config(dir.path().join("out")),
        );
        let descriptor = TaskDescriptor::new(
            Uuid::new_v4(),
            vec![input(dir.path(), "a.bin", b"x")],
            ExtractOptions::default(),
        )
        .unwrap();

        let err = executor.execute(&descriptor).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ToolExecutionFailed);
        assert!(err.message.contains("exit code 1"));
        assert_eq!(
            err.diagnostics.as_deref(),
            Some("strings: a.bin: file format not recognized\n")
        );
        assert!(!dir.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_later_failure_discards_earlier_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner {
            fail_on: Some("bad"),
            ..ScriptedRunner::ok(b"      0 hello\n")
        });
        let out = dir.path().join("out");
        let executor = TaskExecutor::new(
            runner.clone(),
            Arc::new(FsArtifactStore::new()),
            config(out.clone()),
        );
        let descriptor = TaskDescriptor::new(
            Uuid::new_v4(),
            vec![
                input(dir.path(), "good.bin", b"hello"),
                input(dir.path(), "bad.bin", b"hello"),
            ],
            ExtractOptions::default(),
        )
        .unwrap();

        let err = executor.execute(&descriptor).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::ToolExecutionFailed);
        assert_eq!(runner.calls.lock().len(), 2);
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_settles_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner {
            timeout: true,
            ..ScriptedRunner::ok(b"")
        });
        let executor = TaskExecutor::new(
            runner,
            Arc::new(FsArtifactStore::new()),
            config(dir.path().join("out")),
        );
        let descriptor = TaskDescriptor::new(
            Uuid::new_v4(),
            vec![input(dir.path(), "a.bin", b"x")],
            ExtractOptions::default(),
        )
        .unwrap()
        .with_timeout(Duration::from_secs(7));

        let mut lifecycle = TaskLifecycle::new(descriptor.task_id());
        let err = executor
            .execute_tracked(&descriptor, &mut lifecycle)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(err.message.contains("7s"));
        assert_eq!(lifecycle.state(), TaskState::Failed(ErrorKind::Timeout));
    }

    #[tokio::test]
    async fn test_progress_reported_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner {
            delay: Duration::from_millis(150),
            ..ScriptedRunner::ok(b"      0 hello\n      7 world\n")
        });
        let sink = Arc::new(RecordingSink::default());
        let executor = TaskExecutor::new(
            runner,
            Arc::new(FsArtifactStore::new()),
            config(dir.path().join("out")),
        )
        .with_progress(sink.clone());

        let descriptor = TaskDescriptor::new(
            Uuid::new_v4(),
            vec![input(dir.path(), "a.bin", b"x")],
            ExtractOptions::default(),
        )
        .unwrap();

        executor.execute(&descriptor).await.unwrap();

        let updates = sink.0.lock();
        assert!(!updates.is_empty());
        assert!(updates.iter().all(|u| u.task_id == descriptor.task_id()));
        assert_eq!(updates.last().unwrap().extracted_strings, 2);
    }

    #[tokio::test]
    async fn test_reject_settles_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let executor = TaskExecutor::new(
            Arc::new(ScriptedRunner::ok(b"")),
            Arc::new(FsArtifactStore::new()),
            config(dir.path().to_path_buf()),
        );

        let mut lifecycle = TaskLifecycle::new(Uuid::new_v4());
        let err = executor.reject(&mut lifecycle, TaskError::NoInputFiles);

        assert_eq!(err.kind, ErrorKind::InvalidTask);
        assert_eq!(lifecycle.state(), TaskState::Failed(ErrorKind::InvalidTask));
    }
}
