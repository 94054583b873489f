use crate::process::ProcessGroupGuard;
use async_trait::async_trait;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use strings_worker_core::{CapturedOutput, ExtractOptions, OutputBuffer, StringsEncoding};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

const READ_CHUNK: usize = 64 * 1024;

/// A single command line for the extraction tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub timeout: Duration,
}

impl ToolInvocation {
    /// `strings -a -t d [-n N] --encoding <code> -- <input>`
    pub fn strings(
        program: &Path,
        input: &Path,
        encoding: StringsEncoding,
        options: &ExtractOptions,
        timeout: Duration,
    ) -> Self {
        let mut args: Vec<OsString> = vec!["-a".into(), "-t".into(), "d".into()];
        if let Some(min_length) = options.min_length {
            args.push("-n".into());
            args.push(min_length.to_string().into());
        }
        args.push("--encoding".into());
        args.push(encoding.code().into());
        args.push("--".into());
        args.push(input.as_os_str().to_owned());

        ToolInvocation {
            program: program.to_path_buf(),
            args,
            timeout,
        }
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(|a| a.as_os_str()))
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// What the tool produced before it exited
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// `None` if the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: CapturedOutput,
    pub stderr: CapturedOutput,
    pub elapsed: Duration,
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error("Failed to start {program}: {source}")]
    Spawn { program: String, source: io::Error },

    #[error("Tool timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error while running tool: {0}")]
    Io(#[from] io::Error),
}

/// Runs the extraction tool
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run to completion. `lines` is updated with the number of stdout
    /// lines seen so far.
    async fn run(
        &self,
        invocation: &ToolInvocation,
        lines: Arc<AtomicU64>,
    ) -> Result<ToolOutput, RunError>;
}

/// Runs the tool as a child process with bounded capture
pub struct SubprocessRunner {
    max_stdout_bytes: usize,
    max_stderr_bytes: usize,
}

impl SubprocessRunner {
    pub fn new(max_stdout_bytes: usize, max_stderr_bytes: usize) -> Self {
        SubprocessRunner {
            max_stdout_bytes,
            max_stderr_bytes,
        }
    }
}

#[async_trait]
impl ToolRunner for SubprocessRunner {
    async fn run(
        &self,
        invocation: &ToolInvocation,
        lines: Arc<AtomicU64>,
    ) -> Result<ToolOutput, RunError> {
        let start = Instant::now();

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| RunError::Spawn {
            program: invocation.program.display().to_string(),
            source,
        })?;
        // Declared after `child` so it fires first when this future is dropped
        let mut group = ProcessGroupGuard::new(child.id());

        debug!(pid = ?child.id(), command = %invocation.command_line(), "Spawned tool");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stderr was not captured"))?;

        let stdout_limit = self.max_stdout_bytes;
        let stderr_limit = self.max_stderr_bytes;
        let completion = async {
            let (status, stdout, stderr) = tokio::join!(
                child.wait(),
                capture(stdout, stdout_limit, Some(lines)),
                capture(stderr, stderr_limit, None),
            );
            Ok::<_, io::Error>((status?, stdout?, stderr?))
        };

        let outcome = tokio::time::timeout(invocation.timeout, completion).await;

        match outcome {
            Ok(Ok((status, stdout, stderr))) => {
                // Descendants that let go of the pipes may still be running
                group.kill();
                if stdout.truncated {
                    warn!(
                        dropped_bytes = stdout.dropped_bytes,
                        "Tool output exceeded {} bytes, truncated", stdout_limit
                    );
                }
                Ok(ToolOutput {
                    exit_code: status.code(),
                    stdout,
                    stderr,
                    elapsed: start.elapsed(),
                })
            }
            Ok(Err(e)) => {
                group.kill();
                let _ = child.kill().await;
                Err(RunError::Io(e))
            }
            Err(_) => {
                // The group goes first: the leader is still unreaped, so the
                // id cannot have been recycled.
                group.kill();
                if let Err(e) = child.kill().await {
                    warn!("Failed to reap timed out tool: {}", e);
                }
                Err(RunError::Timeout(invocation.timeout))
            }
        }
    }
}

async fn capture<R>(
    mut reader: R,
    limit: usize,
    lines: Option<Arc<AtomicU64>>,
) -> io::Result<CapturedOutput>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = OutputBuffer::new(limit);
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buffer.push(&chunk[..n]);
        if let Some(lines) = &lines {
            lines.store(buffer.lines(), Ordering::Relaxed);
        }
    }

    Ok(buffer.finish())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-strings");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn invocation(program: PathBuf, timeout: Duration) -> ToolInvocation {
        ToolInvocation {
            program,
            args: vec![],
            timeout,
        }
    }

    #[test]
    fn test_strings_arguments() {
        let options = ExtractOptions {
            min_length: Some(6),
            encodings: vec![StringsEncoding::Utf16Le],
        };
        let invocation = ToolInvocation::strings(
            Path::new("strings"),
            Path::new("-odd-name"),
            StringsEncoding::Utf16Le,
            &options,
            Duration::from_secs(1),
        );

        assert_eq!(
            invocation.command_line(),
            "strings -a -t d -n 6 --encoding l -- -odd-name"
        );

        let invocation = ToolInvocation::strings(
            Path::new("/usr/bin/strings"),
            Path::new("/data/a"),
            StringsEncoding::Ascii,
            &ExtractOptions::default(),
            Duration::from_secs(1),
        );
        assert_eq!(
            invocation.command_line(),
            "/usr/bin/strings -a -t d --encoding s -- /data/a"
        );
    }

    #[tokio::test]
    async fn test_captures_both_streams() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(
            dir.path(),
            "printf '      0 hello\\n      7 world\\n'; echo 'warning: odd section' >&2",
        );

        let lines = Arc::new(AtomicU64::new(0));
        let runner = SubprocessRunner::new(1024, 1024);
        let output = runner
            .run(&invocation(program, Duration::from_secs(10)), lines.clone())
            .await
            .unwrap();

        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.stdout.text(), "      0 hello\n      7 world\n");
        assert_eq!(output.stderr.text(), "warning: odd section\n");
        assert_eq!(lines.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "echo 'cannot read input' >&2; exit 3");

        let runner = SubprocessRunner::new(1024, 1024);
        let output = runner
            .run(
                &invocation(program, Duration::from_secs(10)),
                Arc::new(AtomicU64::new(0)),
            )
            .await
            .unwrap();

        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stderr.text(), "cannot read input\n");
    }

    #[tokio::test]
    async fn test_large_output_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "yes '      0 abcdefghij' | head -n 20000");

        let lines = Arc::new(AtomicU64::new(0));
        let runner = SubprocessRunner::new(1000, 1024);
        let output = runner
            .run(&invocation(program, Duration::from_secs(10)), lines.clone())
            .await
            .unwrap();

        assert!(output.stdout.truncated);
        assert!(output.stdout.bytes.len() <= 1000 + 64);
        assert!(output.stdout.text().contains("output truncated"));
        assert_eq!(lines.load(Ordering::Relaxed), 20000);
        assert!(output.stdout.strings().iter().all(|s| s.value == "abcdefghij"));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_completed_run_kills_detached_descendants() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("child.pid");
        let program = script(
            dir.path(),
            &format!(
                "sleep 30 >/dev/null 2>&1 &\necho $! > {}\nprintf '      0 hello\\n'",
                pid_file.display()
            ),
        );

        let runner = SubprocessRunner::new(1024, 1024);
        let output = runner
            .run(
                &invocation(program, Duration::from_secs(10)),
                Arc::new(AtomicU64::new(0)),
            )
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.stdout.text(), "      0 hello\n");

        let pid: u32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert!(
            crate::process::wait_until_gone(pid, Duration::from_secs(5)).await,
            "background child {} outlived the run",
            pid
        );
    }

    #[tokio::test]
    async fn test_missing_program() {
        let runner = SubprocessRunner::new(1024, 1024);
        let result = runner
            .run(
                &invocation(
                    PathBuf::from("/no/such/strings-binary"),
                    Duration::from_secs(1),
                ),
                Arc::new(AtomicU64::new(0)),
            )
            .await;

        assert!(matches!(result, Err(RunError::Spawn { .. })));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_kills_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("child.pid");
        let program = script(
            dir.path(),
            &format!("sleep 30 &\necho $! > {}\nwait", pid_file.display()),
        );

        let runner = SubprocessRunner::new(1024, 1024);
        let started = Instant::now();
        let result = runner
            .run(
                &invocation(program, Duration::from_millis(500)),
                Arc::new(AtomicU64::new(0)),
            )
            .await;

        assert!(matches!(result, Err(RunError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(10));

        let pid: u32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert!(
            crate::process::wait_until_gone(pid, Duration::from_secs(5)).await,
            "background child {} survived the timeout",
            pid
        );
    }
}
