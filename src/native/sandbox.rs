use std::ffi::OsString;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

use crate::constants::{MEMORY_POLL_INTERVAL_MS, READ_CHUNK_BYTES};
use crate::core::domain::ExecutionLimits;
use crate::core::traits::sandbox::{
    ExecutionOutcome, ExecutionRequest, LimitKind, Sandbox, SandboxError, Termination,
};
use crate::native::toolchain::{Step, Toolchain};

/// Runs submissions as child processes of the judge.
///
/// Every call gets a fresh directory under `work_dir`, removed when the call
/// returns or is dropped. Children see only `PATH` and are killed if the call
/// is cancelled.
#[derive(Clone, Debug)]
pub struct ProcessSandbox {
    work_dir: PathBuf,
    toolchain: Toolchain,
    path_var: Option<OsString>,
}

impl ProcessSandbox {
    /// A relative `work_dir` is resolved against the current directory, since
    /// children run with their workspace as cwd.
    pub fn new(work_dir: impl AsRef<Path>, toolchain: Toolchain) -> Self {
        let work_dir = work_dir.as_ref();
        Self {
            work_dir: std::path::absolute(work_dir).unwrap_or_else(|_| work_dir.into()),
            toolchain,
            path_var: std::env::var_os("PATH"),
        }
    }
}

#[derive(Debug)]
struct Workspace {
    path: PathBuf,
}

impl Workspace {
    async fn create(root: &Path) -> Result<Self, SandboxError> {
        let path = root.join(Uuid::new_v4().to_string());
        fs::create_dir_all(&path).await.map_err(workspace_error)?;
        Ok(Self { path })
    }

    async fn remove(mut self) {
        let path = std::mem::take(&mut self.path);
        if let Err(error) = fs::remove_dir_all(&path).await {
            tracing::warn!(path = %path.display(), %error, "Failed to remove workspace");
        }
    }
}

/// Cleanup for calls dropped mid-execution. Finished calls use
/// [`Workspace::remove`].
impl Drop for Workspace {
    fn drop(&mut self) {
        if self.path.as_os_str().is_empty() {
            return;
        }
        let path = std::mem::take(&mut self.path);
        let remove = move || {
            if let Err(error) = std::fs::remove_dir_all(&path) {
                tracing::warn!(path = %path.display(), %error, "Failed to remove workspace");
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(remove);
            }
            Err(_) => remove(),
        }
    }
}

fn workspace_error(error: io::Error) -> SandboxError {
    SandboxError::Workspace {
        msg: error.to_string(),
    }
}

#[derive(Debug, PartialEq)]
struct StepLimits {
    time: Duration,
    memory_bytes: Option<u64>,
    stdout_bytes: Option<u64>,
    stderr_bytes: Option<u64>,
}

enum StepExit {
    Finished {
        status: ExitStatus,
        stdout: String,
        stderr: String,
    },
    Limit(LimitKind),
}

enum CaptureError {
    Io(io::Error),
    Exceeded(LimitKind),
}

#[async_trait::async_trait]
impl Sandbox for ProcessSandbox {
    #[tracing::instrument(skip_all, fields(language = %request.language))]
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome, SandboxError> {
        let workspace = Workspace::create(&self.work_dir).await?;
        let result = self.execute_in(&workspace, request).await;
        workspace.remove().await;
        result
    }
}

impl ProcessSandbox {
    async fn execute_in(
        &self,
        workspace: &Workspace,
        request: &ExecutionRequest,
    ) -> Result<ExecutionOutcome, SandboxError> {
        let recipe = self.toolchain.recipe(request.language, &workspace.path);
        fs::write(workspace.path.join(recipe.source_file), request.source.as_bytes())
            .await
            .map_err(workspace_error)?;

        let limits = &request.limits;
        let compile_limits = compile_limits(limits);
        let (compiled, _) = self
            .run_step(&recipe.compile, &workspace.path, "", &compile_limits)
            .await?;
        match compiled {
            StepExit::Finished { status, .. } if status.success() => {}
            StepExit::Finished { stdout, stderr, .. } => {
                let diagnostics = if stderr.trim().is_empty() { stdout } else { stderr };
                tracing::debug!("Compilation failed");
                return Ok(ExecutionOutcome::compile_failed(diagnostics));
            }
            StepExit::Limit(LimitKind::Time) => {
                return Ok(ExecutionOutcome::compile_failed(format!(
                    "Compilation time limit exceeded ({}ms)",
                    limits.compile_time_limit_ms
                )));
            }
            StepExit::Limit(kind) => {
                return Ok(ExecutionOutcome::compile_failed(kind.marker()));
            }
        }

        let run_limits = run_limits(limits);
        let (exit, elapsed_ms) = self
            .run_step(&recipe.run, &workspace.path, &request.stdin, &run_limits)
            .await?;

        let outcome = match exit {
            StepExit::Finished {
                status,
                stdout,
                stderr,
            } => {
                let termination = match (status.code(), status.signal()) {
                    (Some(code), _) => Termination::Exited(code),
                    (None, Some(signal)) => Termination::Signaled(signal),
                    (None, None) => Termination::Exited(-1),
                };
                ExecutionOutcome {
                    stdout,
                    stderr,
                    termination,
                    elapsed_ms,
                }
            }
            StepExit::Limit(kind) => ExecutionOutcome::limit_exceeded(kind).with_elapsed(elapsed_ms),
        };
        tracing::debug!(termination = ?outcome.termination, elapsed_ms, "Execution finished");

        Ok(outcome)
    }

    async fn run_step(
        &self,
        step: &Step,
        cwd: &Path,
        stdin: &str,
        limits: &StepLimits,
    ) -> Result<(StepExit, u64), SandboxError> {
        let mut command = Command::new(&step.program);
        command
            .args(&step.args)
            .current_dir(cwd)
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = &self.path_var {
            command.env("PATH", path);
        }

        let started = Instant::now();
        let mut child = command.spawn().map_err(|error| SandboxError::Toolchain {
            program: step.program.display().to_string(),
            msg: error.to_string(),
        })?;
        let pid = child.id();
        let (Some(mut input), Some(output), Some(errors)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(SandboxError::Workspace {
                msg: "child stdio was not captured".to_string(),
            });
        };

        let feed = async move {
            // The program may exit without reading its input.
            let _ = input.write_all(stdin.as_bytes()).await;
            drop(input);
            Ok::<_, CaptureError>(())
        };
        let capture = async {
            let (_, stdout, stderr) = tokio::try_join!(
                feed,
                read_capped(output, limits.stdout_bytes, LimitKind::StdoutSize),
                read_capped(errors, limits.stderr_bytes, LimitKind::StderrSize),
            )?;
            let status = child.wait().await.map_err(CaptureError::Io)?;
            Ok::<_, CaptureError>((status, stdout, stderr))
        };

        let exit = tokio::select! {
            captured = capture => match captured {
                Ok((status, stdout, stderr)) => StepExit::Finished { status, stdout, stderr },
                Err(CaptureError::Exceeded(kind)) => StepExit::Limit(kind),
                Err(CaptureError::Io(error)) => return Err(workspace_error(error)),
            },
            _ = tokio::time::sleep(limits.time) => StepExit::Limit(LimitKind::Time),
            _ = watch_memory(pid, limits.memory_bytes) => StepExit::Limit(LimitKind::Memory),
        };

        if let StepExit::Limit(kind) = &exit {
            tracing::debug!(?kind, "Limit exceeded, killing process");
            let _ = child.start_kill();
            let _ = child.wait().await;
        }

        Ok((exit, started.elapsed().as_millis() as u64))
    }
}

async fn read_capped<R>(
    mut reader: R,
    cap: Option<u64>,
    kind: LimitKind,
) -> Result<String, CaptureError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];
    loop {
        let n = reader.read(&mut chunk).await.map_err(CaptureError::Io)?;
        if n == 0 {
            return Ok(String::from_utf8_lossy(&buf).into_owned());
        }
        buf.extend_from_slice(&chunk[..n]);
        if cap.is_some_and(|cap| buf.len() as u64 > cap) {
            return Err(CaptureError::Exceeded(kind));
        }
    }
}

/// Resolves once the process's resident set grows past `limit`; never
/// resolves without a limit or once the process is gone.
async fn watch_memory(pid: Option<u32>, limit: Option<u64>) {
    let (Some(pid), Some(limit)) = (pid, limit) else {
        return std::future::pending().await;
    };

    let mut ticker = tokio::time::interval(Duration::from_millis(MEMORY_POLL_INTERVAL_MS));
    loop {
        ticker.tick().await;
        let status = match fs::read_to_string(format!("/proc/{}/status", pid)).await {
            Ok(status) => status,
            Err(_) => return std::future::pending().await,
        };
        if resident_bytes(&status).is_some_and(|bytes| bytes > limit) {
            tracing::debug!(pid, limit, "Memory limit exceeded");
            return;
        }
    }
}

fn resident_bytes(proc_status: &str) -> Option<u64> {
    proc_status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

/// Compilers get no memory watchdog; their output is capped like the program's.
fn compile_limits(limits: &ExecutionLimits) -> StepLimits {
    StepLimits {
        time: Duration::from_millis(limits.compile_time_limit_ms),
        memory_bytes: None,
        stdout_bytes: limits.stdout_limit_bytes,
        stderr_bytes: limits.stderr_limit_bytes,
    }
}

fn run_limits(limits: &ExecutionLimits) -> StepLimits {
    StepLimits {
        time: Duration::from_millis(limits.time_limit_ms),
        memory_bytes: limits.memory_limit_bytes(),
        stdout_bytes: limits.stdout_limit_bytes,
        stderr_bytes: limits.stderr_limit_bytes,
    }
}
