// External interpreter with a hard wall-clock timeout
//
// Isolation is the process boundary plus the workspace as working directory;
// filesystem and network access are not restricted further. On Unix the child
// leads its own process group with an address-space ceiling, and the whole
// group is killed when the run ends, so nothing the candidate spawns
// outlives its test case.

use super::{LanguageRunner, RunContext, RunOutcome};
use crate::injector::InjectedProgram;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// Per-stream capture ceiling; a child that keeps writing past it blocks
/// until the timeout kills it
const MAX_OUTPUT_BYTES: u64 = 1024 * 1024;

const FALLBACK_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

pub struct SubprocessRunner {
    command: String,
    args: Vec<String>,
    timeout: Duration,
    memory_limit_mb: Option<u32>,
}

impl SubprocessRunner {
    pub fn new(command: String, args: Vec<String>, timeout: Duration, memory_limit_mb: Option<u32>) -> Self {
        Self {
            command,
            args,
            timeout,
            memory_limit_mb,
        }
    }

    /// Own process group plus RLIMIT_AS, applied between fork and exec
    #[cfg(unix)]
    fn confine(&self, command: &mut Command) {
        let memory_bytes = self.memory_limit_mb.map(|mb| u64::from(mb) * 1024 * 1024);

        // SAFETY: pre_exec runs in the forked child before exec; setpgid and
        // setrlimit are async-signal-safe.
        unsafe {
            command.pre_exec(move || {
                libc::setpgid(0, 0);
                if let Some(bytes) = memory_bytes {
                    rlimit::setrlimit(rlimit::Resource::AS, bytes, bytes).map_err(|e| {
                        std::io::Error::other(format!("Failed to set RLIMIT_AS: {}", e))
                    })?;
                }
                Ok(())
            });
        }
    }

    #[cfg(not(unix))]
    fn confine(&self, _command: &mut Command) {
        if self.memory_limit_mb.is_some() {
            warn!("Process memory limits are not supported on this platform");
        }
    }
}

/// Kills the child's process group when dropped, whichever way the run ends
struct ProcessGroupGuard {
    pgid: Option<u32>,
}

impl ProcessGroupGuard {
    fn kill(&self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid {
            // SAFETY: plain syscall; ESRCH for an already-empty group is fine
            unsafe {
                libc::killpg(pgid as libc::pid_t, libc::SIGKILL);
            }
        }
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

#[async_trait]
impl LanguageRunner for SubprocessRunner {
    async fn run(&self, program: &InjectedProgram, ctx: &RunContext<'_>) -> Result<RunOutcome> {
        ctx.workspace
            .write_file(ctx.entry_path, &program.source)
            .await
            .context("Failed to write entry file")?;

        let path_env = std::env::var("PATH").unwrap_or_else(|_| FALLBACK_PATH.to_string());
        let start_time = Instant::now();

        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .arg(ctx.entry_path)
            .current_dir(ctx.workspace.path())
            .env_clear()
            .env("PATH", &path_env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        self.confine(&mut command);

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.command))?;
        let group = ProcessGroupGuard { pgid: child.id() };

        let mut stdin = child.stdin.take().context("Child stdin was not captured")?;
        let stdout = child.stdout.take().context("Child stdout was not captured")?;
        let stderr = child.stderr.take().context("Child stderr was not captured")?;

        let payload = program.payload.clone();
        let feeder = tokio::spawn(async move {
            // A child that never reads stdin closes the pipe early; that is not an error
            let _ = stdin.write_all(payload.as_bytes()).await;
            let _ = stdin.shutdown().await;
        });

        let execution_future = async {
            let (out, err) = futures_util::future::try_join(drain(stdout), drain(stderr)).await?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((out, err, status))
        };

        let timeout_result = tokio::time::timeout(self.timeout, execution_future).await;
        feeder.abort();

        let execution_time_ms = start_time.elapsed().as_millis() as u64;

        let outcome = match timeout_result {
            Ok(Ok((stdout, stderr, status))) => {
                if status.success() {
                    RunOutcome::Completed(stdout.trim().to_string())
                } else if !stderr.trim().is_empty() {
                    RunOutcome::Threw(stderr.trim().to_string())
                } else {
                    match status.code() {
                        Some(code) => RunOutcome::ExitCalled(code),
                        None => RunOutcome::Threw("Execution failed".to_string()),
                    }
                }
            }
            Ok(Err(e)) => {
                return Err(e).context("Failed to collect process output");
            }
            Err(_) => {
                group.kill();
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill timed-out process");
                }
                RunOutcome::TimedOut {
                    limit_ms: self.timeout.as_millis() as u64,
                }
            }
        };

        debug!(
            command = %self.command,
            outcome = outcome.label(),
            execution_time_ms = execution_time_ms,
            "Subprocess run finished"
        );

        Ok(outcome)
    }

    fn name(&self) -> &'static str {
        "subprocess"
    }
}

async fn drain<R: AsyncRead + Unpin>(reader: R) -> std::io::Result<String> {
    let mut buf = Vec::new();
    reader.take(MAX_OUTPUT_BYTES).read_to_end(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::ModuleTable;
    use crate::workspace::{ScratchRoot, Workspace};
    use std::sync::Arc;

    /// Runs `source` as a shell script so these tests need only `sh`.
    /// The workspace is handed back so tests can inspect what the script left.
    async fn run_sh_in(
        scratch: &ScratchRoot,
        source: &str,
        payload: &str,
        timeout_ms: u64,
        memory_limit_mb: Option<u32>,
    ) -> (RunOutcome, Workspace) {
        let workspace = scratch.create().await.unwrap();

        let program = InjectedProgram {
            source: source.to_string(),
            payload: payload.to_string(),
        };
        let ctx = RunContext {
            workspace: &workspace,
            entry_path: "main.sh",
            modules: Arc::new(ModuleTable::new()),
            fixture: None,
        };
        let runner = SubprocessRunner::new(
            "sh".to_string(),
            Vec::new(),
            Duration::from_millis(timeout_ms),
            memory_limit_mb,
        );
        let outcome = runner.run(&program, &ctx).await.unwrap();
        (outcome, workspace)
    }

    async fn run_sh(source: &str, payload: &str, timeout_ms: u64) -> RunOutcome {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchRoot::init(dir.path()).unwrap();
        let (outcome, workspace) = run_sh_in(&scratch, source, payload, timeout_ms, None).await;
        workspace.destroy().await;
        outcome
    }

    /// Alive and not a zombie waiting to be reaped
    #[cfg(target_os = "linux")]
    fn is_running(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid.trim())) {
            Ok(stat) => !stat.rsplit_once(") ").map(|(_, rest)| rest.starts_with('Z')).unwrap_or(false),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    async fn wait_until_gone(pid: &str) -> bool {
        for _ in 0..40 {
            if !is_running(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_stdout_is_trimmed() {
        let outcome = run_sh("echo '  hello  '\n", "", 2000).await;
        assert_eq!(outcome, RunOutcome::Completed("hello".to_string()));
    }

    #[tokio::test]
    async fn test_payload_arrives_on_stdin() {
        let outcome = run_sh("cat\n", r#"{"input":5}"#, 2000).await;
        assert_eq!(outcome, RunOutcome::Completed(r#"{"input":5}"#.to_string()));
    }

    #[tokio::test]
    async fn test_nonzero_exit_reports_stderr() {
        let outcome = run_sh("echo 'division by zero' >&2\nexit 1\n", "", 2000).await;
        assert_eq!(outcome, RunOutcome::Threw("division by zero".to_string()));
    }

    #[tokio::test]
    async fn test_silent_exit_reports_code() {
        let outcome = run_sh("exit 4\n", "", 2000).await;
        assert_eq!(outcome, RunOutcome::ExitCalled(4));
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let started = Instant::now();
        let outcome = run_sh("sleep 10\n", "", 300).await;
        assert_eq!(outcome, RunOutcome::TimedOut { limit_ms: 300 });
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_runs_inside_workspace() {
        let outcome = run_sh("ls\n", "", 2000).await;
        assert_eq!(outcome, RunOutcome::Completed("main.sh".to_string()));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_kills_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchRoot::init(dir.path()).unwrap();
        let script = "echo $$ > shell.pid\nsleep 37 &\necho $! > sleep.pid\nwait\n";

        let (outcome, workspace) = run_sh_in(&scratch, script, "", 500, None).await;
        assert_eq!(outcome, RunOutcome::TimedOut { limit_ms: 500 });

        let shell_pid = std::fs::read_to_string(workspace.path().join("shell.pid")).unwrap();
        let sleep_pid = std::fs::read_to_string(workspace.path().join("sleep.pid")).unwrap();
        assert!(wait_until_gone(&shell_pid).await, "interpreter {} survived", shell_pid.trim());
        assert!(wait_until_gone(&sleep_pid).await, "background child {} survived", sleep_pid.trim());

        workspace.destroy().await;
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_background_children_die_with_completed_run() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchRoot::init(dir.path()).unwrap();
        let script = "sleep 37 > /dev/null 2>&1 &\necho $! > sleep.pid\necho done\n";

        let (outcome, workspace) = run_sh_in(&scratch, script, "", 2000, None).await;
        assert_eq!(outcome, RunOutcome::Completed("done".to_string()));

        let sleep_pid = std::fs::read_to_string(workspace.path().join("sleep.pid")).unwrap();
        assert!(wait_until_gone(&sleep_pid).await, "background child {} survived", sleep_pid.trim());

        workspace.destroy().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_memory_limit_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchRoot::init(dir.path()).unwrap();

        let (outcome, workspace) = run_sh_in(&scratch, "ulimit -v\n", "", 2000, Some(256)).await;
        assert_eq!(outcome, RunOutcome::Completed((256 * 1024).to_string()));
        workspace.destroy().await;
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_runner_error() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchRoot::init(dir.path()).unwrap();
        let workspace = scratch.create().await.unwrap();
        let ctx = RunContext {
            workspace: &workspace,
            entry_path: "main.py",
            modules: Arc::new(ModuleTable::new()),
            fixture: None,
        };
        let program = InjectedProgram {
            source: String::new(),
            payload: String::new(),
        };

        let runner = SubprocessRunner::new("/no/such/python".to_string(), Vec::new(), Duration::from_secs(1), None);
        assert!(runner.run(&program, &ctx).await.is_err());
        workspace.destroy().await;
    }
}
