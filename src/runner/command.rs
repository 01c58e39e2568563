//! Command execution
//!
//! This module launches shell commands in their own process group, feeds
//! their output into an [`OutputMux`] and watches them until they exit or
//! the scope is cancelled.

use crate::runner::{compose_env, CapturedOutput, OutputMux, Scope, Stream};
use std::collections::HashMap;
use std::io::{self, Write};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

const READ_CHUNK: usize = 8 * 1024;

/// Build `<interpreter> <script>` with the composed environment
pub fn shell_command(
    script: &str,
    directory: &str,
    env: &HashMap<String, String>,
    scope: &Scope,
) -> io::Result<Command> {
    let (program, args) = scope
        .interpreter()
        .split_first()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty interpreter"))?;

    let mut command = Command::new(program);
    command.args(args).arg(script);

    if !directory.is_empty() {
        command.current_dir(directory);
    }

    command.env_clear();
    command.envs(compose_env(scope.build_id(), env));

    Ok(command)
}

/// What a launch needs to know about its task
#[derive(Debug, Clone, Copy)]
pub struct Launch<'a> {
    pub name: &'a str,
    pub command: &'a str,
    pub directory: &'a str,
    pub env: &'a HashMap<String, String>,
    /// Bytes replayed on the process's stdin; `None` means `/dev/null`
    pub stdin: Option<&'a [u8]>,
}

/// How a watched process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed(Option<i32>),
    Aborted,
}

/// A started process together with its output plumbing
pub struct RunningProcess {
    name: String,
    child: Child,
    pid: Option<u32>,
    mux: OutputMux,
    readers: Vec<JoinHandle<()>>,
    feeder: Option<JoinHandle<()>>,
}

/// Start the task's command in a new process group
pub fn spawn(launch: Launch<'_>, scope: &Scope) -> io::Result<RunningProcess> {
    let mut command = shell_command(launch.command, launch.directory, launch.env, scope)?;

    command
        .stdin(if launch.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn()?;
    let pid = child.id();
    debug!("[{}] Started pid {:?}", launch.name, pid);

    let mux = OutputMux::new(launch.name);
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_reader(stdout, mux.writer(Stream::Stdout), launch.name));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_reader(stderr, mux.writer(Stream::Stderr), launch.name));
    }

    let feeder = match (child.stdin.take(), launch.stdin) {
        (Some(mut pipe), Some(bytes)) => {
            let bytes = bytes.to_vec();
            let name = launch.name.to_string();
            Some(tokio::spawn(async move {
                // the reader may exit without consuming its input
                if let Err(e) = pipe.write_all(&bytes).await {
                    debug!("[{}] stdin closed early: {}", name, e);
                }
            }))
        }
        _ => None,
    };

    Ok(RunningProcess {
        name: launch.name.to_string(),
        child,
        pid,
        mux,
        readers,
        feeder,
    })
}

fn spawn_reader<R>(mut pipe: R, mut writer: impl Write + Send + 'static, name: &str) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let name = name.to_string();
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match pipe.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if let Err(e) = writer.write_all(&buf[..n]) {
                        debug!("[{}] output sink rejected write: {}", name, e);
                        break;
                    }
                }
                Err(e) => {
                    debug!("[{}] output pipe error: {}", name, e);
                    break;
                }
            }
        }
    })
}

impl RunningProcess {
    /// Wait for the process to exit or for the scope to be cancelled,
    /// whichever happens first
    ///
    /// An exit that is already observable wins over a concurrent
    /// cancellation, so a finished process is never reported as aborted.
    pub async fn wait(mut self, scope: &Scope) -> (Outcome, CapturedOutput) {
        let outcome = tokio::select! {
            biased;
            status = self.child.wait() => classify(&self.name, status),
            _ = scope.cancelled() => {
                self.terminate();
                if let Err(e) = self.child.wait().await {
                    debug!("[{}] reaping aborted process failed: {}", self.name, e);
                }
                warn!("[{}] aborted", self.name);
                Outcome::Aborted
            }
        };

        self.drain(outcome, scope).await;
        (outcome, self.mux.take())
    }

    /// Kill the leader, then signal the whole group
    fn terminate(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!("[{}] kill failed: {}", self.name, e);
        }
        if let Some(pid) = self.pid {
            signal_process_group(&self.name, pid);
        }
    }

    async fn drain(&mut self, outcome: Outcome, scope: &Scope) {
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }

        let readers = std::mem::take(&mut self.readers);
        if outcome != Outcome::Aborted {
            for reader in readers {
                let _ = reader.await;
            }
            return;
        }

        // a descendant outside the group may keep a pipe open forever
        let aborts: Vec<_> = readers.iter().map(|r| r.abort_handle()).collect();
        let joined = futures::future::join_all(readers);
        if tokio::time::timeout(scope.drain_grace(), joined).await.is_err() {
            debug!("[{}] output still open after abort, dropping it", self.name);
            for handle in aborts {
                handle.abort();
            }
        }
    }
}

fn classify(name: &str, status: io::Result<ExitStatus>) -> Outcome {
    match status {
        Ok(status) if status.success() => Outcome::Succeeded,
        Ok(status) => Outcome::Failed(status.code()),
        Err(e) => {
            error!("[{}] waiting for process failed: {}", name, e);
            Outcome::Failed(None)
        }
    }
}

/// Send SIGTERM to every process in the group led by `pid`
#[cfg(unix)]
pub fn signal_process_group(name: &str, pid: u32) {
    let pgid = pid as libc::pid_t;
    // SAFETY: kill(2) has no memory-safety preconditions; a negative pid
    // addresses the process group created for this child at spawn time.
    let ret = unsafe { libc::kill(-pgid, libc::SIGTERM) };
    if ret != 0 {
        debug!(
            "[{}] signalling process group {} failed: {}",
            name,
            pgid,
            io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
pub fn signal_process_group(name: &str, _pid: u32) {
    debug!("[{}] process groups unsupported, only the leader was killed", name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn launch<'a>(command: &'a str, env: &'a HashMap<String, String>) -> Launch<'a> {
        Launch {
            name: "test",
            command,
            directory: "",
            env,
            stdin: None,
        }
    }

    #[tokio::test]
    async fn test_spawn_captures_stdout() {
        let env = HashMap::new();
        let scope = Scope::new();
        let process = spawn(launch("echo test", &env), &scope).unwrap();

        let (outcome, output) = process.wait(&scope).await;
        assert_eq!(outcome, Outcome::Succeeded);
        assert_eq!(output.stdout, b"test\n");
        assert_eq!(output.combined, b"test\n");
        assert!(output.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_failing_command_reports_exit_code() {
        let env = HashMap::new();
        let scope = Scope::new();
        let process = spawn(launch("exit 3", &env), &scope).unwrap();

        let (outcome, _) = process.wait(&scope).await;
        assert_eq!(outcome, Outcome::Failed(Some(3)));
        // the coordinator does not cancel on its own
        assert!(!scope.is_cancelled());
    }

    #[tokio::test]
    async fn test_stdin_is_replayed() {
        let env = HashMap::new();
        let scope = Scope::new();
        let mut plan = launch("cat", &env);
        plan.stdin = Some(&b"piped bytes"[..]);

        let (outcome, output) = spawn(plan, &scope).unwrap().wait(&scope).await;
        assert_eq!(outcome, Outcome::Succeeded);
        assert_eq!(output.stdout, b"piped bytes");
    }

    #[tokio::test]
    async fn test_cancel_aborts_running_process() {
        let env = HashMap::new();
        let scope = Scope::new();
        let process = spawn(launch("sleep 5; echo done", &env), &scope).unwrap();

        let canceller = scope.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let (outcome, output) = tokio::time::timeout(Duration::from_secs(4), process.wait(&scope))
            .await
            .expect("abort should be prompt");
        assert_eq!(outcome, Outcome::Aborted);
        assert!(output.stdout.is_empty());
    }

    #[tokio::test]
    async fn test_exit_before_cancel_is_not_aborted() {
        let env = HashMap::new();
        let scope = Scope::new();
        let process = spawn(launch("true", &env), &scope).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        scope.cancel();

        let (outcome, _) = process.wait(&scope).await;
        assert_eq!(outcome, Outcome::Succeeded);
    }

    #[tokio::test]
    async fn test_failed_exit_before_cancel_stays_failed() {
        let env = HashMap::new();
        let scope = Scope::new();
        let process = spawn(launch("exit 4", &env), &scope).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        scope.cancel();

        let (outcome, _) = process.wait(&scope).await;
        assert_eq!(outcome, Outcome::Failed(Some(4)));
    }

    #[tokio::test]
    async fn test_empty_interpreter_fails_to_start() {
        let env = HashMap::new();
        let scope = Scope::new().with_interpreter(Vec::new());
        let result = spawn(launch("true", &env), &scope);
        assert_eq!(result.err().map(|e| e.kind()), Some(io::ErrorKind::InvalidInput));
    }

    #[tokio::test]
    async fn test_shell_command_sets_build_id() {
        let env = HashMap::new();
        let scope = Scope::new().with_build_id("b-7");
        let process = spawn(launch("printf %s \"$BUILD_ID\"", &env), &scope).unwrap();

        let (_, output) = process.wait(&scope).await;
        assert_eq!(output.stdout, b"b-7");
    }
}
