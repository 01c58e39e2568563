//! Task tree types and execution logic
//!
//! A [`Task`] is both the unit of work and a tree node. Running a node runs
//! its own command first, then its serial children in order, then its
//! parallel children concurrently.

use crate::error::{ExecutionError, ExecutionResult};
use crate::runner::command::{self, Launch, Outcome};
use crate::runner::{evaluate_only_if, resolve_directory, Gate, Scope, WaitFor};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use tracing::{error, info, warn};

/// Lifecycle of one node during one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Init,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Aborted,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::Init | Status::Running)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Status::Init => "init",
            Status::Running => "running",
            Status::Succeeded => "succeeded",
            Status::Failed => "failed",
            Status::Skipped => "skipped",
            Status::Aborted => "aborted",
        };
        f.write_str(label)
    }
}

/// A node of the task tree
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Task {
    /// Label used in logs, not required to be unique
    #[serde(default)]
    pub name: String,

    /// Shell command; empty for purely composite nodes
    #[serde(default)]
    pub command: String,

    /// Working directory, may contain `$VAR` references
    #[serde(default)]
    pub directory: String,

    /// Variables added to the subprocess environment
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Children run concurrently
    #[serde(default)]
    pub parallel: Vec<Task>,

    /// Children run in order, each fed the previous one's stdout
    #[serde(default)]
    pub serial: Vec<Task>,

    /// Shell predicate that must exit 0 for `command` to run
    #[serde(default)]
    pub only_if: String,

    /// Resource to wait for before launching
    #[serde(default)]
    pub wait_for: Option<WaitFor>,

    /// File this node is loaded from, resolved by the config loader
    #[serde(default)]
    pub include: Option<String>,

    #[serde(skip)]
    pub status: Status,

    #[serde(skip)]
    pub stdout: Vec<u8>,

    #[serde(skip)]
    pub stderr: Vec<u8>,

    #[serde(skip)]
    pub combined_output: Vec<u8>,
}

impl Task {
    /// Create a leaf task
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Task {
            name: name.into(),
            command: command.into(),
            ..Default::default()
        }
    }

    /// Create a node without a command of its own
    pub fn composite(name: impl Into<String>) -> Self {
        Task::new(name, "")
    }

    pub fn with_directory(mut self, directory: impl Into<String>) -> Self {
        self.directory = directory.into();
        self
    }

    pub fn with_env<K, V>(mut self, vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_only_if(mut self, predicate: impl Into<String>) -> Self {
        self.only_if = predicate.into();
        self
    }

    pub fn with_wait_for(mut self, wait_for: WaitFor) -> Self {
        self.wait_for = Some(wait_for);
        self
    }

    pub fn with_serial(mut self, children: Vec<Task>) -> Self {
        self.serial = children;
        self
    }

    pub fn with_parallel(mut self, children: Vec<Task>) -> Self {
        self.parallel = children;
        self
    }

    /// Execute the whole tree under `scope`
    pub async fn execute(&mut self, scope: &Scope) -> ExecutionResult<()> {
        self.run(scope, None).await
    }

    /// Execute this node and its children
    ///
    /// `stdin` is the captured stdout of the preceding serial sibling.
    pub fn run<'a>(
        &'a mut self,
        scope: &'a Scope,
        stdin: Option<&'a [u8]>,
    ) -> BoxFuture<'a, ExecutionResult<()>> {
        Box::pin(async move {
            self.run_own(scope, stdin).await?;
            self.run_serial(scope).await?;
            self.run_parallel(scope).await
        })
    }

    async fn run_own(&mut self, scope: &Scope, stdin: Option<&[u8]>) -> ExecutionResult<()> {
        if self.command.is_empty() {
            return Ok(());
        }

        self.directory = resolve_directory(&self.directory);

        if !self.only_if.is_empty() {
            match evaluate_only_if(&self.only_if, &self.directory, &self.env, scope).await {
                Gate::Open => {}
                Gate::Closed(reason) => {
                    warn!("[{}] Skipped because only_if failed: {}", self.name, reason);
                    self.status = Status::Skipped;
                    return Ok(());
                }
                Gate::Cancelled => {
                    self.abort_before_launch();
                    return Ok(());
                }
            }
        }

        if let Some(wait_for) = &self.wait_for {
            let waited = tokio::select! {
                biased;
                result = scope.waiter().wait(wait_for) => Some(result),
                _ = scope.cancelled() => None,
            };
            match waited {
                Some(Ok(())) => {}
                Some(Err(reason)) => {
                    error!("[{}] Not ready: {}", self.name, reason);
                    return Err(self.fail(
                        scope,
                        ExecutionError::Readiness {
                            task: self.name.clone(),
                            reason,
                        },
                    ));
                }
                None => {
                    self.abort_before_launch();
                    return Ok(());
                }
            }
        }

        if scope.is_cancelled() {
            self.abort_before_launch();
            return Ok(());
        }

        info!("[{}] Start task", self.name);
        info!("[{}] Command: {}", self.name, self.command);

        self.stdout = Vec::new();
        self.stderr = Vec::new();
        self.combined_output = Vec::new();

        let launch = Launch {
            name: &self.name,
            command: &self.command,
            directory: &self.directory,
            env: &self.env,
            stdin,
        };
        let process = match command::spawn(launch, scope) {
            Ok(process) => process,
            Err(source) => {
                error!("[{}] Failed to start: {}", self.name, source);
                return Err(self.fail(
                    scope,
                    ExecutionError::Start {
                        task: self.name.clone(),
                        source,
                    },
                ));
            }
        };
        self.status = Status::Running;

        let (outcome, output) = process.wait(scope).await;
        self.stdout = output.stdout;
        self.stderr = output.stderr;
        self.combined_output = output.combined;

        match outcome {
            Outcome::Succeeded => {
                self.status = Status::Succeeded;
                info!("[{}] End task", self.name);
                Ok(())
            }
            Outcome::Failed(code) => {
                error!("[{}] Task failed with exit code {:?}", self.name, code);
                Err(self.fail(
                    scope,
                    ExecutionError::CommandFailed {
                        task: self.name.clone(),
                        code,
                    },
                ))
            }
            Outcome::Aborted => {
                self.status = Status::Aborted;
                Ok(())
            }
        }
    }

    /// Serial children, stopping at the first failure
    async fn run_serial(&mut self, scope: &Scope) -> ExecutionResult<()> {
        for index in 0..self.serial.len() {
            let (done, rest) = self.serial.split_at_mut(index);
            let stdin = done.last().map(|previous| previous.stdout.as_slice());
            rest[0].run(scope, stdin).await?;
        }
        Ok(())
    }

    /// Parallel children; returns once every child has finished
    async fn run_parallel(&mut self, scope: &Scope) -> ExecutionResult<()> {
        let mut pending: FuturesUnordered<_> = self
            .parallel
            .iter_mut()
            .map(|child| child.run(scope, None))
            .collect();

        let mut first_failure = None;
        while let Some(result) = pending.next().await {
            if let Err(err) = result {
                scope.cancel();
                first_failure.get_or_insert(err);
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn fail(&mut self, scope: &Scope, err: ExecutionError) -> ExecutionError {
        self.status = Status::Failed;
        scope.cancel();
        err
    }

    fn abort_before_launch(&mut self) {
        warn!("[{}] aborted before launch", self.name);
        self.status = Status::Aborted;
    }

    /// Depth-first `(depth, name, status)` listing of the tree
    pub fn summary(&self) -> Vec<(usize, &str, Status)> {
        let mut rows = Vec::new();
        self.collect_summary(0, &mut rows);
        rows
    }

    fn collect_summary<'a>(&'a self, depth: usize, rows: &mut Vec<(usize, &'a str, Status)>) {
        rows.push((depth, &self.name, self.status));
        for child in self.serial.iter().chain(self.parallel.iter()) {
            child.collect_summary(depth + 1, rows);
        }
    }

    /// Find the first node with the given name, depth-first
    pub fn find(&self, name: &str) -> Option<&Task> {
        if self.name == name {
            return Some(self);
        }
        self.serial
            .iter()
            .chain(self.parallel.iter())
            .find_map(|child| child.find(name))
    }
}
