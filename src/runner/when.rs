//! `only_if` gate evaluation
//!
//! The predicate runs through the same interpreter, directory and
//! environment as the command it guards. Its output is discarded. A
//! cancelled scope stops the predicate together with its process group.

use crate::runner::{shell_command, signal_process_group, Scope};
use std::collections::HashMap;
use std::process::Stdio;
use tracing::debug;

/// Result of evaluating a gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    /// The predicate exited 0
    Open,
    /// The predicate failed or could not be run; carries the reason
    Closed(String),
    /// The scope was cancelled before the predicate finished
    Cancelled,
}

impl Gate {
    pub fn is_open(&self) -> bool {
        matches!(self, Gate::Open)
    }
}

/// Run an `only_if` predicate
pub async fn evaluate_only_if(
    predicate: &str,
    directory: &str,
    env: &HashMap<String, String>,
    scope: &Scope,
) -> Gate {
    let mut command = match shell_command(predicate, directory, env, scope) {
        Ok(command) => command,
        Err(e) => return Gate::Closed(e.to_string()),
    };

    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    #[cfg(unix)]
    command.process_group(0);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => return Gate::Closed(e.to_string()),
    };
    let pid = child.id();

    tokio::select! {
        biased;
        status = child.wait() => match status {
            Ok(status) if status.success() => Gate::Open,
            Ok(status) => Gate::Closed(status.to_string()),
            Err(e) => Gate::Closed(e.to_string()),
        },
        _ = scope.cancelled() => {
            if let Err(e) = child.start_kill() {
                debug!("only_if kill failed: {}", e);
            }
            if let Some(pid) = pid {
                signal_process_group("only_if", pid);
            }
            if let Err(e) = child.wait().await {
                debug!("reaping only_if failed: {}", e);
            }
            Gate::Cancelled
        }
    }
}
