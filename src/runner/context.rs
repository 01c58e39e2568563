//! Execution scope shared by every node of one pipeline run
//!
//! The scope carries the run identifier, the cancellation token that
//! implements fail-fast, an optional deadline and the collaborators a node
//! needs while running (interpreter, readiness waiter).

use crate::runner::{TcpWaiter, Waiter};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Default interpreter used to run `command` and `only_if` strings
pub const DEFAULT_INTERPRETER: [&str; 2] = ["sh", "-c"];

/// How long to keep reading output of an aborted process before giving up
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Execution scope passed by reference down the task tree
///
/// Cloning is cheap and every clone observes the same cancellation.
#[derive(Clone)]
pub struct Scope {
    build_id: Arc<str>,
    token: CancellationToken,
    deadline: Option<Instant>,
    interpreter: Arc<[String]>,
    waiter: Arc<dyn Waiter>,
    drain_grace: Duration,
}

impl Scope {
    /// Create a scope with a freshly generated build identifier
    pub fn new() -> Self {
        Scope {
            build_id: Arc::from(uuid::Uuid::new_v4().to_string()),
            token: CancellationToken::new(),
            deadline: None,
            interpreter: DEFAULT_INTERPRETER.iter().map(|s| s.to_string()).collect(),
            waiter: Arc::new(TcpWaiter),
            drain_grace: DEFAULT_DRAIN_GRACE,
        }
    }

    /// Use a caller-supplied build identifier
    pub fn with_build_id(mut self, build_id: impl Into<String>) -> Self {
        self.build_id = Arc::from(build_id.into());
        self
    }

    /// Set the interpreter (e.g., `["bash", "-c"]`)
    pub fn with_interpreter(mut self, interpreter: Vec<String>) -> Self {
        self.interpreter = Arc::from(interpreter);
        self
    }

    /// Abort everything still running once `timeout` has elapsed
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Replace the readiness waiter
    pub fn with_waiter(mut self, waiter: Arc<dyn Waiter>) -> Self {
        self.waiter = waiter;
        self
    }

    /// Set how long output of an aborted process is drained
    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    pub fn build_id(&self) -> &str {
        &self.build_id
    }

    pub fn interpreter(&self) -> &[String] {
        &self.interpreter
    }

    pub fn waiter(&self) -> &dyn Waiter {
        self.waiter.as_ref()
    }

    pub fn drain_grace(&self) -> Duration {
        self.drain_grace
    }

    /// Token backing this scope, for callers that cancel from outside
    /// (signal handlers, supervisors)
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel the scope. Only the first call has an effect.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// True once the scope was cancelled or its deadline has passed
    pub fn is_cancelled(&self) -> bool {
        if self.token.is_cancelled() {
            return true;
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                self.expire();
                true
            }
            _ => false,
        }
    }

    /// Resolves when the scope is cancelled or the deadline expires
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => self.expire(),
                }
            }
            None => self.token.cancelled().await,
        }
    }

    fn expire(&self) {
        if !self.token.is_cancelled() {
            warn!("Deadline exceeded for build {}", self.build_id);
            self.token.cancel();
        }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("build_id", &self.build_id)
            .field("cancelled", &self.token.is_cancelled())
            .field("deadline", &self.deadline)
            .field("interpreter", &self.interpreter)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_new() {
        let scope = Scope::new();
        assert_eq!(scope.interpreter(), ["sh", "-c"]);
        assert!(!scope.build_id().is_empty());
        assert!(!scope.is_cancelled());
    }

    #[test]
    fn test_with_build_id() {
        let scope = Scope::new().with_build_id("build-42");
        assert_eq!(scope.build_id(), "build-42");
    }

    #[test]
    fn test_build_ids_are_unique() {
        assert_ne!(Scope::new().build_id(), Scope::new().build_id());
    }

    #[test]
    fn test_cancel_is_shared_and_idempotent() {
        let scope = Scope::new();
        let clone = scope.clone();

        clone.cancel();
        clone.cancel();

        assert!(scope.is_cancelled());
        assert!(scope.cancellation_token().is_cancelled());
    }

    #[test]
    fn test_with_interpreter() {
        let scope = Scope::new().with_interpreter(vec!["bash".to_string(), "-c".to_string()]);
        assert_eq!(scope.interpreter(), ["bash", "-c"]);
    }

    #[tokio::test]
    async fn test_deadline_counts_as_cancellation() {
        let scope = Scope::new().with_timeout(Duration::from_millis(20));

        tokio::time::timeout(Duration::from_secs(5), scope.cancelled())
            .await
            .expect("deadline should fire");

        assert!(scope.is_cancelled());
        assert!(scope.cancellation_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_after_cancel() {
        let scope = Scope::new();
        let waiter = scope.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        scope.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("cancelled() should resolve")
            .unwrap();
    }
}
