//! Pipetree - run a tree of shell tasks for build pipelines
//!
//! A pipeline is a tree of tasks. Each task may run its own shell command,
//! then a list of serial children (each fed the previous child's stdout) and
//! a list of parallel children. The first failure cancels everything still
//! running, down to the process groups of the commands involved.

// Public modules
pub mod cli;
pub mod config;
pub mod error;
pub mod runner;

// Re-export commonly used types
pub use error::{PipetreeError, Result};
pub use runner::{Scope, Status, Task};

/// Current version of pipetree
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
