//! Task tree execution engine
//!
//! This module handles running a tree of tasks: directory expansion,
//! `only_if` gates, readiness waits, process launch, output capture and
//! fail-fast cancellation.

pub mod command;
pub mod context;
pub mod interpolate;
pub mod output;
pub mod task;
pub mod wait;
pub mod when;

// Re-export main types
pub use command::{shell_command, signal_process_group, Launch, Outcome, RunningProcess};
pub use context::*;
pub use interpolate::*;
pub use output::*;
pub use task::*;
pub use wait::*;
pub use when::*;
