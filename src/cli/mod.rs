//! CLI interface and argument parsing
//!
//! This module handles command-line parsing, logging setup and the
//! top-level run of a pipeline file.

pub mod app;

// Re-export main types
pub use app::*;
