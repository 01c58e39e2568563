//! Pipeline file parsing and validation
//!
//! This module loads a pipetree.yml file into a task tree, resolves
//! `include` directives and validates the result.

pub mod parse;
pub mod schema;

// Re-export main functions
pub use parse::*;
pub use schema::*;
