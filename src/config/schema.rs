//! Task tree validation
//!
//! Runs after includes have been resolved.

use crate::error::{ConfigError, ConfigResult};
use crate::runner::Task;

/// Validate a complete task tree
pub fn validate_tree(root: &Task) -> ConfigResult<()> {
    validate_task(root)?;

    for child in root.serial.iter().chain(root.parallel.iter()) {
        validate_tree(child)?;
    }

    Ok(())
}

/// Validate a single node
pub fn validate_task(task: &Task) -> ConfigResult<()> {
    let has_work = !task.command.is_empty()
        || !task.serial.is_empty()
        || !task.parallel.is_empty()
        || task.include.is_some();
    if !has_work {
        return Err(ConfigError::EmptyNode(display_name(task)));
    }

    if let Some(wait_for) = &task.wait_for {
        if wait_for.address.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "Task '{}': wait_for.address must not be empty",
                display_name(task)
            )));
        }
    }

    if !task.only_if.is_empty() && task.command.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "Task '{}': only_if requires a command",
            display_name(task)
        )));
    }

    Ok(())
}

fn display_name(task: &Task) -> String {
    if task.name.is_empty() {
        "<unnamed>".to_string()
    } else {
        task.name.clone()
    }
}
