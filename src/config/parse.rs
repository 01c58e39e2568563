//! Pipeline file parsing and discovery

use crate::error::{ConfigError, ConfigResult, PipetreeError};
use crate::runner::Task;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Default pipeline file names to search for
const CONFIG_FILE_NAMES: &[&str] = &["pipetree.yml", "pipetree.yaml"];

/// Find the pipeline file by searching current and parent directories
pub fn find_config_file() -> ConfigResult<PathBuf> {
    find_config_file_from(env::current_dir().map_err(|e| {
        ConfigError::Invalid(format!("Failed to get current directory: {}", e))
    })?)
}

/// Find the pipeline file starting from a specific directory
pub fn find_config_file_from(start_dir: PathBuf) -> ConfigResult<PathBuf> {
    let mut current_dir = start_dir;
    let mut searched_paths = Vec::new();

    loop {
        for file_name in CONFIG_FILE_NAMES {
            let config_path = current_dir.join(file_name);
            searched_paths.push(config_path.display().to_string());

            if config_path.is_file() {
                return Ok(config_path);
            }
        }

        match current_dir.parent() {
            Some(parent) => current_dir = parent.to_path_buf(),
            None => return Err(ConfigError::NotFound(searched_paths.join(", "))),
        }
    }
}

/// Parse a task tree from a file, resolving includes relative to it
pub fn parse_tree_file(path: &Path) -> Result<Task, PipetreeError> {
    let contents = fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read {}: {}", path.display(), e)))?;

    parse_tree(&contents, Some(path))
}

/// Parse a task tree from a string
///
/// Includes are only resolved when `config_path` is given, since they are
/// relative to the including file.
pub fn parse_tree(yaml: &str, config_path: Option<&Path>) -> Result<Task, PipetreeError> {
    let mut root: Task = serde_yaml::from_str(yaml)?;

    if let Some(path) = config_path {
        let mut stack = vec![canonical(path)];
        process_includes(&mut root, base_dir_of(path), &mut stack)?;
    }

    Ok(root)
}

/// Parse a pipeline file found by searching upwards from the current directory
pub fn parse_tree_auto() -> Result<(Task, PathBuf), PipetreeError> {
    let config_path = find_config_file()?;
    let root = parse_tree_file(&config_path)?;
    Ok((root, config_path))
}

/// Replace every node carrying `include` with the node defined in that file
fn process_includes(task: &mut Task, base_dir: &Path, stack: &mut Vec<PathBuf>) -> ConfigResult<()> {
    if let Some(include_path) = task.include.take() {
        let full_path = base_dir.join(&include_path);
        let key = canonical(&full_path);

        if stack.contains(&key) {
            let chain: Vec<String> = stack
                .iter()
                .chain(std::iter::once(&key))
                .map(|p| p.display().to_string())
                .collect();
            return Err(ConfigError::CircularInclude(chain.join(" -> ")));
        }

        let mut included = load_included_task(&full_path)?;
        if included.name.is_empty() {
            included.name = std::mem::take(&mut task.name);
        }

        stack.push(key);
        process_includes(&mut included, base_dir_of(&full_path), stack)?;
        stack.pop();

        *task = included;
        return Ok(());
    }

    for child in task.serial.iter_mut().chain(task.parallel.iter_mut()) {
        process_includes(child, base_dir, stack)?;
    }

    Ok(())
}

/// Load a task from an included file
fn load_included_task(path: &Path) -> ConfigResult<Task> {
    let contents = fs::read_to_string(path).map_err(|e| ConfigError::IncludeFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;

    serde_yaml::from_str(&contents).map_err(|e| ConfigError::IncludeFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

fn base_dir_of(path: &Path) -> &Path {
    path.parent().unwrap_or_else(|| Path::new("."))
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
