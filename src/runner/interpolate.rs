//! Directory expansion and subprocess environment composition
//!
//! Working directories may reference host environment variables with the
//! `$VAR` syntax. Unlike command strings, they are expanded by us before
//! launch, because the directory is needed before any shell exists.

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::env;
use std::ffi::OsString;
use std::sync::OnceLock;

/// Name of the variable carrying the run identifier
pub const BUILD_ID_VAR: &str = "BUILD_ID";

fn directory_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$[A-Z0-9_-]+").expect("directory variable pattern"))
}

/// Expand `$VAR` tokens against the host environment
///
/// Unset variables expand to the empty string; nothing here fails.
pub fn resolve_directory(directory: &str) -> String {
    if !directory.contains('$') {
        return directory.to_string();
    }

    directory_var_pattern()
        .replace_all(directory, |caps: &Captures| {
            env::var(&caps[0][1..]).unwrap_or_default()
        })
        .into_owned()
}

/// Build the full environment of a subprocess
///
/// The list is host environment, then `BUILD_ID`, then the node's own
/// variables. Keys may repeat; the last occurrence wins.
pub fn compose_env(build_id: &str, overrides: &HashMap<String, String>) -> Vec<(OsString, OsString)> {
    let mut vars: Vec<(OsString, OsString)> = env::vars_os().collect();
    vars.reserve(overrides.len() + 1);
    vars.push((BUILD_ID_VAR.into(), build_id.into()));
    vars.extend(
        overrides
            .iter()
            .map(|(key, value)| (OsString::from(key), OsString::from(value))),
    );
    vars
}

/// Look up a key in a composed environment using last-write-wins
pub fn lookup_env<'a>(vars: &'a [(OsString, OsString)], key: &str) -> Option<&'a OsString> {
    vars.iter()
        .rev()
        .find(|(k, _)| k.as_os_str() == key)
        .map(|(_, v)| v)
}
