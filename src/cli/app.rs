//! Main CLI application

use crate::config::{parse_tree_auto, parse_tree_file, validate_tree};
use crate::runner::{Scope, Status, Task};
use anyhow::Context as _;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use colored::Colorize;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Silent = 0,
    Quiet = 1,
    Normal = 2,
    Verbose = 3,
}

impl Verbosity {
    /// Default log filter when `RUST_LOG` is not set
    pub fn filter(&self) -> &'static str {
        match self {
            Verbosity::Silent => "off",
            Verbosity::Quiet => "warn",
            Verbosity::Normal => "info",
            Verbosity::Verbose => "debug",
        }
    }
}

/// Options gathered from the command line
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub file: Option<PathBuf>,
    pub build_id: Option<String>,
    pub timeout: Option<Duration>,
    pub env_file: Option<PathBuf>,
    pub verbosity: Verbosity,
    pub summary: bool,
}

/// Build the clap command
pub fn build_command() -> Command {
    Command::new("pipetree")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Run a tree of serial and parallel shell tasks")
        .arg(
            Arg::new("file")
                .short('f')
                .long("file")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Path to pipetree.yml (searched upwards by default)"),
        )
        .arg(
            Arg::new("build-id")
                .long("build-id")
                .value_name("ID")
                .help("Run identifier exported as BUILD_ID (random by default)"),
        )
        .arg(
            Arg::new("timeout")
                .short('t')
                .long("timeout")
                .value_name("SECONDS")
                .value_parser(value_parser!(u64))
                .help("Abort everything still running after this many seconds"),
        )
        .arg(
            Arg::new("env-file")
                .long("env-file")
                .value_name("PATH")
                .value_parser(value_parser!(PathBuf))
                .help("Load variables from a .env file before running"),
        )
        .arg(
            Arg::new("summary")
                .long("summary")
                .help("Print the status of every task when done")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Only log warnings and errors")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("silent")
                .short('s')
                .long("silent")
                .help("Log nothing")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Log debug output")
                .action(ArgAction::SetTrue),
        )
}

/// Get verbosity level from matches
fn get_verbosity(matches: &ArgMatches) -> Verbosity {
    if matches.get_flag("silent") {
        Verbosity::Silent
    } else if matches.get_flag("quiet") {
        Verbosity::Quiet
    } else if matches.get_flag("verbose") {
        Verbosity::Verbose
    } else {
        Verbosity::Normal
    }
}

/// Turn parsed arguments into run options
pub fn parse_options(matches: &ArgMatches) -> RunOptions {
    RunOptions {
        file: matches.get_one::<PathBuf>("file").cloned(),
        build_id: matches.get_one::<String>("build-id").cloned(),
        timeout: matches
            .get_one::<u64>("timeout")
            .map(|secs| Duration::from_secs(*secs)),
        env_file: matches.get_one::<PathBuf>("env-file").cloned(),
        verbosity: get_verbosity(matches),
        summary: matches.get_flag("summary"),
    }
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over the verbosity flags.
pub fn init_logging(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.filter()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .try_init();
}

/// Build the execution scope for one run
pub fn build_scope(options: &RunOptions) -> Scope {
    let mut scope = Scope::new();
    if let Some(build_id) = &options.build_id {
        scope = scope.with_build_id(build_id.clone());
    }
    if let Some(timeout) = options.timeout {
        scope = scope.with_timeout(timeout);
    }
    scope
}

/// Load, validate and run the pipeline described by `options`
pub fn run_with(options: RunOptions) -> anyhow::Result<()> {
    if let Some(env_file) = &options.env_file {
        dotenvy::from_path(env_file)
            .with_context(|| format!("failed to load {}", env_file.display()))?;
    }

    let (mut root, config_path) = match &options.file {
        Some(path) => (parse_tree_file(path)?, path.clone()),
        None => parse_tree_auto()?,
    };
    validate_tree(&root).with_context(|| format!("invalid pipeline {}", config_path.display()))?;

    let scope = build_scope(&options);
    info!("Build {} from {}", scope.build_id(), config_path.display());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let result = runtime.block_on(async {
        let interrupt = scope.cancellation_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, aborting running tasks");
                interrupt.cancel();
            }
        });

        root.execute(&scope).await
    });

    if options.summary {
        print_summary(&root);
    }

    result.with_context(|| format!("build {} failed", scope.build_id()))
}

/// Print one line per task with its final status
fn print_summary(root: &Task) {
    if !std::io::stderr().is_terminal() {
        colored::control::set_override(false);
    }
    for (depth, name, status) in root.summary() {
        let label = match status {
            Status::Succeeded => status.to_string().green(),
            Status::Failed => status.to_string().red().bold(),
            Status::Aborted => status.to_string().yellow(),
            Status::Skipped => status.to_string().cyan(),
            Status::Init | Status::Running => status.to_string().dimmed(),
        };
        let name = if name.is_empty() { "<unnamed>" } else { name };
        eprintln!("{}{} {}", "  ".repeat(depth), label, name);
    }
}

/// Run the CLI application with the process arguments
pub fn run() -> anyhow::Result<()> {
    let matches = build_command().get_matches();
    let options = parse_options(&matches);
    init_logging(options.verbosity);
    run_with(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_verbosity_normal() {
        let matches = build_command().get_matches_from(vec!["pipetree"]);
        assert_eq!(get_verbosity(&matches), Verbosity::Normal);
    }

    #[test]
    fn test_silent_beats_verbose() {
        let matches = build_command().get_matches_from(vec!["pipetree", "-s", "-v"]);
        assert_eq!(get_verbosity(&matches), Verbosity::Silent);
    }

    #[test]
    fn test_parse_options() {
        let matches = build_command().get_matches_from(vec![
            "pipetree",
            "-f",
            "ci.yml",
            "--build-id",
            "42",
            "--timeout",
            "30",
            "--summary",
        ]);
        let options = parse_options(&matches);

        assert_eq!(options.file, Some(PathBuf::from("ci.yml")));
        assert_eq!(options.build_id.as_deref(), Some("42"));
        assert_eq!(options.timeout, Some(Duration::from_secs(30)));
        assert!(options.summary);
        assert_eq!(options.env_file, None);
    }

    #[test]
    fn test_build_scope_uses_build_id() {
        let matches = build_command().get_matches_from(vec!["pipetree", "--build-id", "abc"]);
        let scope = build_scope(&parse_options(&matches));
        assert_eq!(scope.build_id(), "abc");
    }

    #[test]
    fn test_verbosity_filters() {
        assert_eq!(Verbosity::Silent.filter(), "off");
        assert_eq!(Verbosity::Verbose.filter(), "debug");
        assert!(Verbosity::Verbose > Verbosity::Normal);
    }
}
