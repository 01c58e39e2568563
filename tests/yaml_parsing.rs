//! Integration tests for pipeline file parsing

mod common;

use common::{create_test_pipeline, text, write_file};
use pipetree::config::{parse_tree, parse_tree_file, validate_tree};
use pipetree::error::{ConfigError, PipetreeError};
use pipetree::runner::{Scope, Status};

#[test]
fn test_parse_complete_pipeline() {
    let yaml = r#"
name: ci
serial:
  - name: fetch
    command: git fetch
    directory: $CHECKOUT
  - name: checks
    parallel:
      - name: lint
        command: cargo clippy
      - name: test
        command: cargo test
        env:
          RUST_BACKTRACE: "1"
      - name: docs
        command: cargo doc
        only_if: test -d docs
  - name: deploy
    command: ./deploy.sh
    wait_for:
      address: registry:5000
      timeout: 30
      interval: 250
"#;

    let root = parse_tree(yaml, None).unwrap();
    validate_tree(&root).unwrap();

    assert_eq!(root.name, "ci");
    assert!(root.command.is_empty());
    assert_eq!(root.serial.len(), 3);

    let checks = &root.serial[1];
    assert_eq!(checks.parallel.len(), 3);
    assert_eq!(
        checks.parallel[1].env.get("RUST_BACKTRACE").map(String::as_str),
        Some("1")
    );
    assert_eq!(checks.parallel[2].only_if, "test -d docs");

    let wait_for = root.serial[2].wait_for.as_ref().unwrap();
    assert_eq!(wait_for.address, "registry:5000");
    assert_eq!(wait_for.timeout, 30);
    assert_eq!(wait_for.interval, 250);
}

#[test]
fn test_runtime_fields_start_fresh() {
    let root = parse_tree("name: x\ncommand: echo x\n", None).unwrap();
    assert_eq!(root.status, Status::Init);
    assert!(root.stdout.is_empty());
    assert!(root.combined_output.is_empty());
}

#[test]
fn test_invalid_yaml() {
    let result = parse_tree("serial: [unclosed", None);
    assert!(matches!(result, Err(PipetreeError::Yaml(_))));
}

#[test]
fn test_empty_node_fails_validation() {
    let root = parse_tree("name: ci\nparallel:\n  - name: hollow\n", None).unwrap();
    assert!(matches!(
        validate_tree(&root),
        Err(ConfigError::EmptyNode(_))
    ));
}

#[test]
fn test_nested_includes_resolve_relative_to_including_file() {
    let (temp_dir, config_path) = create_test_pipeline(
        "name: ci\nserial:\n  - name: build\n    include: stages/build.yml\n",
    );
    std::fs::create_dir(temp_dir.path().join("stages")).unwrap();
    write_file(
        &temp_dir.path().join("stages"),
        "build.yml",
        "serial:\n  - include: compile.yml\n  - name: package\n    command: tar cf out.tar .\n",
    );
    write_file(
        &temp_dir.path().join("stages"),
        "compile.yml",
        "name: compile\ncommand: make\n",
    );

    let root = parse_tree_file(&config_path).unwrap();
    validate_tree(&root).unwrap();

    let build = &root.serial[0];
    assert_eq!(build.name, "build");
    assert_eq!(build.serial[0].name, "compile");
    assert_eq!(build.serial[0].command, "make");
    assert_eq!(build.serial[1].name, "package");
}

#[tokio::test]
async fn test_parsed_pipeline_runs() {
    let (_temp_dir, config_path) = create_test_pipeline(
        r#"
name: chain
serial:
  - name: produce
    command: printf 'one\ntwo\n'
  - name: consume
    command: grep two
"#,
    );

    let mut root = parse_tree_file(&config_path).unwrap();
    root.execute(&Scope::new()).await.unwrap();

    assert_eq!(text(&root.serial[1].stdout), "two\n");
    assert_eq!(root.serial[1].status, Status::Succeeded);
}
