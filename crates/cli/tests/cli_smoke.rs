//! CLI smoke tests for procbuild.
//!
//! These run the binary without a docker daemon, so they only cover argument
//! handling and the checks made before any build stage starts.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

fn procbuild_cmd() -> Command {
  cargo_bin_cmd!("procbuild")
}

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  procbuild_cmd()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  procbuild_cmd()
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("procbuild"));
}

#[test]
fn build_help_lists_source_options() {
  procbuild_cmd()
    .args(["build", "--help"])
    .assert()
    .success()
    .stdout(predicate::str::contains("--nuclio-src-dir"))
    .stdout(predicate::str::contains("--nuclio-src-url"))
    .stdout(predicate::str::contains("--push"));
}

// =============================================================================
// Argument validation
// =============================================================================

#[test]
fn build_requires_function_path() {
  procbuild_cmd()
    .arg("build")
    .assert()
    .failure()
    .stderr(predicate::str::contains("<PATH>"));
}

#[test]
fn build_rejects_unknown_output_kind() {
  let temp = TempDir::new().unwrap();

  procbuild_cmd()
    .args(["build", "--output", "tarball"])
    .arg(temp.path())
    .assert()
    .failure()
    .stderr(predicate::str::contains("invalid value 'tarball'"));
}

#[test]
fn build_rejects_both_source_kinds() {
  let temp = TempDir::new().unwrap();

  procbuild_cmd()
    .arg("build")
    .arg(temp.path())
    .args(["--nuclio-src-dir", "/src", "--nuclio-src-url", "https://example.com/nuclio.git"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn build_missing_function_path_fails_before_docker() {
  let temp = TempDir::new().unwrap();

  procbuild_cmd()
    .arg("build")
    .arg(temp.path().join("missing"))
    .assert()
    .code(1)
    .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn unknown_command_fails() {
  procbuild_cmd().arg("deploy").assert().failure();
}
