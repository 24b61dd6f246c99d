//! Command-line tests of the testcode binary

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const USERCONFIG: &str = r##"
[user]
benchmark = "ref"
date_fmt = "run"

[programs.cat]
exe = "cat"
data_tag = "#"
"##;

const JOBCONFIG: &str = r#"
[tests.t1]
inputs_args = [["in.txt", ""]]
"#;

fn project(benchmark: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("userconfig.toml"), USERCONFIG).unwrap();
    fs::write(dir.path().join("jobconfig.toml"), JOBCONFIG).unwrap();
    let test_dir = dir.path().join("t1");
    fs::create_dir(&test_dir).unwrap();
    fs::write(test_dir.join("in.txt"), "# total 42.0\n").unwrap();
    fs::write(test_dir.join("benchmark.out.ref.inp=in.txt"), benchmark).unwrap();
    dir
}

fn testcode(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("testcode").unwrap();
    cmd.current_dir(dir.path());
    cmd
}

#[test]
fn test_help_output() {
    let mut cmd = Command::cargo_bin("testcode").unwrap();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Run tests and compare their output against benchmarks"))
        .stdout(predicate::str::contains("make-benchmarks"))
        .stdout(predicate::str::contains("--userconfig"));
}

#[test]
fn test_unknown_action() {
    let mut cmd = Command::cargo_bin("testcode").unwrap();
    cmd.arg("explode");
    cmd.assert().failure().stderr(predicate::str::contains("invalid value"));
}

#[test]
fn test_missing_userconfig() {
    let dir = TempDir::new().unwrap();
    testcode(&dir)
        .arg("run")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Error initializing session"));
}

#[test]
fn test_passing_run() {
    let dir = project("# total 42.0\n");
    testcode(&dir)
        .args(["run", "-q"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[1/1]"));
    assert!(dir.path().join("t1/test.out.run.inp=in.txt").is_file());
}

#[test]
fn test_failing_run_exits_nonzero() {
    let dir = project("# total 41.0\n");
    testcode(&dir)
        .arg("run")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("**FAILED**"))
        .stdout(predicate::str::contains("WARNING: only 0 out of 1 tests passed."));
}

#[test]
fn test_compare_after_run() {
    let dir = project("# total 42.0\n");
    testcode(&dir).args(["run", "-q"]).assert().success();
    testcode(&dir)
        .args(["compare", "-t", "run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("All done.  1 out of 1 tests passed."));
}

#[test]
fn test_diff_with_external_program() {
    let dir = project("# total 41.0\n");
    testcode(&dir).args(["run", "-q"]).assert().code(1);
    testcode(&dir)
        .args(["diff", "-t", "run"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Diffing benchmark.out.ref.inp=in.txt and test.out.run.inp=in.txt",
        ))
        .stdout(predicate::str::contains("< # total 41.0"))
        .stdout(predicate::str::contains("> # total 42.0"));
}

#[test]
fn test_make_benchmarks_refused_without_force() {
    let dir = project("# total 41.0\n");
    testcode(&dir)
        .arg("make-benchmarks")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Not making benchmarks"));
    let userconfig = fs::read_to_string(dir.path().join("userconfig.toml")).unwrap();
    assert!(userconfig.contains("benchmark = \"ref\""));
}
