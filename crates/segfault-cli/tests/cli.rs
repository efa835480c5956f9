// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Integration tests for the `segfault` binary.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn segfault_cmd() -> Command {
    Command::cargo_bin("segfault").expect("binary built")
}

#[test]
fn help_describes_the_run_subcommand() {
    segfault_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"));
}

#[test]
fn rejects_a_script_that_is_not_json() {
    let mut script = NamedTempFile::new().expect("tempfile");
    write!(script, "not json").expect("write");

    segfault_cmd()
        .arg("run")
        .arg("--script")
        .arg(script.path())
        .arg("--ticks")
        .arg("1")
        .assert()
        .failure();
}

#[test]
fn runs_a_scripted_join_and_prints_a_final_perception() {
    let mut script = NamedTempFile::new().expect("tempfile");
    write!(
        script,
        r#"[{{"tick": 0, "call_sign": "alice", "action": "join"}}]"#
    )
    .expect("write");

    segfault_cmd()
        .arg("run")
        .arg("--script")
        .arg(script.path())
        .arg("--ticks")
        .arg("3")
        .arg("--grid-size")
        .arg("8")
        .arg("--wall-count")
        .arg("4")
        .assert()
        .success()
        .stdout(predicate::str::contains("final_perception"))
        .stdout(predicate::str::contains("alice"));
}
