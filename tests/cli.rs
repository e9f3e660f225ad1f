mod common;

use common::gendash_bin;
use predicates::prelude::*;

#[test]
fn version_flag_prints_version() {
    gendash_bin()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("gendash "));
}

#[test]
fn help_flag_prints_usage() {
    gendash_bin()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage: gendash"))
        .stdout(predicate::str::contains("--config"));
}
