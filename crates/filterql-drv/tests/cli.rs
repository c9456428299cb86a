//! End-to-end CLI tests covering six representative filter scenarios and
//! three negative (fault) scenarios, driven against the built `filterql`
//! binary.

use assert_cmd::Command;
use predicates::prelude::*;

fn filterql() -> Command {
    Command::cargo_bin("filterql").expect("binary should build")
}

fn run_ok(program: &str, input: &str) -> String {
    let assert = filterql().arg(program).write_stdin(input).assert().success();
    String::from_utf8(assert.get_output().stdout.clone()).unwrap()
}

#[test]
fn cli_help_output() {
    filterql()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage").or(predicate::str::contains("filterql")));
}

#[test]
fn cli_version_output() {
    filterql()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0."));
}

#[test]
fn scenario_alternative_operator() {
    let out = run_ok(r#".foo // "fallback""#, r#"{"foo": null}"#);
    assert_eq!(out, "\"fallback\"\n");
}

#[test]
fn scenario_select_even_numbers() {
    let out = run_ok("[.[] | select(. % 2 == 0)]", "[1,2,3,4,5]");
    assert_eq!(out, "[2,4]\n");
}

#[test]
fn scenario_reduce_sum() {
    let out = run_ok("reduce .[] as $x (0; . + $x)", "[1,2,3,4]");
    assert_eq!(out, "10\n");
}

#[test]
fn scenario_keys_sorted() {
    let out = run_ok("keys", r#"{"b":1,"a":2}"#);
    assert_eq!(out, "[\"a\",\"b\"]\n");
}

#[test]
fn scenario_setpath_builds_array() {
    let out = run_ok(r#"setpath(["a",0]; 7)"#, "null");
    assert_eq!(out, "{\"a\":[7]}\n");
}

#[test]
fn scenario_recursive_factorial() {
    let out = run_ok(
        "def f: if . == 0 then 1 else . * (. - 1 | f) end; 5 | f",
        "null",
    );
    assert_eq!(out, "120\n");
}

#[test]
fn negative_now_is_rejected_at_validation() {
    filterql()
        .arg("now")
        .write_stdin("null")
        .assert()
        .failure()
        .stderr(predicate::str::contains("disallowed"));
}

#[test]
fn negative_division_by_zero_is_a_runtime_fault() {
    filterql()
        .arg("1/0")
        .write_stdin("null")
        .assert()
        .failure()
        .stderr(predicate::str::contains("runtime error"));
}

#[test]
fn negative_output_cap_is_a_resource_fault() {
    filterql()
        .arg("[range(100001)]")
        .arg("--max-outputs")
        .arg("100000")
        .write_stdin("null")
        .assert()
        .failure()
        .stderr(predicate::str::contains("limit exceeded"));
}

#[test]
fn arg_flag_binds_a_dollar_variable() {
    let out = filterql()
        .arg("$greeting")
        .arg("--arg")
        .arg(r#"greeting="hi""#)
        .write_stdin("null")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(String::from_utf8(out).unwrap(), "\"hi\"\n");
}

#[test]
fn program_file_flag_reads_filter_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("filter.jq");
    std::fs::write(&path, ".").unwrap();

    let out = filterql()
        .arg("--program-file")
        .arg(&path)
        .write_stdin("42")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(String::from_utf8(out).unwrap(), "42\n");
}
