use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use assert_fs::TempDir;
use assert_fs::prelude::*;
use predicates::prelude::*;
use serde_json::{Value, json};

const ONBOARDING: &str = include_str!("../../flow-spec/tests/fixtures/onboarding.json");
const BROKEN: &str = include_str!("../../flow-spec/tests/fixtures/broken.json");

fn formflow() -> Command {
    cargo_bin_cmd!("formflow")
}

fn workspace(data: &Value) -> TempDir {
    let dir = TempDir::new().unwrap();
    dir.child("schema.json").write_str(ONBOARDING).unwrap();
    dir.child("data.json").write_str(&data.to_string()).unwrap();
    dir
}

#[test]
fn steps_lists_visible_steps() {
    let dir = workspace(&json!({ "employed": true }));
    formflow()
        .current_dir(dir.path())
        .args(["steps", "--schema", "schema.json", "--data", "data.json"])
        .assert()
        .success()
        .stdout("intro\npersonal\nemployment\norder\nreview\ndone\n");
}

#[test]
fn fields_respects_context_roles() {
    let dir = workspace(&json!({ "qty": 1 }));
    dir.child("context.json")
        .write_str(r#"{ "user": { "roles": ["partner"] } }"#)
        .unwrap();

    formflow()
        .current_dir(dir.path())
        .args(["fields", "--schema", "schema.json", "--data", "data.json"])
        .args(["--step", "order", "--context", "context.json"])
        .assert()
        .success()
        .stdout("price\nqty\ncoupon\n");

    formflow()
        .current_dir(dir.path())
        .args(["fields", "--schema", "schema.json", "--step", "nowhere"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown step 'nowhere'"));
}

#[test]
fn next_honours_the_review_override() {
    let dir = workspace(&json!({}));
    formflow()
        .current_dir(dir.path())
        .args(["next", "--schema", "schema.json", "--step", "review"])
        .assert()
        .success()
        .stdout("next: none\n");

    formflow()
        .current_dir(dir.path())
        .args(["next", "--schema", "schema.json", "--step", "review"])
        .arg("--no-review-terminal")
        .assert()
        .success()
        .stdout("next: done\n");
}

#[test]
fn prev_and_path_follow_the_flow() {
    let dir = workspace(&json!({ "employed": true }));
    formflow()
        .current_dir(dir.path())
        .args(["prev", "--schema", "schema.json", "--data", "data.json", "--step", "order"])
        .assert()
        .success()
        .stdout("previous: employment\n");

    formflow()
        .current_dir(dir.path())
        .args(["path", "--schema", "schema.json", "--data", "data.json"])
        .args(["--from", "intro", "--to", "review"])
        .assert()
        .success()
        .stdout("intro -> personal -> employment -> order -> review\n");

    formflow()
        .current_dir(dir.path())
        .args(["path", "--schema", "schema.json", "--from", "intro", "--to", "review"])
        .args(["--max-steps", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no path from intro to review within 1 steps"));
}

#[test]
fn config_file_changes_review_steps() {
    let dir = workspace(&json!({}));
    dir.child("config.json")
        .write_str(r#"{ "review_steps": ["order"] }"#)
        .unwrap();

    formflow()
        .current_dir(dir.path())
        .args(["--config", "config.json"])
        .args(["next", "--schema", "schema.json", "--step", "order"])
        .assert()
        .success()
        .stdout("next: none\n");
}

#[test]
fn compute_writes_the_snapshot_back() {
    let dir = workspace(&json!({ "price": 12.5, "qty": 4, "name": "ada" }));
    let output = formflow()
        .current_dir(dir.path())
        .args(["compute", "--schema", "schema.json", "--data", "data.json", "--write"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let printed: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(printed["data"]["total"], json!(60));
    assert_eq!(printed["results"].as_array().map(Vec::len), Some(4));

    let written: Value =
        serde_json::from_str(&std::fs::read_to_string(dir.child("data.json").path()).unwrap())
            .unwrap();
    assert_eq!(written["subtotal"], json!(50));
    assert_eq!(written["greeting"], json!("Hello, ADA"));
}

#[test]
fn compute_changed_only_reruns_downstream_fields() {
    let dir = workspace(&json!({ "price": 2, "qty": 3 }));
    let output = formflow()
        .current_dir(dir.path())
        .args(["compute", "--schema", "schema.json", "--data", "data.json"])
        .args(["--changed", "$.qty"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let printed: Value = serde_json::from_slice(&output.stdout).unwrap();
    let paths: Vec<&str> = printed["results"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|result| result["path"].as_str())
        .collect();
    assert_eq!(paths, vec!["$.subtotal", "$.tax", "$.total"]);
    assert!(printed["data"].get("greeting").is_none());
}

#[test]
fn check_fails_on_broken_schema() {
    let dir = TempDir::new().unwrap();
    dir.child("broken.json").write_str(BROKEN).unwrap();
    dir.child("good.json").write_str(ONBOARDING).unwrap();

    formflow()
        .current_dir(dir.path())
        .args(["check", "--schema", "good.json"])
        .assert()
        .success()
        .stdout("Schema check: ok\n");

    formflow()
        .current_dir(dir.path())
        .args(["check", "--schema", "broken.json"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("[duplicate_step] middle"))
        .stdout(predicate::str::contains("[circular_dependency]"))
        .stderr(predicate::str::contains("schema check failed"));
}

#[test]
fn schema_prints_json_schema() {
    let output = formflow().arg("schema").output().unwrap();
    assert!(output.status.success());
    let schema: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(schema["title"], json!("FormSchema"));
    assert!(schema["properties"]["steps"].is_object());
}

#[test]
fn missing_files_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    formflow()
        .current_dir(dir.path())
        .args(["steps", "--schema", "absent.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read absent.json"));
}
