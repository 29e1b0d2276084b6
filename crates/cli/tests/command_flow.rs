use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

#[allow(deprecated)]
fn annex(store: &Path) -> Command {
    let mut cmd = Command::cargo_bin("annex").expect("binary");
    cmd.arg("--quiet")
        .arg("--store")
        .arg(store)
        .arg("--dimension")
        .arg("2")
        .arg("--metric")
        .arg("l2");
    cmd
}

fn run_request_raw(store: &Path, request: &Value) -> (bool, Value) {
    let output = annex(store)
        .arg("command")
        .arg("--json")
        .arg(request.to_string())
        .output()
        .expect("command run");
    let body: Value = serde_json::from_slice(&output.stdout).expect("valid json");
    (output.status.success(), body)
}

fn run_request(store: &Path, request: &Value) -> Value {
    let (ok, body) = run_request_raw(store, request);
    assert!(ok, "stdout: {body}\nrequest: {request}");
    body
}

#[test]
fn documents_survive_between_invocations() {
    let temp = tempdir().unwrap();
    let store = temp.path().join("annex.json");

    let indexed = run_request(
        &store,
        &json!({
            "action": "index",
            "payload": {"documents": [
                {"id": "a", "vector": [1.0, 0.0], "payload": {"lang": "en"}},
                {"id": "b", "vector": [0.0, 1.0]},
                {"id": "c", "vector": [0.9, 0.1]}
            ]}
        }),
    );
    assert_eq!(indexed["status"], "ok");
    assert_eq!(indexed["data"]["inserted"], json!(["a", "b", "c"]));
    assert!(store.exists());

    let searched = run_request(
        &store,
        &json!({
            "action": "search",
            "payload": {"queries": [{"vector": [1.0, 0.0]}], "top_k": 2}
        }),
    );
    let ids: Vec<&str> = searched["data"]["queries"][0]["matches"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["document"]["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["a", "c"]);
    assert_eq!(searched["meta"]["action"], "search");

    let got = run_request(&store, &json!({"action": "get", "payload": {"id": "a"}}));
    assert_eq!(got["data"]["document"]["payload"]["lang"], "en");
}

#[test]
fn delete_and_get_subcommands() {
    let temp = tempdir().unwrap();
    let store = temp.path().join("annex.json");
    run_request(
        &store,
        &json!({
            "action": "index",
            "payload": {"documents": [{"id": "a", "vector": [1.0, 0.0]}]}
        }),
    );

    annex(&store)
        .arg("delete")
        .arg("a")
        .arg("missing")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""deleted":["a"]"#))
        .stdout(predicate::str::contains(r#""not_found":["missing"]"#));

    annex(&store)
        .arg("get")
        .arg("a")
        .assert()
        .failure()
        .stdout(predicate::str::contains(r#""code":"not_found""#));

    let output = annex(&store).arg("stats").output().unwrap();
    assert!(output.status.success());
    let stats: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["data"]["live"], 0);
    assert_eq!(stats["data"]["metric"], "l2");
}

#[test]
fn shape_mismatch_exits_with_error_envelope() {
    let temp = tempdir().unwrap();
    let store = temp.path().join("annex.json");
    let (ok, body) = run_request_raw(
        &store,
        &json!({
            "action": "search",
            "payload": {"queries": [{"vector": [1.0, 0.0, 0.0]}]}
        }),
    );
    assert!(!ok);
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"]["code"], "shape_mismatch");
    assert_eq!(body["error"]["details"], json!({"expected": 2, "actual": 3}));
}

#[test]
fn serve_answers_each_line() {
    let temp = tempdir().unwrap();
    let store = temp.path().join("annex.json");
    let input = [
        json!({"action": "index", "payload": {"documents": [{"id": "a", "vector": [1.0, 0.0]}]}})
            .to_string(),
        "not json".to_string(),
        String::new(),
        json!({"action": "update", "payload": {"documents": [{"id": "a", "vector": [0.0, 1.0]}]}})
            .to_string(),
        json!({"action": "stats"}).to_string(),
    ]
    .join("\n");

    let output = annex(&store)
        .arg("serve")
        .write_stdin(input)
        .output()
        .expect("serve run");
    assert!(output.status.success());

    let lines: Vec<Value> = String::from_utf8(output.stdout)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0]["data"]["inserted"], json!(["a"]));
    assert_eq!(lines[1]["error"]["code"], "invalid_argument");
    assert_eq!(lines[2]["data"]["updated"], json!(["a"]));
    assert_eq!(lines[3]["data"]["buffered"], 1);
}

#[test]
fn serve_keeps_running_after_huge_top_k() {
    let temp = tempdir().unwrap();
    let store = temp.path().join("annex.json");
    let input = [
        json!({"action": "index", "payload": {"documents": [
            {"id": "a", "vector": [1.0, 0.0]},
            {"id": "b", "vector": [0.0, 1.0]}
        ]}})
        .to_string(),
        json!({"action": "search", "payload": {
            "queries": [{"vector": [1.0, 0.0]}],
            "top_k": u64::MAX
        }})
        .to_string(),
        json!({"action": "stats"}).to_string(),
    ]
    .join("\n");

    let output = annex(&store)
        .arg("serve")
        .write_stdin(input)
        .output()
        .expect("serve run");
    assert!(output.status.success());

    let lines: Vec<Value> = String::from_utf8(output.stdout)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[1]["status"], "ok");
    let matches = lines[1]["data"]["queries"][0]["matches"].as_array().unwrap();
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0]["document"]["id"], "a");
    assert_eq!(lines[2]["data"]["live"], 2);
}

#[test]
fn config_file_supplies_index_settings() {
    let temp = tempdir().unwrap();
    let config = temp.path().join("annex.toml");
    let store = temp.path().join("data").join("store.json");
    fs::write(
        &config,
        format!(
            "store = {:?}\n\n[index]\ndimension = 3\nmetric = \"inner_product\"\n",
            store.display().to_string()
        ),
    )
    .unwrap();

    #[allow(deprecated)]
    let output = Command::cargo_bin("annex")
        .unwrap()
        .arg("--quiet")
        .arg("--config")
        .arg(&config)
        .arg("stats")
        .output()
        .unwrap();
    assert!(output.status.success());
    let stats: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["data"]["dimension"], 3);
    assert_eq!(stats["data"]["metric"], "inner_product");
}

#[test]
fn unsupported_index_key_fails_before_running() {
    let temp = tempdir().unwrap();
    annex(&temp.path().join("annex.json"))
        .arg("--index-key")
        .arg("PQ16")
        .arg("stats")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported index key"));
}
