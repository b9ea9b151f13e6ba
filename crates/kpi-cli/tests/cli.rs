use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{Value as JsonValue, json};
use tempfile::TempDir;

fn kpi() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("kpi"));
    cmd.env_remove("KPI_DB")
        .env_remove("KPI_EVAL_TIMEOUT_MS")
        .env_remove("KPI_MAX_CONCURRENT_EVALUATIONS")
        .env("RUST_LOG", "warn");
    cmd
}

fn write_json(dir: &Path, name: &str, value: &JsonValue) -> String {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_vec(value).unwrap()).unwrap();
    path.to_string_lossy().into_owned()
}

fn stdout_json(output: std::process::Output) -> JsonValue {
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

fn temperature_tree(temp_id: u64) -> JsonValue {
    json!({
        "kind": "logical_operation",
        "operator": "AND",
        "children": [
            {"kind": "atom", "parameter": {"id": temp_id, "name": "temp"}, "comparator": "numeric_geq", "reference": 20.0},
            {"kind": "atom", "parameter": {"id": temp_id, "name": "temp"}, "comparator": "numeric_leq", "reference": 24.0}
        ]
    })
}

#[test]
fn help_lists_subcommands() {
    kpi()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("eval"))
        .stdout(predicate::str::contains("defs"))
        .stdout(predicate::str::contains("run"));
}

#[test]
fn eval_prints_fulfillment() {
    let dir = TempDir::new().unwrap();
    let tree = write_json(dir.path(), "tree.json", &temperature_tree(1));
    let warm = write_json(dir.path(), "warm.json", &json!({"temp": 22}));
    let cold = write_json(dir.path(), "cold.json", &json!({"temp": 3.5}));

    kpi()
        .args(["eval", "--tree", &tree, "--parameters", &warm])
        .assert()
        .success()
        .stdout("true\n");
    kpi()
        .args(["eval", "--tree", &tree, "--parameters", &cold])
        .assert()
        .success()
        .stdout("false\n");
}

#[test]
fn eval_fails_on_missing_parameter() {
    let dir = TempDir::new().unwrap();
    let tree = write_json(dir.path(), "tree.json", &temperature_tree(1));
    let params = write_json(dir.path(), "params.json", &json!({"humidity": 40}));

    kpi()
        .args(["eval", "--tree", &tree, "--parameters", &params])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("temp"));
}

#[test]
fn definition_lifecycle_through_run() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("kpi.sqlite3");
    let db = db.to_str().unwrap();

    let sd_type = stdout_json(
        kpi()
            .args(["--db", db, "device", "type", "--denotation", "weather-station"])
            .args(["--parameter", "temp:number", "--parameter", "source:string"])
            .output()
            .unwrap(),
    );
    let sd_type_id = sd_type["id"].as_u64().unwrap();
    let temp_id = sd_type["parameters"]
        .as_array()
        .unwrap()
        .iter()
        .find(|parameter| parameter["name"] == "temp")
        .unwrap()["id"]
        .as_u64()
        .unwrap();

    kpi()
        .args(["--db", db, "device", "instance", "--uid", "ws-1"])
        .args(["--sd-type-id", &sd_type_id.to_string()])
        .assert()
        .success();

    let definition = write_json(
        dir.path(),
        "definition.json",
        &json!({
            "sdType": {"id": sd_type_id, "specification": "weather-station"},
            "userIdentifier": "alice",
            "root": temperature_tree(temp_id),
        }),
    );
    let created = stdout_json(
        kpi()
            .args(["--db", db, "defs", "create", &definition])
            .output()
            .unwrap(),
    );
    let definition_id = created["id"].as_u64().unwrap();

    let listed = stdout_json(kpi().args(["--db", db, "defs", "list"]).output().unwrap());
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let config = stdout_json(kpi().args(["--db", db, "defs", "config"]).output().unwrap());
    assert_eq!(config["weather-station"][0]["id"].as_u64(), Some(definition_id));
    let config = write_json(dir.path(), "config.json", &config);

    let requests = [
        json!({"timestamp": 1.0, "sdInstanceUID": "ws-1", "sdTypeSpecification": "weather-station", "parameters": {"temp": 21}}),
        json!({"timestamp": 2.0, "sdInstanceUID": "ws-2", "sdTypeSpecification": "other-type", "parameters": {"temp": 21}}),
    ];
    let stdin = requests
        .iter()
        .map(|request| format!("{request}\nnot json\n"))
        .collect::<String>();
    let output = kpi()
        .args(["run", "--config", &config])
        .write_stdin(stdin)
        .output()
        .unwrap();
    assert!(output.status.success());
    let results: Vec<JsonValue> = String::from_utf8(output.stdout)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(
        results,
        vec![json!({"sdInstanceUID": "ws-1", "kpiDefinitionID": definition_id, "fulfilled": true})]
    );

    kpi()
        .args(["--db", db, "defs", "delete", &definition_id.to_string()])
        .assert()
        .success();
    kpi()
        .args(["--db", db, "defs", "get", &definition_id.to_string()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn create_rejects_unknown_parameter() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("kpi.sqlite3");
    let db = db.to_str().unwrap();

    let sd_type = stdout_json(
        kpi()
            .args(["--db", db, "device", "type", "--denotation", "thermo"])
            .args(["--parameter", "temp:number"])
            .output()
            .unwrap(),
    );
    let definition = write_json(
        dir.path(),
        "definition.json",
        &json!({
            "sdType": {"id": sd_type["id"], "specification": "thermo"},
            "userIdentifier": "bob",
            "root": temperature_tree(999),
        }),
    );

    kpi()
        .args(["--db", db, "defs", "create", &definition])
        .assert()
        .failure();
    let listed = stdout_json(kpi().args(["--db", db, "defs", "list"]).output().unwrap());
    assert_eq!(listed, json!([]));
}
