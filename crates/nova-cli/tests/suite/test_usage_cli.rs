use assert_cmd::Command;
use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;

fn nova() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("nova"));
    cmd.env_remove("RUST_LOG")
        .env_remove("NOVA_TEST_USAGE_FLUSH_INTERVAL_MS");
    cmd
}

const TRACES: &str = r#"[
  { "test": "FooTest#adds", "module": "app", "classes": { "com.example.Foo": ["add", "sub"] } },
  { "test": "FooTest#subs", "classes": { "com.example.Foo": ["sub"] } },
  { "test": "FooTest#nothing" }
]"#;

fn ingest(temp: &TempDir) -> std::path::PathBuf {
    let traces = temp.child("traces.json");
    traces.write_str(TRACES).unwrap();
    let index = temp.path().join("index");

    nova()
        .args(["test-usage", "ingest", "--index"])
        .arg(&index)
        .arg(traces.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("ingested 3 traces from 1 files (2 changed)"));
    index
}

#[test]
fn help_mentions_test_usage_commands() {
    nova()
        .args(["test-usage", "--help"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("ingest")
                .and(predicate::str::contains("tests"))
                .and(predicate::str::contains("usage"))
                .and(predicate::str::contains("dump"))
                .and(predicate::str::contains("stats"))
                .and(predicate::str::contains("compact")),
        );
}

#[test]
fn ingested_traces_answer_method_queries() {
    let temp = TempDir::new().unwrap();
    let index = ingest(&temp);

    let output = nova()
        .args(["test-usage", "tests", "--index"])
        .arg(&index)
        .args(["com.example.Foo", "sub", "--json"])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let v: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(
        v["tests"],
        serde_json::json!(["FooTest#adds", "FooTest#subs"])
    );
    assert_eq!(v["modules"], serde_json::json!(["app"]));

    nova()
        .args(["test-usage", "usage", "--index"])
        .arg(&index)
        .arg("FooTest#adds")
        .assert()
        .success()
        .stdout("com.example.Foo#add\ncom.example.Foo#sub\n");
}

#[test]
fn dump_and_stats_are_json() {
    let temp = TempDir::new().unwrap();
    let index = ingest(&temp);

    let output = nova()
        .args(["test-usage", "dump", "--index"])
        .arg(&index)
        .output()
        .unwrap();
    assert!(output.status.success());
    let dump: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(dump["tests"]["FooTest#subs"]["com.example.Foo"][0], "sub");
    assert!(dump["tests"].get("FooTest#nothing").is_none());

    let output = nova()
        .args(["test-usage", "stats", "--json", "--index"])
        .arg(&index)
        .output()
        .unwrap();
    assert!(output.status.success());
    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["read_only"], true);
    assert_eq!(stats["stores"].as_array().unwrap().len(), 3);
}

#[test]
fn compact_reports_every_store() {
    let temp = TempDir::new().unwrap();
    let index = ingest(&temp);

    let output = nova()
        .args(["test-usage", "compact", "--json", "--index"])
        .arg(&index)
        .output()
        .unwrap();
    assert!(output.status.success());
    let reports: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(reports.as_array().unwrap().len(), 3);
}

#[test]
fn missing_index_exits_with_code_2() {
    let temp = TempDir::new().unwrap();

    nova()
        .args(["test-usage", "stats", "--index"])
        .arg(temp.path().join("missing"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("failed to open test usage index"));
}

#[test]
fn malformed_trace_exits_with_code_2_without_echoing_values() {
    let temp = TempDir::new().unwrap();
    let traces = temp.child("bad.json");
    traces
        .write_str(r#"{ "test": "T", "classes": { "A": "secret-value" } }"#)
        .unwrap();

    nova()
        .args(["test-usage", "ingest", "--index"])
        .arg(temp.path().join("index"))
        .arg(traces.path())
        .assert()
        .code(2)
        .stderr(
            predicate::str::contains("invalid trace")
                .and(predicate::str::contains("secret-value").not()),
        );
}

#[test]
fn config_file_is_validated() {
    let temp = TempDir::new().unwrap();
    let config = temp.child("nova-test-usage.toml");
    config.write_str("flush_interval_ms = 0\n").unwrap();

    nova()
        .args(["test-usage", "compact", "--index"])
        .arg(temp.path().join("index"))
        .arg("--config")
        .arg(config.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("flush_interval_ms must be positive"));
}
