use assert_cmd::Command;
use predicates::str::contains;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const ORIGINAL: &str = "SELECT ss_item_sk, ss_quantity FROM store_sales WHERE ss_quantity > 10";
const PUSHED: &str =
    "SELECT ss_item_sk, ss_quantity FROM store_sales WHERE ss_quantity > 10 AND ss_item_sk IS NOT NULL";

fn workspace(fail_connect: bool) -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    fs::create_dir_all(root.join("queries")).unwrap();
    fs::write(root.join("queries/q1.sql"), format!("{ORIGINAL};\n")).unwrap();
    fs::write(
        root.join("engine.yaml"),
        format!(
            r#"
fail_connect: {fail_connect}
queries:
  - sql: "{ORIGINAL}"
    columns: [ss_item_sk, ss_quantity]
    rows: [[1, 11], [2, 12]]
    latency_ms: 9
  - sql: "{PUSHED}"
    columns: [ss_item_sk, ss_quantity]
    rows: [[2, 12], [1, 11]]
    latency_ms: 3
"#
        ),
    )
    .unwrap();
    fs::write(
        root.join("candidates.yaml"),
        format!(
            r#"
queries:
  q1:
    - chain: [predicate_pushdown]
      sql: "{PUSHED}"
"#
        ),
    )
    .unwrap();
    fs::write(
        root.join("qrewrite.yaml"),
        r#"
configVersion: 1
name: cli-smoke
corpus: queries
engine:
  type: replay
  fixture: engine.yaml
generator:
  type: scripted
  script: candidates.yaml
search:
  max_iterations: 5
  max_depth: 1
  epsilon: 0.0
  transformations: [predicate_pushdown]
knowledge:
  path: knowledge.json
output:
  csv: out/report.csv
  json: out/report.json
  db: out/qrewrite.db
"#,
    )
    .unwrap();
    dir
}

fn qrewrite() -> Command {
    Command::cargo_bin("qrewrite").unwrap()
}

fn run_in(dir: &Path) -> assert_cmd::assert::Assert {
    qrewrite()
        .arg("run")
        .arg("--config")
        .arg(dir.join("qrewrite.yaml"))
        .arg("--workers")
        .arg("1")
        .assert()
}

#[test]
fn run_writes_reports_and_knowledge() {
    let dir = workspace(false);
    run_in(dir.path())
        .success()
        .stderr(contains("Summary: 1 wins, 0 failed"));

    let csv = fs::read_to_string(dir.path().join("out/report.csv")).unwrap();
    let mut lines = csv.lines();
    assert!(lines
        .next()
        .unwrap()
        .starts_with("Query_Num,Candidate_Id,Status,Syntax_Valid,Equivalence,Speedup"));
    assert!(csv.contains(",completed,true,equal,3.0000,"));

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("out/report.json")).unwrap())
            .unwrap();
    assert_eq!(report["run"]["name"], "cli-smoke");
    assert_eq!(report["outcomes"][0]["terminal"]["bucket"], "MAJOR_WIN");

    assert!(dir.path().join("out/qrewrite.db").exists());

    qrewrite()
        .args(["knowledge", "show", "--path"])
        .arg(dir.path().join("knowledge.json"))
        .assert()
        .success()
        .stdout(contains("predicate_pushdown"));

    let merged = dir.path().join("merged/knowledge.json");
    qrewrite()
        .args(["knowledge", "merge", "--into"])
        .arg(&merged)
        .arg(dir.path().join("knowledge.json"))
        .assert()
        .success()
        .stderr(contains("1 added"));
    assert!(merged.exists());
}

#[test]
fn flags_override_the_config() {
    let dir = workspace(false);
    let out = dir.path().join("elsewhere/r.csv");
    qrewrite()
        .arg("run")
        .arg("--config")
        .arg(dir.path().join("qrewrite.yaml"))
        .args(["--iterations", "1", "--seed", "9", "--timeout-ms", "5000"])
        .arg("--out")
        .arg(&out)
        .assert()
        .success();
    assert!(out.exists());
    assert!(dir.path().join("elsewhere/r.json").exists());
}

#[test]
fn refused_engine_connection_exits_2() {
    let dir = workspace(true);
    run_in(dir.path())
        .code(2)
        .stderr(contains("first replay engine connection"));
    assert!(!dir.path().join("out/report.csv").exists());
}

#[test]
fn broken_config_exits_2() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("qrewrite.yaml"), "configVersion: 7\ncorpus: q\n").unwrap();
    run_in(dir.path()).code(2).stderr(contains("config error"));

    qrewrite()
        .args(["run", "--config", "does-not-exist.yaml"])
        .assert()
        .code(2);
}

#[test]
fn strict_mode_rejects_unknown_keys() {
    let dir = workspace(false);
    let cfg = dir.path().join("qrewrite.yaml");
    let body = fs::read_to_string(&cfg).unwrap();
    fs::write(&cfg, format!("{body}surprise: true\n")).unwrap();

    qrewrite()
        .arg("run")
        .arg("--config")
        .arg(&cfg)
        .arg("--strict")
        .assert()
        .code(2)
        .stderr(contains("surprise"));
}

#[test]
fn validate_reports_valid_sql() {
    let dir = TempDir::new().unwrap();
    let sql = dir.path().join("ok.sql");
    fs::write(&sql, format!("{ORIGINAL};")).unwrap();
    qrewrite()
        .arg("validate")
        .arg("--sql")
        .arg(&sql)
        .assert()
        .success()
        .stdout(contains("is valid duckdb"));
}

#[test]
fn validate_rejects_window_in_where() {
    let dir = TempDir::new().unwrap();
    let sql = dir.path().join("bad.sql");
    fs::write(
        &sql,
        "select ss_item_sk from store_sales where rank() over (order by ss_net_paid) <= 10",
    )
    .unwrap();
    let assert = qrewrite()
        .arg("validate")
        .arg("--sql")
        .arg(&sql)
        .args(["--format", "json"])
        .assert()
        .code(1);
    let out = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let v: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(v["ok"], false);
    assert_eq!(v["error"]["kind"], "window-function-in-invalid-clause");
}

#[test]
fn init_refuses_to_overwrite() {
    let dir = TempDir::new().unwrap();
    let cfg = dir.path().join("qrewrite.yaml");
    qrewrite()
        .arg("init")
        .arg("--config")
        .arg(&cfg)
        .assert()
        .success();
    assert!(fs::read_to_string(&cfg).unwrap().contains("configVersion: 1"));

    qrewrite()
        .arg("init")
        .arg("--config")
        .arg(&cfg)
        .assert()
        .code(2)
        .stderr(contains("already exists"));
}
