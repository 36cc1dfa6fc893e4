pub const SCHEMA_VERSION: i64 = 1;

pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL,
  started_at TEXT NOT NULL,
  finished_at TEXT,
  status TEXT NOT NULL,
  fingerprint TEXT,
  config_json TEXT
);

CREATE TABLE IF NOT EXISTS evaluations (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id INTEGER NOT NULL REFERENCES runs(id),
  generation INTEGER NOT NULL,
  query_id TEXT NOT NULL,
  candidate_id TEXT NOT NULL,
  generation_method TEXT NOT NULL,
  transforms TEXT NOT NULL,
  sql TEXT NOT NULL,
  syntax_valid INTEGER NOT NULL,
  equivalence TEXT,
  bucket TEXT NOT NULL,
  speedup REAL,
  risk TEXT NOT NULL,
  gold INTEGER NOT NULL DEFAULT 0,
  error_kind TEXT,
  error_message TEXT,
  elapsed_ms INTEGER NOT NULL,
  validation_json TEXT NOT NULL,
  performance_json TEXT
);

CREATE TABLE IF NOT EXISTS samples (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  evaluation_id INTEGER NOT NULL REFERENCES evaluations(id),
  side TEXT NOT NULL,
  run_index INTEGER NOT NULL,
  latency_ms REAL NOT NULL,
  warm INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS terminals (
  run_id INTEGER NOT NULL REFERENCES runs(id),
  query_id TEXT NOT NULL,
  status TEXT NOT NULL,
  candidate_id TEXT,
  bucket TEXT NOT NULL,
  speedup REAL,
  risk TEXT NOT NULL,
  termination TEXT,
  iterations INTEGER NOT NULL,
  message TEXT,
  elapsed_ms INTEGER NOT NULL,
  PRIMARY KEY (run_id, query_id)
);

CREATE INDEX IF NOT EXISTS idx_evaluations_run ON evaluations(run_id, query_id);
CREATE INDEX IF NOT EXISTS idx_samples_evaluation ON samples(evaluation_id);
"#;
