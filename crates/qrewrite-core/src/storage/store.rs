use crate::model::{EvaluationRecord, QueryOutcome, Side};
use anyhow::Context;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct Store {
    pub conn: Arc<Mutex<Connection>>,
}

#[derive(Debug)]
pub struct StoreStats {
    pub runs: Option<u64>,
    pub evaluations: Option<u64>,
    pub samples: Option<u64>,
    pub terminals: Option<u64>,
    pub last_run_id: Option<i64>,
    pub last_run_at: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TerminalRow {
    pub query_id: String,
    pub status: String,
    pub bucket: String,
    pub speedup: Option<f64>,
}

impl Store {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path).context("failed to open sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(crate::storage::schema::DDL)?;
        conn.pragma_update(None, "user_version", crate::storage::schema::SCHEMA_VERSION)?;
        Ok(())
    }

    pub fn create_run(
        &self,
        name: &str,
        fingerprint: &str,
        config_json: Option<&str>,
    ) -> anyhow::Result<i64> {
        let conn = self.conn.lock().unwrap();
        let started_at = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO runs(name, started_at, status, fingerprint, config_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![name, started_at, "running", fingerprint, config_json],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn finalize_run(&self, run_id: i64, status: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE runs SET status=?1, finished_at=?2 WHERE id=?3",
            params![status, chrono::Utc::now().to_rfc3339(), run_id],
        )?;
        Ok(())
    }

    /// One evaluation row plus its performance samples, in one transaction.
    pub fn insert_evaluation(&self, run_id: i64, rec: &EvaluationRecord) -> anyhow::Result<i64> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let c = &rec.classification;
        tx.execute(
            "INSERT INTO evaluations(run_id, generation, query_id, candidate_id, generation_method,
                transforms, sql, syntax_valid, equivalence, bucket, speedup, risk, gold,
                error_kind, error_message, elapsed_ms, validation_json, performance_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            params![
                run_id,
                rec.generation as i64,
                rec.candidate.query_id,
                rec.candidate.candidate_id,
                rec.candidate.generation_method,
                rec.candidate.transforms.join(">"),
                rec.candidate.sql,
                rec.validation.syntax_valid(),
                rec.validation.equivalence().map(|v| v.label()),
                c.bucket.as_str(),
                c.speedup_ratio,
                c.risk_level.as_str(),
                c.gold,
                rec.error_kind(),
                rec.error_message(),
                rec.elapsed_ms as i64,
                serde_json::to_string(&rec.validation)?,
                rec.performance
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
            ],
        )?;
        let evaluation_id = tx.last_insert_rowid();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO samples(evaluation_id, side, run_index, latency_ms, warm)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for s in &rec.samples {
                stmt.execute(params![
                    evaluation_id,
                    s.side.as_str(),
                    s.run_index as i64,
                    s.latency_ms,
                    s.warm
                ])?;
            }
        }
        tx.commit()?;
        Ok(evaluation_id)
    }

    pub fn insert_terminal(&self, run_id: i64, outcome: &QueryOutcome) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        let t = &outcome.terminal;
        conn.execute(
            "INSERT INTO terminals(run_id, query_id, status, candidate_id, bucket, speedup, risk,
                termination, iterations, message, elapsed_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(run_id, query_id) DO UPDATE SET
                status=excluded.status, candidate_id=excluded.candidate_id,
                bucket=excluded.bucket, speedup=excluded.speedup, risk=excluded.risk,
                termination=excluded.termination, iterations=excluded.iterations,
                message=excluded.message, elapsed_ms=excluded.elapsed_ms",
            params![
                run_id,
                outcome.query_id,
                outcome.status.as_str(),
                (!t.candidate_id.is_empty()).then_some(t.candidate_id.as_str()),
                t.bucket.as_str(),
                t.speedup_ratio,
                t.risk_level.as_str(),
                outcome.termination.map(|r| r.as_str()),
                outcome.iterations as i64,
                outcome.message,
                outcome.elapsed_ms as i64,
            ],
        )?;
        Ok(())
    }

    pub fn fetch_terminals(&self, run_id: i64) -> anyhow::Result<Vec<TerminalRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT query_id, status, bucket, speedup FROM terminals
             WHERE run_id = ?1 ORDER BY query_id",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(TerminalRow {
                query_id: row.get(0)?,
                status: row.get(1)?,
                bucket: row.get(2)?,
                speedup: row.get(3)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Samples recorded in a run for one candidate, by side.
    pub fn count_samples(
        &self,
        run_id: i64,
        candidate_id: &str,
        side: Option<Side>,
    ) -> anyhow::Result<u64> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM samples s
             JOIN evaluations e ON s.evaluation_id = e.id
             WHERE e.run_id = ?1 AND e.candidate_id = ?2 AND (?3 IS NULL OR s.side = ?3)",
            params![run_id, candidate_id, side.map(|s| s.as_str())],
            |r| r.get(0),
        )?;
        Ok(n as u64)
    }

    pub fn stats_best_effort(&self) -> anyhow::Result<StoreStats> {
        let conn = self.conn.lock().unwrap();
        let count = |table: &str| -> Option<u64> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| {
                r.get::<_, i64>(0).map(|x| x as u64)
            })
            .ok()
        };
        let runs = count("runs");
        let evaluations = count("evaluations");
        let samples = count("samples");
        let terminals = count("terminals");

        let last: Option<(i64, String)> = conn
            .query_row(
                "SELECT id, started_at FROM runs ORDER BY id DESC LIMIT 1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .ok();
        let (last_run_id, last_run_at) = match last {
            Some((id, s)) => (Some(id), Some(s)),
            None => (None, None),
        };

        let version: Option<String> = conn
            .query_row("PRAGMA user_version", [], |r| r.get(0))
            .ok()
            .map(|v: i64| v.to_string());

        Ok(StoreStats {
            runs,
            evaluations,
            samples,
            terminals,
            last_run_id,
            last_run_at,
            version,
        })
    }
}
