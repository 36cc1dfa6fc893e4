//! Replay engine: answers queries from a YAML fixture of canned results.
//!
//! Entries are keyed by normalized SQL text, so whitespace and keyword case
//! differences between the fixture and the submitted SQL do not matter.

use super::{EngineConnector, EngineSession, ExecOutput, ResultSet};
use crate::errors::EngineError;
use crate::fingerprint::{normalize_sql, sha256_hex};
use crate::model::{Bindings, Value};
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplayEntry {
    pub sql: String,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
    /// Fixed latency reported for every execution.
    #[serde(default)]
    pub latency_ms: Option<f64>,
    /// Per-execution latencies, cycled in order. Takes precedence over
    /// `latency_ms`.
    #[serde(default)]
    pub latencies_ms: Vec<f64>,
    /// Report latency as engine time (default) or only sleep for it.
    #[serde(default = "default_true")]
    pub engine_time: bool,
    /// Every execution fails with this message.
    #[serde(default)]
    pub error: Option<String>,
    /// The first N executions fail, later ones succeed.
    #[serde(default)]
    pub fail_times: u32,
    /// Execution never completes.
    #[serde(default)]
    pub hang: bool,
    /// The first N executions drop the connection.
    #[serde(default)]
    pub lose_connection: u32,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplayFixture {
    #[serde(default)]
    pub queries: Vec<ReplayEntry>,
    /// Sleep for the reported latency instead of only reporting it.
    #[serde(default)]
    pub simulate_latency: bool,
    /// Refuse every connection attempt.
    #[serde(default)]
    pub fail_connect: bool,
}

impl ReplayFixture {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read replay fixture {}", path.display()))?;
        let fixture: ReplayFixture = serde_yaml::from_str(&raw)
            .with_context(|| format!("invalid replay fixture {}", path.display()))?;
        Ok(fixture)
    }
}

#[derive(Debug, Default)]
struct ReplayState {
    executions: HashMap<String, u32>,
    connections: u32,
    cancellations: u32,
}

/// Connector over a shared fixture. Execution counters are shared by every
/// session it hands out so failure budgets are consumed globally.
#[derive(Clone)]
pub struct ReplayConnector {
    entries: Arc<HashMap<String, ReplayEntry>>,
    simulate_latency: bool,
    fail_connect: bool,
    fingerprint: String,
    state: Arc<Mutex<ReplayState>>,
}

impl ReplayConnector {
    pub fn new(fixture: ReplayFixture) -> Self {
        let mut entries = HashMap::new();
        let mut keys: Vec<String> = Vec::new();
        for entry in fixture.queries {
            let key = normalize_sql(&entry.sql);
            keys.push(key.clone());
            entries.insert(key, entry);
        }
        keys.sort();
        Self {
            entries: Arc::new(entries),
            simulate_latency: fixture.simulate_latency,
            fail_connect: fixture.fail_connect,
            fingerprint: format!("replay:{}", &sha256_hex(&keys.join("\n"))[..16]),
            state: Arc::new(Mutex::new(ReplayState::default())),
        }
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        Ok(Self::new(ReplayFixture::from_path(path)?))
    }

    pub fn connections(&self) -> u32 {
        self.state.lock().unwrap().connections
    }

    pub fn cancellations(&self) -> u32 {
        self.state.lock().unwrap().cancellations
    }

    /// Number of times the given SQL was submitted, across all sessions.
    pub fn executions(&self, sql: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .executions
            .get(&normalize_sql(sql))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl EngineConnector for ReplayConnector {
    async fn connect(&self) -> Result<Box<dyn EngineSession>, EngineError> {
        if self.fail_connect {
            return Err(EngineError::Connect("replay fixture refuses connections".into()));
        }
        let id = {
            let mut st = self.state.lock().unwrap();
            st.connections += 1;
            st.connections
        };
        Ok(Box::new(ReplaySession {
            id,
            entries: self.entries.clone(),
            simulate_latency: self.simulate_latency,
            state: self.state.clone(),
            lost: false,
        }))
    }

    fn engine_name(&self) -> &'static str {
        "replay"
    }

    fn fingerprint(&self) -> Option<String> {
        Some(self.fingerprint.clone())
    }
}

pub struct ReplaySession {
    id: u32,
    entries: Arc<HashMap<String, ReplayEntry>>,
    simulate_latency: bool,
    state: Arc<Mutex<ReplayState>>,
    lost: bool,
}

impl ReplaySession {
    fn latency_for(entry: &ReplayEntry, n: u32) -> Option<Duration> {
        let ms = if entry.latencies_ms.is_empty() {
            entry.latency_ms?
        } else {
            entry.latencies_ms[(n as usize) % entry.latencies_ms.len()]
        };
        Some(Duration::from_nanos((ms.max(0.0) * 1_000_000.0).round() as u64))
    }
}

#[async_trait]
impl EngineSession for ReplaySession {
    async fn execute(
        &mut self,
        sql: &str,
        _bindings: &Bindings,
    ) -> Result<ExecOutput, EngineError> {
        if self.lost {
            return Err(EngineError::ConnectionLost(format!(
                "replay session {} is closed",
                self.id
            )));
        }
        let key = normalize_sql(sql);
        let Some(entry) = self.entries.get(&key) else {
            return Err(EngineError::Execution(format!(
                "no replay entry for query {}",
                &sha256_hex(&key)[..12]
            )));
        };

        // n counts prior executions of this SQL across all sessions
        let n = {
            let mut st = self.state.lock().unwrap();
            let c = st.executions.entry(key).or_insert(0);
            let n = *c;
            *c += 1;
            n
        };

        if n < entry.lose_connection {
            self.lost = true;
            return Err(EngineError::ConnectionLost(format!(
                "replay session {} dropped",
                self.id
            )));
        }
        if entry.hang {
            std::future::pending::<()>().await;
        }
        if let Some(msg) = &entry.error {
            return Err(EngineError::Execution(msg.clone()));
        }
        if n < entry.lose_connection + entry.fail_times {
            return Err(EngineError::Execution(format!(
                "transient replay failure {}/{}",
                n - entry.lose_connection + 1,
                entry.fail_times
            )));
        }

        let latency = Self::latency_for(entry, n);
        if self.simulate_latency {
            if let Some(d) = latency {
                tokio::time::sleep(d).await;
            }
        }
        Ok(ExecOutput {
            result: ResultSet::new(entry.columns.clone(), entry.rows.clone()),
            engine_time: if entry.engine_time { latency } else { None },
        })
    }

    async fn cancel(&mut self) {
        self.state.lock().unwrap().cancellations += 1;
    }

    fn engine_name(&self) -> &'static str {
        "replay"
    }
}
