//! Scripted generator: replays recorded generator output from YAML.
//!
//! ```yaml
//! queries:
//!   q17:
//!     - chain: [decorrelation]
//!       sql: "select ..."
//!     - chain: [decorrelation, predicate_pushdown]
//!       sql: "select ..."
//! ```

use super::{CandidateGenerator, GeneratedCandidate, GenerationRequest};
use crate::fingerprint::sha256_hex;
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptedRewrite {
    pub chain: Vec<String>,
    pub sql: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptedFile {
    #[serde(default)]
    pub queries: BTreeMap<String, Vec<ScriptedRewrite>>,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedGenerator {
    rewrites: BTreeMap<(String, Vec<String>), ScriptedRewrite>,
    fingerprint: String,
}

fn chain_key(chain: &[String]) -> Vec<String> {
    chain.iter().map(|t| t.trim().to_ascii_lowercase()).collect()
}

impl ScriptedGenerator {
    pub fn new(file: ScriptedFile) -> Self {
        let mut rewrites = BTreeMap::new();
        let mut digest = String::new();
        for (query_id, list) in file.queries {
            for rw in list {
                digest.push_str(&format!("{}|{}|{}\n", query_id, rw.chain.join(">"), rw.sql));
                rewrites.insert((query_id.clone(), chain_key(&rw.chain)), rw);
            }
        }
        Self {
            rewrites,
            fingerprint: format!("scripted:{}", &sha256_hex(&digest)[..16]),
        }
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read generator script {}", path.display()))?;
        let file: ScriptedFile = serde_yaml::from_str(&raw)
            .with_context(|| format!("invalid generator script {}", path.display()))?;
        Ok(Self::new(file))
    }

    pub fn len(&self) -> usize {
        self.rewrites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rewrites.is_empty()
    }
}

#[async_trait]
impl CandidateGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> anyhow::Result<Option<GeneratedCandidate>> {
        let key = (request.query_id.clone(), chain_key(&request.chain()));
        Ok(self.rewrites.get(&key).map(|rw| GeneratedCandidate {
            sql: rw.sql.clone(),
            note: rw.note.clone(),
        }))
    }

    fn method(&self) -> &'static str {
        "scripted"
    }

    fn fingerprint(&self) -> Option<String> {
        Some(self.fingerprint.clone())
    }
}
