use crate::knowledge::GoldExample;
use crate::model::Dialect;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod http;
pub mod scripted;

/// What the search asks of the external candidate generator: apply
/// `transformation` on top of `parent_sql`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub query_id: String,
    pub dialect: Dialect,
    pub original_sql: String,
    pub parent_sql: String,
    /// Transformations already applied to reach `parent_sql`, in order.
    pub history: Vec<String>,
    pub transformation: String,
    /// Knowledge-ranked transformation hints, best first.
    #[serde(default)]
    pub suggestions: Vec<ScoredTransformation>,
    #[serde(default)]
    pub gold_examples: Vec<GoldExample>,
}

impl GenerationRequest {
    /// Full chain the requested candidate would carry.
    pub fn chain(&self) -> Vec<String> {
        let mut chain = self.history.clone();
        chain.push(self.transformation.clone());
        chain
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredTransformation {
    pub transformation: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedCandidate {
    pub sql: String,
    #[serde(default)]
    pub note: Option<String>,
}

/// External source of rewritten SQL. Returning `Ok(None)` means the
/// generator declines to apply the transformation.
#[async_trait]
pub trait CandidateGenerator: Send + Sync {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> anyhow::Result<Option<GeneratedCandidate>>;
    fn method(&self) -> &'static str;
    fn fingerprint(&self) -> Option<String> {
        None
    }
}
