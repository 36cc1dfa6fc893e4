pub mod console;
pub mod csv;
pub mod json;

use crate::model::{Bucket, QueryOutcome, QueryStatus};
use serde::Serialize;
use std::collections::BTreeMap;

/// Everything a finished run hands to the report writers.
#[derive(Debug, Clone, Serialize)]
pub struct RunArtifacts {
    pub name: String,
    pub run_id: Option<i64>,
    pub fingerprint: String,
    pub started_at: String,
    pub finished_at: String,
    pub generations: u32,
    pub cancelled: bool,
    pub outcomes: Vec<QueryOutcome>,
}

impl RunArtifacts {
    /// Terminal bucket counts, keyed by bucket name.
    pub fn bucket_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut out = BTreeMap::new();
        for o in &self.outcomes {
            *out.entry(o.terminal.bucket.as_str()).or_insert(0) += 1;
        }
        out
    }

    pub fn wins(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.terminal.bucket.is_win())
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == QueryStatus::Failed || o.terminal.bucket == Bucket::Error)
            .count()
    }
}
