//! Transformation win-rate statistics and curated gold examples.
//!
//! The store keeps the full classification history keyed by
//! `(query_id, candidate_id)` and derives every [`PatternStat`] from it, so
//! folding the same batches in any order, any number of times, lands on the
//! same statistics.

use crate::model::{Bucket, Candidate, Classification};
use crate::providers::generator::ScoredTransformation;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

pub const KNOWLEDGE_SCHEMA_VERSION: u32 = 1;
pub const DEFAULT_Z: f64 = 1.96;

/// Wilson-score centre. Pulls low-sample win rates toward one half.
pub fn wilson_center(successes: u64, attempts: u64, z: f64) -> f64 {
    let z2 = z * z;
    (successes as f64 + z2 / 2.0) / (attempts as f64 + z2)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternStat {
    pub transformation: String,
    pub attempts: u64,
    pub successes: u64,
    /// Mean over attempts that produced a measured speedup.
    pub avg_speedup: Option<f64>,
    pub measured: u64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeRecord {
    pub query_id: String,
    pub candidate_id: String,
    pub bucket: Bucket,
    #[serde(default)]
    pub speedup: Option<f64>,
    #[serde(default)]
    pub transforms: Vec<String>,
}

impl KnowledgeRecord {
    fn key(&self) -> (String, String) {
        (self.query_id.clone(), self.candidate_id.clone())
    }

    /// Total order used to pick one record when two disagree on the same key.
    fn rank_cmp(&self, other: &Self) -> Ordering {
        let speed = match (self.speedup, other.speedup) {
            (Some(a), Some(b)) => a.total_cmp(&b),
            (a, b) => a.is_some().cmp(&b.is_some()),
        };
        self.bucket
            .cmp(&other.bucket)
            .then(speed)
            .then_with(|| self.transforms.cmp(&other.transforms))
    }
}

impl From<&Classification> for KnowledgeRecord {
    fn from(c: &Classification) -> Self {
        Self {
            query_id: c.query_id.clone(),
            candidate_id: c.candidate_id.clone(),
            bucket: c.bucket,
            speedup: c.speedup_ratio,
            transforms: c.transforms.clone(),
        }
    }
}

/// A vetted rewrite. Matches a candidate by id, by SQL text or by its
/// transformation chain, whichever is given.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GoldExample {
    pub query_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transforms: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl GoldExample {
    pub fn matches(&self, candidate: &Candidate) -> bool {
        if self.query_id != candidate.query_id {
            return false;
        }
        if let Some(id) = &self.candidate_id {
            return *id == candidate.candidate_id;
        }
        if let Some(sql) = &self.sql {
            return crate::fingerprint::candidate_id(sql) == candidate.candidate_id;
        }
        !self.transforms.is_empty()
            && self.transforms.len() == candidate.transforms.len()
            && self
                .transforms
                .iter()
                .zip(&candidate.transforms)
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct KnowledgeFile {
    schema_version: u32,
    #[serde(default)]
    qrewrite_version: String,
    #[serde(default)]
    patterns: Vec<PatternStat>,
    #[serde(default)]
    gold: Vec<GoldExample>,
    #[serde(default)]
    history: Vec<KnowledgeRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
}

/// Immutable read view handed to workers for one generation.
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeSnapshot {
    stats: BTreeMap<String, PatternStat>,
    gold: Vec<GoldExample>,
    z: f64,
}

impl Default for KnowledgeSnapshot {
    fn default() -> Self {
        Self {
            stats: BTreeMap::new(),
            gold: Vec::new(),
            z: DEFAULT_Z,
        }
    }
}

impl KnowledgeSnapshot {
    pub fn stat(&self, transformation: &str) -> Option<&PatternStat> {
        self.stats.get(&transformation.to_ascii_lowercase())
    }

    /// Confidence weight; an unseen transformation scores the prior.
    pub fn score(&self, transformation: &str) -> f64 {
        self.stat(transformation)
            .map(|s| s.confidence)
            .unwrap_or_else(|| wilson_center(0, 0, self.z))
    }

    pub fn stats(&self) -> impl Iterator<Item = &PatternStat> {
        self.stats.values()
    }

    pub fn top_k(&self, k: usize) -> Vec<PatternStat> {
        let mut all: Vec<PatternStat> = self.stats.values().cloned().collect();
        all.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.transformation.cmp(&b.transformation))
        });
        all.truncate(k);
        all
    }

    /// Orders `transformations` by score, best first. Equal scores keep the
    /// input order.
    pub fn rank(&self, transformations: &[String]) -> Vec<ScoredTransformation> {
        let mut scored: Vec<ScoredTransformation> = transformations
            .iter()
            .map(|t| ScoredTransformation {
                transformation: t.clone(),
                score: self.score(t),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored
    }

    pub fn is_gold(&self, candidate: &Candidate) -> bool {
        self.gold.iter().any(|g| g.matches(candidate))
    }

    pub fn gold_for(&self, query_id: &str) -> Vec<GoldExample> {
        self.gold
            .iter()
            .filter(|g| g.query_id == query_id)
            .cloned()
            .collect()
    }

    pub fn gold_count(&self) -> usize {
        self.gold.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct KnowledgeStore {
    history: BTreeMap<(String, String), KnowledgeRecord>,
    view: KnowledgeSnapshot,
}

impl KnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_z(mut self, z: f64) -> Self {
        self.view.z = z;
        self.recompute();
        self
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open knowledge file: {}", path.display()))?;
        let parsed: KnowledgeFile = serde_json::from_reader(file)
            .with_context(|| format!("failed to parse knowledge JSON: {}", path.display()))?;
        if parsed.schema_version != KNOWLEDGE_SCHEMA_VERSION {
            anyhow::bail!(
                "config error: unsupported knowledge schema version {}",
                parsed.schema_version
            );
        }

        let mut store = Self::new();
        for g in parsed.gold {
            store.add_gold(g);
        }
        for r in parsed.history {
            store.upsert(r);
        }
        store.recompute();
        tracing::debug!(
            event = "knowledge_loaded",
            path = %path.display(),
            records = store.history.len(),
            patterns = store.view.stats.len()
        );
        Ok(store)
    }

    /// Missing file means an empty store.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut gold = self.view.gold.clone();
        gold.sort();
        let out = KnowledgeFile {
            schema_version: KNOWLEDGE_SCHEMA_VERSION,
            qrewrite_version: env!("CARGO_PKG_VERSION").to_string(),
            patterns: self.view.stats.values().cloned().collect(),
            gold,
            history: self.history.values().cloned().collect(),
        };
        let file = File::create(path)
            .with_context(|| format!("failed to create knowledge file: {}", path.display()))?;
        serde_json::to_writer_pretty(file, &out).context("failed to write knowledge JSON")?;
        Ok(())
    }

    fn upsert(&mut self, record: KnowledgeRecord) -> Option<bool> {
        match self.history.get_mut(&record.key()) {
            None => {
                self.history.insert(record.key(), record);
                None
            }
            Some(existing) => {
                if record.rank_cmp(existing) == Ordering::Greater {
                    *existing = record;
                    Some(true)
                } else {
                    Some(false)
                }
            }
        }
    }

    /// Folds a batch of classifications into the history. The only mutation
    /// path for statistics.
    pub fn merge(&mut self, batch: &[Classification]) -> MergeReport {
        let mut report = MergeReport::default();
        for c in batch {
            if c.candidate_id.is_empty() {
                continue;
            }
            match self.upsert(KnowledgeRecord::from(c)) {
                None => report.added += 1,
                Some(true) => report.updated += 1,
                Some(false) => report.unchanged += 1,
            }
        }
        self.recompute();
        tracing::info!(
            event = "knowledge_merge",
            added = report.added,
            updated = report.updated,
            unchanged = report.unchanged
        );
        report
    }

    /// Merges another store's history and gold examples into this one.
    pub fn merge_store(&mut self, other: &KnowledgeStore) -> MergeReport {
        let mut report = MergeReport::default();
        for g in &other.view.gold {
            self.add_gold(g.clone());
        }
        for r in other.history.values() {
            match self.upsert(r.clone()) {
                None => report.added += 1,
                Some(true) => report.updated += 1,
                Some(false) => report.unchanged += 1,
            }
        }
        self.recompute();
        report
    }

    fn recompute(&mut self) {
        struct Acc {
            attempts: u64,
            successes: u64,
            speedup_sum: f64,
            measured: u64,
        }
        let mut acc: BTreeMap<String, Acc> = BTreeMap::new();
        for record in self.history.values() {
            let tags: BTreeSet<String> = record
                .transforms
                .iter()
                .map(|t| t.to_ascii_lowercase())
                .collect();
            for tag in tags {
                let a = acc.entry(tag).or_insert(Acc {
                    attempts: 0,
                    successes: 0,
                    speedup_sum: 0.0,
                    measured: 0,
                });
                a.attempts += 1;
                if record.bucket.is_win() {
                    a.successes += 1;
                }
                if let Some(s) = record.speedup.filter(|s| s.is_finite()) {
                    a.speedup_sum += s;
                    a.measured += 1;
                }
            }
        }
        let z = self.view.z;
        self.view.stats = acc
            .into_iter()
            .map(|(t, a)| {
                let stat = PatternStat {
                    transformation: t.clone(),
                    attempts: a.attempts,
                    successes: a.successes,
                    avg_speedup: (a.measured > 0).then(|| a.speedup_sum / a.measured as f64),
                    measured: a.measured,
                    confidence: wilson_center(a.successes, a.attempts, z),
                };
                (t, stat)
            })
            .collect();
    }

    pub fn add_gold(&mut self, example: GoldExample) -> bool {
        if self.view.gold.contains(&example) {
            return false;
        }
        self.view.gold.push(example);
        true
    }

    pub fn snapshot(&self) -> Arc<KnowledgeSnapshot> {
        Arc::new(self.view.clone())
    }

    pub fn view(&self) -> &KnowledgeSnapshot {
        &self.view
    }

    pub fn score(&self, transformation: &str) -> f64 {
        self.view.score(transformation)
    }

    pub fn top_k(&self, k: usize) -> Vec<PatternStat> {
        self.view.top_k(k)
    }

    pub fn is_gold(&self, candidate: &Candidate) -> bool {
        self.view.is_gold(candidate)
    }

    pub fn gold_for(&self, query_id: &str) -> Vec<GoldExample> {
        self.view.gold_for(query_id)
    }

    pub fn records(&self) -> usize {
        self.history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RiskLevel;
    use proptest::prelude::*;

    fn cls(q: &str, c: &str, bucket: Bucket, speedup: Option<f64>, t: &[&str]) -> Classification {
        Classification {
            query_id: q.into(),
            candidate_id: c.into(),
            bucket,
            speedup_ratio: speedup,
            risk_level: RiskLevel::Low,
            gold: false,
            transforms: t.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn wilson_shrinks_small_samples() {
        let one_lucky = wilson_center(1, 1, DEFAULT_Z);
        let many = wilson_center(80, 100, DEFAULT_Z);
        assert!(one_lucky < many);
        assert!((wilson_center(0, 0, DEFAULT_Z) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn merge_counts_attempts_and_wins() {
        let mut store = KnowledgeStore::new();
        store.merge(&[
            cls("q1", "c1", Bucket::MajorWin, Some(5.0), &["decorrelate"]),
            cls("q1", "c2", Bucket::Regression, Some(0.5), &["decorrelate", "push_down"]),
            cls("q2", "c3", Bucket::FailsValidation, None, &["push_down"]),
        ]);
        let d = store.view().stat("decorrelate").unwrap();
        assert_eq!((d.attempts, d.successes, d.measured), (2, 1, 2));
        assert_eq!(d.avg_speedup, Some(2.75));
        let p = store.view().stat("PUSH_DOWN").unwrap();
        assert_eq!((p.attempts, p.successes, p.measured), (2, 0, 1));
        assert!(store.score("decorrelate") > store.score("push_down"));
        assert_eq!(store.top_k(1)[0].transformation, "decorrelate");
    }

    #[test]
    fn merge_is_idempotent() {
        let batch = vec![
            cls("q1", "c1", Bucket::MajorWin, Some(3.0), &["a"]),
            cls("q1", "c2", Bucket::Neutral, Some(1.1), &["a", "b"]),
        ];
        let mut store = KnowledgeStore::new();
        let first = store.merge(&batch);
        let once = store.snapshot();
        let second = store.merge(&batch);
        assert_eq!(first.added, 2);
        assert_eq!(second.unchanged, 2);
        assert_eq!(*once, *store.snapshot());
    }

    #[test]
    fn rank_prefers_confident_transformations() {
        let mut store = KnowledgeStore::new();
        let wins: Vec<Classification> = (0..6)
            .map(|i| cls("q", &format!("c{i}"), Bucket::SignificantWin, Some(1.6), &["b"]))
            .collect();
        store.merge(&wins);
        let ranked = store
            .snapshot()
            .rank(&["a".to_string(), "b".to_string(), "c".to_string()]);
        let names: Vec<&str> = ranked.iter().map(|s| s.transformation.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kb/knowledge.json");
        let mut store = KnowledgeStore::new();
        store.merge(&[cls("q1", "c1", Bucket::ModerateWin, Some(1.3), &["x"])]);
        store.add_gold(GoldExample {
            query_id: "q1".into(),
            candidate_id: None,
            sql: None,
            transforms: vec!["x".into()],
            note: Some("reviewed".into()),
        });
        store.save(&path).unwrap();

        let loaded = KnowledgeStore::load(&path).unwrap();
        assert_eq!(*loaded.snapshot(), *store.snapshot());
        assert_eq!(loaded.records(), 1);

        let again = dir.path().join("again.json");
        loaded.save(&again).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            std::fs::read_to_string(&again).unwrap()
        );
    }

    #[test]
    fn rejects_unknown_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("k.json");
        std::fs::write(&path, r#"{"schema_version": 9}"#).unwrap();
        let err = KnowledgeStore::load(&path).unwrap_err();
        assert!(err.to_string().contains("schema version"));
    }

    #[test]
    fn gold_matching() {
        let cand = Candidate::new("q1", "select 1", "scripted", vec!["A".into()]);
        let by_chain = GoldExample {
            query_id: "q1".into(),
            candidate_id: None,
            sql: None,
            transforms: vec!["a".into()],
            note: None,
        };
        let by_sql = GoldExample {
            sql: Some("SELECT   1".into()),
            transforms: vec![],
            ..by_chain.clone()
        };
        let other_query = GoldExample {
            query_id: "q2".into(),
            ..by_chain.clone()
        };
        assert!(by_chain.matches(&cand));
        assert!(by_sql.matches(&cand));
        assert!(!other_query.matches(&cand));

        let mut store = KnowledgeStore::new();
        assert!(store.add_gold(by_chain.clone()));
        assert!(!store.add_gold(by_chain));
        assert!(store.is_gold(&cand));
        assert_eq!(store.gold_for("q1").len(), 1);
        assert!(store.gold_for("q2").is_empty());
    }

    fn arb_classification() -> impl Strategy<Value = Classification> {
        let buckets = prop_oneof![
            Just(Bucket::MajorWin),
            Just(Bucket::ModerateWin),
            Just(Bucket::Neutral),
            Just(Bucket::Regression),
            Just(Bucket::FailsValidation),
        ];
        (
            0..3u8,
            0..4u8,
            buckets,
            proptest::option::of(0.1f64..8.0),
            proptest::collection::vec(prop_oneof![Just("a"), Just("b"), Just("c")], 0..3),
        )
            .prop_map(|(q, c, bucket, speedup, tags)| {
                cls(&format!("q{q}"), &format!("c{c}"), bucket, speedup, &tags)
            })
    }

    proptest! {
        #[test]
        fn merge_is_commutative(
            a in proptest::collection::vec(arb_classification(), 0..12),
            b in proptest::collection::vec(arb_classification(), 0..12),
        ) {
            let mut ab = KnowledgeStore::new();
            ab.merge(&a);
            ab.merge(&b);
            let mut ba = KnowledgeStore::new();
            ba.merge(&b);
            ba.merge(&a);
            prop_assert_eq!(ab.snapshot(), ba.snapshot());

            let mut rev: Vec<Classification> = a.iter().chain(b.iter()).cloned().collect();
            rev.reverse();
            let mut once = KnowledgeStore::new();
            once.merge(&rev);
            prop_assert_eq!(once.snapshot(), ab.snapshot());
        }
    }
}
