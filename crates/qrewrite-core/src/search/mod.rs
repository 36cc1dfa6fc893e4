//! Per-query Monte-Carlo tree search over transformation chains.

pub mod evaluate;
pub mod tree;

pub use evaluate::{EvaluationAbort, Evaluator, Pipeline};
pub use tree::{NodeId, NodeState, SearchNode, SearchTree};

use crate::equivalence::ReferenceError;
use crate::errors::ConfigError;
use crate::knowledge::KnowledgeSnapshot;
use crate::model::{Bucket, Candidate, Classification, EvaluationRecord, Query, RiskLevel};
use crate::providers::generator::{CandidateGenerator, GenerationRequest};
use crate::sql::Validator;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_TRANSFORMATIONS: &[&str] = &[
    "decorrelate_subquery",
    "predicate_pushdown",
    "inline_cte",
    "materialize_cte",
    "join_reorder",
    "early_aggregation",
    "semi_join_rewrite",
    "or_to_union",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub max_iterations: u32,
    /// Wall-clock budget per query; 0 disables it.
    pub time_budget_ms: u64,
    pub exploration: f64,
    pub max_depth: usize,
    /// Iterations without improvement before giving up.
    pub patience: u32,
    pub tolerance: f64,
    /// Reward for syntax, equivalence and measurement failures.
    pub failure_penalty: f64,
    /// `ln(speedup)` is clamped to `[-reward_clamp, reward_clamp]`.
    pub reward_clamp: f64,
    pub epsilon: f64,
    pub seed: u64,
    pub transformations: Vec<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            time_budget_ms: 300_000,
            exploration: std::f64::consts::SQRT_2,
            max_depth: 3,
            patience: 10,
            tolerance: 0.01,
            failure_penalty: -3.0,
            reward_clamp: 2.0,
            epsilon: 0.1,
            seed: 42,
            transformations: DEFAULT_TRANSFORMATIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transformations.is_empty() {
            return Err(ConfigError("search.transformations must not be empty".into()));
        }
        if self.max_depth == 0 {
            return Err(ConfigError("search.max_depth must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.epsilon) {
            return Err(ConfigError(format!(
                "search.epsilon must be within [0, 1], got {}",
                self.epsilon
            )));
        }
        if self.reward_clamp <= 0.0 {
            return Err(ConfigError("search.reward_clamp must be positive".into()));
        }
        if self.failure_penalty >= 0.0 {
            return Err(ConfigError("search.failure_penalty must be negative".into()));
        }
        Ok(())
    }

    pub fn reward(&self, record: &EvaluationRecord) -> f64 {
        let c = &record.classification;
        match c.speedup_ratio {
            Some(s) if c.bucket.is_valid() && s > 0.0 && s.is_finite() => {
                s.ln().clamp(-self.reward_clamp, self.reward_clamp)
            }
            _ => self.failure_penalty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    IterationBudget,
    TimeBudget,
    Exhausted,
    DiminishingReturns,
    Cancelled,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::IterationBudget => "iteration_budget",
            TerminationReason::TimeBudget => "time_budget",
            TerminationReason::Exhausted => "exhausted",
            TerminationReason::DiminishingReturns => "diminishing_returns",
            TerminationReason::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("original query is not valid SQL: {0}")]
    Original(crate::errors::SyntaxError),
    #[error(transparent)]
    Reference(#[from] ReferenceError),
    #[error("search cancelled before the original finished")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub query_id: String,
    pub records: Vec<EvaluationRecord>,
    pub tree: SearchTree,
    pub termination: TerminationReason,
    pub iterations: u32,
    /// Index into `records` of the highest-reward evaluation.
    pub best: Option<usize>,
    /// Leading entries of `records` carried over from earlier generations.
    pub reused: usize,
}

impl SearchOutcome {
    pub fn best_record(&self) -> Option<&EvaluationRecord> {
        self.best.map(|i| &self.records[i])
    }

    /// Records evaluated by this search, without carried-over ones.
    pub fn fresh_records(&self) -> &[EvaluationRecord] {
        &self.records[self.reused.min(self.records.len())..]
    }

    pub fn best_transforms(&self) -> Vec<String> {
        self.best_record()
            .map(|r| r.candidate.transforms.clone())
            .unwrap_or_default()
    }

    /// The query's single terminal classification: the fastest valid
    /// candidate, else FAILS_VALIDATION when any candidate got that far,
    /// else ERROR.
    pub fn terminal(&self) -> Classification {
        terminal_classification(&self.query_id, &self.records)
    }
}

pub fn terminal_classification(query_id: &str, records: &[EvaluationRecord]) -> Classification {
    let best_valid = records
        .iter()
        .filter(|r| r.classification.bucket.is_valid())
        .fold(None::<&EvaluationRecord>, |best, r| match best {
            Some(b)
                if b.classification.speedup_ratio.unwrap_or(0.0)
                    >= r.classification.speedup_ratio.unwrap_or(0.0) =>
            {
                Some(b)
            }
            _ => Some(r),
        });
    if let Some(r) = best_valid {
        return r.classification.clone();
    }
    if let Some(r) = records
        .iter()
        .find(|r| r.classification.bucket == Bucket::FailsValidation)
    {
        return r.classification.clone();
    }
    match records.first() {
        Some(r) => r.classification.clone(),
        None => Classification {
            query_id: query_id.to_string(),
            candidate_id: String::new(),
            bucket: Bucket::Error,
            speedup_ratio: None,
            risk_level: RiskLevel::High,
            gold: false,
            transforms: Vec::new(),
        },
    }
}

pub struct SearchController<'a> {
    cfg: &'a SearchConfig,
    generator: &'a dyn CandidateGenerator,
    knowledge: &'a KnowledgeSnapshot,
    generation: u32,
    prior: &'a [EvaluationRecord],
}

impl<'a> SearchController<'a> {
    pub fn new(
        cfg: &'a SearchConfig,
        generator: &'a dyn CandidateGenerator,
        knowledge: &'a KnowledgeSnapshot,
        generation: u32,
    ) -> Self {
        Self {
            cfg,
            generator,
            knowledge,
            generation,
            prior: &[],
        }
    }

    /// Records from earlier generations of the same query. Candidates found
    /// among them are reused instead of being executed again.
    pub fn with_prior(mut self, prior: &'a [EvaluationRecord]) -> Self {
        self.prior = prior;
        self
    }

    /// Picks what to apply next at a node: the best-scored untried
    /// transformation, or with probability epsilon a random one.
    fn choose(&self, untried: &[String], rng: &mut StdRng) -> String {
        if untried.len() > 1 && rng.gen::<f64>() < self.cfg.epsilon {
            return untried[rng.gen_range(0..untried.len())].clone();
        }
        self.knowledge
            .rank(untried)
            .into_iter()
            .next()
            .map(|s| s.transformation)
            .unwrap_or_else(|| untried[0].clone())
    }

    pub async fn run(
        &self,
        query: &Query,
        evaluator: &mut Evaluator,
        cancel: &CancellationToken,
    ) -> Result<SearchOutcome, SearchError> {
        let started = Instant::now();
        let ordered = {
            let parsed = Validator::new(evaluator.catalog(), query.dialect)
                .parse(&query.sql)
                .map_err(SearchError::Original)?;
            parsed.order_by.as_ref().is_some_and(|o| !o.exprs.is_empty())
        };

        let reference = match evaluator.reference(query, ordered, cancel).await {
            Err(ReferenceError::Engine(crate::errors::EngineError::Cancelled)) => {
                return Err(SearchError::Cancelled)
            }
            other => other?,
        };

        let mut rng = StdRng::seed_from_u64(self.cfg.seed);
        let mut tree = SearchTree::new(
            &query.sql,
            self.cfg.transformations.clone(),
            self.cfg.max_depth,
        );
        let mut records: Vec<EvaluationRecord> = self.prior.to_vec();
        let mut seen: HashMap<String, usize> = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.candidate.candidate_id.clone(), i))
            .collect();
        let mut best: Option<(usize, f64)> = None;
        let mut stale = 0u32;
        let mut iterations = 0u32;
        let budget = (self.cfg.time_budget_ms > 0)
            .then(|| Duration::from_millis(self.cfg.time_budget_ms));
        let gold_examples = self.knowledge.gold_for(&query.id);

        tracing::info!(
            event = "search_start",
            query_id = %query.id,
            ordered,
            baseline_ms = reference.latency_ms,
            seed = self.cfg.seed
        );

        let termination = loop {
            if cancel.is_cancelled() {
                break TerminationReason::Cancelled;
            }
            if iterations >= self.cfg.max_iterations {
                break TerminationReason::IterationBudget;
            }
            if budget.is_some_and(|b| started.elapsed() >= b) {
                break TerminationReason::TimeBudget;
            }
            if self.cfg.patience > 0 && stale >= self.cfg.patience {
                break TerminationReason::DiminishingReturns;
            }
            let Some(node_id) = tree.select(self.cfg.exploration) else {
                break TerminationReason::Exhausted;
            };
            let untried = tree.untried(node_id);
            let transformation = self.choose(&untried, &mut rng);
            tree.mark_tried(node_id, &transformation);
            iterations += 1;

            let request = GenerationRequest {
                query_id: query.id.clone(),
                dialect: query.dialect,
                original_sql: query.sql.clone(),
                parent_sql: tree.node(node_id).sql.clone(),
                history: tree.path(node_id),
                transformation: transformation.clone(),
                suggestions: self.knowledge.rank(&untried),
                gold_examples: gold_examples.clone(),
            };
            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                res = self.generator.generate(&request) => Some(res),
            };
            let Some(response) = response else {
                break TerminationReason::Cancelled;
            };
            let generated = match response {
                Ok(Some(g)) => g,
                Ok(None) => {
                    tracing::debug!(
                        event = "generator_declined",
                        query_id = %query.id,
                        transformation = %transformation
                    );
                    stale += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(
                        event = "generator_error",
                        query_id = %query.id,
                        transformation = %transformation,
                        error = %e
                    );
                    stale += 1;
                    continue;
                }
            };

            let candidate = Candidate::new(
                &query.id,
                generated.sql,
                self.generator.method(),
                request.chain(),
            );
            let child = tree.add_child(
                node_id,
                &transformation,
                &candidate.candidate_id,
                &candidate.sql,
            );

            let record_idx = match seen.get(&candidate.candidate_id) {
                Some(&idx) => {
                    tracing::debug!(
                        event = "candidate_duplicate",
                        query_id = %query.id,
                        candidate_id = %candidate.candidate_id
                    );
                    idx
                }
                None => {
                    match evaluator
                        .evaluate(
                            query,
                            &reference,
                            &candidate,
                            self.knowledge,
                            self.generation,
                            cancel,
                        )
                        .await
                    {
                        Ok(record) => {
                            records.push(record);
                            seen.insert(candidate.candidate_id.clone(), records.len() - 1);
                            records.len() - 1
                        }
                        Err(EvaluationAbort::Cancelled) => {
                            tree.set_state(child, NodeState::TerminatedIncomplete);
                            break TerminationReason::Cancelled;
                        }
                    }
                }
            };

            let record = &records[record_idx];
            let reward = self.cfg.reward(record);
            let state = if record.classification.bucket.is_valid() {
                NodeState::Evaluated
            } else {
                NodeState::Dead
            };
            tree.set_state(child, state);
            tree.backpropagate(child, reward);

            let improved = best.map_or(true, |(_, r)| reward > r + self.cfg.tolerance);
            if best.map_or(true, |(_, r)| reward > r) {
                best = Some((record_idx, reward));
            }
            if improved {
                stale = 0;
            } else {
                stale += 1;
            }
        };

        tracing::info!(
            event = "search_done",
            query_id = %query.id,
            termination = termination.as_str(),
            iterations,
            candidates = records.len() - self.prior.len(),
            nodes = tree.len(),
            best_reward = ?best.map(|(_, r)| r)
        );

        Ok(SearchOutcome {
            query_id: query.id.clone(),
            records,
            tree,
            termination,
            iterations,
            best: best.map(|(i, _)| i),
            reused: self.prior.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{SyntaxError, SyntaxErrorKind};
    use crate::model::{EquivalenceVerdict, ValidationResult};

    fn record(bucket: Bucket, speedup: Option<f64>) -> EvaluationRecord {
        let candidate = Candidate::new(
            "q1",
            format!("select {}", speedup.unwrap_or(-1.0)),
            "scripted",
            vec!["t".into()],
        );
        let validation = match bucket {
            Bucket::Error => ValidationResult::rejected(
                &candidate.candidate_id,
                SyntaxError::new(SyntaxErrorKind::ParseError, "bad"),
            ),
            _ => ValidationResult::checked(&candidate.candidate_id, EquivalenceVerdict::Equal),
        };
        EvaluationRecord {
            classification: Classification {
                query_id: "q1".into(),
                candidate_id: candidate.candidate_id.clone(),
                bucket,
                speedup_ratio: speedup,
                risk_level: RiskLevel::Low,
                gold: false,
                transforms: candidate.transforms.clone(),
            },
            candidate,
            validation,
            samples: Vec::new(),
            performance: None,
            error: None,
            elapsed_ms: 1,
            generation: 0,
        }
    }

    #[test]
    fn reward_is_clamped_log_speedup() {
        let cfg = SearchConfig::default();
        let r = cfg.reward(&record(Bucket::MajorWin, Some(5.0)));
        assert!((r - 5f64.ln()).abs() < 1e-12);
        assert_eq!(cfg.reward(&record(Bucket::MajorWin, Some(1e6))), 2.0);
        assert_eq!(cfg.reward(&record(Bucket::Regression, Some(1e-6))), -2.0);
        assert_eq!(cfg.reward(&record(Bucket::Error, None)), -3.0);
        assert_eq!(cfg.reward(&record(Bucket::FailsValidation, None)), -3.0);
    }

    #[test]
    fn terminal_prefers_fastest_valid() {
        let recs = vec![
            record(Bucket::FailsValidation, None),
            record(Bucket::ModerateWin, Some(1.3)),
            record(Bucket::MajorWin, Some(4.0)),
            record(Bucket::Neutral, Some(1.0)),
        ];
        let t = terminal_classification("q1", &recs);
        assert_eq!(t.bucket, Bucket::MajorWin);
        assert_eq!(t.speedup_ratio, Some(4.0));
    }

    #[test]
    fn terminal_falls_back_to_fails_validation_then_error() {
        let recs = vec![record(Bucket::Error, None), record(Bucket::FailsValidation, None)];
        assert_eq!(terminal_classification("q1", &recs).bucket, Bucket::FailsValidation);
        let none = terminal_classification("q9", &[]);
        assert_eq!(none.bucket, Bucket::Error);
        assert_eq!(none.query_id, "q9");
    }

    #[test]
    fn config_validation() {
        assert!(SearchConfig::default().validate().is_ok());
        let bad = SearchConfig {
            transformations: vec![],
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = SearchConfig {
            failure_penalty: 0.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
