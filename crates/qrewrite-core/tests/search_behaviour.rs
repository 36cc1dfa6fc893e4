use qrewrite_core::catalog::Catalog;
use qrewrite_core::knowledge::KnowledgeSnapshot;
use qrewrite_core::model::{Bucket, Dialect, Query};
use qrewrite_core::providers::engine::replay::{ReplayConnector, ReplayFixture};
use qrewrite_core::providers::engine::EngineConnector;
use qrewrite_core::providers::generator::scripted::{ScriptedFile, ScriptedGenerator};
use qrewrite_core::providers::generator::{
    CandidateGenerator, GeneratedCandidate, GenerationRequest,
};
use qrewrite_core::search::{
    Evaluator, NodeState, Pipeline, SearchConfig, SearchController, SearchOutcome,
    TerminationReason,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const ORIGINAL: &str = "SELECT ss_item_sk, ss_quantity FROM store_sales WHERE ss_quantity > 10";
const C1: &str = "SELECT ss_item_sk, ss_quantity FROM store_sales WHERE ss_quantity >= 11";
const C2: &str = "SELECT ss_item_sk, ss_quantity FROM store_sales WHERE 10 < ss_quantity";
const C3: &str =
    "SELECT ss_item_sk, ss_quantity FROM store_sales WHERE ss_quantity > 10 AND ss_quantity IS NOT NULL";
const C4: &str = "SELECT ss_item_sk, ss_quantity FROM store_sales WHERE NOT ss_quantity <= 10";

fn query() -> Query {
    Query {
        id: "q1".into(),
        sql: ORIGINAL.into(),
        params: Default::default(),
        dialect: Dialect::Duckdb,
    }
}

fn entry(sql: &str, latency: f64, extra: &str) -> String {
    format!(
        "  - sql: \"{sql}\"\n    columns: [ss_item_sk, ss_quantity]\n    rows: [[1, 11], [2, 12]]\n    latency_ms: {latency}\n{extra}"
    )
}

fn connector(entries: &[String]) -> ReplayConnector {
    let yaml = format!("queries:\n{}", entries.join(""));
    let fixture: ReplayFixture = serde_yaml::from_str(&yaml).unwrap();
    ReplayConnector::new(fixture)
}

fn generator(yaml: &str) -> ScriptedGenerator {
    let file: ScriptedFile = serde_yaml::from_str(yaml).unwrap();
    ScriptedGenerator::new(file)
}

async fn evaluator(c: &ReplayConnector) -> Evaluator {
    let session = c.connect().await.unwrap();
    Evaluator::new(
        Arc::new(c.clone()),
        session,
        Arc::new(Catalog::tpcds()),
        Arc::new(Pipeline::default()),
    )
}

fn single_step() -> SearchConfig {
    SearchConfig {
        max_depth: 1,
        epsilon: 0.0,
        transformations: vec!["predicate_pushdown".into()],
        ..SearchConfig::default()
    }
}

fn single_script() -> ScriptedGenerator {
    generator(&format!(
        "queries:\n  q1:\n    - chain: [predicate_pushdown]\n      sql: \"{C1}\"\n"
    ))
}

#[tokio::test]
async fn lost_connection_requeues_the_candidate_once() {
    let c = connector(&[
        entry(ORIGINAL, 10.0, ""),
        entry(C1, 5.0, "    lose_connection: 1\n"),
    ]);
    let mut ev = evaluator(&c).await;
    let cfg = single_step();
    let gen = single_script();
    let knowledge = KnowledgeSnapshot::default();

    let out = SearchController::new(&cfg, &gen, &knowledge, 0)
        .run(&query(), &mut ev, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(ev.reconnects(), 1);
    assert_eq!(c.connections(), 2);
    assert_eq!(out.records.len(), 1);
    let rec = &out.records[0];
    assert!(rec.error.is_none());
    assert_eq!(rec.classification.bucket, Bucket::MajorWin);
    assert_eq!(out.termination, TerminationReason::Exhausted);
}

#[tokio::test]
async fn second_connection_loss_fails_the_candidate() {
    let c = connector(&[
        entry(ORIGINAL, 10.0, ""),
        entry(C1, 5.0, "    lose_connection: 2\n"),
    ]);
    let mut ev = evaluator(&c).await;
    let cfg = single_step();
    let gen = single_script();
    let knowledge = KnowledgeSnapshot::default();

    let out = SearchController::new(&cfg, &gen, &knowledge, 0)
        .run(&query(), &mut ev, &CancellationToken::new())
        .await
        .unwrap();

    let rec = &out.records[0];
    assert_eq!(rec.classification.bucket, Bucket::Error);
    assert_eq!(rec.error_kind().as_deref(), Some("engine-error"));
    assert!(rec.samples.is_empty());
    assert!(rec.validation.syntax_valid());
    assert!(rec.validation.equivalence().is_none());
}

#[tokio::test]
async fn cancellation_marks_the_node_incomplete() {
    let c = connector(&[
        entry(ORIGINAL, 10.0, ""),
        entry(C1, 5.0, "    hang: true\n"),
    ]);
    let mut ev = evaluator(&c).await;
    let cfg = single_step();
    let gen = single_script();
    let knowledge = KnowledgeSnapshot::default();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let out = SearchController::new(&cfg, &gen, &knowledge, 0)
        .run(&query(), &mut ev, &cancel)
        .await
        .unwrap();

    assert_eq!(out.termination, TerminationReason::Cancelled);
    assert!(out.records.is_empty());
    let incomplete: Vec<_> = out
        .tree
        .nodes()
        .iter()
        .filter(|n| n.state == NodeState::TerminatedIncomplete)
        .collect();
    assert_eq!(incomplete.len(), 1);
    assert_eq!(incomplete[0].mean_reward(), None);
    assert!(c.cancellations() >= 1);
}

const DEEP_SCRIPT: &str = r#"
queries:
  q1:
    - chain: [decorrelate_subquery]
      sql: "SELECT ss_item_sk, ss_quantity FROM store_sales WHERE ss_quantity >= 11"
    - chain: [predicate_pushdown]
      sql: "SELECT ss_item_sk, ss_quantity FROM store_sales WHERE 10 < ss_quantity"
    - chain: [decorrelate_subquery, predicate_pushdown]
      sql: "SELECT ss_item_sk, ss_quantity FROM store_sales WHERE ss_quantity > 10 AND ss_quantity IS NOT NULL"
    - chain: [predicate_pushdown, decorrelate_subquery]
      sql: "SELECT ss_item_sk, ss_quantity FROM store_sales WHERE ss_quantity > 10 AND ss_quantity IS NOT NULL"
    - chain: [decorrelate_subquery, join_reorder]
      sql: "SELECT ss_item_sk, ss_quantity FROM store_sales WHERE NOT ss_quantity <= 10"
    - chain: [decorrelate_subquery, predicate_pushdown, join_reorder]
      sql: "SELECT ss_item_sk, ss_bogus FROM store_sales"
"#;

async fn deep_search(seed: u64) -> SearchOutcome {
    // C4 has no fixture entry: it fails to execute and so fails validation.
    let c = connector(&[
        entry(ORIGINAL, 10.0, ""),
        entry(C1, 5.0, ""),
        entry(C2, 8.0, ""),
        entry(C3, 2.0, ""),
    ]);
    let mut ev = evaluator(&c).await;
    let cfg = SearchConfig {
        max_iterations: 50,
        max_depth: 3,
        patience: 0,
        epsilon: 0.3,
        seed,
        transformations: vec![
            "decorrelate_subquery".into(),
            "predicate_pushdown".into(),
            "join_reorder".into(),
        ],
        ..SearchConfig::default()
    };
    let gen = generator(DEEP_SCRIPT);
    let knowledge = KnowledgeSnapshot::default();
    SearchController::new(&cfg, &gen, &knowledge, 0)
        .run(&query(), &mut ev, &CancellationToken::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn fixed_seed_gives_the_same_best_sequence() {
    let a = deep_search(7).await;
    let b = deep_search(7).await;

    let ids = |o: &SearchOutcome| -> Vec<String> {
        o.records
            .iter()
            .map(|r| r.candidate.candidate_id.clone())
            .collect()
    };
    assert_eq!(ids(&a), ids(&b));
    assert_eq!(a.best_transforms(), b.best_transforms());
    assert_eq!(a.iterations, b.iterations);
    assert_eq!(a.tree.len(), b.tree.len());

    let best = a.best_record().unwrap();
    assert_eq!(best.candidate.sql, C3);
    assert!((best.classification.speedup_ratio.unwrap() - 5.0).abs() < 1e-9);
    let mut tags = a.best_transforms();
    tags.sort();
    assert_eq!(tags, vec!["decorrelate_subquery", "predicate_pushdown"]);

    // Failures stay in the tree as dead nodes.
    assert!(a.tree.nodes().iter().any(|n| n.state == NodeState::Dead));
    assert!(a
        .records
        .iter()
        .any(|r| r.classification.bucket == Bucket::FailsValidation));
    assert!(a
        .records
        .iter()
        .filter(|r| !r.validation.syntax_valid())
        .all(|r| r.samples.is_empty()));
}

#[tokio::test]
async fn equal_rewards_stop_after_patience_runs_out() {
    let c = connector(&[
        entry(ORIGINAL, 10.0, ""),
        entry(C1, 5.0, ""),
        entry(C2, 5.0, ""),
        entry(C3, 5.0, ""),
        entry(C4, 5.0, ""),
    ]);
    let mut ev = evaluator(&c).await;
    let cfg = SearchConfig {
        max_depth: 1,
        epsilon: 0.0,
        patience: 2,
        tolerance: 0.01,
        transformations: vec![
            "decorrelate_subquery".into(),
            "predicate_pushdown".into(),
            "join_reorder".into(),
            "inline_cte".into(),
        ],
        ..SearchConfig::default()
    };
    let gen = generator(&format!(
        r#"
queries:
  q1:
    - chain: [decorrelate_subquery]
      sql: "{C1}"
    - chain: [predicate_pushdown]
      sql: "{C2}"
    - chain: [join_reorder]
      sql: "{C3}"
    - chain: [inline_cte]
      sql: "{C4}"
"#
    ));
    let knowledge = KnowledgeSnapshot::default();

    let out = SearchController::new(&cfg, &gen, &knowledge, 0)
        .run(&query(), &mut ev, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(out.termination, TerminationReason::DiminishingReturns);
    assert_eq!(out.iterations, 3);
    assert_eq!(out.records.len(), 3);
    assert!(out
        .records
        .iter()
        .all(|r| r.classification.bucket == Bucket::MajorWin));
}

#[tokio::test]
async fn slow_engine_stops_at_the_time_budget() {
    let yaml = format!(
        "simulate_latency: true\nqueries:\n{}{}",
        entry(ORIGINAL, 10.0, ""),
        entry(C1, 10.0, "")
    );
    let fixture: ReplayFixture = serde_yaml::from_str(&yaml).unwrap();
    let c = ReplayConnector::new(fixture);
    let mut ev = evaluator(&c).await;
    let cfg = SearchConfig {
        time_budget_ms: 30,
        ..single_step()
    };
    let gen = single_script();
    let knowledge = KnowledgeSnapshot::default();

    let out = SearchController::new(&cfg, &gen, &knowledge, 0)
        .run(&query(), &mut ev, &CancellationToken::new())
        .await
        .unwrap();

    // One evaluation sleeps through well over 30ms of executions.
    assert_eq!(out.termination, TerminationReason::TimeBudget);
    assert_eq!(out.iterations, 1);
    assert_eq!(out.records.len(), 1);
}

struct StalledGenerator;

#[async_trait::async_trait]
impl CandidateGenerator for StalledGenerator {
    async fn generate(
        &self,
        _request: &GenerationRequest,
    ) -> anyhow::Result<Option<GeneratedCandidate>> {
        std::future::pending::<()>().await;
        Ok(None)
    }

    fn method(&self) -> &'static str {
        "stalled"
    }
}

#[tokio::test]
async fn cancellation_interrupts_a_stalled_generator() {
    let c = connector(&[entry(ORIGINAL, 10.0, "")]);
    let mut ev = evaluator(&c).await;
    let cfg = single_step();
    let knowledge = KnowledgeSnapshot::default();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let out = tokio::time::timeout(
        Duration::from_secs(5),
        SearchController::new(&cfg, &StalledGenerator, &knowledge, 0).run(
            &query(),
            &mut ev,
            &cancel,
        ),
    )
    .await
    .expect("search did not observe cancellation")
    .unwrap();

    assert_eq!(out.termination, TerminationReason::Cancelled);
    assert_eq!(out.iterations, 1);
    assert!(out.records.is_empty());
}

#[tokio::test]
async fn prior_records_are_reused_not_reevaluated() {
    let c = connector(&[entry(ORIGINAL, 10.0, ""), entry(C1, 5.0, "")]);
    let cfg = single_step();
    let gen = single_script();
    let knowledge = KnowledgeSnapshot::default();

    let mut ev = evaluator(&c).await;
    let first = SearchController::new(&cfg, &gen, &knowledge, 0)
        .run(&query(), &mut ev, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.fresh_records().len(), 1);
    let runs_after_first = c.executions(C1);

    let mut ev = evaluator(&c).await;
    let second = SearchController::new(&cfg, &gen, &knowledge, 1)
        .with_prior(&first.records)
        .run(&query(), &mut ev, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(c.executions(C1), runs_after_first);
    assert_eq!(second.records.len(), 1);
    assert!(second.fresh_records().is_empty());
    assert_eq!(second.records[0].generation, 0);
    assert_eq!(second.terminal().bucket, Bucket::MajorWin);
}
