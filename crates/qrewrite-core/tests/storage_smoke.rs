use qrewrite_core::errors::{SyntaxError, SyntaxErrorKind};
use qrewrite_core::model::{
    Bucket, Candidate, Classification, EvaluationRecord, PerformanceSample, QueryOutcome,
    QueryStatus, RiskLevel, Side, ValidationResult,
};
use qrewrite_core::storage::Store;
use tempfile::tempdir;

fn rejected(query_id: &str, sql: &str) -> EvaluationRecord {
    let candidate = Candidate::new(query_id, sql, "scripted", vec!["inline_cte".into()]);
    EvaluationRecord {
        validation: ValidationResult::rejected(
            &candidate.candidate_id,
            SyntaxError::new(SyntaxErrorKind::UndefinedTableReference, "no table nope"),
        ),
        classification: Classification {
            query_id: query_id.into(),
            candidate_id: candidate.candidate_id.clone(),
            bucket: Bucket::Error,
            speedup_ratio: None,
            risk_level: RiskLevel::High,
            gold: false,
            transforms: candidate.transforms.clone(),
        },
        candidate,
        samples: vec![],
        performance: None,
        error: None,
        elapsed_ms: 1,
        generation: 0,
    }
}

#[test]
fn test_storage_smoke_lifecycle() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("nested/qrewrite.db");

    let store = Store::open(&db_path)?;
    store.init_schema()?;
    let run_id = store.create_run("smoke", "fp", Some("{}"))?;

    let bad = rejected("q1", "select * from nope");
    store.insert_evaluation(run_id, &bad)?;

    let mut measured = rejected("q1", "select 1");
    measured.samples = (0..3)
        .map(|i| PerformanceSample {
            candidate_id: measured.candidate.candidate_id.clone(),
            side: if i % 2 == 0 { Side::Original } else { Side::Candidate },
            run_index: i,
            latency_ms: 1.5,
            warm: true,
        })
        .collect();
    store.insert_evaluation(run_id, &measured)?;

    let outcome = QueryOutcome::failed("q1", "nothing valid", 3);
    store.insert_terminal(run_id, &outcome)?;
    // Upsert, not a second row.
    let mut done = outcome.clone();
    done.status = QueryStatus::Completed;
    store.insert_terminal(run_id, &done)?;
    store.finalize_run(run_id, "completed")?;

    let terminals = store.fetch_terminals(run_id)?;
    assert_eq!(terminals.len(), 1);
    assert_eq!(terminals[0].status, "completed");
    assert_eq!(terminals[0].bucket, "ERROR");

    assert_eq!(store.count_samples(run_id, &bad.candidate.candidate_id, None)?, 0);
    assert_eq!(
        store.count_samples(run_id, &measured.candidate.candidate_id, Some(Side::Original))?,
        2
    );

    let stats = store.stats_best_effort()?;
    assert_eq!(stats.runs, Some(1));
    assert_eq!(stats.evaluations, Some(2));
    assert_eq!(stats.samples, Some(3));
    assert_eq!(stats.terminals, Some(1));
    assert_eq!(stats.last_run_id, Some(run_id));
    assert_eq!(stats.version.as_deref(), Some("1"));

    // Rows survive reopening.
    drop(store);
    let reopened = Store::open(&db_path)?;
    let conn = reopened.conn.lock().unwrap();
    let status: String =
        conn.query_row("SELECT status FROM runs WHERE id = ?1", [run_id], |r| r.get(0))?;
    assert_eq!(status, "completed");
    Ok(())
}
