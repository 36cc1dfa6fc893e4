use qrewrite_core::catalog::Catalog;
use qrewrite_core::equivalence::{EquivalenceChecker, EquivalenceConfig};
use qrewrite_core::model::{Candidate, Dialect, DiffSummary, EquivalenceVerdict, Query};
use qrewrite_core::providers::engine::replay::{ReplayConnector, ReplayFixture};
use qrewrite_core::providers::engine::EngineConnector;
use qrewrite_core::sql::Validator;
use tokio_util::sync::CancellationToken;

const CORRELATED: &str = "SELECT i_item_id, \
    (SELECT AVG(ss_net_paid) FROM store_sales WHERE ss_item_sk = i_item_sk) AS avg_paid \
    FROM item";
const WINDOWED: &str = "SELECT i_item_id, avg_paid FROM (\
    SELECT i_item_id, i_item_sk, AVG(ss_net_paid) OVER (PARTITION BY ss_item_sk) AS avg_paid, \
    ROW_NUMBER() OVER (PARTITION BY ss_item_sk ORDER BY ss_item_sk) AS rn \
    FROM item JOIN store_sales ON ss_item_sk = i_item_sk) w WHERE rn = 1";

fn fixture(original: &str) -> ReplayFixture {
    let yaml = format!(
        r#"
queries:
  - sql: "{original}"
    columns: [i_item_id, avg_paid]
    rows: [["AAA", 10.5], ["BBB", 3.25], ["CCC", 7.0]]
    latency_ms: 40
  - sql: "{WINDOWED}"
    columns: [i_item_id, avg_paid]
    rows: [["CCC", 7.0000000001], ["AAA", 10.5], ["BBB", 3.25]]
    latency_ms: 12
"#
    );
    serde_yaml::from_str(&yaml).unwrap()
}

fn query(sql: &str) -> Query {
    Query {
        id: "q1".into(),
        sql: sql.into(),
        params: Default::default(),
        dialect: Dialect::Duckdb,
    }
}

#[tokio::test]
async fn decorrelated_rewrite_is_equal_without_order_by() {
    let cat = Catalog::tpcds();
    let v = Validator::new(&cat, Dialect::Duckdb);
    let original = v.validate(CORRELATED).unwrap();
    v.validate(WINDOWED).unwrap();
    assert!(!original.has_order_by);

    let conn = ReplayConnector::new(fixture(CORRELATED));
    let mut session = conn.connect().await.unwrap();
    let checker = EquivalenceChecker::new(EquivalenceConfig::default());
    let candidate = Candidate::new("q1", WINDOWED, "scripted", vec!["decorrelate_subquery".into()]);

    let verdict = checker
        .check(
            session.as_mut(),
            &query(CORRELATED),
            original.has_order_by,
            &candidate,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(verdict, EquivalenceVerdict::Equal);
}

#[tokio::test]
async fn same_rows_in_another_order_mismatch_under_order_by() {
    let ordered = format!("{CORRELATED} ORDER BY i_item_id");
    let cat = Catalog::tpcds();
    let parsed = Validator::new(&cat, Dialect::Duckdb).validate(&ordered).unwrap();
    assert!(parsed.has_order_by);

    let conn = ReplayConnector::new(fixture(&ordered));
    let mut session = conn.connect().await.unwrap();
    let checker = EquivalenceChecker::new(EquivalenceConfig::default());
    let candidate = Candidate::new("q1", WINDOWED, "scripted", vec![]);

    let verdict = checker
        .check(
            session.as_mut(),
            &query(&ordered),
            parsed.has_order_by,
            &candidate,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    match verdict {
        EquivalenceVerdict::Mismatch {
            diff: DiffSummary::ValueMismatch { row, .. },
        } => assert_eq!(row, 0),
        other => panic!("expected a value mismatch, got {:?}", other),
    }
}
