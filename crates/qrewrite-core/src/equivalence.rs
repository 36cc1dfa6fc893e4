use crate::errors::EngineError;
use crate::harness::duration_ms;
use crate::model::{Bindings, Candidate, DiffSummary, EquivalenceVerdict, Query, Side, Value};
use crate::providers::engine::{execute_bounded, EngineSession, ResultSet};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EquivalenceConfig {
    /// Absolute tolerance for numeric cells.
    pub float_epsilon: f64,
    /// Relative tolerance, scaled by the larger magnitude of the two cells.
    pub relative_epsilon: f64,
    pub compare_column_names: bool,
    pub timeout_ms: u64,
}

impl Default for EquivalenceConfig {
    fn default() -> Self {
        Self {
            float_epsilon: 1e-6,
            relative_epsilon: 1e-9,
            compare_column_names: false,
            timeout_ms: 60_000,
        }
    }
}

/// Result of the original query, computed once and compared against every
/// candidate of the same search.
#[derive(Debug, Clone)]
pub struct Reference {
    pub result: ResultSet,
    pub ordered: bool,
    pub latency_ms: f64,
}

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("original query exceeded the {0}ms comparison budget")]
    Timeout(u64),
    #[error("original query failed: {0}")]
    Failed(String),
    #[error(transparent)]
    Engine(EngineError),
}

fn numeric_eq(a: f64, b: f64, cfg: &EquivalenceConfig) -> bool {
    if a.is_nan() && b.is_nan() {
        return true;
    }
    if a == b {
        return true;
    }
    let tol = cfg.float_epsilon + cfg.relative_epsilon * a.abs().max(b.abs());
    (a - b).abs() <= tol
}

enum CellDiff {
    Type,
    Value,
}

fn compare_cells(a: &Value, b: &Value, cfg: &EquivalenceConfig) -> Option<CellDiff> {
    match (a, b) {
        (Value::Null, Value::Null) => None,
        (Value::Null, _) | (_, Value::Null) => Some(CellDiff::Value),
        _ if a.category() != b.category() => Some(CellDiff::Type),
        (Value::Int(x), Value::Int(y)) => (x != y).then_some(CellDiff::Value),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => (!numeric_eq(x, y, cfg)).then_some(CellDiff::Value),
            _ => (a != b).then_some(CellDiff::Value),
        },
    }
}

fn row_cmp(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let o = x.total_cmp(y);
        if o != Ordering::Equal {
            return o;
        }
    }
    a.len().cmp(&b.len())
}

/// Orders rows by their exact cells only. Cells of approximate columns
/// contribute their category, so tolerance-equal rows share a key.
fn key_cmp(a: &[Value], b: &[Value], approx: &[bool]) -> Ordering {
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        let o = if approx.get(i).copied().unwrap_or(false) {
            x.category().cmp(&y.category())
        } else {
            x.total_cmp(y)
        };
        if o != Ordering::Equal {
            return o;
        }
    }
    a.len().cmp(&b.len())
}

/// A column is approximate when either side holds a float in it.
fn approximate_columns(expected: &ResultSet, actual: &ResultSet) -> Vec<bool> {
    let mut approx = vec![false; expected.column_count()];
    for row in expected.rows.iter().chain(actual.rows.iter()) {
        for (i, v) in row.iter().enumerate() {
            if matches!(v, Value::Float(_)) {
                if let Some(slot) = approx.get_mut(i) {
                    *slot = true;
                }
            }
        }
    }
    approx
}

fn rows_match(e: &[Value], a: &[Value], cfg: &EquivalenceConfig) -> bool {
    e.iter()
        .zip(a.iter())
        .all(|(x, y)| compare_cells(x, y, cfg).is_none())
}

/// First differing cell of two rows, as a mismatch at `row`.
fn row_diff(
    row: usize,
    e: &[Value],
    a: &[Value],
    columns: &[String],
    cfg: &EquivalenceConfig,
) -> Option<EquivalenceVerdict> {
    for (col, (x, y)) in e.iter().zip(a.iter()).enumerate() {
        let column = columns
            .get(col)
            .cloned()
            .unwrap_or_else(|| format!("#{}", col + 1));
        match compare_cells(x, y, cfg) {
            None => {}
            Some(CellDiff::Type) => {
                return Some(EquivalenceVerdict::Mismatch {
                    diff: DiffSummary::TypeMismatch {
                        row,
                        column,
                        expected: x.type_name().to_string(),
                        actual: y.type_name().to_string(),
                    },
                })
            }
            Some(CellDiff::Value) => {
                return Some(EquivalenceVerdict::Mismatch {
                    diff: DiffSummary::ValueMismatch {
                        row,
                        column,
                        expected: x.to_string(),
                        actual: y.to_string(),
                    },
                })
            }
        }
    }
    None
}

/// Multiset comparison. Rows are grouped by their exact cells; inside a
/// group, each expected row is matched to an unused actual row within
/// tolerance.
fn compare_unordered(
    expected: &ResultSet,
    actual: &ResultSet,
    cfg: &EquivalenceConfig,
) -> EquivalenceVerdict {
    let approx = approximate_columns(expected, actual);
    let sort = |rows: &[Vec<Value>]| -> Vec<Vec<Value>> {
        let mut out = rows.to_vec();
        out.sort_by(|a, b| key_cmp(a, b, &approx).then_with(|| row_cmp(a, b)));
        out
    };
    let left = sort(&expected.rows);
    let right = sort(&actual.rows);

    // Equal key multisets give identical sorted key sequences.
    for (row, (e, a)) in left.iter().zip(right.iter()).enumerate() {
        if key_cmp(e, a, &approx) != Ordering::Equal {
            if let Some(diff) = row_diff(row, e, a, &expected.columns, cfg) {
                return diff;
            }
        }
    }

    let mut start = 0;
    while start < left.len() {
        let mut end = start + 1;
        while end < left.len() && key_cmp(&left[start], &left[end], &approx) == Ordering::Equal {
            end += 1;
        }
        let mut used = vec![false; end - start];
        for row in start..end {
            let hit = (start..end).find(|&m| !used[m - start] && rows_match(&left[row], &right[m], cfg));
            match hit {
                Some(m) => used[m - start] = true,
                None => {
                    let other = (start..end).find(|&m| !used[m - start]).unwrap_or(row);
                    if let Some(diff) = row_diff(row, &left[row], &right[other], &expected.columns, cfg) {
                        return diff;
                    }
                }
            }
        }
        start = end;
    }
    EquivalenceVerdict::Equal
}

/// Compares two result sets. Without `ordered` the comparison is over
/// multisets. Stops at the first difference.
pub fn compare(
    expected: &ResultSet,
    actual: &ResultSet,
    ordered: bool,
    cfg: &EquivalenceConfig,
) -> EquivalenceVerdict {
    if expected.column_count() != actual.column_count() {
        return EquivalenceVerdict::Mismatch {
            diff: DiffSummary::ColumnCount {
                expected: expected.column_count(),
                actual: actual.column_count(),
            },
        };
    }
    if cfg.compare_column_names {
        for (i, (e, a)) in expected.columns.iter().zip(actual.columns.iter()).enumerate() {
            if !e.eq_ignore_ascii_case(a) {
                return EquivalenceVerdict::Mismatch {
                    diff: DiffSummary::ColumnName {
                        index: i,
                        expected: e.clone(),
                        actual: a.clone(),
                    },
                };
            }
        }
    }
    if expected.row_count() != actual.row_count() {
        return EquivalenceVerdict::Mismatch {
            diff: DiffSummary::RowCount {
                expected: expected.row_count(),
                actual: actual.row_count(),
            },
        };
    }
    if !ordered {
        return compare_unordered(expected, actual, cfg);
    }

    for (row, (e, a)) in expected.rows.iter().zip(actual.rows.iter()).enumerate() {
        if let Some(diff) = row_diff(row, e, a, &expected.columns, cfg) {
            return diff;
        }
    }
    EquivalenceVerdict::Equal
}

#[derive(Debug, Clone, Default)]
pub struct EquivalenceChecker {
    cfg: EquivalenceConfig,
}

impl EquivalenceChecker {
    pub fn new(cfg: EquivalenceConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &EquivalenceConfig {
        &self.cfg
    }

    fn budget(&self) -> Duration {
        Duration::from_millis(self.cfg.timeout_ms.max(1))
    }

    /// Executes the original query once. `ordered` is whether the original
    /// carries a top-level ORDER BY.
    pub async fn reference(
        &self,
        session: &mut dyn EngineSession,
        original: &Query,
        ordered: bool,
        cancel: &CancellationToken,
    ) -> Result<Reference, ReferenceError> {
        let started = std::time::Instant::now();
        match execute_bounded(
            session,
            &original.sql,
            &original.params,
            self.budget(),
            cancel,
        )
        .await
        {
            Ok(out) => Ok(Reference {
                latency_ms: duration_ms(out.engine_time.unwrap_or_else(|| started.elapsed())),
                result: out.result,
                ordered,
            }),
            Err(EngineError::Timeout(_)) => Err(ReferenceError::Timeout(self.cfg.timeout_ms)),
            Err(EngineError::Execution(msg)) => Err(ReferenceError::Failed(msg)),
            Err(other) => Err(ReferenceError::Engine(other)),
        }
    }

    /// Executes the candidate with the original's bindings and compares it
    /// against a precomputed reference.
    ///
    /// Only connection loss, refused connections and cancellation surface as
    /// `Err`; a failing candidate is a mismatch and a slow one a timeout.
    pub async fn check_against(
        &self,
        session: &mut dyn EngineSession,
        reference: &Reference,
        candidate: &Candidate,
        bindings: &Bindings,
        cancel: &CancellationToken,
    ) -> Result<EquivalenceVerdict, EngineError> {
        match execute_bounded(session, &candidate.sql, bindings, self.budget(), cancel).await {
            Ok(out) => Ok(compare(
                &reference.result,
                &out.result,
                reference.ordered,
                &self.cfg,
            )),
            Err(EngineError::Timeout(_)) => Ok(EquivalenceVerdict::Timeout {
                side: Side::Candidate,
                after_ms: self.cfg.timeout_ms,
            }),
            Err(EngineError::Execution(msg)) => Ok(EquivalenceVerdict::Mismatch {
                diff: DiffSummary::ExecutionFailed { message: msg },
            }),
            Err(other) => Err(other),
        }
    }

    /// Executes both queries and compares them. A failing original is an
    /// engine error, not a verdict about the candidate.
    pub async fn check(
        &self,
        session: &mut dyn EngineSession,
        original: &Query,
        ordered: bool,
        candidate: &Candidate,
        cancel: &CancellationToken,
    ) -> Result<EquivalenceVerdict, EngineError> {
        let reference = match self.reference(session, original, ordered, cancel).await {
            Ok(r) => r,
            Err(ReferenceError::Timeout(ms)) => {
                return Ok(EquivalenceVerdict::Timeout {
                    side: Side::Original,
                    after_ms: ms,
                })
            }
            Err(ReferenceError::Failed(msg)) => return Err(EngineError::Execution(msg)),
            Err(ReferenceError::Engine(e)) => return Err(e),
        };
        self.check_against(session, &reference, candidate, &original.params, cancel)
            .await
    }
}
