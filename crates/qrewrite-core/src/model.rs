use crate::errors::SyntaxError;
use crate::harness::PerformanceSummary;
use crate::search::TerminationReason;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    #[default]
    #[serde(alias = "duck_db")]
    Duckdb,
    #[serde(alias = "postgresql")]
    Postgres,
    Ansi,
    Generic,
}

impl Dialect {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "duckdb" | "duck_db" => Some(Dialect::Duckdb),
            "postgres" | "postgresql" => Some(Dialect::Postgres),
            "ansi" => Some(Dialect::Ansi),
            "generic" => Some(Dialect::Generic),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Duckdb => "duckdb",
            Dialect::Postgres => "postgres",
            Dialect::Ansi => "ansi",
            Dialect::Generic => "generic",
        }
    }

    /// DuckDB resolves SELECT-list aliases inside WHERE; the others do not.
    pub fn allows_alias_in_where(&self) -> bool {
        matches!(self, Dialect::Duckdb)
    }
}

/// Scalar cell or parameter value as seen through the engine boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValueCategory {
    Null,
    Bool,
    Numeric,
    Text,
}

impl Value {
    pub fn category(&self) -> ValueCategory {
        match self {
            Value::Null => ValueCategory::Null,
            Value::Bool(_) => ValueCategory::Bool,
            Value::Int(_) | Value::Float(_) => ValueCategory::Numeric,
            Value::Text(_) => ValueCategory::Text,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Total order used to canonicalise unordered result sets.
    /// Categories sort Null < Bool < Numeric < Text.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (a, b) if a.category() == ValueCategory::Numeric
                && b.category() == ValueCategory::Numeric =>
            {
                let x = a.as_f64().unwrap_or(0.0);
                let y = b.as_f64().unwrap_or(0.0);
                x.total_cmp(&y)
            }
            (a, b) => a.category().cmp(&b.category()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "'{}'", s),
        }
    }
}

pub type Bindings = BTreeMap<String, Value>;

/// An original benchmark query. Shared behind `Arc` once loaded and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub id: String,
    pub sql: String,
    #[serde(default)]
    pub params: Bindings,
    #[serde(default)]
    pub dialect: Dialect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub query_id: String,
    pub candidate_id: String,
    pub sql: String,
    pub generation_method: String,
    pub transforms: Vec<String>,
}

impl Candidate {
    pub fn new(
        query_id: &str,
        sql: impl Into<String>,
        generation_method: impl Into<String>,
        transforms: Vec<String>,
    ) -> Self {
        let sql = sql.into();
        Self {
            query_id: query_id.to_string(),
            candidate_id: crate::fingerprint::candidate_id(&sql),
            sql,
            generation_method: generation_method.into(),
            transforms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Original,
    Candidate,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Original => "original",
            Side::Candidate => "candidate",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounded description of the first difference found between two results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DiffSummary {
    ColumnCount {
        expected: usize,
        actual: usize,
    },
    ColumnName {
        index: usize,
        expected: String,
        actual: String,
    },
    RowCount {
        expected: usize,
        actual: usize,
    },
    TypeMismatch {
        row: usize,
        column: String,
        expected: String,
        actual: String,
    },
    ValueMismatch {
        row: usize,
        column: String,
        expected: String,
        actual: String,
    },
    ExecutionFailed {
        message: String,
    },
}

impl DiffSummary {
    pub fn row_count_delta(&self) -> Option<i64> {
        match self {
            DiffSummary::RowCount { expected, actual } => Some(*actual as i64 - *expected as i64),
            _ => None,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            DiffSummary::ColumnCount { expected, actual } => {
                format!("column count differs: expected {}, got {}", expected, actual)
            }
            DiffSummary::ColumnName {
                index,
                expected,
                actual,
            } => format!(
                "column {} named '{}' instead of '{}'",
                index, actual, expected
            ),
            DiffSummary::RowCount { expected, actual } => format!(
                "row count differs: expected {}, got {} (delta {:+})",
                expected,
                actual,
                *actual as i64 - *expected as i64
            ),
            DiffSummary::TypeMismatch {
                row,
                column,
                expected,
                actual,
            } => format!(
                "type mismatch at row {} column {}: expected {}, got {}",
                row, column, expected, actual
            ),
            DiffSummary::ValueMismatch {
                row,
                column,
                expected,
                actual,
            } => format!(
                "value mismatch at row {} column {}: expected {}, got {}",
                row, column, expected, actual
            ),
            DiffSummary::ExecutionFailed { message } => {
                format!("candidate failed to execute: {}", message)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "verdict")]
pub enum EquivalenceVerdict {
    Equal,
    Mismatch { diff: DiffSummary },
    Timeout { side: Side, after_ms: u64 },
}

impl EquivalenceVerdict {
    pub fn label(&self) -> &'static str {
        match self {
            EquivalenceVerdict::Equal => "equal",
            EquivalenceVerdict::Mismatch { .. } => "mismatch",
            EquivalenceVerdict::Timeout { .. } => "timeout",
        }
    }

    pub fn is_equal(&self) -> bool {
        matches!(self, EquivalenceVerdict::Equal)
    }
}

/// Written once per candidate. The constructors are the only way to build
/// one, so a syntax failure can never carry an equivalence verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    candidate_id: String,
    syntax_valid: bool,
    syntax_error: Option<SyntaxError>,
    equivalence: Option<EquivalenceVerdict>,
}

impl ValidationResult {
    pub fn rejected(candidate_id: &str, error: SyntaxError) -> Self {
        Self {
            candidate_id: candidate_id.to_string(),
            syntax_valid: false,
            syntax_error: Some(error),
            equivalence: None,
        }
    }

    pub fn checked(candidate_id: &str, verdict: EquivalenceVerdict) -> Self {
        Self {
            candidate_id: candidate_id.to_string(),
            syntax_valid: true,
            syntax_error: None,
            equivalence: Some(verdict),
        }
    }

    /// Parsed, but the comparison could not run (engine unreachable).
    pub fn unchecked(candidate_id: &str) -> Self {
        Self {
            candidate_id: candidate_id.to_string(),
            syntax_valid: true,
            syntax_error: None,
            equivalence: None,
        }
    }

    pub fn candidate_id(&self) -> &str {
        &self.candidate_id
    }

    pub fn syntax_valid(&self) -> bool {
        self.syntax_valid
    }

    pub fn syntax_error(&self) -> Option<&SyntaxError> {
        self.syntax_error.as_ref()
    }

    pub fn equivalence(&self) -> Option<&EquivalenceVerdict> {
        self.equivalence.as_ref()
    }

    /// Grants permission to measure a candidate. Only candidates that parsed
    /// and proved equivalent are admitted, which keeps performance samples
    /// away from anything the validator rejected.
    pub fn admit<'a>(&self, candidate: &'a Candidate) -> Option<Admitted<'a>> {
        if candidate.candidate_id != self.candidate_id || !self.syntax_valid {
            return None;
        }
        match &self.equivalence {
            Some(EquivalenceVerdict::Equal) => Some(Admitted { candidate }),
            _ => None,
        }
    }
}

/// Proof that a candidate passed validation and equivalence.
#[derive(Debug, Clone, Copy)]
pub struct Admitted<'a> {
    candidate: &'a Candidate,
}

impl<'a> Admitted<'a> {
    pub fn candidate(&self) -> &'a Candidate {
        self.candidate
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub candidate_id: String,
    pub side: Side,
    pub run_index: u32,
    pub latency_ms: f64,
    pub warm: bool,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Bucket {
    Error,
    FailsValidation,
    Regression,
    Neutral,
    ModerateWin,
    SignificantWin,
    MajorWin,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::MajorWin => "MAJOR_WIN",
            Bucket::SignificantWin => "SIGNIFICANT_WIN",
            Bucket::ModerateWin => "MODERATE_WIN",
            Bucket::Neutral => "NEUTRAL",
            Bucket::Regression => "REGRESSION",
            Bucket::FailsValidation => "FAILS_VALIDATION",
            Bucket::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MAJOR_WIN" => Some(Bucket::MajorWin),
            "SIGNIFICANT_WIN" => Some(Bucket::SignificantWin),
            "MODERATE_WIN" => Some(Bucket::ModerateWin),
            "NEUTRAL" => Some(Bucket::Neutral),
            "REGRESSION" => Some(Bucket::Regression),
            "FAILS_VALIDATION" => Some(Bucket::FailsValidation),
            "ERROR" => Some(Bucket::Error),
            _ => None,
        }
    }

    pub fn is_win(&self) -> bool {
        matches!(
            self,
            Bucket::MajorWin | Bucket::SignificantWin | Bucket::ModerateWin
        )
    }

    /// Passed validation and was measured, whatever the outcome.
    pub fn is_valid(&self) -> bool {
        !matches!(self, Bucket::Error | Bucket::FailsValidation)
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const GOLD_EXAMPLE_LABEL: &str = "GOLD_EXAMPLE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub query_id: String,
    pub candidate_id: String,
    pub bucket: Bucket,
    pub speedup_ratio: Option<f64>,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub gold: bool,
    #[serde(default)]
    pub transforms: Vec<String>,
}

impl Classification {
    /// Label shown to humans. The gold tag only ever changes this label,
    /// never the bucket fed to the knowledge store.
    pub fn display_label(&self) -> &'static str {
        if self.gold {
            GOLD_EXAMPLE_LABEL
        } else {
            self.bucket.as_str()
        }
    }
}

/// Everything learned about one candidate on its way through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub candidate: Candidate,
    pub validation: ValidationResult,
    #[serde(default)]
    pub samples: Vec<PerformanceSample>,
    #[serde(default)]
    pub performance: Option<PerformanceSummary>,
    pub classification: Classification,
    #[serde(default)]
    pub error: Option<String>,
    pub elapsed_ms: u64,
    #[serde(default)]
    pub generation: u32,
}

impl EvaluationRecord {
    pub fn error_kind(&self) -> Option<String> {
        if let Some(e) = self.validation.syntax_error() {
            return Some(e.kind.as_str().to_string());
        }
        match self.validation.equivalence() {
            Some(EquivalenceVerdict::Mismatch { .. }) => Some("result-mismatch".into()),
            Some(EquivalenceVerdict::Timeout { .. }) => Some("comparison-timeout".into()),
            Some(EquivalenceVerdict::Equal) if self.error.is_some() => {
                Some("performance-error".into())
            }
            None if self.error.is_some() => Some("engine-error".into()),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<String> {
        if let Some(e) = self.validation.syntax_error() {
            return Some(e.message.clone());
        }
        match self.validation.equivalence() {
            Some(EquivalenceVerdict::Mismatch { diff }) => Some(diff.describe()),
            Some(EquivalenceVerdict::Timeout { side, after_ms }) => Some(format!(
                "{} query exceeded the {}ms comparison budget",
                side.as_str(),
                after_ms
            )),
            _ => self.error.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Completed,
    Failed,
    Cancelled,
}

impl QueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Completed => "completed",
            QueryStatus::Failed => "failed",
            QueryStatus::Cancelled => "cancelled",
        }
    }
}

/// Terminal outcome for one corpus query. Every query produces exactly one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub query_id: String,
    pub status: QueryStatus,
    pub terminal: Classification,
    #[serde(default)]
    pub evaluations: Vec<EvaluationRecord>,
    #[serde(default)]
    pub termination: Option<TerminationReason>,
    #[serde(default)]
    pub message: Option<String>,
    pub elapsed_ms: u64,
    #[serde(default)]
    pub iterations: u32,
}

impl QueryOutcome {
    /// Outcome for a query that never reached the search loop.
    pub fn failed(query_id: &str, message: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            query_id: query_id.to_string(),
            status: QueryStatus::Failed,
            terminal: Classification {
                query_id: query_id.to_string(),
                candidate_id: String::new(),
                bucket: Bucket::Error,
                speedup_ratio: None,
                risk_level: RiskLevel::High,
                gold: false,
                transforms: Vec::new(),
            },
            evaluations: Vec::new(),
            termination: None,
            message: Some(message.into()),
            elapsed_ms,
            iterations: 0,
        }
    }

    pub fn best(&self) -> Option<&EvaluationRecord> {
        self.evaluations
            .iter()
            .find(|r| r.candidate.candidate_id == self.terminal.candidate_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SyntaxErrorKind;

    #[test]
    fn value_order_is_total_across_numeric_kinds() {
        assert_eq!(Value::Int(2).total_cmp(&Value::Float(2.5)), Ordering::Less);
        assert_eq!(Value::Float(3.0).total_cmp(&Value::Int(2)), Ordering::Greater);
        assert_eq!(Value::Null.total_cmp(&Value::Int(0)), Ordering::Less);
        assert_eq!(
            Value::Text("a".into()).total_cmp(&Value::Int(9)),
            Ordering::Greater
        );
    }

    #[test]
    fn untagged_values_from_yaml() {
        let v: Vec<Value> = serde_yaml::from_str("[null, true, 3, 2.5, abc]").unwrap();
        assert_eq!(
            v,
            vec![
                Value::Null,
                Value::Bool(true),
                Value::Int(3),
                Value::Float(2.5),
                Value::Text("abc".into())
            ]
        );
    }

    #[test]
    fn rejected_candidates_are_never_admitted() {
        let c = Candidate::new("q1", "select 1", "scripted", vec!["decorrelation".into()]);
        let rejected = ValidationResult::rejected(
            &c.candidate_id,
            SyntaxError::new(SyntaxErrorKind::ParseError, "bad"),
        );
        assert!(rejected.admit(&c).is_none());
        assert!(rejected.equivalence().is_none());

        let mismatch = ValidationResult::checked(
            &c.candidate_id,
            EquivalenceVerdict::Mismatch {
                diff: DiffSummary::RowCount {
                    expected: 1,
                    actual: 2,
                },
            },
        );
        assert!(mismatch.admit(&c).is_none());

        let ok = ValidationResult::checked(&c.candidate_id, EquivalenceVerdict::Equal);
        assert_eq!(ok.admit(&c).map(|a| a.candidate().sql.as_str()), Some("select 1"));
    }

    #[test]
    fn gold_only_changes_display() {
        let mut c = Classification {
            query_id: "q1".into(),
            candidate_id: "c".into(),
            bucket: Bucket::Neutral,
            speedup_ratio: Some(1.05),
            risk_level: RiskLevel::Low,
            gold: true,
            transforms: vec![],
        };
        assert_eq!(c.display_label(), GOLD_EXAMPLE_LABEL);
        assert_eq!(c.bucket, Bucket::Neutral);
        c.gold = false;
        assert_eq!(c.display_label(), "NEUTRAL");
    }

    #[test]
    fn row_count_delta() {
        let d = DiffSummary::RowCount {
            expected: 10,
            actual: 7,
        };
        assert_eq!(d.row_count_delta(), Some(-3));
        assert!(d.describe().contains("delta -3"));
    }
}
