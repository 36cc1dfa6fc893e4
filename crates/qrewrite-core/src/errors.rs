use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Kinds of static rejection raised by the SQL validator.
///
/// The kebab-case names are the identifiers written to reports and the
/// result store, so they are part of the persisted format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyntaxErrorKind {
    ParseError,
    UnsupportedStatement,
    ColumnNotInFromScope,
    AmbiguousColumnReference,
    WindowFunctionInInvalidClause,
    GroupByViolation,
    UndefinedTableReference,
    MissingProjectedColumn,
}

impl SyntaxErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyntaxErrorKind::ParseError => "parse-error",
            SyntaxErrorKind::UnsupportedStatement => "unsupported-statement",
            SyntaxErrorKind::ColumnNotInFromScope => "column-not-in-from-scope",
            SyntaxErrorKind::AmbiguousColumnReference => "ambiguous-column-reference",
            SyntaxErrorKind::WindowFunctionInInvalidClause => "window-function-in-invalid-clause",
            SyntaxErrorKind::GroupByViolation => "group-by-violation",
            SyntaxErrorKind::UndefinedTableReference => "undefined-table-reference",
            SyntaxErrorKind::MissingProjectedColumn => "missing-projected-column",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "parse-error" => Some(SyntaxErrorKind::ParseError),
            "unsupported-statement" => Some(SyntaxErrorKind::UnsupportedStatement),
            "column-not-in-from-scope" => Some(SyntaxErrorKind::ColumnNotInFromScope),
            "ambiguous-column-reference" => Some(SyntaxErrorKind::AmbiguousColumnReference),
            "window-function-in-invalid-clause" => {
                Some(SyntaxErrorKind::WindowFunctionInInvalidClause)
            }
            "group-by-violation" => Some(SyntaxErrorKind::GroupByViolation),
            "undefined-table-reference" => Some(SyntaxErrorKind::UndefinedTableReference),
            "missing-projected-column" => Some(SyntaxErrorKind::MissingProjectedColumn),
            _ => None,
        }
    }
}

impl fmt::Display for SyntaxErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured validator rejection: kind, offending identifier and, for
/// ambiguous references, every qualification that could have been meant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct SyntaxError {
    pub kind: SyntaxErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    pub message: String,
}

impl SyntaxError {
    pub fn new(kind: SyntaxErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            identifier: None,
            candidates: Vec::new(),
            suggestion: None,
            message: message.into(),
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_candidates(mut self, candidates: Vec<String>) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn with_suggestion(mut self, suggestion: Option<String>) -> Self {
        self.suggestion = suggestion;
        self
    }
}

/// Failures reported by a target engine session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("execution exceeded {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("execution cancelled")]
    Cancelled,
    #[error("engine connection lost: {0}")]
    ConnectionLost(String),
    #[error("engine connection failed: {0}")]
    Connect(String),
    #[error("execution failed: {0}")]
    Execution(String),
}

impl EngineError {
    /// Timeouts and engine-side crashes may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Timeout(_) | EngineError::Execution(_))
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ConfigError(pub String);

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} contains no SQL", path.display())]
    Empty { path: PathBuf },
    #[error("invalid parameter file {}: {message}", path.display())]
    Params { path: PathBuf, message: String },
}
