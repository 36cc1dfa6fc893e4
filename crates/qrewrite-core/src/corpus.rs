//! Corpus directory loader: one `*.sql` file per query, with an optional
//! `<stem>.params.yaml` sidecar.

use crate::errors::CorpusError;
use crate::model::{Bindings, Dialect, Query};
use anyhow::Context;
use serde::Deserialize;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ParamsFile {
    #[serde(default)]
    params: Bindings,
    #[serde(default)]
    dialect: Option<Dialect>,
}

#[derive(Debug)]
pub enum CorpusItem {
    Ready(Query),
    /// Unreadable entry. Still yields a terminal ERROR row for its id.
    Broken { id: String, error: CorpusError },
}

impl CorpusItem {
    pub fn id(&self) -> &str {
        match self {
            CorpusItem::Ready(q) => &q.id,
            CorpusItem::Broken { id, .. } => id,
        }
    }
}

/// Compares `q2` before `q10`.
fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut ai = a.chars().peekable();
    let mut bi = b.chars().peekable();
    loop {
        match (ai.peek().copied(), bi.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let mut na = String::new();
                while let Some(c) = ai.peek().copied().filter(|c| c.is_ascii_digit()) {
                    na.push(c);
                    ai.next();
                }
                let mut nb = String::new();
                while let Some(c) = bi.peek().copied().filter(|c| c.is_ascii_digit()) {
                    nb.push(c);
                    bi.next();
                }
                let ta = na.trim_start_matches('0');
                let tb = nb.trim_start_matches('0');
                let o = ta.len().cmp(&tb.len()).then_with(|| ta.cmp(tb));
                if o != Ordering::Equal {
                    return o;
                }
            }
            (Some(x), Some(y)) => {
                let o = x.to_ascii_lowercase().cmp(&y.to_ascii_lowercase());
                if o != Ordering::Equal {
                    return o;
                }
                ai.next();
                bi.next();
            }
        }
    }
}

fn load_entry(path: &Path, id: &str, default_dialect: Dialect) -> Result<Query, CorpusError> {
    let sql = std::fs::read_to_string(path).map_err(|source| CorpusError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let sql = sql.trim().trim_end_matches(';').trim_end().to_string();
    if sql.is_empty() {
        return Err(CorpusError::Empty {
            path: path.to_path_buf(),
        });
    }

    let params_path = path.with_file_name(format!("{id}.params.yaml"));
    let params = if params_path.exists() {
        let raw = std::fs::read_to_string(&params_path).map_err(|source| CorpusError::Io {
            path: params_path.clone(),
            source,
        })?;
        serde_yaml::from_str::<ParamsFile>(&raw).map_err(|e| CorpusError::Params {
            path: params_path.clone(),
            message: e.to_string(),
        })?
    } else {
        ParamsFile::default()
    };

    Ok(Query {
        id: id.to_string(),
        sql,
        params: params.params,
        dialect: params.dialect.unwrap_or(default_dialect),
    })
}

/// Reads every `*.sql` file in `dir`, in natural id order. Individual bad
/// entries come back as [`CorpusItem::Broken`]; only an unreadable directory
/// is an error.
pub fn load_corpus(dir: &Path, default_dialect: Dialect) -> anyhow::Result<Vec<CorpusItem>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read corpus directory: {}", dir.display()))?;

    let mut files: Vec<(String, PathBuf)> = Vec::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("failed to list corpus directory: {}", dir.display()))?
            .path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("sql") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        files.push((stem.to_string(), path.clone()));
    }
    files.sort_by(|a, b| natural_cmp(&a.0, &b.0).then_with(|| a.0.cmp(&b.0)));

    let items: Vec<CorpusItem> = files
        .into_iter()
        .map(|(id, path)| match load_entry(&path, &id, default_dialect) {
            Ok(q) => CorpusItem::Ready(q),
            Err(error) => {
                tracing::warn!(event = "corpus_entry_broken", query_id = %id, error = %error);
                CorpusItem::Broken { id, error }
            }
        })
        .collect();

    tracing::info!(
        event = "corpus_loaded",
        dir = %dir.display(),
        queries = items.len()
    );
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Value;

    #[test]
    fn natural_order() {
        let mut ids = vec!["q10", "q2", "q1", "Q3", "q02a"];
        ids.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(ids, vec!["q1", "q2", "q02a", "Q3", "q10"]);
    }

    #[test]
    fn loads_sql_params_and_broken_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("q10.sql"), "select 10;\n").unwrap();
        std::fs::write(dir.path().join("q2.sql"), "select d_year from date_dim where d_year = $year").unwrap();
        std::fs::write(
            dir.path().join("q2.params.yaml"),
            "params:\n  year: 2001\ndialect: postgres\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("q3.sql"), "   \n").unwrap();
        std::fs::write(dir.path().join("q4.sql"), "select 4").unwrap();
        std::fs::write(dir.path().join("q4.params.yaml"), "bogus: [").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let items = load_corpus(dir.path(), Dialect::Duckdb).unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.id()).collect();
        assert_eq!(ids, vec!["q2", "q3", "q4", "q10"]);

        match &items[0] {
            CorpusItem::Ready(q) => {
                assert_eq!(q.params.get("year"), Some(&Value::Int(2001)));
                assert_eq!(q.dialect, Dialect::Postgres);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(&items[1], CorpusItem::Broken { error: CorpusError::Empty { .. }, .. }));
        assert!(matches!(&items[2], CorpusItem::Broken { error: CorpusError::Params { .. }, .. }));
        match &items[3] {
            CorpusItem::Ready(q) => {
                assert_eq!(q.sql, "select 10");
                assert_eq!(q.dialect, Dialect::Duckdb);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_corpus(&dir.path().join("nope"), Dialect::Duckdb).is_err());
    }
}
