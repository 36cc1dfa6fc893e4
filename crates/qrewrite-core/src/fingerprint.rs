use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub hex: String,
    pub components: Vec<String>,
}

pub fn sha256_hex(s: &str) -> String {
    let mut h = Sha256::new();
    h.update(s.as_bytes());
    hex::encode(h.finalize())
}

/// Canonical text used for SQL identity.
///
/// Lowercases and collapses whitespace outside of quoted literals and quoted
/// identifiers, and strips trailing semicolons. Quoted text is kept verbatim
/// so `'ABC'` and `'abc'` stay distinct.
pub fn normalize_sql(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut quote: Option<char> = None;
    let mut pending_space = false;

    for ch in sql.chars() {
        if let Some(q) = quote {
            out.push(ch);
            if ch == q {
                quote = None;
            }
            continue;
        }
        if ch.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        if ch == '\'' || ch == '"' {
            quote = Some(ch);
            out.push(ch);
        } else {
            out.extend(ch.to_lowercase());
        }
    }

    while out.ends_with(';') || out.ends_with(' ') {
        out.pop();
    }
    out
}

pub fn sql_fingerprint(sql: &str) -> String {
    sha256_hex(&normalize_sql(sql))
}

/// Stable candidate identifier: same text (modulo case and whitespace) gives
/// the same id.
pub fn candidate_id(sql: &str) -> String {
    let fp = sql_fingerprint(sql);
    format!("c_{}", &fp[..12])
}

pub struct RunContext<'a> {
    pub name: &'a str,
    pub engine: &'a str,
    pub generator: &'a str,
    pub seed: u64,
    pub query_ids: &'a [String],
    pub tunables: &'a str,
}

/// Fingerprint of everything that determines a run's outcome, stored with
/// the run so two runs can be compared for like-for-like settings.
pub fn run_fingerprint(ctx: RunContext<'_>) -> Fingerprint {
    let mut parts = Vec::new();
    parts.push(format!("name={}", ctx.name));
    parts.push(format!("engine={}", ctx.engine));
    parts.push(format!("generator={}", ctx.generator));
    parts.push(format!("seed={}", ctx.seed));

    let mut ids = ctx.query_ids.to_vec();
    ids.sort();
    parts.push(format!("queries={}", ids.join(",")));
    parts.push(format!("tunables={}", ctx.tunables));
    parts.push(format!("qrewrite_version={}", env!("CARGO_PKG_VERSION")));

    let raw = parts.join("\n");
    Fingerprint {
        hex: sha256_hex(&raw),
        components: parts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_ignores_case_and_layout() {
        let a = "SELECT  a,\n b FROM t WHERE x = 'AbC';";
        let b = "select a, b from t where x = 'AbC'";
        assert_eq!(normalize_sql(a), normalize_sql(b));
        assert_eq!(candidate_id(a), candidate_id(b));
    }

    #[test]
    fn quoted_text_is_preserved() {
        assert_ne!(
            normalize_sql("select 'A  B'"),
            normalize_sql("select 'a b'")
        );
        assert_eq!(normalize_sql("select \"Col\""), "select \"Col\"");
    }

    #[test]
    fn candidate_id_shape() {
        let id = candidate_id("select 1");
        assert!(id.starts_with("c_"));
        assert_eq!(id.len(), 14);
    }

    #[test]
    fn run_fingerprint_is_order_independent_over_queries() {
        let a = vec!["q2".to_string(), "q1".to_string()];
        let b = vec!["q1".to_string(), "q2".to_string()];
        let mk = |ids: &[String]| {
            run_fingerprint(RunContext {
                name: "n",
                engine: "replay",
                generator: "scripted",
                seed: 1,
                query_ids: ids,
                tunables: "{}",
            })
            .hex
        };
        assert_eq!(mk(&a), mk(&b));
    }
}
