use super::exit_codes;
use crate::cli::args::ValidateArgs;
use anyhow::Context;
use qrewrite_core::catalog::Catalog;
use qrewrite_core::config::load_config;
use qrewrite_core::errors::SyntaxError;
use qrewrite_core::model::Dialect;
use qrewrite_core::sql::{ParsedQuery, Validator};
use serde_json::json;
use std::collections::BTreeMap;

pub async fn run(args: ValidateArgs) -> anyhow::Result<i32> {
    let (catalog, mut dialect) = match &args.config {
        Some(path) => {
            let cfg = match load_config(path, false) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("config error: {}", e);
                    return Ok(exit_codes::FATAL);
                }
            };
            (cfg.build_catalog()?, cfg.dialect)
        }
        None => (
            Catalog::from_parts(Some(&args.catalog), &BTreeMap::new())?,
            Dialect::default(),
        ),
    };
    if let Some(d) = &args.dialect {
        dialect = Dialect::parse(d).ok_or_else(|| anyhow::anyhow!("unknown dialect '{}'", d))?;
    }

    let raw = std::fs::read_to_string(&args.sql)
        .with_context(|| format!("failed to read {}", args.sql.display()))?;
    let sql = raw.trim().trim_end_matches(';');

    let result = Validator::new(&catalog, dialect).validate(sql);
    print_report(&args, dialect, &result);

    Ok(if result.is_ok() {
        exit_codes::OK
    } else {
        exit_codes::INVALID
    })
}

fn print_report(args: &ValidateArgs, dialect: Dialect, result: &Result<ParsedQuery, SyntaxError>) {
    if args.format == "json" {
        let output = match result {
            Ok(p) => json!({
                "schema_version": 1,
                "ok": true,
                "file": args.sql,
                "dialect": dialect.as_str(),
                "tables": p.tables,
                "ordered": p.has_order_by,
                "columns": p.output_columns,
            }),
            Err(e) => json!({
                "schema_version": 1,
                "ok": false,
                "file": args.sql,
                "dialect": dialect.as_str(),
                "error": e,
            }),
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return;
    }

    match result {
        Ok(p) => {
            println!(
                "✅ {} is valid {} ({} table(s){})",
                args.sql.display(),
                dialect.as_str(),
                p.tables.len(),
                if p.has_order_by { ", ordered" } else { "" }
            );
        }
        Err(e) => {
            println!("❌ {} [{}]", args.sql.display(), e.kind.as_str());
            println!("   {}", e.message);
            if !e.candidates.is_empty() {
                println!("   candidates: {}", e.candidates.join(", "));
            }
            if let Some(s) = &e.suggestion {
                println!("   did you mean: {}", s);
            }
        }
    }
}
