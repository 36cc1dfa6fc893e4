use super::exit_codes;
use crate::cli::args::RunArgs;
use anyhow::Context;
use qrewrite_core::config::{load_config, RunConfig};
use qrewrite_core::corpus::load_corpus;
use qrewrite_core::engine::{RunMeta, Runner};
use qrewrite_core::fingerprint::{run_fingerprint, RunContext};
use qrewrite_core::knowledge::KnowledgeStore;
use qrewrite_core::report::{console, csv, json};
use qrewrite_core::storage::Store;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn apply_overrides(cfg: &mut RunConfig, args: &RunArgs) {
    if let Some(c) = &args.corpus {
        cfg.corpus = c.clone();
    }
    if let Some(w) = args.workers {
        cfg.settings.workers = w;
    }
    if let Some(ms) = args.timeout_ms {
        cfg.settings.timeout_ms = Some(ms);
        cfg.apply_timeout_override();
    }
    if let Some(n) = args.iterations {
        cfg.search.max_iterations = n;
    }
    if let Some(s) = args.time_budget_s {
        cfg.search.time_budget_ms = s.saturating_mul(1000);
    }
    if let Some(seed) = args.seed {
        cfg.search.seed = seed;
    }
    if let Some(g) = args.generations {
        cfg.settings.generations = g;
    }
    if let Some(out) = &args.out {
        cfg.output.csv = Some(out.clone());
        cfg.output.json = Some(out.with_extension("json"));
    }
    if let Some(db) = &args.db {
        cfg.output.db = Some(db.clone());
    }
    if let Some(k) = &args.knowledge {
        cfg.knowledge.path = Some(k.clone());
    }
}

pub async fn run(args: RunArgs, cancel: CancellationToken) -> anyhow::Result<i32> {
    let mut cfg = match load_config(&args.config, args.strict) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("config error: {}", e);
            return Ok(exit_codes::FATAL);
        }
    };
    apply_overrides(&mut cfg, &args);
    if let Err(e) = cfg.validate() {
        eprintln!("config error: {}", e);
        return Ok(exit_codes::FATAL);
    }

    let catalog = match cfg.build_catalog() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("config error: {}", e);
            return Ok(exit_codes::FATAL);
        }
    };
    let connector = cfg.build_connector()?;
    let generator = cfg.build_generator()?;
    let corpus = load_corpus(&cfg.corpus, cfg.dialect)?;

    let mut knowledge = match &cfg.knowledge.path {
        Some(p) => KnowledgeStore::load_or_default(p)?,
        None => KnowledgeStore::new(),
    }
    .with_z(cfg.knowledge.z);
    for g in &cfg.knowledge.gold {
        knowledge.add_gold(g.clone());
    }

    let store = match &cfg.output.db {
        Some(p) => {
            let s = Store::open(p)?;
            s.init_schema()?;
            Some(s)
        }
        None => None,
    };

    let query_ids: Vec<String> = corpus.iter().map(|i| i.id().to_string()).collect();
    let tunables = serde_json::to_string(&serde_json::json!({
        "equivalence": cfg.equivalence,
        "harness": cfg.harness,
        "classifier": cfg.classifier,
        "search": cfg.search,
    }))?;
    let engine_fp = connector
        .fingerprint()
        .unwrap_or_else(|| connector.engine_name().to_string());
    let generator_fp = generator
        .fingerprint()
        .unwrap_or_else(|| generator.method().to_string());
    let fp = run_fingerprint(RunContext {
        name: &cfg.name,
        engine: &engine_fp,
        generator: &generator_fp,
        seed: cfg.search.seed,
        query_ids: &query_ids,
        tunables: &tunables,
    });
    let meta = RunMeta {
        name: cfg.name.clone(),
        fingerprint: fp.hex,
        config_json: Some(serde_json::to_string(&cfg)?),
    };

    let runner = Runner {
        store,
        connector,
        generator,
        catalog,
        pipeline: Arc::new(cfg.build_pipeline()),
        search: cfg.search.clone(),
        settings: cfg.settings.clone(),
        cancel,
    };

    let artifacts = match runner.run_benchmark(&meta, &corpus, &mut knowledge).await {
        Ok(a) => a,
        Err(e) => {
            eprintln!("fatal: {:#}", e);
            return Ok(exit_codes::FATAL);
        }
    };

    if let Some(p) = &cfg.output.csv {
        csv::write_csv(&artifacts, p)
            .with_context(|| format!("failed to write {}", p.display()))?;
    }
    if let Some(p) = &cfg.output.json {
        json::write_json(&artifacts, p)
            .with_context(|| format!("failed to write {}", p.display()))?;
    }
    if let Some(p) = &cfg.knowledge.path {
        knowledge.save(p)?;
    }

    console::print_summary(&artifacts);

    if artifacts.cancelled {
        Ok(exit_codes::INTERRUPTED)
    } else {
        Ok(exit_codes::OK)
    }
}
