use super::exit_codes;
use crate::cli::args::{KnowledgeArgs, KnowledgeMergeArgs, KnowledgeShowArgs, KnowledgeSub};
use qrewrite_core::knowledge::KnowledgeStore;

pub fn run(args: KnowledgeArgs) -> anyhow::Result<i32> {
    match args.cmd {
        KnowledgeSub::Show(a) => show(a),
        KnowledgeSub::Merge(a) => merge(a),
    }
}

fn show(args: KnowledgeShowArgs) -> anyhow::Result<i32> {
    let store = KnowledgeStore::load(&args.path)?;
    let top = store.top_k(args.top);

    if args.format == "json" {
        let v = serde_json::json!({
            "schema_version": 1,
            "records": store.records(),
            "gold": store.view().gold_count(),
            "patterns": top,
        });
        println!("{}", serde_json::to_string_pretty(&v)?);
        return Ok(exit_codes::OK);
    }

    println!(
        "{}: {} classification(s), {} gold example(s)",
        args.path.display(),
        store.records(),
        store.view().gold_count()
    );
    if top.is_empty() {
        println!("(no pattern statistics yet)");
        return Ok(exit_codes::OK);
    }
    println!(
        "{:<24} {:>8} {:>9} {:>10} {:>11}",
        "transformation", "attempts", "successes", "avg_speedup", "confidence"
    );
    for s in top {
        let avg = s
            .avg_speedup
            .map(|v| format!("{:.2}x", v))
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<24} {:>8} {:>9} {:>10} {:>11.3}",
            s.transformation, s.attempts, s.successes, avg, s.confidence
        );
    }
    Ok(exit_codes::OK)
}

fn merge(args: KnowledgeMergeArgs) -> anyhow::Result<i32> {
    let mut target = KnowledgeStore::load_or_default(&args.into)?;
    for input in &args.inputs {
        let other = KnowledgeStore::load(input)?;
        let report = target.merge_store(&other);
        eprintln!(
            "merged {}: {} added, {} updated, {} unchanged",
            input.display(),
            report.added,
            report.updated,
            report.unchanged
        );
    }
    target.save(&args.into)?;
    eprintln!("wrote {}", args.into.display());
    Ok(exit_codes::OK)
}
