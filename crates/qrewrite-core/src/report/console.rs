use super::RunArtifacts;
use crate::model::{Bucket, QueryStatus, RiskLevel};

pub fn print_summary(artifacts: &RunArtifacts) {
    eprintln!(
        "\nSearched {} queries over {} generation(s)...",
        artifacts.outcomes.len(),
        artifacts.generations
    );

    for o in &artifacts.outcomes {
        let t = &o.terminal;
        let elapsed = format!("({:.1}s)", o.elapsed_ms as f64 / 1000.0);
        let speedup = t
            .speedup_ratio
            .map(|s| format!("{:.2}x", s))
            .unwrap_or_else(|| "-".into());

        match (o.status, t.bucket) {
            (QueryStatus::Cancelled, _) => {
                eprintln!("⏹️  {:<12} CANCELLED {}", o.query_id, elapsed);
            }
            (QueryStatus::Failed, _) | (_, Bucket::Error) => {
                let msg = o
                    .message
                    .clone()
                    .or_else(|| o.best().and_then(|r| r.error_message()))
                    .unwrap_or_default();
                eprintln!("💥 {:<12} ERROR: {}", o.query_id, msg);
            }
            (_, Bucket::FailsValidation) => {
                eprintln!("❌ {:<12} FAILS_VALIDATION {}", o.query_id, elapsed);
                if let Some(msg) = o.best().and_then(|r| r.error_message()) {
                    eprintln!("      → {}", msg);
                }
            }
            (_, b) if b.is_win() => {
                let icon = if t.risk_level == RiskLevel::High {
                    "⚠️ "
                } else {
                    "✅"
                };
                eprintln!(
                    "{} {:<12} {:<16} {:>8}  {}",
                    icon,
                    o.query_id,
                    t.display_label(),
                    speedup,
                    elapsed
                );
                if !t.transforms.is_empty() {
                    eprintln!("      via {}", t.transforms.join(" > "));
                }
            }
            _ => {
                eprintln!(
                    "➖ {:<12} {:<16} {:>8}  {}",
                    o.query_id,
                    t.display_label(),
                    speedup,
                    elapsed
                );
            }
        }
    }

    eprintln!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    let counts = artifacts.bucket_counts();
    let parts: Vec<String> = counts.iter().map(|(k, v)| format!("{} {}", v, k)).collect();
    eprintln!(
        "Summary: {} wins, {} failed ({})",
        artifacts.wins(),
        artifacts.failed(),
        parts.join(", ")
    );
    if artifacts.cancelled {
        eprintln!("Run was cancelled; unfinished queries are marked cancelled.");
    }
}
