use super::RunArtifacts;
use std::path::Path;

pub const REPORT_SCHEMA_VERSION: u32 = 1;

pub fn render_json(artifacts: &RunArtifacts) -> anyhow::Result<String> {
    let v = serde_json::json!({
        "schema_version": REPORT_SCHEMA_VERSION,
        "qrewrite_version": env!("CARGO_PKG_VERSION"),
        "run": {
            "name": artifacts.name,
            "id": artifacts.run_id,
            "fingerprint": artifacts.fingerprint,
            "started_at": artifacts.started_at,
            "finished_at": artifacts.finished_at,
            "generations": artifacts.generations,
            "cancelled": artifacts.cancelled,
        },
        "summary": {
            "queries": artifacts.outcomes.len(),
            "wins": artifacts.wins(),
            "failed": artifacts.failed(),
            "buckets": artifacts.bucket_counts(),
        },
        "outcomes": artifacts.outcomes,
    });
    Ok(serde_json::to_string_pretty(&v)?)
}

pub fn write_json(artifacts: &RunArtifacts, out: &Path) -> anyhow::Result<()> {
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(out, render_json(artifacts)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::QueryOutcome;

    #[test]
    fn report_carries_run_metadata_and_outcomes() {
        let a = RunArtifacts {
            name: "nightly".into(),
            run_id: Some(7),
            fingerprint: "abc".into(),
            started_at: "2026-01-01T00:00:00Z".into(),
            finished_at: "2026-01-01T00:01:00Z".into(),
            generations: 2,
            cancelled: false,
            outcomes: vec![QueryOutcome::failed("q3", "empty", 0)],
        };
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out/report.json");
        write_json(&a, &path).unwrap();

        let v: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(v["schema_version"], 1);
        assert_eq!(v["run"]["id"], 7);
        assert_eq!(v["summary"]["failed"], 1);
        assert_eq!(v["summary"]["buckets"]["ERROR"], 1);
        assert_eq!(v["outcomes"][0]["query_id"], "q3");
        assert_eq!(v["outcomes"][0]["status"], "failed");
    }
}
