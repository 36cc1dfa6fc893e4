use super::RunArtifacts;
use crate::model::{Classification, EvaluationRecord, QueryOutcome, RiskLevel};
use std::path::Path;

pub const HEADER: &[&str] = &[
    "Query_Num",
    "Candidate_Id",
    "Status",
    "Syntax_Valid",
    "Equivalence",
    "Speedup",
    "Baseline_Ms",
    "Candidate_Ms",
    "Elapsed",
    "Error",
    "Error_Kind",
    "Classification",
    "Display_Classification",
    "Risk",
    "Transform_Recommended",
    "Transforms",
];

/// Status of a per-candidate row; terminal rows carry the query status.
pub const CANDIDATE_STATUS: &str = "candidate";

fn recommended(outcome: &QueryOutcome, c: &Classification) -> bool {
    c.bucket.is_win()
        && c.risk_level != RiskLevel::High
        && !c.candidate_id.is_empty()
        && c.candidate_id == outcome.terminal.candidate_id
}

fn fmt_f(v: Option<f64>) -> String {
    v.map(|x| format!("{:.4}", x)).unwrap_or_default()
}

fn candidate_row(outcome: &QueryOutcome, r: &EvaluationRecord) -> Vec<String> {
    let c = &r.classification;
    vec![
        r.candidate.query_id.clone(),
        r.candidate.candidate_id.clone(),
        CANDIDATE_STATUS.to_string(),
        r.validation.syntax_valid().to_string(),
        r.validation
            .equivalence()
            .map(|v| v.label().to_string())
            .unwrap_or_default(),
        fmt_f(c.speedup_ratio),
        fmt_f(r.performance.as_ref().map(|p| p.baseline.central_ms)),
        fmt_f(r.performance.as_ref().map(|p| p.candidate.central_ms)),
        r.elapsed_ms.to_string(),
        r.error_message().unwrap_or_default(),
        r.error_kind().unwrap_or_default(),
        c.bucket.as_str().to_string(),
        c.display_label().to_string(),
        c.risk_level.as_str().to_string(),
        recommended(outcome, c).to_string(),
        c.transforms.join(">"),
    ]
}

fn terminal_row(o: &QueryOutcome) -> Vec<String> {
    let t = &o.terminal;
    let best = o.best();
    vec![
        o.query_id.clone(),
        t.candidate_id.clone(),
        o.status.as_str().to_string(),
        best.map(|r| r.validation.syntax_valid().to_string())
            .unwrap_or_default(),
        best.and_then(|r| r.validation.equivalence())
            .map(|v| v.label().to_string())
            .unwrap_or_default(),
        fmt_f(t.speedup_ratio),
        fmt_f(best.and_then(|r| r.performance.as_ref()).map(|p| p.baseline.central_ms)),
        fmt_f(best.and_then(|r| r.performance.as_ref()).map(|p| p.candidate.central_ms)),
        o.elapsed_ms.to_string(),
        o.message
            .clone()
            .or_else(|| best.and_then(|r| r.error_message()))
            .unwrap_or_default(),
        best.and_then(|r| r.error_kind()).unwrap_or_default(),
        t.bucket.as_str().to_string(),
        t.display_label().to_string(),
        t.risk_level.as_str().to_string(),
        recommended(o, t).to_string(),
        t.transforms.join(">"),
    ]
}

pub fn render_csv(artifacts: &RunArtifacts) -> String {
    let mut out = String::new();
    out.push_str(&HEADER.join(","));
    out.push('\n');
    for o in &artifacts.outcomes {
        for r in &o.evaluations {
            push_row(&mut out, &candidate_row(o, r));
        }
        push_row(&mut out, &terminal_row(o));
    }
    out
}

pub fn write_csv(artifacts: &RunArtifacts, out: &Path) -> anyhow::Result<()> {
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(out, render_csv(artifacts))?;
    Ok(())
}

fn push_row(out: &mut String, cells: &[String]) {
    let escaped: Vec<String> = cells.iter().map(|c| escape(c)).collect();
    out.push_str(&escaped.join(","));
    out.push('\n');
}

fn escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Bucket, Candidate, EquivalenceVerdict, QueryStatus, ValidationResult,
    };

    fn artifacts() -> RunArtifacts {
        let cand = Candidate::new("q1", "select 1, 2", "scripted", vec!["a".into(), "b".into()]);
        let classification = Classification {
            query_id: "q1".into(),
            candidate_id: cand.candidate_id.clone(),
            bucket: Bucket::MajorWin,
            speedup_ratio: Some(5.0),
            risk_level: RiskLevel::Low,
            gold: false,
            transforms: cand.transforms.clone(),
        };
        let rec = EvaluationRecord {
            validation: ValidationResult::checked(&cand.candidate_id, EquivalenceVerdict::Equal),
            candidate: cand,
            samples: vec![],
            performance: None,
            classification: classification.clone(),
            error: None,
            elapsed_ms: 12,
            generation: 0,
        };
        let ok = QueryOutcome {
            query_id: "q1".into(),
            status: QueryStatus::Completed,
            terminal: classification,
            evaluations: vec![rec],
            termination: None,
            message: None,
            elapsed_ms: 40,
            iterations: 3,
        };
        let broken = QueryOutcome::failed("q2", "failed to read q2.sql: denied, really", 0);
        RunArtifacts {
            name: "t".into(),
            run_id: None,
            fingerprint: "f".into(),
            started_at: String::new(),
            finished_at: String::new(),
            generations: 1,
            cancelled: false,
            outcomes: vec![ok, broken],
        }
    }

    #[test]
    fn one_row_per_candidate_plus_terminal() {
        let text = render_csv(&artifacts());
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0].split(',').count(), HEADER.len());
        assert!(lines[1].contains(",candidate,true,equal,5.0000,"));
        assert!(lines[1].ends_with(",MAJOR_WIN,MAJOR_WIN,low,true,a>b"));
        assert!(lines[2].starts_with("q1,c_"));
        assert!(lines[2].contains(",completed,"));
        assert!(lines[3].starts_with("q2,,failed,"));
        assert!(lines[3].contains("\"failed to read q2.sql: denied, really\""));
        assert!(lines[3].contains(",ERROR,ERROR,high,false,"));
    }

    #[test]
    fn escaping() {
        assert_eq!(escape("plain"), "plain");
        assert_eq!(escape("a,b"), "\"a,b\"");
        assert_eq!(escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
