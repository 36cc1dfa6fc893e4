use crate::errors::ConfigError;
use crate::harness::PerformanceSummary;
use crate::model::{Bucket, Candidate, Classification, EquivalenceVerdict, RiskLevel, ValidationResult};
use serde::{Deserialize, Serialize};

/// Lower bounds (inclusive) of each speedup bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub major_win: f64,
    pub significant_win: f64,
    pub moderate_win: f64,
    pub neutral: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            major_win: 2.0,
            significant_win: 1.5,
            moderate_win: 1.2,
            neutral: 1.0,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ordered = self.major_win > self.significant_win
            && self.significant_win > self.moderate_win
            && self.moderate_win > self.neutral
            && self.neutral > 0.0;
        if !ordered {
            return Err(ConfigError(format!(
                "classification thresholds must be strictly descending and positive (got {}/{}/{}/{})",
                self.major_win, self.significant_win, self.moderate_win, self.neutral
            )));
        }
        Ok(())
    }

    pub fn bucket(&self, speedup: f64) -> Bucket {
        if !speedup.is_finite() || speedup <= 0.0 {
            Bucket::Error
        } else if speedup >= self.major_win {
            Bucket::MajorWin
        } else if speedup >= self.significant_win {
            Bucket::SignificantWin
        } else if speedup >= self.moderate_win {
            Bucket::ModerateWin
        } else if speedup >= self.neutral {
            Bucket::Neutral
        } else {
            Bucket::Regression
        }
    }

    pub fn classify(&self, validation: &ValidationResult, speedup: Option<f64>) -> Bucket {
        if !validation.syntax_valid() {
            return Bucket::Error;
        }
        match validation.equivalence() {
            Some(EquivalenceVerdict::Equal) => match speedup {
                Some(s) => self.bucket(s),
                None => Bucket::Error,
            },
            Some(_) => Bucket::FailsValidation,
            None => Bucket::Error,
        }
    }
}

/// Bucket under the default thresholds.
pub fn classify(validation: &ValidationResult, speedup: Option<f64>) -> Bucket {
    Thresholds::default().classify(validation, speedup)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskPolicy {
    /// IQR/median above which a measured win is only medium confidence.
    pub max_dispersion: f64,
    /// Transformation chains longer than this are medium risk.
    pub max_chain: usize,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            max_dispersion: 0.25,
            max_chain: 3,
        }
    }
}

impl RiskPolicy {
    pub fn assess(
        &self,
        bucket: Bucket,
        performance: Option<&PerformanceSummary>,
        chain_len: usize,
    ) -> RiskLevel {
        if matches!(
            bucket,
            Bucket::Error | Bucket::FailsValidation | Bucket::Regression
        ) {
            return RiskLevel::High;
        }
        let noisy = performance
            .map(|p| p.dispersion() > self.max_dispersion)
            .unwrap_or(false);
        if noisy || chain_len > self.max_chain {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub thresholds: Thresholds,
    pub risk: RiskPolicy,
}

#[derive(Debug, Clone, Default)]
pub struct Classifier {
    cfg: ClassifierConfig,
}

impl Classifier {
    pub fn new(cfg: ClassifierConfig) -> Self {
        Self { cfg }
    }

    /// `gold` is decided by the knowledge store and only affects the display
    /// label.
    pub fn classify(
        &self,
        candidate: &Candidate,
        validation: &ValidationResult,
        performance: Option<&PerformanceSummary>,
        gold: bool,
    ) -> Classification {
        let speedup = performance.map(|p| p.speedup);
        let bucket = self.cfg.thresholds.classify(validation, speedup);
        let risk_level = self
            .cfg
            .risk
            .assess(bucket, performance, candidate.transforms.len());
        Classification {
            query_id: candidate.query_id.clone(),
            candidate_id: candidate.candidate_id.clone(),
            bucket,
            speedup_ratio: if bucket.is_valid() { speedup } else { None },
            risk_level,
            gold,
            transforms: candidate.transforms.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{SyntaxError, SyntaxErrorKind};
    use crate::harness::{Aggregation, LatencySummary};
    use crate::model::{DiffSummary, Side};
    use proptest::prelude::*;

    fn equal() -> ValidationResult {
        ValidationResult::checked("c", EquivalenceVerdict::Equal)
    }

    fn latency(median: f64, iqr: f64) -> LatencySummary {
        LatencySummary {
            n: 5,
            central_ms: median,
            median_ms: median,
            iqr_ms: iqr,
            dispersion: iqr / median,
            min_ms: median,
            max_ms: median,
            rejected: 0,
        }
    }

    fn perf(speedup: f64, candidate_iqr: f64) -> PerformanceSummary {
        PerformanceSummary {
            aggregation: Aggregation::Median,
            baseline: latency(100.0 * speedup, 0.0),
            candidate: latency(100.0, candidate_iqr),
            speedup,
        }
    }

    #[test]
    fn exact_boundaries() {
        let v = equal();
        assert_eq!(classify(&v, Some(2.0)), Bucket::MajorWin);
        assert_eq!(classify(&v, Some(1.999_999)), Bucket::SignificantWin);
        assert_eq!(classify(&v, Some(1.5)), Bucket::SignificantWin);
        assert_eq!(classify(&v, Some(1.2)), Bucket::ModerateWin);
        assert_eq!(classify(&v, Some(1.0)), Bucket::Neutral);
        assert_eq!(classify(&v, Some(0.999)), Bucket::Regression);
        assert_eq!(classify(&v, Some(5.0)), Bucket::MajorWin);
    }

    #[test]
    fn failures_and_missing_speedup() {
        let syntax = ValidationResult::rejected(
            "c",
            SyntaxError::new(SyntaxErrorKind::ParseError, "bad"),
        );
        assert_eq!(classify(&syntax, Some(9.0)), Bucket::Error);

        let mismatch = ValidationResult::checked(
            "c",
            EquivalenceVerdict::Mismatch {
                diff: DiffSummary::RowCount {
                    expected: 1,
                    actual: 2,
                },
            },
        );
        assert_eq!(classify(&mismatch, Some(9.0)), Bucket::FailsValidation);

        let timeout = ValidationResult::checked(
            "c",
            EquivalenceVerdict::Timeout {
                side: Side::Candidate,
                after_ms: 10,
            },
        );
        assert_eq!(classify(&timeout, None), Bucket::FailsValidation);

        assert_eq!(classify(&equal(), None), Bucket::Error);
        assert_eq!(classify(&equal(), Some(f64::NAN)), Bucket::Error);
        assert_eq!(classify(&equal(), Some(f64::INFINITY)), Bucket::Error);
    }

    #[test]
    fn risk_levels() {
        let c = Classifier::default();
        let mut cand = Candidate::new("q1", "select 1", "scripted", vec!["a".into()]);
        let v = ValidationResult::checked(&cand.candidate_id, EquivalenceVerdict::Equal);

        let out = c.classify(&cand, &v, Some(&perf(3.0, 1.0)), false);
        assert_eq!(out.bucket, Bucket::MajorWin);
        assert_eq!(out.risk_level, RiskLevel::Low);

        let noisy = c.classify(&cand, &v, Some(&perf(3.0, 60.0)), false);
        assert_eq!(noisy.risk_level, RiskLevel::Medium);

        let slow = c.classify(&cand, &v, Some(&perf(0.5, 1.0)), false);
        assert_eq!(slow.risk_level, RiskLevel::High);

        cand.transforms = vec!["a".into(), "b".into(), "c".into(), "d".into()];
        let long = c.classify(&cand, &v, Some(&perf(3.0, 1.0)), false);
        assert_eq!(long.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn gold_changes_only_the_label() {
        let cand = Candidate::new("q1", "select 1", "gold", vec![]);
        let v = ValidationResult::checked(&cand.candidate_id, EquivalenceVerdict::Equal);
        let out = Classifier::default().classify(&cand, &v, Some(&perf(1.1, 0.0)), true);
        assert_eq!(out.bucket, Bucket::Neutral);
        assert_eq!(out.display_label(), "GOLD_EXAMPLE");
    }

    #[test]
    fn thresholds_must_descend() {
        assert!(Thresholds::default().validate().is_ok());
        let bad = Thresholds {
            moderate_win: 1.6,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    proptest! {
        #[test]
        fn bucket_is_monotonic_in_speedup(a in 0.01f64..10.0, b in 0.01f64..10.0) {
            let v = equal();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(classify(&v, Some(lo)) <= classify(&v, Some(hi)));
        }

        #[test]
        fn classification_is_deterministic(s in 0.01f64..10.0) {
            let v = equal();
            prop_assert_eq!(classify(&v, Some(s)), classify(&v, Some(s)));
            prop_assert!(classify(&v, Some(s)).is_valid());
        }
    }
}
