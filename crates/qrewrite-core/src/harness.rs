//! Performance harness: interleaved, repeated timing of an admitted
//! candidate against its original query.

use crate::errors::EngineError;
use crate::model::{Admitted, Bindings, PerformanceSample, Query, Side};
use crate::providers::engine::{execute_bounded, EngineSession};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Smallest latency a sample may carry, so ratios stay finite.
const MIN_LATENCY_MS: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    #[default]
    Median,
    TrimmedMean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub runs: u32,
    pub warmup: u32,
    pub aggregation: Aggregation,
    /// Tukey fence factor for IQR outlier rejection.
    pub iqr_factor: f64,
    /// Fraction trimmed from each end after outlier rejection.
    pub trim_fraction: f64,
    pub timeout_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            runs: 5,
            warmup: 1,
            aggregation: Aggregation::Median,
            iqr_factor: 1.5,
            trim_fraction: 0.1,
            timeout_ms: 60_000,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub n: usize,
    pub central_ms: f64,
    pub median_ms: f64,
    pub iqr_ms: f64,
    /// IQR relative to the median.
    pub dispersion: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    /// Samples dropped by the IQR fence (trimmed mean only).
    #[serde(default)]
    pub rejected: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub aggregation: Aggregation,
    pub baseline: LatencySummary,
    pub candidate: LatencySummary,
    pub speedup: f64,
}

impl PerformanceSummary {
    /// Larger of the two sides' dispersion.
    pub fn dispersion(&self) -> f64 {
        self.baseline.dispersion.max(self.candidate.dispersion)
    }
}

#[derive(Debug, Clone)]
pub struct Measurement {
    pub samples: Vec<PerformanceSample>,
    pub summary: PerformanceSummary,
}

#[derive(Debug, Error)]
pub enum PerformanceError {
    #[error("{side} execution failed after {attempts} attempts: {source}")]
    Exhausted {
        side: Side,
        attempts: u32,
        #[source]
        source: EngineError,
    },
    #[error("no measured runs configured")]
    NoRuns,
    /// Connection loss or cancellation; not retried here.
    #[error(transparent)]
    Engine(EngineError),
}

pub fn duration_ms(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000_000.0
}

/// Linear-interpolated quantile over sorted input.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

fn mean(vs: &[f64]) -> f64 {
    if vs.is_empty() {
        return 0.0;
    }
    vs.iter().sum::<f64>() / vs.len() as f64
}

pub fn summarize(latencies: &[f64], cfg: &HarnessConfig) -> LatencySummary {
    let mut vs: Vec<f64> = latencies.iter().map(|v| v.max(MIN_LATENCY_MS)).collect();
    vs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let median = quantile(&vs, 0.5);
    let q1 = quantile(&vs, 0.25);
    let q3 = quantile(&vs, 0.75);
    let iqr = q3 - q1;

    let (central, rejected) = match cfg.aggregation {
        Aggregation::Median => (median, 0),
        Aggregation::TrimmedMean => {
            let lo = q1 - cfg.iqr_factor * iqr;
            let hi = q3 + cfg.iqr_factor * iqr;
            let kept: Vec<f64> = vs.iter().copied().filter(|v| *v >= lo && *v <= hi).collect();
            let rejected = vs.len() - kept.len();
            let cut = (kept.len() as f64 * cfg.trim_fraction.clamp(0.0, 0.49)).floor() as usize;
            let trimmed = &kept[cut..kept.len() - cut];
            let central = if trimmed.is_empty() { median } else { mean(trimmed) };
            (central, rejected)
        }
    };

    LatencySummary {
        n: vs.len(),
        central_ms: central,
        median_ms: median,
        iqr_ms: iqr,
        dispersion: if median > 0.0 { iqr / median } else { 0.0 },
        min_ms: vs.first().copied().unwrap_or(0.0),
        max_ms: vs.last().copied().unwrap_or(0.0),
        rejected,
    }
}

#[derive(Debug, Clone, Default)]
pub struct PerformanceHarness {
    cfg: HarnessConfig,
}

impl PerformanceHarness {
    pub fn new(cfg: HarnessConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.cfg
    }

    /// Times `admitted` against `original` on one session. Warm-up runs are
    /// recorded cold and left out of the summary; measured runs alternate
    /// which side goes first.
    pub async fn measure(
        &self,
        session: &mut dyn EngineSession,
        admitted: Admitted<'_>,
        original: &Query,
        cancel: &CancellationToken,
    ) -> Result<Measurement, PerformanceError> {
        if self.cfg.runs == 0 {
            return Err(PerformanceError::NoRuns);
        }
        let candidate = admitted.candidate();
        let mut samples = Vec::new();
        let mut baseline_ms = Vec::with_capacity(self.cfg.runs as usize);
        let mut candidate_ms = Vec::with_capacity(self.cfg.runs as usize);

        let total = self.cfg.warmup + self.cfg.runs;
        for run_index in 0..total {
            let warm = run_index >= self.cfg.warmup;
            let order = if run_index % 2 == 0 {
                [Side::Original, Side::Candidate]
            } else {
                [Side::Candidate, Side::Original]
            };
            for side in order {
                let sql = match side {
                    Side::Original => original.sql.as_str(),
                    Side::Candidate => candidate.sql.as_str(),
                };
                let latency_ms = self
                    .timed(session, sql, &original.params, side, cancel)
                    .await?;
                if warm {
                    match side {
                        Side::Original => baseline_ms.push(latency_ms),
                        Side::Candidate => candidate_ms.push(latency_ms),
                    }
                }
                samples.push(PerformanceSample {
                    candidate_id: candidate.candidate_id.clone(),
                    side,
                    run_index,
                    latency_ms,
                    warm,
                });
            }
        }

        let baseline = summarize(&baseline_ms, &self.cfg);
        let cand = summarize(&candidate_ms, &self.cfg);
        let speedup = baseline.central_ms / cand.central_ms.max(MIN_LATENCY_MS);
        tracing::debug!(
            event = "measured",
            candidate_id = %candidate.candidate_id,
            baseline_ms = baseline.central_ms,
            candidate_ms = cand.central_ms,
            speedup
        );
        Ok(Measurement {
            samples,
            summary: PerformanceSummary {
                aggregation: self.cfg.aggregation,
                baseline,
                candidate: cand,
                speedup,
            },
        })
    }

    async fn timed(
        &self,
        session: &mut dyn EngineSession,
        sql: &str,
        bindings: &Bindings,
        side: Side,
        cancel: &CancellationToken,
    ) -> Result<f64, PerformanceError> {
        let budget = Duration::from_millis(self.cfg.timeout_ms.max(1));
        let policy = &self.cfg.retry;
        let mut attempt = 1;
        loop {
            let started = Instant::now();
            match execute_bounded(session, sql, bindings, budget, cancel).await {
                Ok(out) => {
                    let elapsed = out.engine_time.unwrap_or_else(|| started.elapsed());
                    return Ok(duration_ms(elapsed).max(MIN_LATENCY_MS));
                }
                Err(e) if e.is_retryable() && attempt < policy.max_attempts() => {
                    tracing::warn!(
                        event = "measure_retry",
                        side = %side,
                        attempt,
                        error = %e
                    );
                    if !policy.wait(attempt, cancel).await {
                        return Err(PerformanceError::Engine(EngineError::Cancelled));
                    }
                    attempt += 1;
                }
                Err(e) if e.is_retryable() => {
                    return Err(PerformanceError::Exhausted {
                        side,
                        attempts: attempt,
                        source: e,
                    })
                }
                Err(e) => return Err(PerformanceError::Engine(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Candidate, EquivalenceVerdict, ValidationResult};
    use crate::providers::engine::replay::{ReplayConnector, ReplayFixture};
    use crate::providers::engine::EngineConnector;

    fn fixture(yaml: &str) -> ReplayConnector {
        let f: ReplayFixture = serde_yaml::from_str(yaml).unwrap();
        ReplayConnector::new(f)
    }

    fn query(sql: &str) -> Query {
        Query {
            id: "q1".into(),
            sql: sql.into(),
            params: Bindings::new(),
            dialect: Default::default(),
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
            multiplier: 1.0,
        }
    }

    #[test]
    fn median_of_odd_and_even() {
        let cfg = HarnessConfig::default();
        assert_eq!(summarize(&[3.0, 1.0, 2.0], &cfg).central_ms, 2.0);
        assert_eq!(summarize(&[4.0, 1.0, 2.0, 3.0], &cfg).central_ms, 2.5);
    }

    #[test]
    fn trimmed_mean_rejects_outliers() {
        let cfg = HarnessConfig {
            aggregation: Aggregation::TrimmedMean,
            trim_fraction: 0.0,
            ..Default::default()
        };
        let s = summarize(&[10.0, 11.0, 9.0, 10.0, 500.0], &cfg);
        assert_eq!(s.rejected, 1);
        assert!((s.central_ms - 10.0).abs() < 1e-9);
        assert_eq!(s.max_ms, 500.0);
    }

    #[test]
    fn zero_latency_is_floored() {
        let s = summarize(&[0.0, 0.0, 0.0], &HarnessConfig::default());
        assert!(s.central_ms > 0.0);
        assert_eq!(s.dispersion, 0.0);
    }

    #[tokio::test]
    async fn baseline_580_candidate_116_gives_speedup_5() {
        let conn = fixture(
            r#"
queries:
  - sql: select 1 as slow
    columns: [slow]
    rows: [[1]]
    latencies_ms: [900, 580, 575, 585, 590, 570]
  - sql: select 1 as fast
    columns: [slow]
    rows: [[1]]
    latencies_ms: [300, 116, 115, 117, 118, 114]
"#,
        );
        let mut session = conn.connect().await.unwrap();
        let original = query("select 1 as slow");
        let cand = Candidate::new("q1", "select 1 as fast", "scripted", vec!["x".into()]);
        let validation = ValidationResult::checked(&cand.candidate_id, EquivalenceVerdict::Equal);
        let admitted = validation.admit(&cand).unwrap();

        let m = PerformanceHarness::default()
            .measure(session.as_mut(), admitted, &original, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(m.summary.baseline.central_ms, 580.0);
        assert_eq!(m.summary.candidate.central_ms, 116.0);
        assert!((m.summary.speedup - 5.0).abs() < 1e-9);
        assert_eq!(m.samples.len(), 12);
        assert_eq!(m.samples.iter().filter(|s| !s.warm).count(), 2);
        assert!(m.samples.iter().all(|s| s.candidate_id == cand.candidate_id));
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let conn = fixture(
            r#"
queries:
  - sql: select 1
    latency_ms: 10
  - sql: select 2
    latency_ms: 5
    fail_times: 2
"#,
        );
        let mut session = conn.connect().await.unwrap();
        let cand = Candidate::new("q1", "select 2", "scripted", vec![]);
        let validation = ValidationResult::checked(&cand.candidate_id, EquivalenceVerdict::Equal);
        let harness = PerformanceHarness::new(HarnessConfig {
            runs: 3,
            warmup: 0,
            retry: fast_retry(),
            ..Default::default()
        });
        let m = harness
            .measure(
                session.as_mut(),
                validation.admit(&cand).unwrap(),
                &query("select 1"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!((m.summary.speedup - 2.0).abs() < 1e-9);
        assert_eq!(conn.executions("select 2"), 5);
    }

    #[tokio::test]
    async fn persistent_failure_is_exhausted() {
        let conn = fixture(
            r#"
queries:
  - sql: select 1
    latency_ms: 10
  - sql: select 2
    error: boom
"#,
        );
        let mut session = conn.connect().await.unwrap();
        let cand = Candidate::new("q1", "select 2", "scripted", vec![]);
        let validation = ValidationResult::checked(&cand.candidate_id, EquivalenceVerdict::Equal);
        let harness = PerformanceHarness::new(HarnessConfig {
            warmup: 0,
            retry: fast_retry(),
            ..Default::default()
        });
        let err = harness
            .measure(
                session.as_mut(),
                validation.admit(&cand).unwrap(),
                &query("select 1"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        match err {
            PerformanceError::Exhausted { side, attempts, .. } => {
                assert_eq!(side, Side::Candidate);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
