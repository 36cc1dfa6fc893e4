//! Routes one candidate through validation, equivalence, measurement and
//! classification on the worker's own engine session.

use crate::catalog::Catalog;
use crate::classifier::Classifier;
use crate::equivalence::{EquivalenceChecker, Reference, ReferenceError};
use crate::errors::EngineError;
use crate::harness::{Measurement, PerformanceError, PerformanceHarness};
use crate::knowledge::KnowledgeSnapshot;
use crate::model::{Candidate, EquivalenceVerdict, EvaluationRecord, Query, ValidationResult};
use crate::providers::engine::{EngineConnector, EngineSession};
use crate::sql::Validator;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum EvaluationAbort {
    #[error("evaluation cancelled")]
    Cancelled,
}

/// Stateless stages shared by every worker.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    pub checker: EquivalenceChecker,
    pub harness: PerformanceHarness,
    pub classifier: Classifier,
}

enum Attempt {
    Done(ValidationResult, Option<Measurement>, Option<String>),
    Lost(String),
}

pub struct Evaluator {
    connector: Arc<dyn EngineConnector>,
    session: Option<Box<dyn EngineSession>>,
    catalog: Arc<Catalog>,
    pipeline: Arc<Pipeline>,
    reconnects: u32,
}

impl Evaluator {
    pub fn new(
        connector: Arc<dyn EngineConnector>,
        session: Box<dyn EngineSession>,
        catalog: Arc<Catalog>,
        pipeline: Arc<Pipeline>,
    ) -> Self {
        Self {
            connector,
            session: Some(session),
            catalog,
            pipeline,
            reconnects: 0,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn reconnects(&self) -> u32 {
        self.reconnects
    }

    async fn session(&mut self) -> Result<&mut Box<dyn EngineSession>, EngineError> {
        if self.session.is_none() {
            let fresh = self.connector.connect().await?;
            self.reconnects += 1;
            tracing::info!(
                event = "engine_reconnected",
                engine = self.connector.engine_name(),
                reconnects = self.reconnects
            );
            self.session = Some(fresh);
        }
        self.session
            .as_mut()
            .ok_or_else(|| EngineError::Connect("no session".into()))
    }

    fn drop_session(&mut self, why: &str) {
        tracing::warn!(event = "engine_connection_lost", reason = %why);
        self.session = None;
    }

    /// Runs the original once. A lost connection is retried on a fresh
    /// session once.
    pub async fn reference(
        &mut self,
        query: &Query,
        ordered: bool,
        cancel: &CancellationToken,
    ) -> Result<Reference, ReferenceError> {
        let checker = self.pipeline.checker.clone();
        for attempt in 0..2 {
            let session = self.session().await.map_err(ReferenceError::Engine)?;
            match checker
                .reference(session.as_mut(), query, ordered, cancel)
                .await
            {
                Err(ReferenceError::Engine(EngineError::ConnectionLost(msg))) if attempt == 0 => {
                    self.drop_session(&msg);
                }
                other => return other,
            }
        }
        Err(ReferenceError::Engine(EngineError::ConnectionLost(
            "connection lost twice while running the original".into(),
        )))
    }

    async fn attempt(
        &mut self,
        query: &Query,
        reference: &Reference,
        candidate: &Candidate,
        cancel: &CancellationToken,
    ) -> Result<Attempt, EvaluationAbort> {
        let pipeline = self.pipeline.clone();
        let session = match self.session().await {
            Ok(s) => s,
            Err(e) => {
                return Ok(Attempt::Done(
                    ValidationResult::unchecked(&candidate.candidate_id),
                    None,
                    Some(e.to_string()),
                ))
            }
        };

        let verdict = match pipeline
            .checker
            .check_against(session.as_mut(), reference, candidate, &query.params, cancel)
            .await
        {
            Ok(v) => v,
            Err(EngineError::Cancelled) => return Err(EvaluationAbort::Cancelled),
            Err(EngineError::ConnectionLost(msg)) => return Ok(Attempt::Lost(msg)),
            Err(e) => {
                return Ok(Attempt::Done(
                    ValidationResult::unchecked(&candidate.candidate_id),
                    None,
                    Some(e.to_string()),
                ))
            }
        };
        let validation = ValidationResult::checked(&candidate.candidate_id, verdict);

        let Some(admitted) = validation.admit(candidate) else {
            return Ok(Attempt::Done(validation, None, None));
        };
        match pipeline
            .harness
            .measure(session.as_mut(), admitted, query, cancel)
            .await
        {
            Ok(m) => Ok(Attempt::Done(validation, Some(m), None)),
            Err(PerformanceError::Engine(EngineError::Cancelled)) => Err(EvaluationAbort::Cancelled),
            Err(PerformanceError::Engine(EngineError::ConnectionLost(msg))) => Ok(Attempt::Lost(msg)),
            Err(e) => Ok(Attempt::Done(validation, None, Some(e.to_string()))),
        }
    }

    /// Full pipeline for one candidate. Only cancellation escapes as an
    /// error; every other failure becomes part of the record.
    pub async fn evaluate(
        &mut self,
        query: &Query,
        reference: &Reference,
        candidate: &Candidate,
        knowledge: &KnowledgeSnapshot,
        generation: u32,
        cancel: &CancellationToken,
    ) -> Result<EvaluationRecord, EvaluationAbort> {
        let started = Instant::now();
        let gold = knowledge.is_gold(candidate);

        if let Err(e) = Validator::new(&self.catalog, query.dialect).validate(&candidate.sql) {
            tracing::info!(
                event = "candidate_rejected",
                query_id = %query.id,
                candidate_id = %candidate.candidate_id,
                kind = e.kind.as_str(),
                message = %e.message
            );
            let validation = ValidationResult::rejected(&candidate.candidate_id, e);
            let classification =
                self.pipeline
                    .classifier
                    .classify(candidate, &validation, None, gold);
            return Ok(EvaluationRecord {
                candidate: candidate.clone(),
                validation,
                samples: Vec::new(),
                performance: None,
                classification,
                error: None,
                elapsed_ms: started.elapsed().as_millis() as u64,
                generation,
            });
        }

        let mut outcome = self.attempt(query, reference, candidate, cancel).await?;
        if let Attempt::Lost(msg) = outcome {
            self.drop_session(&msg);
            tracing::info!(
                event = "candidate_requeued",
                query_id = %query.id,
                candidate_id = %candidate.candidate_id
            );
            outcome = self.attempt(query, reference, candidate, cancel).await?;
        }
        let (validation, measurement, error) = match outcome {
            Attempt::Done(v, m, e) => (v, m, e),
            Attempt::Lost(msg) => {
                self.drop_session(&msg);
                (
                    ValidationResult::unchecked(&candidate.candidate_id),
                    None,
                    Some(format!("engine connection lost twice: {msg}")),
                )
            }
        };

        let (samples, performance) = match measurement {
            Some(m) => (m.samples, Some(m.summary)),
            None => (Vec::new(), None),
        };
        let classification = self.pipeline.classifier.classify(
            candidate,
            &validation,
            performance.as_ref(),
            gold,
        );
        if let Some(EquivalenceVerdict::Mismatch { diff }) = validation.equivalence() {
            tracing::info!(
                event = "candidate_mismatch",
                query_id = %query.id,
                candidate_id = %candidate.candidate_id,
                diff = %diff.describe()
            );
        }
        tracing::info!(
            event = "candidate_classified",
            query_id = %query.id,
            candidate_id = %candidate.candidate_id,
            bucket = classification.bucket.as_str(),
            speedup = ?classification.speedup_ratio
        );
        Ok(EvaluationRecord {
            candidate: candidate.clone(),
            validation,
            samples,
            performance,
            classification,
            error,
            elapsed_ms: started.elapsed().as_millis() as u64,
            generation,
        })
    }
}
