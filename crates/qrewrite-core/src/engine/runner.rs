use crate::catalog::Catalog;
use crate::config::Settings;
use crate::corpus::CorpusItem;
use crate::knowledge::{KnowledgeSnapshot, KnowledgeStore};
use crate::model::{Classification, EvaluationRecord, Query, QueryOutcome, QueryStatus};
use crate::providers::engine::EngineConnector;
use crate::providers::generator::CandidateGenerator;
use crate::report::RunArtifacts;
use crate::search::{
    terminal_classification, Evaluator, Pipeline, SearchConfig, SearchController, SearchError,
    TerminationReason,
};
use crate::storage::Store;
use anyhow::Context;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Identity of a run as recorded in the store and the reports.
#[derive(Debug, Clone, Default)]
pub struct RunMeta {
    pub name: String,
    pub fingerprint: String,
    pub config_json: Option<String>,
}

pub struct Runner {
    pub store: Option<Store>,
    pub connector: Arc<dyn EngineConnector>,
    pub generator: Arc<dyn CandidateGenerator>,
    pub catalog: Arc<Catalog>,
    pub pipeline: Arc<Pipeline>,
    pub search: SearchConfig,
    pub settings: Settings,
    pub cancel: CancellationToken,
}

/// Everything one worker task needs, cloned out of the runner.
#[derive(Clone)]
struct WorkerCtx {
    connector: Arc<dyn EngineConnector>,
    generator: Arc<dyn CandidateGenerator>,
    catalog: Arc<Catalog>,
    pipeline: Arc<Pipeline>,
    search: Arc<SearchConfig>,
    cancel: CancellationToken,
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn cancelled_outcome(query_id: &str, elapsed_ms: u64) -> QueryOutcome {
    let mut o = QueryOutcome::failed(query_id, "cancelled before completion", elapsed_ms);
    o.status = QueryStatus::Cancelled;
    o.termination = Some(TerminationReason::Cancelled);
    o
}

impl WorkerCtx {
    async fn run_query(
        &self,
        query: Arc<Query>,
        knowledge: Arc<KnowledgeSnapshot>,
        generation: u32,
        prior: Vec<EvaluationRecord>,
    ) -> QueryOutcome {
        let started = Instant::now();
        if self.cancel.is_cancelled() {
            return cancelled_outcome(&query.id, 0);
        }

        let session = match self.connector.connect().await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(event = "worker_connect_failed", query_id = %query.id, error = %e);
                return QueryOutcome::failed(&query.id, e.to_string(), elapsed_ms(started));
            }
        };
        let mut evaluator = Evaluator::new(
            self.connector.clone(),
            session,
            self.catalog.clone(),
            self.pipeline.clone(),
        );

        let controller =
            SearchController::new(&self.search, self.generator.as_ref(), &knowledge, generation)
                .with_prior(&prior);
        match controller.run(&query, &mut evaluator, &self.cancel).await {
            Ok(outcome) => {
                let status = if outcome.termination == TerminationReason::Cancelled {
                    QueryStatus::Cancelled
                } else {
                    QueryStatus::Completed
                };
                QueryOutcome {
                    query_id: query.id.clone(),
                    status,
                    terminal: outcome.terminal(),
                    termination: Some(outcome.termination),
                    message: None,
                    elapsed_ms: elapsed_ms(started),
                    iterations: outcome.iterations,
                    evaluations: outcome.records,
                }
            }
            Err(SearchError::Cancelled) => cancelled_outcome(&query.id, elapsed_ms(started)),
            Err(e) => {
                tracing::warn!(event = "query_failed", query_id = %query.id, error = %e);
                QueryOutcome::failed(&query.id, e.to_string(), elapsed_ms(started))
            }
        }
    }
}

/// Evaluations of `next` whose candidate is not already in `prev`.
fn fresh<'a>(prev: Option<&QueryOutcome>, next: &'a QueryOutcome) -> Vec<&'a EvaluationRecord> {
    let known: HashSet<&str> = prev
        .map(|p| {
            p.evaluations
                .iter()
                .map(|r| r.candidate.candidate_id.as_str())
                .collect()
        })
        .unwrap_or_default();
    next.evaluations
        .iter()
        .filter(|r| !known.contains(r.candidate.candidate_id.as_str()))
        .collect()
}

/// Folds a later generation's outcome into the running one for the same
/// query, keeping one evaluation per candidate. The terminal is re-chosen
/// over every evaluation seen so far.
fn combine(prev: QueryOutcome, next: QueryOutcome) -> QueryOutcome {
    let mut evaluations = prev.evaluations;
    let mut known: HashSet<String> = evaluations
        .iter()
        .map(|r| r.candidate.candidate_id.clone())
        .collect();
    for r in next.evaluations {
        if known.insert(r.candidate.candidate_id.clone()) {
            evaluations.push(r);
        }
    }
    let terminal = if evaluations.is_empty() {
        next.terminal.clone()
    } else {
        terminal_classification(&next.query_id, &evaluations)
    };
    let status = match (prev.status, next.status) {
        (_, QueryStatus::Cancelled) => QueryStatus::Cancelled,
        (QueryStatus::Completed, _) | (_, QueryStatus::Completed) => QueryStatus::Completed,
        (s, _) => s,
    };
    QueryOutcome {
        query_id: next.query_id,
        status,
        terminal,
        evaluations,
        termination: next.termination.or(prev.termination),
        message: next.message.or(prev.message),
        elapsed_ms: prev.elapsed_ms + next.elapsed_ms,
        iterations: prev.iterations + next.iterations,
    }
}

impl Runner {
    fn worker_ctx(&self) -> WorkerCtx {
        WorkerCtx {
            connector: self.connector.clone(),
            generator: self.generator.clone(),
            catalog: self.catalog.clone(),
            pipeline: self.pipeline.clone(),
            search: Arc::new(self.search.clone()),
            cancel: self.cancel.clone(),
        }
    }

    /// Runs every corpus query through the search for the configured number
    /// of generations. Knowledge learned in one generation is merged into
    /// `knowledge` before the next one starts; workers only ever see a
    /// snapshot.
    pub async fn run_benchmark(
        &self,
        meta: &RunMeta,
        corpus: &[CorpusItem],
        knowledge: &mut KnowledgeStore,
    ) -> anyhow::Result<RunArtifacts> {
        let started_at = chrono::Utc::now().to_rfc3339();

        // The first connection doubles as a connectivity preflight.
        let probe = self
            .connector
            .connect()
            .await
            .with_context(|| {
                format!(
                    "failed to establish the first {} engine connection",
                    self.connector.engine_name()
                )
            })?;
        drop(probe);

        let run_id = match &self.store {
            Some(store) => Some(store.create_run(
                &meta.name,
                &meta.fingerprint,
                meta.config_json.as_deref(),
            )?),
            None => None,
        };

        let workers = self.settings.workers.max(1);
        let generations = self.settings.generations.max(1);
        tracing::info!(
            event = "run_start",
            run_id = ?run_id,
            name = %meta.name,
            queries = corpus.len(),
            workers,
            generations,
            engine = self.connector.engine_name(),
            generator = self.generator.method()
        );

        let mut outcomes: Vec<Option<QueryOutcome>> = corpus
            .iter()
            .map(|item| match item {
                CorpusItem::Ready(_) => None,
                CorpusItem::Broken { id, error } => {
                    tracing::warn!(event = "corpus_entry_broken", query_id = %id, error = %error);
                    Some(QueryOutcome::failed(id, error.to_string(), 0))
                }
            })
            .collect();
        let queries: Vec<Option<Arc<Query>>> = corpus
            .iter()
            .map(|item| match item {
                CorpusItem::Ready(q) => Some(Arc::new(q.clone())),
                CorpusItem::Broken { .. } => None,
            })
            .collect();

        let mut generations_run = 0;
        for generation in 0..generations {
            if self.cancel.is_cancelled() {
                break;
            }
            generations_run += 1;
            let snapshot = knowledge.snapshot();
            let sem = Arc::new(Semaphore::new(workers));
            let mut handles = Vec::new();

            for (idx, q) in queries.iter().enumerate() {
                let Some(q) = q else { continue };
                // A query whose original failed will fail the same way again.
                if generation > 0
                    && outcomes[idx]
                        .as_ref()
                        .is_some_and(|o| o.status != QueryStatus::Completed)
                {
                    continue;
                }
                let prior = outcomes[idx]
                    .as_ref()
                    .map(|o| o.evaluations.clone())
                    .unwrap_or_default();
                let permit = sem.clone().acquire_owned().await?;
                let ctx = self.worker_ctx();
                let query = q.clone();
                let snapshot = snapshot.clone();
                let h = tokio::spawn(async move {
                    let _permit = permit;
                    ctx.run_query(query, snapshot, generation, prior).await
                });
                handles.push((idx, h));
            }

            let mut batch: Vec<Classification> = Vec::new();
            for (idx, h) in handles {
                let query_id = corpus[idx].id().to_string();
                let outcome = match h.await {
                    Ok(o) => o,
                    Err(e) => {
                        tracing::error!(event = "worker_join_error", query_id = %query_id, error = %e);
                        QueryOutcome::failed(&query_id, format!("join error: {}", e), 0)
                    }
                };
                let new_records = fresh(outcomes[idx].as_ref(), &outcome);
                if let (Some(store), Some(run_id)) = (&self.store, run_id) {
                    for rec in &new_records {
                        store.insert_evaluation(run_id, rec)?;
                    }
                }
                batch.extend(new_records.iter().map(|r| r.classification.clone()));
                outcomes[idx] = Some(match outcomes[idx].take() {
                    Some(prev) => combine(prev, outcome),
                    None => outcome,
                });
            }

            let report = knowledge.merge(&batch);
            tracing::info!(
                event = "generation_done",
                generation,
                classifications = batch.len(),
                added = report.added,
                updated = report.updated,
                unchanged = report.unchanged
            );
        }

        let cancelled = self.cancel.is_cancelled();
        let outcomes: Vec<QueryOutcome> = outcomes
            .into_iter()
            .zip(corpus)
            .map(|(o, item)| o.unwrap_or_else(|| cancelled_outcome(item.id(), 0)))
            .collect();

        if let (Some(store), Some(run_id)) = (&self.store, run_id) {
            for o in &outcomes {
                store.insert_terminal(run_id, o)?;
            }
            store.finalize_run(run_id, if cancelled { "cancelled" } else { "completed" })?;
        }

        let artifacts = RunArtifacts {
            name: meta.name.clone(),
            run_id,
            fingerprint: meta.fingerprint.clone(),
            started_at,
            finished_at: chrono::Utc::now().to_rfc3339(),
            generations: generations_run,
            cancelled,
            outcomes,
        };
        tracing::info!(
            event = "run_done",
            run_id = ?run_id,
            queries = artifacts.outcomes.len(),
            wins = artifacts.wins(),
            failed = artifacts.failed(),
            cancelled
        );
        Ok(artifacts)
    }
}
