use crate::errors::EngineError;
use crate::model::Bindings;
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub mod replay;
pub mod result;

pub use result::{ExecOutput, ResultSet};

/// A live connection to the target engine. Sessions are owned by exactly one
/// worker and used sequentially.
#[async_trait]
pub trait EngineSession: Send {
    async fn execute(&mut self, sql: &str, bindings: &Bindings)
        -> Result<ExecOutput, EngineError>;

    /// Abort whatever the session is currently running.
    async fn cancel(&mut self);

    fn engine_name(&self) -> &'static str;
}

#[async_trait]
pub trait EngineConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn EngineSession>, EngineError>;
    fn engine_name(&self) -> &'static str;
    fn fingerprint(&self) -> Option<String> {
        None
    }
}

/// Runs one statement under a hard wall-clock budget, racing it against the
/// cancellation token. On timeout or cancellation the in-flight query is
/// cancelled on the session before returning.
pub async fn execute_bounded(
    session: &mut dyn EngineSession,
    sql: &str,
    bindings: &Bindings,
    budget: Duration,
    cancel: &CancellationToken,
) -> Result<ExecOutput, EngineError> {
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(EngineError::Cancelled),
        r = tokio::time::timeout(budget, session.execute(sql, bindings)) => match r {
            Ok(res) => res,
            Err(_) => Err(EngineError::Timeout(budget)),
        },
    };
    if matches!(
        outcome,
        Err(EngineError::Timeout(_)) | Err(EngineError::Cancelled)
    ) {
        tracing::debug!(
            event = "engine_cancel",
            engine = session.engine_name(),
            reason = ?outcome.as_ref().err()
        );
        session.cancel().await;
    }
    outcome
}
