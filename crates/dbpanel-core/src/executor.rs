//! Transactional execution with bounded retry on serialization conflicts.

use std::time::Instant;

use dbpanel_shared::{
    ExecutionConfig, ExecutionMetrics, ExponentialBackoff, IsolationLevel, RetryConfig,
    RetryPolicy,
};
use tracing::{debug, error, info, instrument, warn};

use crate::error::{PanelError, Result};
use crate::session::{DbError, Session};
use crate::sql::{StatementKind, StatementPlan};
use crate::value::RowSet;

/// Default number of attempts for a write, counting the first.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// What a successfully executed statement produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecOutcome {
    Rows(RowSet),
    Applied(u64),
    /// An UPDATE or DELETE ran cleanly but matched nothing.
    NoRowsMatched,
}

impl ExecOutcome {
    pub fn is_warning(&self) -> bool {
        matches!(self, ExecOutcome::NoRowsMatched)
    }

    fn label(&self) -> &'static str {
        match self {
            ExecOutcome::Rows(_) => "rows",
            ExecOutcome::Applied(_) => "applied",
            ExecOutcome::NoRowsMatched => "no_match",
        }
    }
}

enum AttemptError {
    Conflict(DbError),
    Fatal(DbError),
}

impl From<DbError> for AttemptError {
    fn from(err: DbError) -> Self {
        if err.is_serialization_failure() {
            AttemptError::Conflict(err)
        } else {
            AttemptError::Fatal(err)
        }
    }
}

/// An open transaction on a borrowed session.
///
/// Dropping the scope while the transaction is still open tells the session
/// to roll it back before its next statement, so the isolation level chosen
/// for this transaction never outlives it.
struct TransactionScope<'s, S: Session + ?Sized> {
    session: &'s mut S,
    open: bool,
}

impl<'s, S: Session + ?Sized> TransactionScope<'s, S> {
    async fn begin(session: &'s mut S, isolation: IsolationLevel) -> std::result::Result<Self, DbError> {
        session.begin(isolation).await?;
        Ok(Self {
            session,
            open: true,
        })
    }

    fn session(&mut self) -> &mut S {
        self.session
    }

    async fn commit(mut self) -> std::result::Result<(), DbError> {
        let result = self.session.commit().await;
        if result.is_err() {
            if let Err(err) = self.session.rollback().await {
                debug!(error = %err, "rollback after failed commit");
            }
        }
        self.open = false;
        result
    }

    async fn rollback(mut self) {
        if let Err(err) = self.session.rollback().await {
            error!(error = %err, "rollback failed");
        }
        self.open = false;
    }
}

impl<S: Session + ?Sized> Drop for TransactionScope<'_, S> {
    fn drop(&mut self) {
        if self.open {
            self.session.abandon_transaction();
        }
    }
}

async fn run_statement<S: Session + ?Sized>(
    session: &mut S,
    plan: &StatementPlan,
) -> std::result::Result<ExecOutcome, DbError> {
    if plan.kind() == StatementKind::Select {
        return Ok(ExecOutcome::Rows(session.query(plan.text(), plan.params()).await?));
    }
    let affected = session.execute(plan.text(), plan.params()).await?;
    if affected == 0 && plan.kind().expects_match() {
        Ok(ExecOutcome::NoRowsMatched)
    } else {
        Ok(ExecOutcome::Applied(affected))
    }
}

fn execution_error(plan: &StatementPlan, err: &DbError) -> PanelError {
    PanelError::Execution {
        target: plan.target().to_string(),
        operation: plan.kind().to_string(),
        message: err.message().to_string(),
    }
}

/// Runs write statements inside a transaction, retrying serialization
/// conflicts as the policy allows and nothing else.
#[derive(Debug, Clone)]
pub struct TransactionExecutor<P: RetryPolicy = ExponentialBackoff> {
    policy: P,
    isolation: IsolationLevel,
}

impl TransactionExecutor<ExponentialBackoff> {
    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self::new(
            ExponentialBackoff::new(config.retry_backoff.clone(), config.max_retries),
            config.write_isolation,
        )
    }
}

impl<P: RetryPolicy> TransactionExecutor<P> {
    pub fn new(policy: P, isolation: IsolationLevel) -> Self {
        Self { policy, isolation }
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Same policy, different isolation level.
    pub fn with_isolation(&self, isolation: IsolationLevel) -> Self
    where
        P: Clone,
    {
        Self {
            policy: self.policy.clone(),
            isolation,
        }
    }

    #[instrument(skip(self, session, plan), fields(kind = %plan.kind(), object = %plan.target()))]
    pub async fn execute<S: Session + ?Sized>(
        &self,
        session: &mut S,
        plan: &StatementPlan,
    ) -> Result<ExecOutcome> {
        let started = Instant::now();
        let mut attempt = 1;

        loop {
            match self.attempt(session, plan).await {
                Ok(outcome) => {
                    if attempt > 1 {
                        info!("Statement succeeded after {} attempts", attempt);
                    }
                    if outcome.is_warning() {
                        warn!("Statement matched no rows");
                    }
                    ExecutionMetrics::statement_executed(
                        plan.kind().as_str(),
                        plan.target(),
                        outcome.label(),
                        started.elapsed(),
                    );
                    return Ok(outcome);
                }
                Err(AttemptError::Conflict(err)) => {
                    if !self.policy.should_retry(attempt) {
                        warn!("Serialization conflict on final attempt {}: {}", attempt, err);
                        ExecutionMetrics::retry_exhausted(plan.target());
                        return Err(PanelError::RetryExhausted {
                            target: plan.target().to_string(),
                            operation: plan.kind().to_string(),
                            attempts: attempt,
                            message: err.message().to_string(),
                        });
                    }

                    let delay = self.policy.delay(attempt);
                    warn!(
                        "Serialization conflict (attempt {}/{}), retrying in {:?}: {}",
                        attempt,
                        self.policy.max_attempts(),
                        delay,
                        err
                    );
                    ExecutionMetrics::serialization_retry(plan.target());
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(AttemptError::Fatal(err)) => {
                    warn!("Statement failed on attempt {}: {}", attempt, err);
                    ExecutionMetrics::statement_executed(
                        plan.kind().as_str(),
                        plan.target(),
                        "error",
                        started.elapsed(),
                    );
                    return Err(execution_error(plan, &err));
                }
            }
        }
    }

    async fn attempt<S: Session + ?Sized>(
        &self,
        session: &mut S,
        plan: &StatementPlan,
    ) -> std::result::Result<ExecOutcome, AttemptError> {
        let mut scope = TransactionScope::begin(session, self.isolation).await?;

        match run_statement(scope.session(), plan).await {
            Ok(outcome) => {
                scope.commit().await?;
                Ok(outcome)
            }
            Err(err) => {
                scope.rollback().await;
                Err(err.into())
            }
        }
    }
}

/// Execute `plan` in a transaction at `isolation`, making at most
/// `max_retries` attempts in total.
pub async fn execute_with_retry<S: Session + ?Sized>(
    session: &mut S,
    plan: &StatementPlan,
    isolation: IsolationLevel,
    max_retries: u32,
) -> Result<ExecOutcome> {
    TransactionExecutor::new(
        ExponentialBackoff::new(RetryConfig::default(), max_retries),
        isolation,
    )
    .execute(session, plan)
    .await
}

/// Plain execute-and-fetch for SELECTs: no transaction, no retry.
#[instrument(skip(session, plan), fields(object = %plan.target()))]
pub async fn execute_read_only<S: Session + ?Sized>(
    session: &mut S,
    plan: &StatementPlan,
) -> Result<RowSet> {
    if plan.kind() != StatementKind::Select {
        return Err(PanelError::validation(format!(
            "{} on `{}` cannot run on the read-only path",
            plan.kind(),
            plan.target()
        )));
    }

    let started = Instant::now();
    match session.query(plan.text(), plan.params()).await {
        Ok(rows) => {
            debug!(rows = rows.len(), "Read-only query finished");
            ExecutionMetrics::statement_executed("SELECT", plan.target(), "rows", started.elapsed());
            Ok(rows)
        }
        Err(err) => {
            ExecutionMetrics::statement_executed("SELECT", plan.target(), "error", started.elapsed());
            if err.is_serialization_failure() {
                return Err(PanelError::SerializationConflict(format!(
                    "SELECT on `{}`: {}",
                    plan.target(),
                    err.message()
                )));
            }
            Err(execution_error(plan, &err))
        }
    }
}
