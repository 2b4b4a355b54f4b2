//! Scripted in-memory session used by the unit tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use dbpanel_shared::IsolationLevel;

use crate::session::{DbError, Session};
use crate::sql::StatementPlan;
use crate::value::{RowSet, SqlValue};

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Rows(RowSet),
    Affected(u64),
    Fail(DbError),
}

#[derive(Debug, Default)]
pub(crate) struct ScriptedSession {
    /// Replies chosen by a substring of the statement text; reusable.
    rules: Vec<(String, Reply)>,
    /// Replies consumed in order when no rule matches.
    queue: VecDeque<Reply>,
    commit_failures: VecDeque<DbError>,
    pub statements: Vec<(String, Vec<SqlValue>)>,
    pub events: Vec<String>,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, needle: &str, reply: Reply) -> Self {
        self.rules.push((needle.to_string(), reply));
        self
    }

    pub fn then(mut self, reply: Reply) -> Self {
        self.queue.push_back(reply);
        self
    }

    pub fn fail_next_commit(mut self, err: DbError) -> Self {
        self.commit_failures.push_back(err);
        self
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.iter().filter(|e| e.as_str() == event).count()
    }

    pub fn attempts(&self) -> usize {
        self.events.iter().filter(|e| e.starts_with("BEGIN")).count()
    }

    fn next_reply(&mut self, sql: &str) -> Option<Reply> {
        if let Some((_, reply)) = self.rules.iter().find(|(needle, _)| sql.contains(needle.as_str())) {
            return Some(reply.clone());
        }
        self.queue.pop_front()
    }
}

pub(crate) fn rows(columns: &[&str], rows: Vec<Vec<SqlValue>>) -> Reply {
    Reply::Rows(RowSet::new(
        columns.iter().map(|c| c.to_string()).collect(),
        rows,
    ))
}

pub(crate) fn conflict() -> DbError {
    DbError::new(Some("40001"), "could not serialize access due to concurrent update")
}

pub(crate) fn fatal(message: &str) -> DbError {
    DbError::new(Some("P0001"), message)
}

#[async_trait]
impl Session for ScriptedSession {
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<RowSet, DbError> {
        self.statements.push((sql.to_string(), params.to_vec()));
        match self.next_reply(sql) {
            Some(Reply::Rows(rs)) => Ok(rs),
            Some(Reply::Fail(err)) => Err(err),
            Some(Reply::Affected(_)) | None => Ok(RowSet::default()),
        }
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        self.statements.push((sql.to_string(), params.to_vec()));
        match self.next_reply(sql) {
            Some(Reply::Affected(n)) => Ok(n),
            Some(Reply::Fail(err)) => Err(err),
            Some(Reply::Rows(rs)) => Ok(rs.len() as u64),
            None => Ok(1),
        }
    }

    async fn begin(&mut self, isolation: IsolationLevel) -> Result<(), DbError> {
        self.events.push(format!("BEGIN {isolation}"));
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        self.events.push("COMMIT".to_string());
        match self.commit_failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        self.events.push("ROLLBACK".to_string());
        Ok(())
    }

    fn abandon_transaction(&mut self) {
        self.events.push("ABANDON".to_string());
    }
}

/// Every bound value that could carry SQL must be absent from the text.
/// Bare digits are skipped since they collide with `$n`.
pub(crate) fn assert_values_not_in_text(plan: &StatementPlan) {
    for param in plan.params() {
        let rendered = match param {
            SqlValue::Null => continue,
            other => other.to_string(),
        };
        if rendered.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        assert!(
            !plan.text().contains(rendered.as_str()),
            "value {rendered:?} leaked into {:?}",
            plan.text()
        );
    }
}
