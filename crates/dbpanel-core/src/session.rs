//! The database session contract the core runs against.
//!
//! A session is one live connection owned by one logged-in user. The core
//! never shares it between concurrent callers; every method takes `&mut self`.

use async_trait::async_trait;
use dbpanel_shared::IsolationLevel;
use thiserror::Error;

use crate::value::{RowSet, SqlValue};

/// SQLSTATE for `serialization_failure`.
pub const SQLSTATE_SERIALIZATION_FAILURE: &str = "40001";
/// SQLSTATE for `deadlock_detected`.
pub const SQLSTATE_DEADLOCK_DETECTED: &str = "40P01";

/// A failure reported by the database or the connection under it.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct DbError {
    sqlstate: Option<String>,
    message: String,
}

impl DbError {
    pub fn new(sqlstate: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            sqlstate: sqlstate.map(str::to_string),
            message: message.into(),
        }
    }

    pub fn sqlstate(&self) -> Option<&str> {
        self.sqlstate.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Two concurrent transactions could not be serialized; retrying may succeed.
    pub fn is_serialization_failure(&self) -> bool {
        matches!(
            self.sqlstate(),
            Some(SQLSTATE_SERIALIZATION_FAILURE) | Some(SQLSTATE_DEADLOCK_DETECTED)
        )
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => DbError::new(db.code().as_deref(), db.message()),
            other => DbError::new(None, other.to_string()),
        }
    }
}

#[async_trait]
pub trait Session: Send {
    /// Run a row-returning statement and collect its result set.
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<RowSet, DbError>;

    /// Run a statement for its effect; returns the affected row count.
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, DbError>;

    /// Open a transaction at the given isolation level.
    ///
    /// The level applies to this transaction only; the connection's default
    /// is back in force once it commits or rolls back.
    async fn begin(&mut self, isolation: IsolationLevel) -> Result<(), DbError>;

    async fn commit(&mut self) -> Result<(), DbError>;

    async fn rollback(&mut self) -> Result<(), DbError>;

    /// Called when a transaction scope is dropped while still open, e.g.
    /// because the future driving it was cancelled. The session must roll
    /// that transaction back before it runs anything else.
    fn abandon_transaction(&mut self);

    /// First row of a result set, if any.
    async fn query_one(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Option<Vec<SqlValue>>, DbError> {
        let rows = self.query(sql, params).await?;
        Ok(rows.rows.into_iter().next())
    }
}
